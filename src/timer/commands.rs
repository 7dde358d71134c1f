use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::Local;
use serde_json::json;

use crate::{auth::UserId, settings::TimerSettings, AppState};

use super::{FlushOutcome, LifecycleEvent, Visibility};

/// Days shown in the `stats` chart.
const RECENT_DAYS: u32 = 7;

/// One line of host input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    SignIn(UserId),
    SignOut,
    Show,
    Hide,
    Focus,
    Blur,
    Unload,
    Flush,
    Note,
    Stats,
    FlushEvery(u64),
    Quit,
}

impl FromStr for HostCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| anyhow!("empty command"))?;
        let command = match verb.to_ascii_lowercase().as_str() {
            "signin" => {
                let user = parts
                    .next()
                    .ok_or_else(|| anyhow!("usage: signin <uid>"))?;
                HostCommand::SignIn(user.parse()?)
            }
            "signout" => HostCommand::SignOut,
            "show" => HostCommand::Show,
            "hide" => HostCommand::Hide,
            "focus" => HostCommand::Focus,
            "blur" => HostCommand::Blur,
            "unload" => HostCommand::Unload,
            "flush" => HostCommand::Flush,
            "note" => HostCommand::Note,
            "stats" => HostCommand::Stats,
            "flushevery" => {
                let secs = parts
                    .next()
                    .ok_or_else(|| anyhow!("usage: flushevery <secs>"))?
                    .parse::<u64>()
                    .map_err(|err| anyhow!("invalid interval: {err}"))?;
                if secs == 0 {
                    bail!("flush interval must be at least 1 second");
                }
                HostCommand::FlushEvery(secs)
            }
            "quit" | "exit" => HostCommand::Quit,
            other => bail!("unknown command '{other}'"),
        };
        if parts.next().is_some() {
            bail!("unexpected arguments after '{verb}'");
        }
        Ok(command)
    }
}

fn describe(outcome: Option<FlushOutcome>) -> String {
    match outcome {
        None => "ok".into(),
        Some(FlushOutcome::Idle) => "nothing to flush".into(),
        Some(FlushOutcome::Busy) => "flush already in flight".into(),
        Some(FlushOutcome::Flushed { seconds, applied }) => {
            format!("flushed {seconds}s ({applied}s new)")
        }
        Some(FlushOutcome::Failed) => "flush failed; will retry".into(),
    }
}

/// Runs one command and returns the line to print.
pub async fn execute(app: &AppState, command: HostCommand) -> Result<String> {
    let timer = &app.timer;
    let reply = match command {
        HostCommand::SignIn(user) => {
            app.auth.sign_in(user.clone());
            format!("signed in as {user}")
        }
        HostCommand::SignOut => {
            app.auth.sign_out();
            "signed out".into()
        }
        HostCommand::Show => describe(
            timer
                .handle_event(LifecycleEvent::Visibility(Visibility::Visible))
                .await,
        ),
        HostCommand::Hide => describe(
            timer
                .handle_event(LifecycleEvent::Visibility(Visibility::Hidden))
                .await,
        ),
        HostCommand::Focus => describe(timer.handle_event(LifecycleEvent::Focus).await),
        HostCommand::Blur => describe(timer.handle_event(LifecycleEvent::Blur).await),
        HostCommand::Unload => describe(timer.handle_event(LifecycleEvent::BeforeUnload).await),
        HostCommand::Flush => describe(Some(timer.flush().await)),
        HostCommand::Note => {
            let user = app
                .auth
                .current()
                .ok_or_else(|| anyhow!("sign in first"))?;
            let count = app.metrics.record_note_created(&user).await?;
            format!("notes created: {count}")
        }
        HostCommand::Stats => {
            let snapshot = timer.get_snapshot().await;
            let (metrics, recent) = match &snapshot.user {
                Some(user) => (
                    app.metrics.metrics(user).await?,
                    app.metrics
                        .recent_days(user, Local::now().date_naive(), RECENT_DAYS)
                        .await?,
                ),
                None => (None, Vec::new()),
            };
            serde_json::to_string_pretty(&json!({
                "timer": snapshot,
                "metrics": metrics,
                "recentDays": recent,
            }))?
        }
        HostCommand::FlushEvery(secs) => {
            let settings = TimerSettings {
                flush_interval_secs: secs,
                ..app.settings.timer()
            };
            app.settings.update_timer(settings)?;
            format!("flush interval set to {secs}s from the next start")
        }
        HostCommand::Quit => "bye".into(),
    };
    Ok(reply)
}
