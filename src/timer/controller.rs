use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::UserId,
    metrics::{apply_contribution, Contribution, StudyMetrics},
    mirror::{PendingEntry, PendingMirror},
    settings::TimerSettings,
    store::{MetricsStore, UpdateFn},
};

use super::{Handoff, LifecycleEvent, TimerState, Visibility};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub user: Option<UserId>,
    pub pending_seconds: u64,
    pub committed_seconds: u64,
    pub visibility: Visibility,
    pub focused: bool,
    pub counting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No user, or nothing accumulated; the store was not contacted.
    Idle,
    /// Another flush held the guard.
    Busy,
    /// `seconds` were acknowledged; `applied` of them were new to the store.
    Flushed { seconds: u64, applied: u64 },
    /// The store rejected the write; local state is untouched.
    Failed,
}

struct Workers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Releases the flush guard when dropped.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts foreground study seconds for the signed-in user and folds them
/// into the user's metrics record.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    flushing: Arc<AtomicBool>,
    store: Arc<dyn MetricsStore>,
    mirror: Arc<dyn PendingMirror>,
    settings: TimerSettings,
    live: Arc<watch::Sender<u64>>,
    workers: Arc<Mutex<Option<Workers>>>,
}

impl TimerController {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        mirror: Arc<dyn PendingMirror>,
        settings: TimerSettings,
    ) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(TimerState::new())),
            flushing: Arc::new(AtomicBool::new(false)),
            store,
            mirror,
            settings,
            live: Arc::new(live),
            workers: Arc::new(Mutex::new(None)),
        }
    }

    /// Seconds counted since the last flush, updated every tick.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.live.subscribe()
    }

    pub async fn get_snapshot(&self) -> TimerSnapshot {
        let state = self.state.lock().await;
        TimerSnapshot {
            user: state.user.clone(),
            pending_seconds: state.pending_seconds,
            committed_seconds: state.committed_seconds,
            visibility: state.visibility,
            focused: state.focused,
            counting: state.is_counting(),
        }
    }

    /// Starts ticking, periodic flushing, and following `auth`.
    pub async fn start(&self, mut auth: watch::Receiver<Option<UserId>>) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            bail!("timer already started");
        }

        let initial = auth.borrow_and_update().clone();
        self.switch_user(initial).await;

        let cancel = CancellationToken::new();
        let handles = vec![
            self.spawn_ticker(cancel.clone()),
            self.spawn_flusher(cancel.clone()),
            self.spawn_auth_watcher(auth, cancel.clone()),
        ];
        *workers = Some(Workers { cancel, handles });

        log_info!(
            "Timer started (tick {:?}, flush every {:?})",
            self.settings.tick_interval(),
            self.settings.flush_interval()
        );
        Ok(())
    }

    /// Stops the background tasks and makes a final flush attempt.
    pub async fn stop(&self) -> FlushOutcome {
        let workers = self.workers.lock().await.take();
        if let Some(Workers { cancel, handles }) = workers {
            cancel.cancel();
            for handle in handles {
                if let Err(err) = handle.await {
                    log_error!("Timer task failed to join: {err}");
                }
            }
            log_info!("Timer stopped");
        }
        self.flush().await
    }

    pub async fn handle_event(&self, event: LifecycleEvent) -> Option<FlushOutcome> {
        let should_flush = self.state.lock().await.apply(event);
        log_debug!("Lifecycle event {event:?}");
        if should_flush {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Counts one second if the surface is visible and focused.
    pub async fn tick(&self) -> bool {
        self.tick_at(Utc::now()).await
    }

    async fn tick_at(&self, now: DateTime<Utc>) -> bool {
        let (user, entry) = {
            let mut state = self.state.lock().await;
            if !state.is_counting() {
                return false;
            }
            let Some(user) = state.user.clone() else {
                return false;
            };

            state.pending_seconds = state.pending_seconds.saturating_add(1);
            self.live.send_replace(state.pending_seconds);
            (user, state.mirror_entry(now.timestamp_millis()))
        };

        self.write_mirror(user, Some(entry)).await;
        true
    }

    /// Flushes the accumulated seconds of the current user.
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_at(Local::now().fixed_offset()).await
    }

    async fn flush_at(&self, at: DateTime<FixedOffset>) -> FlushOutcome {
        let Some(_guard) = self.try_begin_flush() else {
            log_debug!("Flush skipped: another flush in flight");
            return FlushOutcome::Busy;
        };

        let (user, contribution, flushed) = {
            let state = self.state.lock().await;
            let Some(user) = state.user.clone() else {
                return FlushOutcome::Idle;
            };
            if state.pending_seconds == 0 {
                return FlushOutcome::Idle;
            }
            (user, state.contribution(), state.pending_seconds)
        };

        match self.commit(&user, contribution, at).await {
            Ok(applied) => {
                let remaining = {
                    let mut state = self.state.lock().await;
                    if state.acknowledge(&user, contribution.session_id, flushed) {
                        self.live.send_replace(state.pending_seconds);
                        let now_ms = Utc::now().timestamp_millis();
                        Some((state.pending_seconds > 0).then(|| state.mirror_entry(now_ms)))
                    } else {
                        None
                    }
                };
                if let Some(entry) = remaining {
                    self.write_mirror(user.clone(), entry).await;
                }
                log_info!("Flushed {flushed}s for {user} ({applied}s new)");
                FlushOutcome::Flushed {
                    seconds: flushed,
                    applied,
                }
            }
            Err(err) => {
                log_warn!("Flush for {user} failed, will retry: {err:#}");
                FlushOutcome::Failed
            }
        }
    }

    /// Flushes seconds owed to a user who is no longer the current one.
    ///
    /// Waits for any in-flight flush to release the guard first.
    pub async fn flush_handoff(&self, handoff: Handoff) -> FlushOutcome {
        self.flush_handoff_at(handoff, Local::now().fixed_offset())
            .await
    }

    async fn flush_handoff_at(&self, handoff: Handoff, at: DateTime<FixedOffset>) -> FlushOutcome {
        let _guard = loop {
            if let Some(guard) = self.try_begin_flush() {
                break guard;
            }
            time::sleep(self.settings.guard_poll()).await;
        };

        if handoff.seconds == 0 {
            return FlushOutcome::Idle;
        }

        let user = handoff.user.clone();
        match self.commit(&user, handoff.contribution(), at).await {
            Ok(applied) => {
                self.write_mirror(user.clone(), None).await;
                log_info!("Handed off {}s for {user} ({applied}s new)", handoff.seconds);
                FlushOutcome::Flushed {
                    seconds: handoff.seconds,
                    applied,
                }
            }
            Err(err) => {
                // Backdated so the next sign-in treats it as abandoned.
                let backdated = Utc::now().timestamp_millis()
                    - self.settings.stale_after_ms().saturating_add(1);
                let entry = handoff.mirror_entry(backdated);
                self.write_mirror(user.clone(), Some(entry)).await;
                log_warn!(
                    "Handoff of {}s for {user} failed; left in mirror: {err:#}",
                    handoff.seconds
                );
                FlushOutcome::Failed
            }
        }
    }

    /// Moves the timer to `next`, settling the outgoing user's time first and
    /// recovering time the incoming user left behind in the mirror.
    pub async fn switch_user(&self, next: Option<UserId>) {
        let handoff = {
            let mut state = self.state.lock().await;
            if state.user == next {
                return;
            }
            let handoff = state.take_handoff();
            self.live.send_replace(0);
            handoff
        };

        if let Some(handoff) = handoff {
            self.flush_handoff(handoff).await;
        }

        // Read the incoming user's leftovers while no user is installed, so no
        // tick can overwrite the entry first.
        let recovered = match &next {
            Some(user) => self.recoverable(user, Utc::now()).await,
            None => None,
        };

        {
            let mut state = self.state.lock().await;
            state.begin_user(next.clone());
            if let Some((entry, keep_session)) = &recovered {
                state.adopt(entry, *keep_session);
            }
            self.live.send_replace(state.pending_seconds);
        }

        match &next {
            Some(user) => log_info!("Timer following {user}"),
            None => log_info!("Timer signed out"),
        }

        if let (Some(user), Some((entry, _))) = (&next, &recovered) {
            log_info!("Recovered {}s of unflushed time for {user}", entry.pending);
            self.flush().await;
        }
    }

    /// A stale, non-empty mirror entry for `user`, and whether its session is
    /// still recent enough for the store's ledger to remember it.
    async fn recoverable(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Option<(PendingEntry, bool)> {
        let mirror = Arc::clone(&self.mirror);
        let key = user.clone();
        let loaded = tokio::task::spawn_blocking(move || mirror.load(&key)).await;
        let entry = match loaded {
            Ok(Ok(Some(entry))) => entry,
            Ok(Ok(None)) => return None,
            Ok(Err(err)) => {
                log_debug!("Mirror read for {user} failed: {err:#}");
                return None;
            }
            Err(err) => {
                log_error!("Mirror read task for {user} failed: {err}");
                return None;
            }
        };

        let now_ms = now.timestamp_millis();
        if entry.pending == 0 || !entry.is_stale(now_ms, self.settings.stale_after_ms()) {
            return None;
        }

        let age_ms = now_ms.saturating_sub(entry.updated_at);
        let keep_session = age_ms < self.settings.ledger_retention().num_milliseconds();
        Some((entry, keep_session))
    }

    async fn commit(
        &self,
        user: &UserId,
        contribution: Contribution,
        at: DateTime<FixedOffset>,
    ) -> Result<u64> {
        let retention = self.settings.ledger_retention();
        let applied = Arc::new(AtomicU64::new(0));
        let applied_slot = Arc::clone(&applied);

        let update: UpdateFn = Box::new(move |current: Option<&StudyMetrics>| {
            let (next, added) = apply_contribution(current, &contribution, &at, retention);
            applied_slot.store(added, Ordering::Relaxed);
            Some(next)
        });

        self.store.transact(user, update).await?;
        Ok(applied.load(Ordering::Relaxed))
    }

    /// Saves `entry` for `user`, or clears it when `None`, off the runtime
    /// threads.
    async fn write_mirror(&self, user: UserId, entry: Option<PendingEntry>) {
        let mirror = Arc::clone(&self.mirror);
        let key = user.clone();
        let written = tokio::task::spawn_blocking(move || match &entry {
            Some(entry) => mirror.save(&key, entry),
            None => mirror.clear(&key),
        })
        .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log_debug!("Mirror update for {user} failed: {err:#}"),
            Err(err) => log_error!("Mirror task for {user} failed: {err}"),
        }
    }

    fn try_begin_flush(&self) -> Option<FlushGuard<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(&self.flushing))
    }

    fn spawn_ticker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.settings.tick_interval();

        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.tick().await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_flusher(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.settings.flush_interval();

        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.flush().await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_auth_watcher(
        &self,
        mut auth: watch::Receiver<Option<UserId>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = auth.changed() => {
                        if changed.is_err() {
                            log_info!("Auth source closed; timer keeps its last user");
                            break;
                        }
                        let next = auth.borrow_and_update().clone();
                        controller.switch_user(next).await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::AuthState,
        mirror::MemoryMirror,
        store::MemoryMetricsStore,
    };
    use async_trait::async_trait;
    use std::{sync::atomic::AtomicUsize, time::Duration};
    use uuid::Uuid;

    /// Memory store that counts transactions and can be told to fail, or to
    /// commit and then report failure.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryMetricsStore,
        calls: AtomicUsize,
        fail: AtomicBool,
        lose_ack: AtomicBool,
    }

    #[async_trait]
    impl MetricsStore for ScriptedStore {
        async fn read(&self, user: &UserId) -> Result<Option<StudyMetrics>> {
            self.inner.read(user).await
        }

        async fn transact(
            &self,
            user: &UserId,
            update: UpdateFn,
        ) -> Result<Option<StudyMetrics>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                bail!("network unavailable");
            }
            let written = self.inner.transact(user, update).await?;
            if self.lose_ack.load(Ordering::SeqCst) {
                bail!("connection reset after commit");
            }
            Ok(written)
        }
    }

    struct Harness {
        store: Arc<ScriptedStore>,
        mirror: Arc<MemoryMirror>,
        timer: TimerController,
    }

    fn harness() -> Harness {
        let store = Arc::new(ScriptedStore::default());
        let mirror = Arc::new(MemoryMirror::new());
        let timer = TimerController::new(
            store.clone(),
            mirror.clone(),
            TimerSettings {
                guard_poll_ms: 1,
                ..TimerSettings::default()
            },
        );
        Harness {
            store,
            mirror,
            timer,
        }
    }

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).unwrap()
    }

    async fn tick_n(timer: &TimerController, n: u64) {
        for _ in 0..n {
            timer.tick_at(Utc::now()).await;
        }
    }

    async fn stored(h: &Harness, raw: &str) -> StudyMetrics {
        h.store.read(&user(raw)).await.unwrap().unwrap_or_default()
    }

    #[tokio::test]
    async fn ticks_are_ignored_without_a_user() {
        let h = harness();
        assert!(!h.timer.tick_at(Utc::now()).await);
        assert_eq!(h.timer.flush().await, FlushOutcome::Idle);
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ticks_count_only_while_visible_and_focused() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        let live = h.timer.subscribe();

        tick_n(&h.timer, 3).await;
        h.timer.state.lock().await.apply(LifecycleEvent::Blur);
        tick_n(&h.timer, 5).await;
        h.timer.state.lock().await.apply(LifecycleEvent::Focus);
        h.timer
            .state
            .lock()
            .await
            .apply(LifecycleEvent::Visibility(Visibility::Hidden));
        tick_n(&h.timer, 5).await;

        assert_eq!(h.timer.get_snapshot().await.pending_seconds, 3);
        assert_eq!(*live.borrow(), 3);
        assert_eq!(h.mirror.load(&user("alice")).unwrap().unwrap().pending, 3);
    }

    #[tokio::test]
    async fn flush_without_seconds_skips_the_store() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;

        assert_eq!(h.timer.flush().await, FlushOutcome::Idle);
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_flush_resets_counter_and_mirror() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 42).await;

        let outcome = h.timer.flush_at(at("2024-01-01T10:00:00Z")).await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                seconds: 42,
                applied: 42
            }
        );

        let snapshot = h.timer.get_snapshot().await;
        assert_eq!(snapshot.pending_seconds, 0);
        assert_eq!(snapshot.committed_seconds, 42);
        assert_eq!(*h.timer.subscribe().borrow(), 0);
        assert_eq!(h.mirror.load(&user("alice")).unwrap(), None);
        assert_eq!(stored(&h, "alice").await.today_seconds, 42);
    }

    #[tokio::test]
    async fn failed_flush_keeps_counter_and_mirror() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 10).await;
        h.store.fail.store(true, Ordering::SeqCst);

        assert_eq!(h.timer.flush().await, FlushOutcome::Failed);
        assert_eq!(h.timer.get_snapshot().await.pending_seconds, 10);
        assert_eq!(h.mirror.load(&user("alice")).unwrap().unwrap().pending, 10);

        h.store.fail.store(false, Ordering::SeqCst);
        tick_n(&h.timer, 5).await;
        let outcome = h.timer.flush_at(at("2024-01-01T10:00:00Z")).await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                seconds: 15,
                applied: 15
            }
        );
        assert_eq!(stored(&h, "alice").await.today_seconds, 15);
    }

    #[tokio::test]
    async fn retry_after_lost_acknowledgement_does_not_double_count() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 20).await;

        h.store.lose_ack.store(true, Ordering::SeqCst);
        assert_eq!(
            h.timer.flush_at(at("2024-01-01T10:00:00Z")).await,
            FlushOutcome::Failed
        );
        assert_eq!(stored(&h, "alice").await.today_seconds, 20);

        h.store.lose_ack.store(false, Ordering::SeqCst);
        tick_n(&h.timer, 5).await;
        let outcome = h.timer.flush_at(at("2024-01-01T10:00:10Z")).await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                seconds: 25,
                applied: 5
            }
        );
        assert_eq!(stored(&h, "alice").await.today_seconds, 25);
    }

    #[tokio::test]
    async fn concurrent_flush_is_skipped() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 3).await;

        let guard = h.timer.try_begin_flush().unwrap();
        assert_eq!(h.timer.flush().await, FlushOutcome::Busy);
        drop(guard);
        assert!(matches!(h.timer.flush().await, FlushOutcome::Flushed { .. }));
    }

    #[tokio::test]
    async fn handoff_waits_for_the_guard() {
        let h = harness();
        let flushing = Arc::clone(&h.timer.flushing);
        flushing.store(true, Ordering::SeqCst);

        let handoff = Handoff {
            user: user("alice"),
            seconds: 30,
            session_id: Uuid::new_v4(),
            committed: 0,
        };
        let task = {
            let timer = h.timer.clone();
            tokio::spawn(async move { timer.flush_handoff(handoff).await })
        };

        time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);

        flushing.store(false, Ordering::SeqCst);
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Flushed { seconds: 30, .. }));
        assert!(!h.timer.flushing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sign_out_hands_off_pending_seconds() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 12).await;

        h.timer.switch_user(None).await;

        assert_eq!(stored(&h, "alice").await.today_seconds, 12);
        assert_eq!(h.mirror.load(&user("alice")).unwrap(), None);
        let snapshot = h.timer.get_snapshot().await;
        assert_eq!(snapshot.user, None);
        assert_eq!(snapshot.pending_seconds, 0);
        assert!(!h.timer.tick_at(Utc::now()).await);
    }

    #[tokio::test]
    async fn failed_handoff_is_recovered_at_next_sign_in() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 8).await;

        h.store.fail.store(true, Ordering::SeqCst);
        h.timer.switch_user(Some(user("bob"))).await;
        assert_eq!(h.mirror.load(&user("alice")).unwrap().unwrap().pending, 8);

        h.store.fail.store(false, Ordering::SeqCst);
        let mut entry = h.mirror.load(&user("alice")).unwrap().unwrap();
        entry.updated_at -= 10_000;
        h.mirror.save(&user("alice"), &entry).unwrap();

        h.timer.switch_user(Some(user("alice"))).await;
        assert_eq!(stored(&h, "alice").await.today_seconds, 8);
        assert_eq!(h.mirror.load(&user("alice")).unwrap(), None);
        assert_eq!(h.timer.get_snapshot().await.pending_seconds, 0);
    }

    #[tokio::test]
    async fn failed_handoff_survives_an_immediate_sign_back_in() {
        let h = harness();
        let alice = user("alice");
        h.timer.switch_user(Some(alice.clone())).await;
        tick_n(&h.timer, 8).await;

        h.store.fail.store(true, Ordering::SeqCst);
        h.timer.switch_user(None).await;
        h.store.fail.store(false, Ordering::SeqCst);

        h.timer.switch_user(Some(alice.clone())).await;
        assert_eq!(stored(&h, "alice").await.today_seconds, 8);

        tick_n(&h.timer, 1).await;
        assert!(matches!(
            h.timer.flush().await,
            FlushOutcome::Flushed { seconds: 1, .. }
        ));
        h.timer.switch_user(None).await;
        h.timer.switch_user(Some(alice.clone())).await;

        assert_eq!(stored(&h, "alice").await.today_seconds, 9);
        assert_eq!(h.mirror.load(&alice).unwrap(), None);
    }

    #[tokio::test]
    async fn fresh_mirror_entry_is_left_alone() {
        let h = harness();
        let alice = user("alice");
        h.mirror
            .save(
                &alice,
                &PendingEntry {
                    pending: 50,
                    updated_at: Utc::now().timestamp_millis(),
                    session_id: Some(Uuid::new_v4()),
                    committed: 0,
                },
            )
            .unwrap();

        h.timer.switch_user(Some(alice.clone())).await;

        assert_eq!(h.timer.get_snapshot().await.pending_seconds, 0);
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
        assert!(h.mirror.load(&alice).unwrap().is_some());
    }

    #[tokio::test]
    async fn recovered_time_already_flushed_is_not_counted_again() {
        let h = harness();
        let alice = user("alice");
        h.timer.switch_user(Some(alice.clone())).await;
        tick_n(&h.timer, 15).await;

        // Crash between the remote commit and the mirror cleanup.
        let crashed = h
            .timer
            .state
            .lock()
            .await
            .mirror_entry(Utc::now().timestamp_millis() - 10_000);
        h.timer.flush().await;
        h.mirror.save(&alice, &crashed).unwrap();

        let restarted = TimerController::new(
            h.store.clone(),
            h.mirror.clone(),
            TimerSettings::default(),
        );
        restarted.switch_user(Some(alice.clone())).await;

        assert_eq!(stored(&h, "alice").await.today_seconds, 15);
        assert_eq!(h.mirror.load(&alice).unwrap(), None);
    }

    #[tokio::test]
    async fn lifecycle_events_trigger_flushes() {
        let h = harness();
        h.timer.switch_user(Some(user("alice"))).await;
        tick_n(&h.timer, 4).await;

        assert_eq!(h.timer.handle_event(LifecycleEvent::Focus).await, None);
        assert!(matches!(
            h.timer.handle_event(LifecycleEvent::Blur).await,
            Some(FlushOutcome::Flushed { seconds: 4, .. })
        ));
        assert_eq!(
            h.timer.handle_event(LifecycleEvent::BeforeUnload).await,
            Some(FlushOutcome::Idle)
        );
    }

    #[tokio::test]
    async fn start_follows_auth_and_stop_flushes() {
        let h = harness();
        let auth = AuthState::new();
        auth.sign_in(user("alice"));

        h.timer.start(auth.subscribe()).await.unwrap();
        assert!(h.timer.start(auth.subscribe()).await.is_err());
        assert_eq!(h.timer.get_snapshot().await.user, Some(user("alice")));

        tick_n(&h.timer, 6).await;
        auth.sign_in(user("bob"));
        for _ in 0..100 {
            if h.timer.get_snapshot().await.user == Some(user("bob")) {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.timer.get_snapshot().await.user, Some(user("bob")));
        assert_eq!(stored(&h, "alice").await.today_seconds, 6);

        tick_n(&h.timer, 2).await;
        assert!(matches!(
            h.timer.stop().await,
            FlushOutcome::Flushed { .. }
        ));
        assert_eq!(stored(&h, "bob").await.today_seconds, 2);
    }
}
