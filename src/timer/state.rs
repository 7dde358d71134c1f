use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{auth::UserId, metrics::Contribution, mirror::PendingEntry};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Host surface events the timer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Visibility(Visibility),
    Focus,
    Blur,
    BeforeUnload,
}

/// Seconds owed to a user whose context is being torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub user: UserId,
    pub seconds: u64,
    pub session_id: Uuid,
    pub committed: u64,
}

impl Handoff {
    pub fn contribution(&self) -> Contribution {
        Contribution::new(self.session_id, self.committed.saturating_add(self.seconds))
    }

    pub fn mirror_entry(&self, updated_at: i64) -> PendingEntry {
        PendingEntry {
            pending: self.seconds,
            updated_at,
            session_id: Some(self.session_id),
            committed: self.committed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimerState {
    pub user: Option<UserId>,
    pub session_id: Uuid,
    /// Seconds counted since the last acknowledged flush.
    pub pending_seconds: u64,
    /// Seconds of this session the store has acknowledged.
    pub committed_seconds: u64,
    pub visibility: Visibility,
    pub focused: bool,
    /// The session was taken over from a recovered mirror entry.
    pub adopted: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            user: None,
            session_id: Uuid::new_v4(),
            pending_seconds: 0,
            committed_seconds: 0,
            visibility: Visibility::default(),
            focused: true,
            adopted: false,
        }
    }
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_counting(&self) -> bool {
        self.user.is_some() && self.visibility == Visibility::Visible && self.focused
    }

    /// Applies a surface event; returns whether it should trigger a flush.
    pub fn apply(&mut self, event: LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::Visibility(visibility) => {
                self.visibility = visibility;
                visibility == Visibility::Hidden
            }
            LifecycleEvent::Focus => {
                self.focused = true;
                false
            }
            LifecycleEvent::Blur => {
                self.focused = false;
                true
            }
            LifecycleEvent::BeforeUnload => true,
        }
    }

    pub fn contribution(&self) -> Contribution {
        Contribution::new(
            self.session_id,
            self.committed_seconds.saturating_add(self.pending_seconds),
        )
    }

    pub fn mirror_entry(&self, now_ms: i64) -> PendingEntry {
        PendingEntry {
            pending: self.pending_seconds,
            updated_at: now_ms,
            session_id: Some(self.session_id),
            committed: self.committed_seconds,
        }
    }

    /// Detaches the outgoing user's unflushed seconds, leaving no user behind.
    pub fn take_handoff(&mut self) -> Option<Handoff> {
        let user = self.user.take()?;
        let handoff = (self.pending_seconds > 0).then(|| Handoff {
            user,
            seconds: self.pending_seconds,
            session_id: self.session_id,
            committed: self.committed_seconds,
        });
        self.pending_seconds = 0;
        handoff
    }

    pub fn begin_user(&mut self, user: Option<UserId>) {
        self.user = user;
        self.rotate_session();
    }

    /// Resumes a recovered entry on top of anything already counted. Entries
    /// without a session, or too old for the store to still remember their
    /// session, continue on the current one.
    pub fn adopt(&mut self, entry: &PendingEntry, keep_session: bool) {
        self.pending_seconds = self.pending_seconds.saturating_add(entry.pending);
        if let Some(session_id) = entry.session_id.filter(|_| keep_session) {
            self.session_id = session_id;
            self.committed_seconds = entry.committed;
            self.adopted = true;
        }
    }

    /// Records a successful flush of `flushed` seconds. Ignored if the user or
    /// session changed while the flush was in flight.
    pub fn acknowledge(&mut self, user: &UserId, session_id: Uuid, flushed: u64) -> bool {
        if self.user.as_ref() != Some(user) || self.session_id != session_id {
            return false;
        }
        self.pending_seconds = self.pending_seconds.saturating_sub(flushed);
        self.committed_seconds = self.committed_seconds.saturating_add(flushed);
        // An adopted session may still be live elsewhere; once drained, count
        // on a session of our own.
        if self.adopted && self.pending_seconds == 0 {
            self.rotate_session();
        }
        true
    }

    fn rotate_session(&mut self) {
        self.session_id = Uuid::new_v4();
        self.pending_seconds = 0;
        self.committed_seconds = 0;
        self.adopted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[test]
    fn counts_only_when_signed_in_visible_and_focused() {
        let mut state = TimerState::new();
        assert!(!state.is_counting());

        state.begin_user(Some(alice()));
        assert!(state.is_counting());

        assert!(state.apply(LifecycleEvent::Blur));
        assert!(!state.is_counting());
        assert!(!state.apply(LifecycleEvent::Focus));
        assert!(state.is_counting());

        assert!(state.apply(LifecycleEvent::Visibility(Visibility::Hidden)));
        assert!(!state.is_counting());
        assert!(!state.apply(LifecycleEvent::Visibility(Visibility::Visible)));
        assert!(state.apply(LifecycleEvent::BeforeUnload));
    }

    #[test]
    fn acknowledge_keeps_ticks_that_arrived_in_flight() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        state.pending_seconds = 12;
        let session = state.session_id;

        assert!(state.acknowledge(&alice(), session, 10));
        assert_eq!(state.pending_seconds, 2);
        assert_eq!(state.committed_seconds, 10);
        assert_eq!(state.contribution().through_seconds, 12);
    }

    #[test]
    fn acknowledge_ignores_other_sessions() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        state.pending_seconds = 5;

        assert!(!state.acknowledge(&alice(), Uuid::new_v4(), 5));
        assert!(!state.acknowledge(&UserId::new("bob").unwrap(), state.session_id, 5));
        assert_eq!(state.pending_seconds, 5);
    }

    #[test]
    fn handoff_detaches_user_and_seconds() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        state.pending_seconds = 7;
        state.committed_seconds = 20;
        let session = state.session_id;

        let handoff = state.take_handoff().unwrap();
        assert_eq!(handoff.user, alice());
        assert_eq!(handoff.contribution(), Contribution::new(session, 27));
        assert_eq!(state.user, None);
        assert_eq!(state.pending_seconds, 0);

        state.begin_user(Some(alice()));
        assert!(state.take_handoff().is_none());
    }

    #[test]
    fn adopted_session_rotates_once_drained() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        let recovered = Uuid::new_v4();
        state.adopt(
            &PendingEntry {
                pending: 30,
                updated_at: 0,
                session_id: Some(recovered),
                committed: 100,
            },
            true,
        );
        assert_eq!(state.contribution(), Contribution::new(recovered, 130));

        assert!(state.acknowledge(&alice(), recovered, 30));
        assert_ne!(state.session_id, recovered);
        assert_eq!(state.committed_seconds, 0);
    }

    #[test]
    fn adopted_seconds_add_to_ones_already_counted() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        state.pending_seconds = 2;
        let recovered = Uuid::new_v4();
        state.adopt(
            &PendingEntry {
                pending: 8,
                updated_at: 0,
                session_id: Some(recovered),
                committed: 40,
            },
            true,
        );

        assert_eq!(state.pending_seconds, 10);
        assert_eq!(state.contribution(), Contribution::new(recovered, 50));
    }

    #[test]
    fn expired_entry_starts_a_fresh_session() {
        let mut state = TimerState::new();
        state.begin_user(Some(alice()));
        let own = state.session_id;
        state.adopt(
            &PendingEntry {
                pending: 30,
                updated_at: 0,
                session_id: Some(Uuid::new_v4()),
                committed: 100,
            },
            false,
        );

        assert_eq!(state.contribution(), Contribution::new(own, 30));
    }
}
