//! In-memory registry of tracked sessions.
//!
//! The registry is owned by the container service and only changed through
//! its lifecycle verbs. A session id is tracked iff a start for it completed
//! and no stop has completed since. Placeholders created by session probes
//! are kept apart so they can neither satisfy nor block a start.

use super::record::{Session, SessionId};
use crate::container::{ContainerError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// A session with a live container.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub session: Session,
    /// Outstanding freeze requests; the runtime is thawed when this drops to zero
    pub freeze_holds: u32,
    pub started_at: DateTime<Utc>,
}

impl TrackedSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            freeze_holds: 0,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    tracked: HashMap<SessionId, TrackedSession>,
    placeholders: HashMap<SessionId, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `session_id`, discarding any placeholder for it.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::AlreadyTracked`] if the id is live.
    pub fn insert(&mut self, session_id: SessionId, session: Session) -> Result<&mut TrackedSession> {
        match self.tracked.entry(session_id) {
            Entry::Occupied(_) => Err(ContainerError::AlreadyTracked(session_id)),
            Entry::Vacant(slot) => {
                self.placeholders.remove(&session_id);
                Ok(slot.insert(TrackedSession::new(session)))
            }
        }
    }

    /// Stop tracking `session_id`. Placeholders for the id go too.
    pub fn remove(&mut self, session_id: SessionId) -> Option<TrackedSession> {
        self.placeholders.remove(&session_id);
        self.tracked.remove(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.tracked.contains_key(&session_id)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&TrackedSession> {
        self.tracked.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut TrackedSession> {
        self.tracked.get_mut(&session_id)
    }

    /// Return the placeholder for an untracked id, creating it on first use.
    ///
    /// Repeated calls hand back the same record.
    pub fn touch(&mut self, session_id: SessionId) -> &Session {
        self.placeholders.entry(session_id).or_default()
    }

    pub fn placeholder(&self, session_id: SessionId) -> Option<&Session> {
        self.placeholders.get(&session_id)
    }

    /// Snapshot of tracked ids in ascending order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.tracked.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear_placeholders(&mut self) {
        self.placeholders.clear();
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_by(uid: u32) -> Session {
        Session {
            user_id: Some(uid),
            ..Default::default()
        }
    }

    #[test]
    fn test_at_most_one_session_per_id() {
        let mut registry = Registry::new();
        registry.insert(1, owned_by(1000)).unwrap();

        let second = registry.insert(1, owned_by(1001));
        assert!(matches!(second, Err(ContainerError::AlreadyTracked(1))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().session.user_id, Some(1000));
    }

    #[test]
    fn test_touch_is_idempotent_and_separate() {
        let mut registry = Registry::new();

        assert!(registry.touch(4).is_placeholder());
        registry.touch(4);
        assert_eq!(registry.placeholder_count(), 1);
        assert!(!registry.contains(4));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_start_replaces_placeholder() {
        let mut registry = Registry::new();
        registry.touch(2);

        registry.insert(2, owned_by(1000)).unwrap();
        assert!(registry.contains(2));
        assert!(registry.placeholder(2).is_none());
    }

    #[test]
    fn test_remove_and_snapshot() {
        let mut registry = Registry::new();
        for id in [3, 1, 2] {
            registry.insert(id, owned_by(1000)).unwrap();
        }
        assert_eq!(registry.ids(), vec![1, 2, 3]);

        assert!(registry.remove(2).is_some());
        assert!(registry.remove(2).is_none());
        assert_eq!(registry.ids(), vec![1, 3]);
    }
}
