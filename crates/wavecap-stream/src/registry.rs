//! Registry of live sessions
//!
//! Register and unregister serialize on a write lock; the dispatcher takes a
//! read lock only long enough to copy the session handles, then releases it
//! before doing any delivery work. A session is visible exactly between its
//! registration and its removal.

use crate::session::{Session, SessionReceivers};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wavecap_core::types::UserId;

/// The set of live sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
    outbox_capacity: usize,
}

impl SessionRegistry {
    /// Create a registry whose sessions get outboxes of `outbox_capacity`
    #[must_use]
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbox_capacity,
        }
    }

    /// Open and register a new session for a connection from `remote_ip`
    ///
    /// The session is fully constructed before it becomes visible, so the
    /// dispatcher never observes a half-registered one.
    #[must_use]
    pub fn open(&self, remote_ip: IpAddr) -> (Arc<Session>, SessionReceivers) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (session, receivers) = Session::new(id, remote_ip, self.outbox_capacity);

        self.sessions.write().insert(id, Arc::clone(&session));
        tracing::debug!(session_id = id, %remote_ip, "session registered");

        (session, receivers)
    }

    /// Remove a session, marking it closed
    pub fn unregister(&self, id: u64) -> Option<Arc<Session>> {
        let session = self.sessions.write().remove(&id);
        if let Some(session) = &session {
            session.close();
            tracing::debug!(session_id = id, dropped = session.dropped_count(), "session unregistered");
        }
        session
    }

    /// A consistent copy of the current session set
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Sessions currently owned by `user_id`
    #[must_use]
    pub fn sessions_for_user(&self, user_id: UserId) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.user().is_some_and(|u| u.id == user_id))
            .cloned()
            .collect()
    }

    /// Number of sessions owned by `user_id`
    #[must_use]
    pub fn count_for_user(&self, user_id: UserId) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.user().is_some_and(|u| u.id == user_id))
            .count()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is connected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;
    use wavecap_core::types::{Scope, User};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn user(id: UserId) -> Arc<User> {
        Arc::new(User {
            id,
            pin: format!("{id:04}"),
            email: None,
            systems: Scope::Wildcard,
            talkgroups: Scope::Wildcard,
            group_allow: None,
            group_deny: BTreeSet::new(),
            connection_limit: None,
            pin_expires_at_ms: 0,
            verified: true,
        })
    }

    #[test]
    fn test_open_assigns_unique_ids() {
        let registry = SessionRegistry::new(8);

        let (a, _ra) = registry.open(localhost());
        let (b, _rb) = registry.open(localhost());

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_closes_and_removes() {
        let registry = SessionRegistry::new(8);
        let (session, _rx) = registry.open(localhost());

        let removed = registry.unregister(session.id()).expect("was registered");
        assert!(removed.is_closed());
        assert!(registry.is_empty());

        // Second unregister is a no-op
        assert!(registry.unregister(session.id()).is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = SessionRegistry::new(8);
        let (session, _rx) = registry.open(localhost());

        let snapshot = registry.snapshot();
        registry.unregister(session.id());

        // The snapshot taken earlier still holds the handle
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_per_user_lookup() {
        let registry = SessionRegistry::new(8);

        let (a, _ra) = registry.open(localhost());
        let (b, _rb) = registry.open(localhost());
        let (_c, _rc) = registry.open(localhost());

        a.set_user(user(7));
        b.set_user(user(7));

        assert_eq!(registry.count_for_user(7), 2);
        assert_eq!(registry.sessions_for_user(7).len(), 2);
        assert_eq!(registry.count_for_user(8), 0);
    }
}
