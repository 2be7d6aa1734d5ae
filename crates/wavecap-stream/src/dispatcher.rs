//! The live-feed dispatcher
//!
//! Consumes persisted-call announcements and fans each call out to every
//! registered session that passes the authorization gate and its own filter
//! matrix. Delivery is a non-blocking try-send per session: one stalled
//! client costs one dropped frame on its own outbox, never a stalled loop.

use crate::commands::{self, OutboundMessage};
use crate::reconnection::ReconnectionManager;
use crate::registry::SessionRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use wavecap_core::access;
use wavecap_core::types::Call;
use wavecap_core::{utils, DirectoryStore, ErrorKind};

/// Counters exposed on the health surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Calls taken off the feed
    pub dispatched: u64,
    /// Frames enqueued to session outboxes
    pub delivered: u64,
    /// Frames dropped on full outboxes
    pub dropped: u64,
}

/// Fans persisted calls out to live sessions
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    reconnection: Arc<ReconnectionManager>,
    directory: Arc<DirectoryStore>,
    user_auth_required: bool,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    /// Wire the dispatcher to its collaborators
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        reconnection: Arc<ReconnectionManager>,
        directory: Arc<DirectoryStore>,
        user_auth_required: bool,
    ) -> Self {
        Self {
            registry,
            reconnection,
            directory,
            user_auth_required,
            dispatched: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Fan one call out to the current session set
    ///
    /// The registry read lock is released before any delivery; the snapshot
    /// is what this dispatch works against.
    pub fn dispatch(&self, call: &Arc<Call>) {
        let sessions = self.registry.snapshot();
        let directory = self.directory.current();
        let now_ms = utils::now_ms();

        for session in sessions {
            if session.is_closed() {
                continue;
            }

            if let Some(user) = session.user() {
                if user.pin_expired(now_ms) {
                    // One terminal error frame, then the transport closes
                    session.close_with_error(ErrorKind::Forbidden, commands::ACCESS_REVOKED);
                    continue;
                }
                if !access::authorize(&user, call, &directory) {
                    continue;
                }
            } else if self.user_auth_required {
                continue;
            }

            if !session.filter_accepts(call.system_ref, call.talkgroup_ref) {
                continue;
            }

            if !session.is_live() {
                continue;
            }

            if session.try_send(OutboundMessage::call(call)) {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    session_id = session.id(),
                    call_id = call.id,
                    "outbox full, call dropped for session"
                );
            }
        }

        // Absent users get their chance through the reconnection buffers
        self.reconnection.on_call_persisted(call, &directory);

        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume the persisted-call feed until it closes
    pub async fn run(self: Arc<Self>, mut feed: mpsc::Receiver<Arc<Call>>) {
        tracing::info!("dispatcher started");
        while let Some(call) = feed.recv().await {
            self.dispatch(&call);
        }
        tracing::info!("dispatcher feed closed, stopping");
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};
    use wavecap_core::config::ReconnectionConfig;
    use wavecap_core::directory::Directory;
    use wavecap_core::types::{
        FilterMatrix, Scope, System, SystemKind, Talkgroup, User,
    };

    fn directory() -> Directory {
        let system = System {
            id: 1,
            label: "Metro".into(),
            kind: SystemKind::Trunked,
            talkgroups: vec![
                Talkgroup {
                    id: 100,
                    label: "PD".into(),
                    name: "Police".into(),
                    tag_id: None,
                    group_ids: vec![],
                    frequency: None,
                },
                Talkgroup {
                    id: 200,
                    label: "FD".into(),
                    name: "Fire".into(),
                    tag_id: None,
                    group_ids: vec![],
                    frequency: None,
                },
            ],
            sites: Vec::new(),
            units: Vec::new(),
            blacklist: BTreeSet::new(),
        };
        Directory::new(vec![system], Vec::new(), Vec::new(), Vec::new())
    }

    fn wildcard_user(id: i64) -> Arc<User> {
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

    fn call(id: i64, system: i32, talkgroup: i32) -> Arc<Call> {
        Arc::new(Call {
            id,
            system_ref: system,
            talkgroup_ref: talkgroup,
            timestamp_ms: 1_704_067_200_000,
            site_ref: None,
            source_refs: vec![],
            frequencies: vec![],
            audio: vec![0x55],
            audio_mime: "audio/opus".into(),
            audio_filename: "c.opus".into(),
            transcript: None,
            tag: None,
            groups: vec![],
            group_ids: vec![],
        })
    }

    fn full_matrix() -> FilterMatrix {
        let mut m = FilterMatrix::new();
        m.set(1, 100, true);
        m.set(1, 200, true);
        m
    }

    struct Harness {
        registry: Arc<SessionRegistry>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SessionRegistry::new(8));
        let reconnection = Arc::new(ReconnectionManager::new(
            &ReconnectionConfig {
                enabled: false,
                ..ReconnectionConfig::default()
            },
            true,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            reconnection,
            Arc::new(DirectoryStore::new(directory())),
            true,
        );
        Harness {
            registry,
            dispatcher,
        }
    }

    fn live_session(
        harness: &Harness,
        user: Arc<User>,
        filter: FilterMatrix,
    ) -> (Arc<crate::session::Session>, crate::session::SessionReceivers) {
        let (session, receivers) = harness.registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
        session.set_user(user);
        session.set_filter(filter);
        session.set_state(SessionState::Live);
        (session, receivers)
    }

    #[tokio::test]
    async fn test_delivery_requires_acl_and_filter() {
        let h = harness();

        // User A sees everything, user B only talkgroup 100
        let (_a, mut rx_a) = live_session(&h, wildcard_user(1), full_matrix());
        let mut b = wildcard_user(2);
        Arc::make_mut(&mut b).talkgroups = Scope::Enumerated(BTreeSet::from([100]));
        let (_b, mut rx_b) = live_session(&h, b, full_matrix());

        h.dispatcher.dispatch(&call(1, 1, 200));

        match rx_a.outbox.try_recv() {
            Ok(OutboundMessage::Call(payload)) => assert_eq!(payload.talkgroup, 200),
            other => panic!("expected call for session a, got {other:?}"),
        }
        assert!(rx_b.outbox.try_recv().is_err(), "b's ACL excludes tg 200");
    }

    #[tokio::test]
    async fn test_filter_gates_delivery() {
        let h = harness();

        let mut narrow = FilterMatrix::new();
        narrow.set(1, 100, true);
        let (_s, mut rx) = live_session(&h, wildcard_user(1), narrow);

        h.dispatcher.dispatch(&call(1, 1, 200));
        assert!(rx.outbox.try_recv().is_err());

        h.dispatcher.dispatch(&call(2, 1, 100));
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Call(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_sessions_skipped_when_auth_required() {
        let h = harness();

        let (session, mut rx) = h.registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
        session.set_filter(full_matrix());
        session.set_state(SessionState::Live);

        h.dispatcher.dispatch(&call(1, 1, 100));
        assert!(rx.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_playback_sessions_receive_nothing_live() {
        let h = harness();

        let (session, mut rx) = live_session(&h, wildcard_user(1), full_matrix());
        session.set_state(SessionState::Playback);

        h.dispatcher.dispatch(&call(1, 1, 100));
        assert!(rx.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_pin_forces_single_error_then_silence() {
        let h = harness();

        let mut expired = wildcard_user(1);
        Arc::make_mut(&mut expired).pin_expires_at_ms = 1;
        let (session, mut rx) = live_session(&h, expired, full_matrix());

        h.dispatcher.dispatch(&call(1, 1, 100));
        h.dispatcher.dispatch(&call(2, 1, 100));

        match rx.outbox.try_recv() {
            Ok(OutboundMessage::Error(payload)) => {
                assert_eq!(payload.message, commands::ACCESS_REVOKED);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(rx.outbox.try_recv().is_err(), "no calls after revocation");
        assert!(session.is_closed());
        assert!(*rx.shutdown.borrow());
    }

    #[tokio::test]
    async fn test_full_outbox_drops_without_blocking_others() {
        let h = harness();

        // Session with a tiny outbox that nobody drains
        let (_slow, _rx_slow) = {
            let registry = &h.registry;
            let (session, receivers) = registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
            session.set_user(wildcard_user(1));
            session.set_filter(full_matrix());
            session.set_state(SessionState::Live);
            (session, receivers)
        };
        let (_fast, mut rx_fast) = live_session(&h, wildcard_user(2), full_matrix());

        // 8 is the outbox capacity configured in harness(); overflow it
        for i in 0..20 {
            h.dispatcher.dispatch(&call(i, 1, 100));
        }

        let mut fast_received = 0;
        while let Ok(msg) = rx_fast.outbox.try_recv() {
            if matches!(msg, OutboundMessage::Call(_)) {
                fast_received += 1;
            }
        }
        // The fast session's outbox also has capacity 8; it kept receiving
        // up to capacity while the slow one overflowed
        assert_eq!(fast_received, 8);

        let stats = h.dispatcher.stats();
        assert_eq!(stats.dispatched, 20);
        assert!(stats.dropped >= 12 * 2, "both outboxes overflowed");
    }

    #[tokio::test]
    async fn test_per_session_order_follows_persist_order() {
        let h = harness();
        let (_s, mut rx) = live_session(&h, wildcard_user(1), full_matrix());

        for id in 1..=5 {
            h.dispatcher.dispatch(&call(id, 1, 100));
        }

        let mut seen = Vec::new();
        while let Ok(OutboundMessage::Call(payload)) = rx.outbox.try_recv() {
            seen.push(payload.id);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
