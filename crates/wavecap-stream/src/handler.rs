//! Inbound command handling: the per-session state machine
//!
//! The transport feeds raw frames here; this module parses them, enforces
//! the state table and drives the session through
//! `connected -> authenticated -> live/playback`. Unknown commands are
//! ignored. Failed logins are throttled per IP.

use crate::commands::{self, InboundMessage, LoginRequest, OutboundMessage};
use crate::reconnection::ReconnectionManager;
use crate::registry::SessionRegistry;
use crate::search::SearchEngine;
use crate::session::{Session, SessionState};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wavecap_core::config::AuthConfig;
use wavecap_core::types::Scope;
use wavecap_core::{AccessStore, DirectoryStore, ErrorKind};

/// Per-IP throttle for failed logins
///
/// After `max_failures` failures inside the window, every login attempt from
/// that IP is rejected outright for the penalty duration.
#[derive(Debug)]
pub struct LoginGuard {
    attempts: DashMap<IpAddr, AttemptRecord>,
    max_failures: u32,
    window: Duration,
    penalty: Duration,
}

#[derive(Debug, Default)]
struct AttemptRecord {
    failures: VecDeque<Instant>,
    banned_until: Option<Instant>,
}

impl LoginGuard {
    /// Build from the auth configuration
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            attempts: DashMap::new(),
            max_failures: config.login_max_failures.max(1),
            window: Duration::from_secs(config.login_window_secs),
            penalty: Duration::from_secs(config.login_penalty_secs),
        }
    }

    /// Whether logins from `ip` are currently rejected
    #[must_use]
    pub fn is_penalized(&self, ip: IpAddr) -> bool {
        self.attempts
            .get(&ip)
            .and_then(|record| record.banned_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Record one failed attempt, possibly starting a penalty
    pub fn record_failure(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut record = self.attempts.entry(ip).or_default();

        record.failures.push_back(now);
        while record
            .failures
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            record.failures.pop_front();
        }

        if record.failures.len() >= self.max_failures as usize {
            record.banned_until = Some(now + self.penalty);
            tracing::warn!(%ip, failures = record.failures.len(), "login penalty imposed");
        }
    }

    /// Clear the slate after a successful login
    pub fn record_success(&self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }
}

/// Everything the state machine needs to serve one session
pub struct SessionContext {
    /// Auth policy (gating, PIN length, penalties)
    pub auth: AuthConfig,
    /// Current directory epoch handle
    pub directory: Arc<DirectoryStore>,
    /// Listener accounts
    pub access: Arc<AccessStore>,
    /// Live session set
    pub registry: Arc<SessionRegistry>,
    /// Buffers for briefly-disconnected users
    pub reconnection: Arc<ReconnectionManager>,
    /// Archive search and playback loads
    pub search: Arc<SearchEngine>,
    /// Per-IP login throttle
    pub login_guard: Arc<LoginGuard>,
}

impl SessionContext {
    /// Handle one raw inbound frame; unknown commands are dropped
    pub async fn handle_frame(&self, session: &Arc<Session>, frame: &str) {
        match serde_json::from_str::<InboundMessage>(frame) {
            Ok(message) => self.handle(session, message).await,
            Err(e) => {
                tracing::debug!(session_id = session.id(), error = %e, "ignoring unknown command");
            }
        }
    }

    /// Handle one parsed inbound command
    pub async fn handle(&self, session: &Arc<Session>, message: InboundMessage) {
        match message {
            InboundMessage::Login(request) => self.handle_login(session, &request),
            InboundMessage::Config => self.handle_config(session),
            InboundMessage::Livefeed(filter) | InboundMessage::Pin(filter) => {
                self.handle_livefeed(session, filter);
            }
            InboundMessage::Call(request) => self.handle_playback(session, request.id).await,
            InboundMessage::List(options) => self.handle_list(session, &options).await,
            InboundMessage::Stop => Self::handle_stop(session),
        }
    }

    /// Whether the session may use authenticated commands
    fn may_interact(&self, session: &Session) -> bool {
        session.state().is_authenticated() || !self.auth.user_auth_required
    }

    fn handle_login(&self, session: &Arc<Session>, request: &LoginRequest) {
        if session.state() != SessionState::Connected {
            tracing::debug!(session_id = session.id(), "login on an authenticated session ignored");
            return;
        }

        let ip = session.remote_ip();
        if self.login_guard.is_penalized(ip) {
            session.try_send(OutboundMessage::error_with_message(
                ErrorKind::Unauthorized,
                commands::LOGIN_PENALIZED,
            ));
            return;
        }

        let Some(secret) = request.secret() else {
            session.try_send(OutboundMessage::error(ErrorKind::InvalidArgument));
            return;
        };

        if secret.len() < self.auth.pin_min_length {
            self.login_guard.record_failure(ip);
            session.try_send(OutboundMessage::error(ErrorKind::Unauthorized));
            return;
        }

        let user = match self.access.authenticate_pin(secret) {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!(session_id = session.id(), %ip, error = %e, "login failed");
                self.login_guard.record_failure(ip);
                session.try_send(OutboundMessage::error(ErrorKind::Unauthorized));
                return;
            }
        };

        if let Some(limit) = user.connection_limit {
            if self.registry.count_for_user(user.id) >= limit as usize {
                session.close_with_error(ErrorKind::Forbidden, "connection limit reached");
                return;
            }
        }

        self.login_guard.record_success(ip);
        session.set_user(Arc::clone(&user));
        session.set_state(SessionState::Authenticated);

        session.try_send(OutboundMessage::Ready);
        let directory = self.directory.current();
        session.try_send(OutboundMessage::Config(
            directory.visible_config(&user.systems, &user.talkgroups),
        ));

        // A surviving reconnection record restores the filter and resumes
        // the live feed; its buffer replays behind the config frame
        if self.reconnection.restore(session).is_some() {
            session.set_state(SessionState::Live);
            tracing::info!(session_id = session.id(), user = user.id, "session resumed");
        } else {
            tracing::info!(session_id = session.id(), user = user.id, "session authenticated");
        }
    }

    fn handle_config(&self, session: &Arc<Session>) {
        if !self.may_interact(session) {
            session.try_send(OutboundMessage::error(ErrorKind::Unauthorized));
            return;
        }

        let directory = self.directory.current();
        let snapshot = match session.user() {
            Some(user) => directory.visible_config(&user.systems, &user.talkgroups),
            None => directory.visible_config(&Scope::Wildcard, &Scope::Wildcard),
        };
        session.try_send(OutboundMessage::Config(snapshot));
    }

    fn handle_livefeed(&self, session: &Arc<Session>, filter: wavecap_core::FilterMatrix) {
        if !self.may_interact(session) {
            session.try_send(OutboundMessage::Pin);
            return;
        }

        session.set_filter(filter.clone());
        session.set_state(SessionState::Live);
        session.try_send(OutboundMessage::LivefeedMap(filter));
    }

    async fn handle_playback(&self, session: &Arc<Session>, id: i64) {
        if !self.may_interact(session) {
            session.try_send(OutboundMessage::error(ErrorKind::Unauthorized));
            return;
        }

        // Requesting an archived call suppresses the live feed until `stop`
        session.set_state(SessionState::Playback);

        match self.search.load_call(id).await {
            Ok(call) => {
                session.try_send(OutboundMessage::call(&call));
            }
            Err(e) => {
                tracing::debug!(session_id = session.id(), call_id = id, error = %e, "playback load failed");
                session.try_send(OutboundMessage::error(e.kind()));
            }
        }
    }

    async fn handle_list(&self, session: &Arc<Session>, options: &crate::search::SearchOptions) {
        if !self.may_interact(session) {
            session.try_send(OutboundMessage::error(ErrorKind::Unauthorized));
            return;
        }

        match self.search.search(options).await {
            Ok(page) => {
                session.try_send(OutboundMessage::List(page));
            }
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "search failed");
                session.try_send(OutboundMessage::error(e.kind()));
            }
        }
    }

    fn handle_stop(session: &Arc<Session>) {
        if session.state() == SessionState::Playback {
            session.set_state(SessionState::Live);
        }
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use crate::commands::CallRequest;
    use crate::search::SearchOptions;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;
    use wavecap_core::config::{ReconnectionConfig, SearchConfig};
    use wavecap_core::directory::Directory;
    use wavecap_core::types::{FilterMatrix, NewCall, User};
    use wavecap_database::{CallStore, MemoryCallStore};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn test_user(id: i64, pin: &str) -> User {
        User {
            id,
            pin: pin.into(),
            email: None,
            systems: Scope::Wildcard,
            talkgroups: Scope::Wildcard,
            group_allow: None,
            group_deny: BTreeSet::new(),
            connection_limit: None,
            pin_expires_at_ms: 0,
            verified: true,
        }
    }

    struct Fixture {
        context: SessionContext,
        store: Arc<MemoryCallStore>,
    }

    fn fixture() -> Fixture {
        let access = Arc::new(AccessStore::new());
        access.replace_all(vec![test_user(1, "1234"), {
            let mut u = test_user(2, "5678");
            u.connection_limit = Some(1);
            u
        }]);

        let store = Arc::new(MemoryCallStore::new());
        let auth = AuthConfig {
            login_max_failures: 3,
            login_window_secs: 60,
            login_penalty_secs: 300,
            ..AuthConfig::default()
        };

        let context = SessionContext {
            login_guard: Arc::new(LoginGuard::new(&auth)),
            auth,
            directory: Arc::new(DirectoryStore::new(Directory::default())),
            access,
            registry: Arc::new(SessionRegistry::new(16)),
            reconnection: Arc::new(ReconnectionManager::new(
                &ReconnectionConfig::default(),
                true,
            )),
            search: Arc::new(SearchEngine::new(
                Arc::clone(&store) as Arc<dyn CallStore>,
                SearchConfig::default(),
            )),
        };

        Fixture { context, store }
    }

    fn open(f: &Fixture) -> (Arc<Session>, crate::session::SessionReceivers) {
        f.context.registry.open(localhost())
    }

    async fn login(f: &Fixture, session: &Arc<Session>, pin: &str) {
        f.context
            .handle(
                session,
                InboundMessage::Login(LoginRequest {
                    pin: Some(pin.into()),
                    token: None,
                }),
            )
            .await;
    }

    #[tokio::test]
    async fn test_login_success_sends_ready_and_config() {
        let f = fixture();
        let (session, mut rx) = open(&f);

        login(&f, &session, "1234").await;

        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Ready)
        ));
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failure_sends_error_and_keeps_state() {
        let f = fixture();
        let (session, mut rx) = open(&f);

        login(&f, &session, "0000").await;

        assert_eq!(session.state(), SessionState::Connected);
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Error(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_impose_penalty() {
        let f = fixture();

        for _ in 0..3 {
            let (session, _rx) = open(&f);
            login(&f, &session, "0000").await;
        }

        // Correct PIN now rejected while penalized
        let (session, mut rx) = open(&f);
        login(&f, &session, "1234").await;
        assert_eq!(session.state(), SessionState::Connected);
        match rx.outbox.try_recv() {
            Ok(OutboundMessage::Error(payload)) => {
                assert_eq!(payload.message, commands::LOGIN_PENALIZED);
            }
            other => panic!("expected penalty error, got {other:?}"),
        }

        // Penalty lapses after the configured duration
        tokio::time::advance(Duration::from_secs(301)).await;
        let (session, _rx) = open(&f);
        login(&f, &session, "1234").await;
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_short_pin_is_rejected_before_lookup() {
        let f = fixture();
        let (session, mut rx) = open(&f);

        login(&f, &session, "12").await;
        assert_eq!(session.state(), SessionState::Connected);
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_limit_enforced_at_login() {
        let f = fixture();

        let (first, _rx1) = open(&f);
        login(&f, &first, "5678").await;
        assert_eq!(first.state(), SessionState::Authenticated);

        let (second, mut rx2) = open(&f);
        login(&f, &second, "5678").await;
        assert!(second.is_closed());
        assert!(matches!(
            rx2.outbox.try_recv(),
            Ok(OutboundMessage::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_livefeed_moves_to_live_and_echoes_map() {
        let f = fixture();
        let (session, mut rx) = open(&f);
        login(&f, &session, "1234").await;
        let _ = rx.outbox.try_recv();
        let _ = rx.outbox.try_recv();

        let mut filter = FilterMatrix::new();
        filter.set(1, 100, true);
        f.context
            .handle(&session, InboundMessage::Livefeed(filter))
            .await;

        assert_eq!(session.state(), SessionState::Live);
        assert!(session.filter_accepts(1, 100));
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::LivefeedMap(_))
        ));
    }

    #[tokio::test]
    async fn test_commands_require_authentication() {
        let f = fixture();
        let (session, mut rx) = open(&f);

        f.context.handle(&session, InboundMessage::Config).await;
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Error(_))
        ));

        f.context
            .handle(&session, InboundMessage::List(SearchOptions::default()))
            .await;
        assert!(matches!(
            rx.outbox.try_recv(),
            Ok(OutboundMessage::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_playback_roundtrip_and_stop() {
        let f = fixture();

        let id = f
            .store
            .append(&NewCall {
                system_ref: 1,
                talkgroup_ref: 100,
                timestamp_ms: wavecap_core::utils::now_ms(),
                site_ref: None,
                source_refs: vec![],
                frequencies: vec![],
                audio: vec![0xEE],
                audio_mime: "audio/opus".into(),
                audio_filename: "c.opus".into(),
                transcript: None,
                tag: None,
                groups: vec![],
                group_ids: vec![],
            })
            .await
            .unwrap();

        let (session, mut rx) = open(&f);
        login(&f, &session, "1234").await;
        let _ = rx.outbox.try_recv();
        let _ = rx.outbox.try_recv();

        f.context
            .handle(&session, InboundMessage::Call(CallRequest { id }))
            .await;
        assert_eq!(session.state(), SessionState::Playback);
        match rx.outbox.try_recv() {
            Ok(OutboundMessage::Call(payload)) => assert_eq!(payload.id, id),
            other => panic!("expected call frame, got {other:?}"),
        }

        // Unknown id answers with not-found, session stays in playback
        f.context
            .handle(&session, InboundMessage::Call(CallRequest { id: id + 1 }))
            .await;
        match rx.outbox.try_recv() {
            Ok(OutboundMessage::Error(payload)) => assert_eq!(payload.kind, "not-found"),
            other => panic!("expected error frame, got {other:?}"),
        }

        f.context.handle(&session, InboundMessage::Stop).await;
        assert_eq!(session.state(), SessionState::Live);
    }

    #[tokio::test]
    async fn test_list_returns_page() {
        let f = fixture();
        let (session, mut rx) = open(&f);
        login(&f, &session, "1234").await;
        let _ = rx.outbox.try_recv();
        let _ = rx.outbox.try_recv();

        f.context
            .handle(&session, InboundMessage::List(SearchOptions::default()))
            .await;
        match rx.outbox.try_recv() {
            Ok(OutboundMessage::List(page)) => {
                assert!(page.calls.is_empty());
                assert!(!page.has_more);
            }
            other => panic!("expected list frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_frames_are_ignored() {
        let f = fixture();
        let (session, mut rx) = open(&f);

        f.context
            .handle_frame(&session, r#"{"command":"reboot"}"#)
            .await;
        f.context.handle_frame(&session, "not json at all").await;

        assert!(rx.outbox.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }
}
