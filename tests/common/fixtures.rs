//! Seed data and an assembled core stack for integration tests

// Each test binary compiles this module and uses a subset of it
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use wavecap::core::config::{AuthConfig, ReconnectionConfig, SearchConfig};
use wavecap::core::directory::Directory;
use wavecap::core::types::{
    ApiKey, Call, Group, Scope, System, SystemKind, Tag, Talkgroup, User,
};
use wavecap::core::{utils, AccessStore, DirectoryStore, FilterMatrix};
use wavecap::database::{CallStore, MemoryCallStore};
use wavecap::ingest::{IngestPipeline, RawCall, Transcoder};
use wavecap::stream::{
    Dispatcher, LoginGuard, Management, ReconnectionManager, SearchEngine, Session,
    SessionContext, SessionReceivers, SessionRegistry, SessionState,
};

static INIT_LOGGER: Once = Once::new();

/// Initialize test logging (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Secret the seeded API key answers to
pub const UPLOAD_KEY: &str = "recorder-secret";

/// Directory with system 1, talkgroups 100 and 200, one tag and one group
pub fn sample_directory() -> Directory {
    let system = System {
        id: 1,
        label: "Metro".into(),
        kind: SystemKind::Trunked,
        talkgroups: vec![
            Talkgroup {
                id: 100,
                label: "PD-DISP".into(),
                name: "Police Dispatch".into(),
                tag_id: Some(1),
                group_ids: vec![10],
                frequency: None,
            },
            Talkgroup {
                id: 200,
                label: "FD-DISP".into(),
                name: "Fire Dispatch".into(),
                tag_id: Some(1),
                group_ids: vec![10],
                frequency: None,
            },
        ],
        sites: Vec::new(),
        units: Vec::new(),
        blacklist: BTreeSet::new(),
    };

    Directory::new(
        vec![system],
        vec![Tag {
            id: 1,
            label: "Public Safety".into(),
            order: 1,
            color: None,
        }],
        vec![Group {
            id: 10,
            label: "Dispatch".into(),
            order: 1,
            color: None,
        }],
        vec![ApiKey {
            id: 1,
            key_hash: utils::hash_key(UPLOAD_KEY),
            label: "recorder".into(),
            enabled: true,
            systems: Scope::Wildcard,
        }],
    )
}

/// User A: every system, every talkgroup
pub fn user_a() -> User {
    User {
        id: 1,
        pin: "1111".into(),
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

/// User B: every system, talkgroup 100 only
pub fn user_b() -> User {
    User {
        id: 2,
        pin: "2222".into(),
        email: None,
        systems: Scope::Wildcard,
        talkgroups: Scope::Enumerated(BTreeSet::from([100])),
        group_allow: None,
        group_deny: BTreeSet::new(),
        connection_limit: None,
        pin_expires_at_ms: 0,
        verified: true,
    }
}

/// Filter accepting both seeded talkgroups
pub fn full_filter() -> FilterMatrix {
    let mut filter = FilterMatrix::new();
    filter.set(1, 100, true);
    filter.set(1, 200, true);
    filter
}

/// Everything the scenarios need, wired the way the server wires it
pub struct Stack {
    pub directory: Arc<DirectoryStore>,
    pub access: Arc<AccessStore>,
    pub registry: Arc<SessionRegistry>,
    pub reconnection: Arc<ReconnectionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub search: Arc<SearchEngine>,
    pub store: Arc<MemoryCallStore>,
    pub ingest: IngestPipeline,
    pub context: SessionContext,
    pub management: Management,
    feed: mpsc::Receiver<Arc<Call>>,
}

/// Assemble a stack over the in-memory store
pub fn stack(reconnection_config: ReconnectionConfig) -> Stack {
    let store = Arc::new(MemoryCallStore::new());
    let directory = Arc::new(DirectoryStore::new(sample_directory()));
    let access = Arc::new(AccessStore::new());
    access.replace_all(vec![user_a(), user_b()]);

    let registry = Arc::new(SessionRegistry::new(16));
    let reconnection = Arc::new(ReconnectionManager::new(&reconnection_config, true));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&reconnection),
        Arc::clone(&directory),
        true,
    ));
    let search = Arc::new(SearchEngine::new(
        Arc::clone(&store) as Arc<dyn CallStore>,
        SearchConfig::default(),
    ));

    let (feed_tx, feed) = mpsc::channel(64);
    let ingest = IngestPipeline::new(
        Arc::clone(&directory),
        Arc::clone(&store) as Arc<dyn CallStore>,
        Arc::new(Transcoder::disabled()),
        Vec::new(),
        feed_tx,
    );

    let auth = AuthConfig::default();
    let context = SessionContext {
        login_guard: Arc::new(LoginGuard::new(&auth)),
        auth,
        directory: Arc::clone(&directory),
        access: Arc::clone(&access),
        registry: Arc::clone(&registry),
        reconnection: Arc::clone(&reconnection),
        search: Arc::clone(&search),
    };

    let management = Management::new(
        Arc::clone(&access),
        Arc::clone(&registry),
        Arc::clone(&directory),
        4,
    );

    Stack {
        directory,
        access,
        registry,
        reconnection,
        dispatcher,
        search,
        store,
        ingest,
        context,
        management,
        feed,
    }
}

impl Stack {
    /// Open a live session for `user` with the full seeded filter
    pub fn live_session(&self, user: &User) -> (Arc<Session>, SessionReceivers) {
        let (session, receivers) = self.registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
        session.set_user(Arc::new(user.clone()));
        session.set_filter(full_filter());
        session.set_state(SessionState::Live);
        (session, receivers)
    }

    /// Ingest one upload and fan the persisted call out, like the server's
    /// pipeline-feed-dispatcher chain does
    pub async fn ingest_and_dispatch(&mut self, talkgroup: i32, timestamp_ms: i64) -> i64 {
        let id = self
            .ingest
            .ingest(RawCall {
                api_key: UPLOAD_KEY.into(),
                system_ref: 1,
                talkgroup_ref: talkgroup,
                timestamp_ms,
                audio: vec![0xCD; 32],
                audio_mime: "audio/opus".into(),
                audio_filename: "call.opus".into(),
                site_ref: None,
                source_refs: vec![4001],
                frequencies: vec![854_000_000],
            })
            .await
            .expect("seeded upload must be accepted");

        let call = self.feed.recv().await.expect("call must be announced");
        assert_eq!(call.id, id);
        self.dispatcher.dispatch(&call);
        id
    }
}
