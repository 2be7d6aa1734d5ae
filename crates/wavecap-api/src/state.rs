//! Application state shared by every handler

use std::sync::Arc;
use tokio::sync::mpsc;
use wavecap_core::types::Call;
use wavecap_core::{AccessStore, Config, DirectoryStore};
use wavecap_database::{CallStore, PgPool};
use wavecap_ingest::{IngestPipeline, Transcoder};
use wavecap_stream::{
    Dispatcher, LoginGuard, Management, ReconnectionManager, SearchEngine, SessionContext,
    SessionRegistry,
};

/// Shared application state
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Current directory epoch handle
    pub directory: Arc<DirectoryStore>,
    /// Listener accounts
    pub access: Arc<AccessStore>,
    /// Live session set
    pub registry: Arc<SessionRegistry>,
    /// Reconnection buffers
    pub reconnection: Arc<ReconnectionManager>,
    /// Archive search engine
    pub search: Arc<SearchEngine>,
    /// Call archive
    pub store: Arc<dyn CallStore>,
    /// Upload intake
    pub ingest: Arc<IngestPipeline>,
    /// Live fan-out
    pub dispatcher: Arc<Dispatcher>,
    /// Management port
    pub management: Arc<Management>,
    /// Per-session command handling
    pub session_context: Arc<SessionContext>,
    /// Database pool when one is attached
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Assemble every core component around a call store
    ///
    /// Returns the state and the persisted-call feed receiver; the caller
    /// spawns the dispatcher on it.
    #[must_use]
    pub fn assemble(
        config: Config,
        store: Arc<dyn CallStore>,
        pool: Option<PgPool>,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Call>>) {
        let directory = Arc::new(DirectoryStore::default());
        let access = Arc::new(AccessStore::new());
        let registry = Arc::new(SessionRegistry::new(config.server.outbox_capacity));
        let reconnection = Arc::new(ReconnectionManager::new(
            &config.reconnection,
            config.auth.user_auth_required,
        ));
        let search = Arc::new(SearchEngine::new(
            Arc::clone(&store),
            config.search.clone(),
        ));
        let login_guard = Arc::new(LoginGuard::new(&config.auth));

        let (feed_tx, feed_rx) = mpsc::channel(config.server.feed_capacity.max(1));
        let ingest = Arc::new(IngestPipeline::new(
            Arc::clone(&directory),
            Arc::clone(&store),
            Arc::new(Transcoder::new(&config.audio)),
            Vec::new(),
            feed_tx,
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&reconnection),
            Arc::clone(&directory),
            config.auth.user_auth_required,
        ));

        let management = Arc::new(Management::new(
            Arc::clone(&access),
            Arc::clone(&registry),
            Arc::clone(&directory),
            config.auth.pin_min_length,
        ));
        if let Some(pool) = &pool {
            management.attach_pool(pool.clone());
        }

        let session_context = Arc::new(SessionContext {
            auth: config.auth.clone(),
            directory: Arc::clone(&directory),
            access: Arc::clone(&access),
            registry: Arc::clone(&registry),
            reconnection: Arc::clone(&reconnection),
            search: Arc::clone(&search),
            login_guard,
        });

        let state = Arc::new(Self {
            config,
            directory,
            access,
            registry,
            reconnection,
            search,
            store,
            ingest,
            dispatcher,
            management,
            session_context,
            pool,
        });

        (state, feed_rx)
    }
}
