//! wavecap server binary
//!
//! Boot order: configuration, logging, database, directory/account load,
//! core components, background tasks, then the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use wavecap_api::{build_router, AppState};
use wavecap_core::{Config, Error};
use wavecap_database::{
    CallStore, Database, DirectoryQueries, MemoryCallStore, PgCallStore, UserQueries,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("configuration error, falling back to defaults: {e}");
        Config::default()
    });

    wavecap_core::init_logging(&config.logging.level, config.logging.format == "json")?;

    // Without a reachable database the server still runs against an
    // in-memory archive, which is enough for bench and demo setups.
    let database = match Database::new(&config).await {
        Ok(database) => {
            database.migrate().await?;
            Some(database)
        }
        Err(e) => {
            tracing::warn!(error = %e, "database unavailable, using in-memory call store");
            None
        }
    };

    let store: Arc<dyn CallStore> = match &database {
        Some(database) => Arc::new(PgCallStore::new(database.pool().clone())),
        None => Arc::new(MemoryCallStore::new()),
    };

    let pool = database.as_ref().map(|d| d.pool().clone());
    let (state, feed) = AppState::assemble(config.clone(), store, pool.clone());

    if let Some(pool) = &pool {
        state.directory.reload(DirectoryQueries::load(pool).await?);
        state.access.replace_all(UserQueries::list(pool).await?);
    }

    // Background tasks: the fan-out loop and the reconnection sweeper
    tokio::spawn(Arc::clone(&state.dispatcher).run(feed));
    state
        .reconnection
        .spawn_sweeper(Duration::from_secs(config.reconnection.sweep_interval_secs.max(1)));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::InvalidArgument {
            field: "server".to_string(),
            message: format!("invalid listen address: {e}"),
        })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "wavecap listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
