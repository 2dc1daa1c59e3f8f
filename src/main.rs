//! Focus Sync - a local-first focus timer with cross-process sync
//!
//! This is the main entry point for the focus-sync daemon.

use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};

use focus_sync::{
    api::create_router,
    bus::{BusTransport, ChannelHub, StorageTransport, SyncBus},
    clock::{Clock, SystemClock},
    config::{BusKind, Config},
    engine::{EngineDeps, LoggingHooks, TimerEngine},
    identity::IdentityProvider,
    remote::{RemoteAuthority, RestAuthority, RestAuthorityConfig},
    state::AppState,
    store::{FileKvStore, KeyValueStore, MemoryKvStore},
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!("focus_sync={},tower_http=info", config.log_level()))
        .init();

    info!("Starting focus-sync server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: host={}, port={}, data_dir={}, bus={:?}, duration={}min",
        config.host,
        config.port,
        config.data_dir.display(),
        config.bus,
        config.duration_minutes
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn KeyValueStore> = match FileKvStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Cannot open data directory, timer state will not survive restarts: {}", e);
            Arc::new(MemoryKvStore::new())
        }
    };

    let transport: Arc<dyn BusTransport> = match config.bus {
        BusKind::Storage => StorageTransport::new(
            Arc::clone(&store),
            Duration::from_millis(config.bus_poll_ms.max(10)),
        ),
        BusKind::Channel => Arc::new(ChannelHub::default()),
    };
    let bus = SyncBus::connect(transport, Arc::clone(&clock));

    let remote: Option<Arc<dyn RemoteAuthority>> = match &config.remote_url {
        Some(url) => {
            let mut remote_config = RestAuthorityConfig::new(url.clone());
            remote_config.api_key = config.remote_api_key.clone();
            remote_config.table = config.remote_table.clone();
            let authority: Arc<dyn RemoteAuthority> = Arc::new(RestAuthority::new(remote_config)?);
            info!("Remote sync enabled against {}", url);
            Some(authority)
        }
        None => {
            info!("No remote URL configured, running local-only");
            None
        }
    };

    let engine = TimerEngine::new(
        config.engine_config(),
        EngineDeps {
            clock,
            store,
            bus,
            remote,
            identity: IdentityProvider::new(config.user_id.clone()),
            hooks: Arc::new(LoggingHooks),
        },
    );
    let outcome = engine.initialize().await;
    info!("Restored timer: {:?}", outcome);

    // Create HTTP router with all endpoints
    let state = Arc::new(AppState::new(
        Arc::clone(&engine),
        config.port,
        config.host.clone(),
    ));
    let app = create_router(state);

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /timer          - Current timer status");
    info!("  GET  /timer/session  - Session shared on the sync bus");
    info!("  POST /timer/start    - Start or resume");
    info!("  POST /timer/pause    - Pause");
    info!("  POST /timer/toggle   - Start or pause");
    info!("  POST /timer/reset    - Reset to idle");
    info!("  POST /timer/category - Change category and duration");
    info!("  POST /timer/focus    - Reconcile with the remote");
    info!("  GET  /status         - Server status");
    info!("  GET  /health         - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    engine.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
