// Main entry point for the chore ledger service

use chore_ledger::api::{create_router, AppState};
use chore_ledger::auth::auth_middleware::AuthState;
use chore_ledger::auth::token::TokenService;
use chore_ledger::config::Config;
use chore_ledger::service::Services;
use chore_ledger::store::memory::MemoryStore;
use chore_ledger::store::postgres::PgStore;
use chore_ledger::store::Store;

use anyhow::Context as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first, before any logging
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    info!("Starting chore ledger");
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = match config.database_url {
        Some(ref database_url) => {
            let store = PgStore::connect(
                database_url,
                config.database_max_connections,
                Duration::from_secs(config.store_timeout_secs),
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to database");
                e
            })?;
            store.apply_schema().await.context("applying database schema")?;
            info!("Postgres store initialized");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.token_settings()));
    let services = Services::new(store.clone(), tokens.clone(), config.core_settings());
    let auth_state = Arc::new(AuthState { tokens });

    let addr = format!("{}:{}", config.bind_address, config.port);
    let app_state = AppState {
        services,
        store,
        config: Arc::new(config),
    };

    let router = create_router(app_state, auth_state);
    info!("Router created");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(addr = %addr, "Server listening on {}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG overrides LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
