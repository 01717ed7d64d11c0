use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use stageflow_api as api;
use api::config::StorageBackend;
use api::repositories::{ProcessRecordStore, ProductionOrderStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json || cfg.is_production());

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Compose shared app state over the configured storage
    let app_state = match cfg.storage_backend() {
        StorageBackend::InMemory => {
            info!("Using in-memory storage; data is lost on restart");
            api::AppState::in_memory(cfg.clone(), Some(event_sender))
        }
        StorageBackend::Database => {
            let db_cfg = api::db::DbConfig::from(&cfg);
            let db_pool = api::db::establish_connection_with_config(&db_cfg)
                .await
                .context("failed to connect to database")?;
            if cfg.auto_migrate {
                api::db::run_migrations(&db_pool).await.map_err(|e| {
                    error!("Failed running migrations: {}", e);
                    e
                })?;
            }

            let db_arc = Arc::new(db_pool);
            api::AppState::new(
                cfg.clone(),
                Arc::new(ProductionOrderStore::new(db_arc.clone())),
                Arc::new(ProcessRecordStore::new(db_arc)),
                Some(event_sender),
            )
        }
    };

    let app = api::build_router(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("stageflow-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stageflow-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
