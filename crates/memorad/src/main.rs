use anyhow::{Context, Result};
use memora_core::{IdentityStore, SharedState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod consumer;
mod dbus_interface;
mod engine;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("memorad starting");

    let config = config::Config::from_env();

    let store: Arc<dyn IdentityStore> = Arc::new(
        store::JsonIdentityStore::open(&config.db_path, &config.image_dir)
            .with_context(|| format!("opening identity store {}", config.db_path.display()))?,
    );

    let shared = Arc::new(SharedState::default());
    if let Err(e) = shared.registry.reload(store.as_ref()) {
        tracing::warn!(error = %e, "initial registry load failed; starting with no known identities");
    }

    let processor = engine::load_processor(&config)?;
    let source = engine::open_source(&config)?;
    let camera = source.backend().to_string();
    let engine = engine::spawn_engine(source, processor, Arc::clone(&shared), config.tick)?;

    let view: consumer::SharedView = Arc::default();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = consumer::spawn_consumer(
        Arc::clone(&shared),
        Arc::clone(&view),
        consumer::ConsumerSettings {
            idle_poll: config.idle_poll,
            pending_poll: config.pending_poll,
            pending_timeout: config.pending_timeout,
        },
        shutdown_rx,
    );

    let service = dbus_interface::MemoraService {
        shared,
        store,
        view,
        camera,
        tolerance: config.tolerance,
    };
    let _conn = zbus::connection::Builder::session()?
        .name("org.memora.Daemon1")?
        .serve_at("/org/memora/Daemon1", service)?
        .build()
        .await?;

    tracing::info!(engine_running = engine.is_running(), "memorad ready on org.memora.Daemon1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("memorad shutting down");

    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer.await {
        tracing::warn!(error = %e, "consumer task ended abnormally");
    }
    tokio::task::spawn_blocking(move || engine.shutdown()).await?;

    Ok(())
}
