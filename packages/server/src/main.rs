use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{Level, info, warn};

use common::storage::filesystem::FilesystemVault;
use server::config::AppConfig;
use server::convert::{ConversionTrigger, DisabledConversionTrigger, QueueConversionTrigger};
use server::domain::memory::{MemoryRegistry, MemoryShareStore};
use server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = AppConfig::load()?;

    let vault = FilesystemVault::new(
        PathBuf::from(&config.storage.vault_dir),
        config.storage.max_file_size,
    )
    .await?;

    let converter: Arc<dyn ConversionTrigger> = if config.mq.enabled {
        let mq = mq::init_mq(mq::MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await?;
        Arc::new(QueueConversionTrigger::new(
            Arc::new(mq),
            config.mq.queue_name.clone(),
        ))
    } else {
        warn!("MQ disabled, CAD conversion jobs will be dropped");
        Arc::new(DisabledConversionTrigger)
    };

    // Iterations, access rights and share tokens are owned by the
    // surrounding PLM services; in-memory stand-ins keep this subsystem
    // bootable on its own.
    let registry = Arc::new(MemoryRegistry::new());
    let state = AppState {
        vault: Arc::new(vault),
        registry: registry.clone(),
        gate: registry,
        shares: Arc::new(MemoryShareStore::new()),
        converter,
        config: Arc::new(config.clone()),
    };

    let app = server::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
