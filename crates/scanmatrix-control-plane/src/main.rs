use scanmatrix_control_plane::config::ControlPlaneConfig;
use scanmatrix_control_plane::features::storage::repo::{InMemoryScanRepository, ScanRepository};
use scanmatrix_control_plane::ControlPlane;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scanmatrix_control_plane=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ControlPlaneConfig::from_env();
    info!(
        tick_interval = ?config.tick_interval,
        iv_queue_limit = config.iv_queue_limit,
        seed_file = ?config.seed_file,
        "Starting Scanmatrix Control Plane"
    );

    let repo: Arc<dyn ScanRepository> = match &config.seed_file {
        Some(path) => Arc::new(InMemoryScanRepository::load_seed_file(path).await?),
        None => Arc::new(InMemoryScanRepository::new()),
    };

    let control_plane = ControlPlane::new(repo, config)?;
    let built = control_plane.start().await?;
    let status_reporting = control_plane.spawn_status_reporting();

    info!(controllers = built, "Control Plane initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    status_reporting.abort();
    control_plane.stop().await;

    Ok(())
}
