use anyhow::{Context, Result};
use attendify_core::OnnxExtractor;
use attendify_hw::V4l2Opener;
use attendifyd::{AppState, CameraSession, Config, FrameObserver, LogObserver, NullObserver};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attendifyd", about = "Attendify live attendance daemon")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    tracing::info!(
        bind = %config.bind_addr,
        device = %config.camera_device,
        tolerance = config.tolerance,
        "attendifyd starting"
    );

    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let extractor = OnnxExtractor::load(&scrfd, &arcface)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;
    tracing::info!(scrfd = %scrfd, arcface = %arcface, "face models loaded");

    let observer: Arc<dyn FrameObserver> = if config.render {
        Arc::new(LogObserver)
    } else {
        Arc::new(NullObserver)
    };

    let session = Arc::new(CameraSession::new(
        Arc::new(V4l2Opener::new(config.camera_device.clone())),
        Arc::new(extractor),
        observer,
        config.loop_settings(),
    ));

    let app = attendifyd::router(AppState {
        session: Arc::clone(&session),
        scan_limits: config.scan_limits(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "attendifyd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("HTTP server failed")?;

    tracing::info!("attendifyd shutting down");
    tokio::task::spawn_blocking(move || session.shutdown())
        .await
        .context("camera shutdown task failed")?;

    Ok(())
}
