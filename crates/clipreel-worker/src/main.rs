//! Compilation worker binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use clipreel_media::{ProcessSupervisor, ShutdownSignal};
use clipreel_models::ClipRecord;
use clipreel_worker::logging::init_tracing;
use clipreel_worker::{metrics, Compiler, CompilerConfig, DateWindow};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider for avatar downloads over HTTPS
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting clipreel-worker");

    let config = match CompilerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(addr) = env_value("CLIPREEL_METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    warn!("Metrics exporter disabled: {}", e);
                }
            }
            Err(e) => warn!("Ignoring CLIPREEL_METRICS_ADDR '{}': {}", addr, e),
        }
    }

    let clips = match load_clips().await {
        Ok(clips) => clips,
        Err(e) => {
            error!("Failed to load clips: {}", e);
            std::process::exit(1);
        }
    };

    let identity = env_value("CLIPREEL_IDENTITY").unwrap_or_default();
    let window = DateWindow::new(env_value("CLIPREEL_WINDOW_START"), env_value("CLIPREEL_WINDOW_END"));

    let supervisor = Arc::new(
        ProcessSupervisor::new(ShutdownSignal::new())
            .with_grace(config.shutdown_grace)
            .with_poll_interval(config.poll_interval),
    );

    let mut compiler = match Compiler::from_config(config, supervisor.clone()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create compiler: {}", e);
            std::process::exit(1);
        }
    };

    // Setup signal handler
    let signal_supervisor = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_supervisor.request_shutdown().await;
        }
    });

    match compiler.run(&clips, &identity, &window).await {
        Ok(summary) => {
            for c in &summary.compilations {
                info!(
                    compilation = c.index,
                    clips = c.clips,
                    done = c.done,
                    outcome = c.outcome.as_str(),
                    "Compilation result"
                );
            }
            for path in &summary.finalized.moved {
                info!(output = %path.display(), "Wrote compilation");
            }
        }
        Err(e) if e.is_interrupted() => {
            warn!("Run interrupted");
            std::process::exit(130);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            std::process::exit(1);
        }
    }

    info!("Worker shutdown complete");
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the ingested clip list from `CLIPREEL_CLIPS_FILE`.
async fn load_clips() -> anyhow::Result<Vec<ClipRecord>> {
    let path = env_value("CLIPREEL_CLIPS_FILE")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("CLIPREEL_CLIPS_FILE is not set"))?;
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let clips: Vec<ClipRecord> = serde_json::from_slice(&raw)?;
    info!(count = clips.len(), path = %path.display(), "Loaded clips");
    Ok(clips)
}
