mod api;
mod audio;
mod backend;
mod chunker;
mod cli;
mod config;
mod error;
mod languages;
mod render;
mod upload;
mod workflow;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::backend::build_backend;
use crate::chunker::FfmpegSplitter;
use crate::cli::{run_interactive, Cli, Command};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_translate_web=info,axum=info".into()),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;
    let translator = build_backend(&cfg)?;

    if cfg.azure.key.is_none() || cfg.azure.region.is_none() {
        warn!("COG_SERVICE_KEY or COG_SERVICE_REGION is not set; translations will fail");
    }

    if let Some(Command::Interactive { file }) = cli.command {
        let file = file.unwrap_or_else(|| cfg.default_audio.clone());
        run_interactive(translator.as_ref(), &file, cfg.chunk_timeout).await?;
        return Ok(());
    }

    cfg.ensure_dirs()?;
    let splitter = Arc::new(FfmpegSplitter::new(&cfg));
    let state = Arc::new(AppState::new(cfg.clone(), splitter, translator));

    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        upload_dir = ?cfg.upload_dir,
        default_audio = ?cfg.default_audio,
        persist_uploads = cfg.persist_uploads,
        chunk_seconds = cfg.chunk_seconds,
        "starting speech-translate-web"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
