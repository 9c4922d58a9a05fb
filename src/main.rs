//! Pi-cam-stream HTTP server binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pi_cam_stream::{router, BackendKind, CaptureBackend, Config, Session, V4l2Backend};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_filter))
                .context("invalid log filter")?,
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let session = Arc::new(Session::new(
        backends(&config.backends),
        config.session_settings(),
    ));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        devices = ?config.devices,
        backends = ?config.backends,
        "camera streaming server listening"
    );

    axum::serve(listener, router(Arc::clone(&session)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    tokio::task::spawn_blocking(move || session.shutdown())
        .await
        .context("shutdown task failed")?;
    Ok(())
}

fn backends(kinds: &[BackendKind]) -> Vec<Arc<dyn CaptureBackend>> {
    kinds
        .iter()
        .map(|kind| Arc::new(V4l2Backend::new(*kind)) as Arc<dyn CaptureBackend>)
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
