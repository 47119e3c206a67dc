use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use place_canvas::canvas::CanvasStore;
use place_canvas::config::Config;
use place_canvas::state::AppState;
use place_canvas::{routes, snapshot, tasks};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or("info,place_canvas=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate()?;
    info!("Starting canvas server ({} environment)", config.environment);

    let (width, height) = (config.canvas_width, config.canvas_height);
    let canvas = match snapshot::load(&config.snapshot_path, width, height) {
        Ok(canvas) => canvas,
        Err(e) => {
            warn!(
                "Failed to load snapshot from {}: {}, starting with a blank canvas",
                config.snapshot_path.display(),
                e
            );
            CanvasStore::new(width, height)
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    let app_state = Arc::new(AppState::new(&config, canvas));
    info!("Application state initialized ({}x{} canvas)", width, height);

    let mut background = vec![
        tasks::spawn_broadcaster(app_state.clone(), config.broadcast_interval()),
        tasks::spawn_cooldown_sweeper(app_state.clone(), config.sweep_interval()),
    ];
    if let Some(period) = config.autosave_interval() {
        background.push(tasks::spawn_autosave(app_state.clone(), period));
    }

    let app = routes::router(app_state.clone());

    info!("Server running at {}", addr);

    // Open WebSockets never finish on their own, so the server is dropped on
    // signal instead of draining connections.
    let result: anyhow::Result<()> = tokio::select! {
        result = axum::serve(listener, app).into_future() => result.map_err(|e| {
            error!("Server error: {}", e);
            e.into()
        }),
        _ = shutdown_signal() => Ok(()),
        name = tasks::watch(&mut background) => {
            Err(anyhow::anyhow!("Background {} task stopped unexpectedly", name))
        }
    };

    // Cleanup
    warn!("Server shutting down");
    for task in background {
        task.stop();
    }
    tasks::shutdown_snapshot(&app_state, config.shutdown_save_timeout()).await;

    result
}
