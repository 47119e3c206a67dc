use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    broadcast::BroadcastScheduler, canvas::CanvasStore, config::Config,
    rate_limit::RateLimiter, snapshot::Snapshotter,
};

#[derive(Debug)]
pub struct AppState {
    pub canvas: Arc<CanvasStore>,
    pub rate_limiter: RateLimiter,
    pub scheduler: BroadcastScheduler,
    pub snapshots: Snapshotter,
    pub environment: String,
    pub max_region_cells: u64,
    connections: AtomicUsize,
}

impl AppState {
    pub fn new(config: &Config, canvas: CanvasStore) -> AppState {
        let canvas = Arc::new(canvas);
        let snapshots = Snapshotter::new(canvas.clone(), config.snapshot_path.clone());

        AppState {
            canvas,
            rate_limiter: RateLimiter::new(config.cooldown()),
            scheduler: BroadcastScheduler::default(),
            snapshots,
            environment: config.environment.clone(),
            max_region_cells: config.max_region_cells(),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use clap::Parser;

    use super::*;

    /// A small canvas with a short cooldown, snapshots under `snapshot_dir`.
    pub fn test_state(snapshot_dir: &std::path::Path) -> Arc<AppState> {
        let mut config = Config::try_parse_from(["place-canvas"]).unwrap();
        config.canvas_width = 32;
        config.canvas_height = 32;
        config.cooldown_ms = 5000;
        config.snapshot_path = snapshot_dir.join("canvas.png");
        config.max_region_cells = None;

        Arc::new(AppState::new(&config, CanvasStore::new(32, 32)))
    }
}
