use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::constants::*;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Canvas dimensions must be non-zero, got {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, Parser)]
#[command(about = "Shared real-time pixel canvas server")]
pub struct Config {
    #[arg(
        help = "Port to listen on",
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT
    )]
    pub port: u16,

    #[arg(
        help = "Deployment label, only used in logs and health output",
        long = "env",
        env = "APP_ENV",
        default_value = "development"
    )]
    pub environment: String,

    #[arg(long, env = "CANVAS_WIDTH", default_value_t = DEFAULT_CANVAS_WIDTH)]
    pub canvas_width: u32,

    #[arg(long, env = "CANVAS_HEIGHT", default_value_t = DEFAULT_CANVAS_HEIGHT)]
    pub canvas_height: u32,

    #[arg(
        help = "Minimum time between two draws of one client",
        long,
        env = "COOLDOWN_MS",
        default_value_t = DEFAULT_COOLDOWN_MS
    )]
    pub cooldown_ms: u64,

    #[arg(
        long,
        env = "BROADCAST_INTERVAL_MS",
        default_value_t = DEFAULT_BROADCAST_INTERVAL_MS
    )]
    pub broadcast_interval_ms: u64,

    #[arg(long, env = "SWEEP_INTERVAL_MS", default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    pub sweep_interval_ms: u64,

    #[arg(long, env = "SNAPSHOT_PATH", default_value = DEFAULT_SNAPSHOT_PATH)]
    pub snapshot_path: PathBuf,

    #[arg(
        help = "Seconds between automatic snapshots, 0 disables them",
        long,
        env = "AUTOSAVE_INTERVAL_SECS",
        default_value_t = DEFAULT_AUTOSAVE_INTERVAL_SECS
    )]
    pub autosave_interval_secs: u64,

    #[arg(
        long,
        env = "SHUTDOWN_SAVE_TIMEOUT_SECS",
        default_value_t = DEFAULT_SHUTDOWN_SAVE_TIMEOUT_SECS
    )]
    pub shutdown_save_timeout_secs: u64,

    #[arg(
        help = "Largest region query answered, in cells. Defaults to 4x the canvas area, \
                at least 4096x4096",
        long,
        env = "MAX_REGION_CELLS"
    )]
    pub max_region_cells: Option<u64>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(ConfigError::EmptyCanvas {
                width: self.canvas_width,
                height: self.canvas_height,
            });
        }
        if self.cooldown_ms == 0 {
            return Err(ConfigError::ZeroDuration("cooldown"));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("broadcast interval"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0).then(|| Duration::from_secs(self.autosave_interval_secs))
    }

    pub fn shutdown_save_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_save_timeout_secs)
    }

    /// Only abusive sizes are refused by default; overscanning the whole
    /// canvas is still answered.
    pub fn max_region_cells(&self) -> u64 {
        let area = self.canvas_width as u64 * self.canvas_height as u64;
        let default = area.saturating_mul(REGION_OVERSCAN_FACTOR).max(MIN_MAX_REGION_CELLS);
        self.max_region_cells.unwrap_or(default)
    }
}
