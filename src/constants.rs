pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CANVAS_WIDTH: u32 = 2000;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 2000;
pub const DEFAULT_COOLDOWN_MS: u64 = 5000;
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SHUTDOWN_SAVE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SNAPSHOT_PATH: &str = "canvas.png";

/// Cooldown records older than this many cooldown windows are swept.
pub const STALE_COOLDOWN_FACTOR: u32 = 10;

/// Default region query limit, as a multiple of the canvas area.
pub const REGION_OVERSCAN_FACTOR: u64 = 4;
/// Floor for the default region query limit (4096x4096 cells).
pub const MIN_MAX_REGION_CELLS: u64 = 1 << 24;

/// Fill value for cells that are out of bounds or never drawn.
pub const EMPTY_CELL: u8 = 0;

pub const BROADCAST_CHANNEL_CAPACITY: usize = 100;
pub const REPLY_CHANNEL_CAPACITY: usize = 32;
