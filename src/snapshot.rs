use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{ImageFormat, ImageReader, Rgb, RgbImage};
use tracing::{debug, info, instrument, warn};

use crate::{canvas::CanvasStore, constants::EMPTY_CELL, palette};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Cell buffer of {len} bytes does not fit a {width}x{height} canvas")]
    BufferSize { len: usize, width: u32, height: u32 },
    #[error("A snapshot save is already in progress")]
    InProgress,
    #[error("Snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Reads the snapshot at `path` into a `width` x `height` canvas.
///
/// A missing file yields a blank canvas. Every pixel is snapped to the nearest
/// palette color; only the overlap of image and canvas is populated.
#[instrument(skip(path), fields(snapshot = %path.display()))]
pub fn load(path: &Path, width: u32, height: u32) -> Result<CanvasStore, SnapshotError> {
    match fs::metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No snapshot found, starting with a blank canvas");
            return Ok(CanvasStore::new(width, height));
        }
        Err(e) => return Err(e.into()),
    }

    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8();

    if image.width() != width || image.height() != height {
        warn!(
            "Snapshot is {}x{} but canvas is {}x{}, loading the overlapping region only",
            image.width(),
            image.height(),
            width,
            height
        );
    }

    let mut cells = vec![EMPTY_CELL; width as usize * height as usize];
    let overlap_w = image.width().min(width);
    let overlap_h = image.height().min(height);
    for y in 0..overlap_h {
        for x in 0..overlap_w {
            let Rgb(color) = *image.get_pixel(x, y);
            cells[y as usize * width as usize + x as usize] = palette::nearest_index(color);
        }
    }

    let len = cells.len();
    let canvas = CanvasStore::from_cells(width, height, cells).ok_or(SnapshotError::BufferSize {
        len,
        width,
        height,
    })?;

    info!("Loaded {}x{} snapshot", overlap_w, overlap_h);
    Ok(canvas)
}

/// Renders a row-major cell buffer as an opaque RGB image.
pub fn render(cells: &[u8], width: u32, height: u32) -> Result<RgbImage, SnapshotError> {
    if cells.len() != width as usize * height as usize {
        return Err(SnapshotError::BufferSize {
            len: cells.len(),
            width,
            height,
        });
    }

    let mut raw = Vec::with_capacity(cells.len() * 3);
    for &cell in cells {
        raw.extend(palette::rgb(cell).unwrap_or(palette::PALETTE[0]));
    }

    RgbImage::from_raw(width, height, raw).ok_or(SnapshotError::BufferSize {
        len: cells.len(),
        width,
        height,
    })
}

/// Encodes `cells` as a PNG and moves it into place at `path` once fully
/// written. On failure the temporary file is removed and `path` is left as it
/// was.
#[instrument(skip(cells, path), fields(snapshot = %path.display()))]
pub fn save(cells: &[u8], width: u32, height: u32, path: &Path) -> Result<(), SnapshotError> {
    let image = render(cells, width, height)?;
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageFormat::Png)?;
    let encoded = encoded.into_inner();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let write_result = (|| -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    debug!("Wrote {} byte snapshot", encoded.len());
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{:08x}.tmp", file_name, rand::random::<u32>()))
}

/// Saves the live canvas to disk, one save at a time.
#[derive(Debug)]
pub struct Snapshotter {
    canvas: Arc<CanvasStore>,
    path: PathBuf,
    in_flight: Arc<AtomicBool>,
}

impl Snapshotter {
    pub fn new(canvas: Arc<CanvasStore>, path: PathBuf) -> Self {
        Self {
            canvas,
            path,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the single save slot until the returned guard is dropped.
    pub(crate) fn try_begin(&self) -> Option<SaveGuard> {
        SaveGuard::acquire(&self.in_flight)
    }

    /// Copies the canvas and writes it out on the blocking pool. Draws keep
    /// landing while the file is written. Fails with
    /// [`SnapshotError::InProgress`] if another save has not finished yet.
    ///
    /// The slot is held by the blocking write itself, so dropping this future
    /// does not free it before the file is in place.
    pub async fn save(&self) -> Result<PathBuf, SnapshotError> {
        let guard = self.try_begin().ok_or(SnapshotError::InProgress)?;

        let cells = self.canvas.cells();
        let (width, height) = (self.canvas.width(), self.canvas.height());
        let path = self.path.clone();

        let started = tokio::time::Instant::now();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            save(&cells, width, height, &path)
        })
        .await??;
        info!(
            "Saved snapshot to {} in {:?}",
            self.path.display(),
            started.elapsed()
        );

        Ok(self.path.clone())
    }
}

pub(crate) struct SaveGuard(Arc<AtomicBool>);

impl SaveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
