use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::{constants::EMPTY_CELL, palette};

/// The shared grid of palette indices, stored row-major.
///
/// All writes go through one lock, so concurrent draws on the same cell are
/// applied in the order they reach the store and the last one wins.
#[derive(Debug)]
pub struct CanvasStore {
    width: u32,
    height: u32,
    cells: RwLock<Vec<u8>>,
}

impl CanvasStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: RwLock::new(vec![EMPTY_CELL; width as usize * height as usize]),
        }
    }

    /// Builds a store from an existing row-major buffer. Returns `None` if the
    /// buffer length does not match the dimensions or holds an invalid index.
    pub fn from_cells(width: u32, height: u32, cells: Vec<u8>) -> Option<Self> {
        if cells.len() != width as usize * height as usize {
            return None;
        }
        if !cells.iter().all(|&cell| palette::is_valid_index(cell)) {
            return None;
        }

        Some(Self {
            width,
            height,
            cells: RwLock::new(cells),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Writes one cell. Returns `false` and leaves the canvas untouched when
    /// the coordinates or the color index are out of range.
    pub fn set(&self, x: i64, y: i64, color: u8) -> bool {
        if !palette::is_valid_index(color) {
            return false;
        }
        let Some(offset) = self.offset(x, y) else {
            return false;
        };

        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        cells[offset] = color;
        true
    }

    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        let offset = self.offset(x, y)?;
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        Some(cells[offset])
    }

    /// Reads a `width` x `height` window starting at (`x`, `y`), row-major.
    /// Cells outside the canvas read as [`EMPTY_CELL`].
    pub fn region(&self, x: i64, y: i64, width: u32, height: u32) -> Vec<u8> {
        let mut out = vec![EMPTY_CELL; width as usize * height as usize];

        // Intersection of the request with the canvas, in canvas coordinates.
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = x.saturating_add(width as i64).min(self.width as i64);
        let y1 = y.saturating_add(height as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return out;
        }

        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let span = (x1 - x0) as usize;
        for cy in y0..y1 {
            let src = cy as usize * self.width as usize + x0 as usize;
            let dst = (cy - y) as usize * width as usize + (x0 - x) as usize;
            out[dst..dst + span].copy_from_slice(&cells[src..src + span]);
        }

        out
    }

    /// Copies the whole grid out so that callers can do slow work without
    /// holding the lock.
    pub fn cells(&self) -> Vec<u8> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        debug!("Copied {} canvas cells", cells.len());
        cells.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_then_get_returns_written_color() {
        let canvas = CanvasStore::new(20, 10);
        for (x, y, color) in [(0, 0, 1), (19, 9, 15), (7, 3, 4), (7, 3, 9)] {
            assert!(canvas.set(x, y, color));
            assert_eq!(canvas.get(x, y), Some(color));
        }
    }

    #[test]
    fn invalid_writes_are_rejected_without_side_effects() {
        let canvas = CanvasStore::new(8, 8);
        assert!(canvas.set(3, 3, 2));
        let before = canvas.cells();

        assert!(!canvas.set(-1, 0, 1));
        assert!(!canvas.set(0, -1, 1));
        assert!(!canvas.set(8, 0, 1));
        assert!(!canvas.set(0, 8, 1));
        assert!(!canvas.set(3, 3, 16));
        assert!(!canvas.set(3, 3, u8::MAX));

        assert_eq!(canvas.cells(), before);
        assert_eq!(canvas.get(8, 0), None);
    }

    #[test]
    fn region_outside_canvas_is_zero_filled() {
        let canvas = CanvasStore::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                canvas.set(x, y, 7);
            }
        }

        assert_eq!(canvas.region(100, 100, 3, 2), vec![0; 6]);
        assert_eq!(canvas.region(-10, -10, 5, 5), vec![0; 25]);
        assert!(canvas.region(0, 0, 0, 5).is_empty());
    }

    #[test]
    fn region_overlapping_edge_copies_the_overlap() {
        let canvas = CanvasStore::new(3, 3);
        canvas.set(0, 0, 1);
        canvas.set(1, 0, 2);
        canvas.set(0, 1, 3);
        canvas.set(2, 2, 4);

        #[rustfmt::skip]
        assert_eq!(canvas.region(-1, -1, 3, 3), vec![
            0, 0, 0,
            0, 1, 2,
            0, 3, 0,
        ]);

        #[rustfmt::skip]
        assert_eq!(canvas.region(1, 1, 3, 2), vec![
            0, 0, 0,
            0, 4, 0,
        ]);
    }

    #[test]
    fn from_cells_rejects_bad_buffers() {
        assert!(CanvasStore::from_cells(2, 2, vec![0; 3]).is_none());
        assert!(CanvasStore::from_cells(2, 2, vec![0, 1, 2, 16]).is_none());

        let canvas = CanvasStore::from_cells(2, 2, vec![0, 1, 2, 3]).unwrap();
        assert_eq!(canvas.get(1, 1), Some(3));
    }

    #[test]
    fn concurrent_writers_leave_only_valid_cells() {
        let canvas = Arc::new(CanvasStore::new(16, 16));
        let handles: Vec<_> = (0..8u8)
            .map(|color| {
                let canvas = canvas.clone();
                std::thread::spawn(move || {
                    for i in 0..256 {
                        canvas.set(i % 16, i / 16, color);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(canvas.cells().iter().all(|&cell| cell < 8));
    }
}
