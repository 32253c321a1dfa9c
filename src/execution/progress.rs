//! Progress tracking for sinks.
//!
//! Progress is counted in pixels rather than tiles, since edge tiles are
//! clipped and strips differ in size from small tiles.

use crate::core::rect::Rect;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A progress event from a sink.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Evaluation of `image` has started.
    Started {
        image: &'static str,
        width: i32,
        height: i32,
        total_tiles: usize,
    },
    /// The tile at `rect` has been written to the output.
    TileCompleted {
        rect: Rect,
        index: usize,
        total: usize,
    },
    /// Pixel count after a tile.
    Progress {
        percent: f32,
        pixels_done: u64,
        eta_ms: Option<u64>,
    },
    /// Evaluation has finished, successfully or not.
    Completed {
        total_duration_ms: u64,
        tiles_processed: usize,
    },
    /// Evaluation was cancelled.
    Cancelled,
    /// A tile failed.
    Error {
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Counts computed tiles and pixels across lanes.
pub struct ProgressTracker {
    total_tiles: usize,
    total_pixels: u64,
    tiles_done: AtomicU64,
    pixels_done: AtomicU64,
    cancelled: AtomicBool,
    start_time: Instant,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// A tracker for an output of `total_pixels` split into `total_tiles`.
    pub fn new(total_tiles: usize, total_pixels: u64) -> Self {
        Self {
            total_tiles,
            total_pixels,
            tiles_done: AtomicU64::new(0),
            pixels_done: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
            callback: None,
        }
    }

    /// Send every event to `callback`.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Reset the clock and announce the image.
    pub fn start(&mut self, image: &'static str, width: i32, height: i32) {
        self.start_time = Instant::now();
        self.send(ProgressUpdate::Started {
            image,
            width,
            height,
            total_tiles: self.total_tiles,
        });
    }

    /// Record a finished tile. Safe to call from any lane.
    pub fn tile_completed(&self, rect: Rect) {
        let index = self.tiles_done.fetch_add(1, Ordering::Relaxed) as usize + 1;
        let area = rect.area().max(0) as u64;
        let pixels_done = self.pixels_done.fetch_add(area, Ordering::Relaxed) + area;

        self.send(ProgressUpdate::TileCompleted {
            rect,
            index,
            total: self.total_tiles,
        });
        self.send(ProgressUpdate::Progress {
            percent: self.percent_of(pixels_done),
            pixels_done,
            eta_ms: self.eta_of(pixels_done),
        });
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Mark the evaluation cancelled. Only the first call is reported.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            self.send(ProgressUpdate::Cancelled);
        }
    }

    /// Report a failed tile.
    pub fn report_error(&self, message: String) {
        self.send(ProgressUpdate::Error { message });
    }

    /// Announce the end of evaluation.
    pub fn complete(&self) {
        self.send(ProgressUpdate::Completed {
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            tiles_processed: self.completed(),
        });
    }

    /// Tiles finished so far.
    pub fn completed(&self) -> usize {
        self.tiles_done.load(Ordering::Relaxed) as usize
    }

    /// Percentage of pixels finished.
    pub fn progress_percent(&self) -> f32 {
        self.percent_of(self.pixels_done.load(Ordering::Relaxed))
    }

    fn percent_of(&self, pixels_done: u64) -> f32 {
        if self.total_pixels == 0 {
            return 100.0;
        }
        pixels_done as f32 * 100.0 / self.total_pixels as f32
    }

    /// Remaining time at the mean pixel rate so far.
    fn eta_of(&self, pixels_done: u64) -> Option<u64> {
        if pixels_done == 0 {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_millis() as u64;
        let remaining = self.total_pixels.saturating_sub(pixels_done);
        Some(elapsed.saturating_mul(remaining) / pixels_done)
    }

    fn send(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.callback {
            callback(update);
        }
    }
}
