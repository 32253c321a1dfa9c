//! Sink engine.
//!
//! The engine computes a whole image into memory. It splits the image into
//! tiles shaped by the image's demand hint and hands them to a fixed number
//! of worker lanes. Each lane owns one [`Region`] on the image, so each lane
//! gets its own sequence state and no two lanes share a region. The first
//! failing tile sets a shared stop flag; the other lanes notice before their
//! next tile and the error is returned once every lane has finished.
//!
//! Sequential images are computed on a single lane, so their tiles are
//! generated strictly top to bottom.

use crate::core::config::{self, EngineConfig};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::{Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use crate::execution::memory::MemoryTracker;
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::execution::tiles::TileIterator;
use crossbeam::channel;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Execution options.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Lanes, tile shapes and memory limit.
    pub config: EngineConfig,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressCallback>>,
    /// Stop flag the caller may set to cancel between tiles.
    pub stop: StopFlag,
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("config", &self.config)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .field("stop", &self.stop.is_set())
            .finish()
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from_config(config::current())
    }
}

impl ExecutionOptions {
    /// Create a new options builder from the active configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options taken from an explicit configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            progress_callback: None,
            stop: StopFlag::new(),
        }
    }

    /// Set the number of worker lanes (0 = available parallelism).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the small-tile shape.
    pub fn with_tile_size(mut self, width: i32, height: i32) -> Self {
        self.config.tile_width = width;
        self.config.tile_height = height;
        self
    }

    /// Set memory limit in bytes for the output buffer.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.config.memory_limit = limit;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Use a caller-held stop flag.
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }
}

/// Evaluation statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Total evaluation time.
    pub total_duration: Duration,
    /// Number of tiles computed.
    pub tiles: usize,
    /// Number of worker lanes used.
    pub lanes: usize,
    /// Tile shape used.
    pub tile_size: (i32, i32),
}

/// Result of evaluating an image.
#[derive(Debug)]
pub struct ExecutionResult {
    /// The computed pixels, as a memory image.
    pub image: Image,
    /// Evaluation statistics.
    pub stats: ExecutionStats,
}

/// The sink engine.
pub struct ExecutionEngine {
    /// Output memory accounting.
    memory: Arc<MemoryTracker>,
    /// Default execution options.
    default_options: ExecutionOptions,
}

impl ExecutionEngine {
    /// Create an engine from the active configuration.
    pub fn new() -> Self {
        Self::with_default_options(ExecutionOptions::default())
    }

    /// Create an engine with explicit default options.
    pub fn with_default_options(options: ExecutionOptions) -> Self {
        Self {
            memory: Arc::new(MemoryTracker::new(options.config.memory_limit)),
            default_options: options,
        }
    }

    /// Output memory accounting.
    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    /// Compute every pixel of `image` into a memory image.
    pub fn execute(
        &self,
        image: &Image,
        options: Option<ExecutionOptions>,
    ) -> PipelineResult<ExecutionResult> {
        let options = options.unwrap_or_else(|| self.default_options.clone());
        let start_time = Instant::now();

        if image.is_memory() {
            return Ok(ExecutionResult {
                image: image.clone(),
                stats: ExecutionStats {
                    total_duration: start_time.elapsed(),
                    ..Default::default()
                },
            });
        }

        let desc = *image.desc();
        let bytes = desc.sizeof_image();
        let _reservation = self.memory.reserve(bytes)?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| PipelineError::OutOfMemory {
                required: bytes,
                available: 0,
            })?;
        data.resize(bytes, 0);

        let tiles = TileIterator::for_demand(image.rect(), image.demand_style(), &options.config);
        let tile_size = crate::execution::tiles::tile_shape(
            image.demand_style(),
            image.width(),
            &options.config,
        );
        let total_tiles = tiles.tile_count();
        let lanes = if image.is_sequential() {
            1
        } else {
            options.config.lanes().min(total_tiles).max(1)
        };

        let mut tracker = ProgressTracker::new(total_tiles, image.rect().area() as u64);
        if let Some(callback) = &options.progress_callback {
            let callback = callback.clone();
            tracker = tracker.with_callback(Box::new(move |update| callback(update)));
        }
        tracker.start(image.source_name(), desc.width, desc.height);
        log::debug!(
            "sink: {} {}x{} as {} tiles of {}x{} on {} lanes{}",
            image.source_name(),
            desc.width,
            desc.height,
            total_tiles,
            tile_size.0,
            tile_size.1,
            lanes,
            if image.is_sequential() { ", sequential" } else { "" }
        );

        let (sender, receiver) = channel::unbounded::<Rect>();
        for tile in tiles {
            // The receiver is alive until the lanes are spawned.
            let _ = sender.send(tile);
        }
        drop(sender);

        let output = Mutex::new(data);
        let first_error: Mutex<Option<PipelineError>> = Mutex::new(None);
        let stop = options.stop.clone();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(lanes)
            .build()
            .map_err(|e| PipelineError::Internal(format!("sink: cannot start lanes: {}", e)))?;

        pool.scope(|scope| {
            for _ in 0..lanes {
                let receiver = receiver.clone();
                let stop = stop.clone();
                let output = &output;
                let first_error = &first_error;
                let tracker = &tracker;
                scope.spawn(move |_| {
                    let mut region = Region::with_stop(image, stop.clone());
                    while let Ok(tile) = receiver.recv() {
                        if stop.is_set() {
                            break;
                        }
                        match region.prepare(tile) {
                            Ok(()) => {
                                write_tile(&region, tile, &mut output.lock(), desc.sizeof_line());
                                tracker.tile_completed(tile);
                            }
                            Err(error) => {
                                first_error.lock().get_or_insert(error);
                                stop.set();
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(error) = first_error.into_inner() {
            if error == PipelineError::Cancelled {
                tracker.cancel();
            } else {
                tracker.report_error(error.to_string());
            }
            tracker.complete();
            return Err(error);
        }
        if stop.is_set() && tracker.completed() < total_tiles {
            tracker.cancel();
            tracker.complete();
            return Err(PipelineError::Cancelled);
        }
        tracker.complete();

        let stats = ExecutionStats {
            total_duration: start_time.elapsed(),
            tiles: tracker.completed(),
            lanes,
            tile_size,
        };
        log::debug!(
            "sink: {} done in {:?}",
            image.source_name(),
            stats.total_duration
        );

        Ok(ExecutionResult {
            image: Image::from_memory(desc, output.into_inner())?,
            stats,
        })
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn write_tile(region: &Region, tile: Rect, output: &mut [u8], line: usize) {
    let ps = region.sizeof_pel();
    let n = tile.width as usize;
    for y in tile.top..tile.bottom() {
        let at = y as usize * line + tile.left as usize * ps;
        output[at..at + n * ps].copy_from_slice(region.row(tile.left, y, n));
    }
}

/// Compute `image` into memory with the active configuration.
pub fn write_to_memory(image: &Image) -> PipelineResult<Image> {
    Ok(ExecutionEngine::new().execute(image, None)?.image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::BandFormat;
    use crate::core::image::{DemandStyle, Generate, ImageDesc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes x + y into every pixel, failing on one chosen tile.
    struct Coords {
        fail_at: Option<(i32, i32)>,
        starts: Arc<AtomicUsize>,
        threads: Arc<Mutex<HashSet<std::thread::ThreadId>>>,
    }

    impl Coords {
        fn image(width: i32, height: i32, demand: DemandStyle, fail_at: Option<(i32, i32)>) -> (Image, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let desc = ImageDesc::new(width, height, 1, BandFormat::UShort);
            let image = Image::pipeline(desc)
                .demand(demand)
                .generate(Coords {
                    fail_at,
                    starts: starts.clone(),
                    threads: Arc::new(Mutex::new(HashSet::new())),
                })
                .unwrap();
            (image, starts)
        }
    }

    impl Generate for Coords {
        type Seq = ();

        fn name(&self) -> &'static str {
            "coords"
        }

        fn start(&self, _stop: &StopFlag) -> PipelineResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.threads.lock().insert(std::thread::current().id());
            Ok(())
        }

        fn generate(&self, out: &mut Region, _seq: &mut (), _stop: &StopFlag) -> PipelineResult<()> {
            let r = out.valid();
            if let Some((x, y)) = self.fail_at {
                if r.includes_point(x, y) {
                    return Err(PipelineError::generate("coords", "bad tile"));
                }
            }
            for y in r.top..r.bottom() {
                for x in r.left..r.right() {
                    let v = (x + y) as u16;
                    out.row_mut(x, y, 1).copy_from_slice(&v.to_ne_bytes());
                }
            }
            Ok(())
        }
    }

    fn options(lanes: usize) -> ExecutionOptions {
        ExecutionOptions::from_config(EngineConfig::default().with_tile_size(16, 16))
            .with_concurrency(lanes)
    }

    #[test]
    fn test_execute_fills_every_pixel() {
        let (image, starts) = Coords::image(50, 37, DemandStyle::SmallTile, None);
        let engine = ExecutionEngine::with_default_options(options(4));
        let result = engine.execute(&image, None).unwrap();

        assert!(result.image.is_memory());
        assert_eq!(result.stats.tiles, 4 * 3);
        assert_eq!(result.stats.tile_size, (16, 16));
        assert!(starts.load(Ordering::SeqCst) <= 4);
        for (x, y) in [(0, 0), (49, 36), (17, 20)] {
            let pel = result.image.pel(x, y).unwrap();
            assert_eq!(u16::from_ne_bytes([pel[0], pel[1]]), (x + y) as u16);
        }
        assert_eq!(engine.memory().current_usage(), 0);
    }

    #[test]
    fn test_strip_demand_uses_full_width() {
        let (image, _) = Coords::image(40, 40, DemandStyle::FatStrip, None);
        let result = ExecutionEngine::with_default_options(options(2))
            .execute(&image, None)
            .unwrap();
        assert_eq!(result.stats.tile_size, (40, 16));
        assert_eq!(result.stats.tiles, 3);
    }

    #[test]
    fn test_first_error_is_reported() {
        let (image, _) = Coords::image(64, 64, DemandStyle::SmallTile, Some((40, 40)));
        let error = ExecutionEngine::with_default_options(options(3))
            .execute(&image, None)
            .unwrap_err();
        assert_eq!(error, PipelineError::generate("coords", "bad tile"));
    }

    #[test]
    fn test_memory_limit() {
        let (image, _) = Coords::image(64, 64, DemandStyle::SmallTile, None);
        let engine = ExecutionEngine::with_default_options(options(1).with_memory_limit(1024));
        let error = engine.execute(&image, None).unwrap_err();
        assert!(matches!(error, PipelineError::OutOfMemory { required: 8192, .. }));
    }

    #[test]
    fn test_stop_flag_cancels() {
        let (image, _) = Coords::image(64, 64, DemandStyle::SmallTile, None);
        let stop = StopFlag::new();
        stop.set();
        let error = ExecutionEngine::new()
            .execute(&image, Some(options(2).with_stop_flag(stop)))
            .unwrap_err();
        assert_eq!(error, PipelineError::Cancelled);
    }

    #[test]
    fn test_progress_reports_every_tile() {
        let (image, _) = Coords::image(32, 32, DemandStyle::SmallTile, None);
        let tiles = Arc::new(AtomicUsize::new(0));
        let seen = tiles.clone();
        let opts = options(2).with_progress(move |update| {
            if let ProgressUpdate::TileCompleted { .. } = update {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        ExecutionEngine::new().execute(&image, Some(opts)).unwrap();
        assert_eq!(tiles.load(Ordering::SeqCst), 4);
    }

    /// Records the top edge of every generated tile.
    struct Tops {
        tops: Arc<Mutex<Vec<i32>>>,
    }

    impl Generate for Tops {
        type Seq = ();

        fn name(&self) -> &'static str {
            "tops"
        }

        fn start(&self, _stop: &StopFlag) -> PipelineResult<()> {
            Ok(())
        }

        fn generate(&self, out: &mut Region, _seq: &mut (), _stop: &StopFlag) -> PipelineResult<()> {
            let r = out.valid();
            self.tops.lock().push(r.top);
            out.paint(r, 1.0);
            Ok(())
        }
    }

    #[test]
    fn test_sequential_image_runs_top_to_bottom() {
        let tops = Arc::new(Mutex::new(Vec::new()));
        let image = Image::pipeline(ImageDesc::new(40, 100, 1, BandFormat::UChar))
            .demand(DemandStyle::SmallTile)
            .sequential(true)
            .generate(Tops { tops: tops.clone() })
            .unwrap();

        let result = ExecutionEngine::with_default_options(options(4))
            .execute(&image, None)
            .unwrap();
        assert_eq!(result.stats.lanes, 1);

        let tops = tops.lock();
        assert_eq!(tops.len(), result.stats.tiles);
        assert!(tops.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", *tops);
        assert_eq!(tops.last(), Some(&96));
    }

    #[test]
    fn test_memory_image_passes_through() {
        let desc = ImageDesc::new(2, 2, 1, BandFormat::UChar);
        let image = Image::from_memory(desc, vec![1, 2, 3, 4]).unwrap();
        let out = write_to_memory(&image).unwrap();
        assert!(out.ptr_eq(&image));
    }
}
