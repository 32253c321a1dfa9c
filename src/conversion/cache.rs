//! Tile caching.
//!
//! Caches computed tiles of an image so consumers that revisit the same
//! area (several overlapping reads, or a non-streaming sink) do not pay for
//! recomputation. The cache is shared by every lane evaluating the image.

use crate::core::config;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Position of a tile in the tile grid.
pub type TileKey = (i32, i32);

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of tiles evicted.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Thread-safe LRU store of packed tile pixels.
pub struct TileCache {
    /// The LRU cache.
    tiles: Mutex<LruCache<TileKey, Arc<Vec<u8>>>>,
    /// Tile width.
    tile_width: i32,
    /// Tile height.
    tile_height: i32,
    /// Cache statistics.
    stats: Mutex<CacheStats>,
}

/// A cache wrapped in Arc.
pub type SharedTileCache = Arc<TileCache>;

impl TileCache {
    /// A cache holding at most `max_tiles` tiles of the configured small-tile size.
    pub fn new(max_tiles: usize) -> Self {
        let config = config::current();
        Self::with_tile_size(max_tiles, config.tile_width, config.tile_height)
    }

    /// A cache holding at most `max_tiles` tiles of `width` x `height`.
    pub fn with_tile_size(max_tiles: usize, width: i32, height: i32) -> Self {
        let capacity = NonZeroUsize::new(max_tiles).unwrap_or(NonZeroUsize::MIN);
        Self {
            tiles: Mutex::new(LruCache::new(capacity)),
            tile_width: width.max(1),
            tile_height: height.max(1),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Get a cached tile.
    pub fn get(&self, key: &TileKey) -> Option<Arc<Vec<u8>>> {
        let found = self.tiles.lock().get(key).cloned();
        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Store a tile, evicting the least recently used one if full.
    pub fn put(&self, key: TileKey, pixels: Arc<Vec<u8>>) {
        if let Some((evicted, _)) = self.tiles.lock().push(key, pixels) {
            if evicted != key {
                self.stats.lock().evictions += 1;
            }
        }
    }

    /// Tile width and height.
    pub fn tile_size(&self) -> (i32, i32) {
        (self.tile_width, self.tile_height)
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.tiles.lock().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Bytes of pixels held.
    pub fn memory_usage(&self) -> usize {
        self.tiles.lock().iter().map(|(_, tile)| tile.len()).sum()
    }

    /// Get number of cached tiles.
    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CachedTiles {
    input: Image,
    cache: SharedTileCache,
}

impl CachedTiles {
    /// Grid cell `key` clipped to the image.
    fn tile_rect(&self, key: TileKey) -> Rect {
        let (tw, th) = self.cache.tile_size();
        Rect::new(key.0 * tw, key.1 * th, tw, th).intersect(&self.input.rect())
    }
}

impl Generate for CachedTiles {
    type Seq = Region;

    fn name(&self) -> &'static str {
        "tilecache"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        let (tw, th) = self.cache.tile_size();
        let ps = out.sizeof_pel();

        for ty in r.top / th..=(r.bottom() - 1) / th {
            for tx in r.left / tw..=(r.right() - 1) / tw {
                if stop.is_set() {
                    return Err(PipelineError::Cancelled);
                }
                let key = (tx, ty);
                let tile = self.tile_rect(key);
                let pixels = match self.cache.get(&key) {
                    Some(pixels) => pixels,
                    None => {
                        ir.prepare(tile)?;
                        let mut packed = Vec::with_capacity(tile.area() as usize * ps);
                        for y in tile.top..tile.bottom() {
                            packed.extend_from_slice(ir.row(tile.left, y, tile.width as usize));
                        }
                        let pixels = Arc::new(packed);
                        self.cache.put(key, pixels.clone());
                        pixels
                    }
                };

                let paint = tile.intersect(&r);
                let n = paint.width as usize * ps;
                for y in paint.top..paint.bottom() {
                    let at = (y - tile.top) as usize * tile.width as usize * ps
                        + (paint.left - tile.left) as usize * ps;
                    out.row_mut(paint.left, y, paint.width as usize)
                        .copy_from_slice(&pixels[at..at + n]);
                }
            }
        }
        Ok(())
    }
}

/// `input` with its tiles remembered in `cache`.
pub fn tile_cache(input: &Image, cache: SharedTileCache) -> PipelineResult<Image> {
    Image::pipeline(*input.desc())
        .input(input)
        .generate(CachedTiles {
            input: input.clone(),
            cache,
        })
}
