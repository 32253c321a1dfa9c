//! Tile layout for sinks.
//!
//! The shape of the rectangles a sink requests follows the image's demand
//! hint: small square tiles, or full-width strips of fat or thin height.

use crate::core::config::EngineConfig;
use crate::core::image::DemandStyle;
use crate::core::rect::Rect;

/// Tile width and height for an image of `width` pixels under `demand`.
pub fn tile_shape(demand: DemandStyle, width: i32, config: &EngineConfig) -> (i32, i32) {
    match demand {
        DemandStyle::SmallTile => (config.tile_width, config.tile_height),
        DemandStyle::FatStrip => (width, config.fatstrip_height),
        DemandStyle::ThinStrip | DemandStyle::Any => (width, config.thinstrip_height),
    }
}

/// Iterator over tiles covering an image, left to right then top to bottom.
///
/// Edge tiles are clipped to the image, so the tiles partition it exactly.
#[derive(Debug, Clone)]
pub struct TileIterator {
    image_width: i32,
    image_height: i32,
    tile_width: i32,
    tile_height: i32,
    current_x: i32,
    current_y: i32,
}

impl TileIterator {
    /// Create a new tile iterator. Tile sizes below one are treated as one.
    pub fn new(image_width: i32, image_height: i32, tile_width: i32, tile_height: i32) -> Self {
        Self {
            image_width,
            image_height,
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
            current_x: 0,
            current_y: 0,
        }
    }

    /// Tiles for `image` under its demand hint.
    pub fn for_demand(image_rect: Rect, demand: DemandStyle, config: &EngineConfig) -> Self {
        let (tw, th) = tile_shape(demand, image_rect.width, config);
        Self::new(image_rect.width, image_rect.height, tw, th)
    }

    /// Get the total number of tiles.
    pub fn tile_count(&self) -> usize {
        if self.image_width <= 0 || self.image_height <= 0 {
            return 0;
        }
        let tiles_x = (self.image_width + self.tile_width - 1) / self.tile_width;
        let tiles_y = (self.image_height + self.tile_height - 1) / self.tile_height;
        tiles_x as usize * tiles_y as usize
    }
}

impl Iterator for TileIterator {
    type Item = Rect;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_y >= self.image_height || self.image_width <= 0 {
            return None;
        }

        let x = self.current_x;
        let y = self.current_y;
        let width = self.tile_width.min(self.image_width - x);
        let height = self.tile_height.min(self.image_height - y);

        // Move to next tile
        self.current_x += self.tile_width;
        if self.current_x >= self.image_width {
            self.current_x = 0;
            self.current_y += self.tile_height;
        }

        Some(Rect::new(x, y, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_shapes_follow_demand() {
        let config = EngineConfig::default();
        assert_eq!(tile_shape(DemandStyle::SmallTile, 1000, &config), (128, 128));
        assert_eq!(tile_shape(DemandStyle::FatStrip, 1000, &config), (1000, 16));
        assert_eq!(tile_shape(DemandStyle::ThinStrip, 1000, &config), (1000, 4));
        assert_eq!(tile_shape(DemandStyle::Any, 10, &config), (10, 4));
    }

    #[test]
    fn test_edge_tiles_are_clipped() {
        let tiles: Vec<_> = TileIterator::new(5, 3, 2, 2).collect();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[2], Rect::new(4, 0, 1, 2));
        assert_eq!(tiles[5], Rect::new(4, 2, 1, 1));
        assert_eq!(TileIterator::new(5, 3, 2, 2).tile_count(), 6);
    }

    proptest! {
        #[test]
        fn test_tiles_partition_image(w in 1i32..80, h in 1i32..80, tw in 1i32..40, th in 1i32..40) {
            let iter = TileIterator::new(w, h, tw, th);
            let count = iter.tile_count();
            let tiles: Vec<_> = iter.collect();
            prop_assert_eq!(tiles.len(), count);

            let area: i64 = tiles.iter().map(Rect::area).sum();
            prop_assert_eq!(area, w as i64 * h as i64);
            let bounds = Rect::from_size(w, h);
            for (i, a) in tiles.iter().enumerate() {
                prop_assert!(bounds.includes_rect(a));
                for b in &tiles[i + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
