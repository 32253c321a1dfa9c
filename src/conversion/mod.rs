//! Conversion operations.
//!
//! Operations that move pixels around without changing their values:
//! placing an image on a canvas, cutting, tiling, mirroring, pasting and
//! caching. [`cast`] is the exception and changes the band format.

pub mod cache;
pub mod cast;
pub mod embed;
pub mod extract;
pub mod flip;
pub mod insert;
pub mod replicate;

pub use cache::{tile_cache, CacheStats, SharedTileCache, TileCache};
pub use cast::cast;
pub use embed::{embed, gravity, CompassDirection, EmbedGeometry, EmbedOptions, Extend};
pub use extract::extract_area;
pub use flip::{flip, Direction};
pub use insert::{insert, join};
pub use replicate::replicate;
