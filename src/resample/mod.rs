//! Resampling.
//!
//! Shrinking by real-valued factors with windowed kernels, plus the
//! integer box shrink used to speed up large reductions.

pub mod kernel;
pub mod reduce;
pub mod reduceh;
pub mod reducev;
pub mod shrink;

pub use kernel::{Kernel, KernelTable, INTERPOLATE_SCALE, MAX_POINT, TRANSFORM_SCALE};
pub use reduce::{reduce, ReduceOptions};
pub use reduceh::reduceh;
pub use reducev::reducev;
pub use shrink::{shrinkh, shrinkv};
