//! Binary morphology.
//!
//! Hit-or-miss style erosion and dilation of 8-bit images with masks of
//! set, clear and don't-care elements.

pub mod mask;
pub mod morph;
pub mod program;

pub use mask::MorphMask;
pub use morph::{morph, MorphOp, MorphOptions};
pub use program::{CompileError, Program, MAX_PASS};
