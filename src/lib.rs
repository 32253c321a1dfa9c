//! # Tessella - Demand-driven Image Pipelines
//!
//! Tessella builds images as lazy graphs of operations and computes them
//! region by region. Nothing is evaluated until a sink asks for pixels;
//! each operation then pulls only the input area it needs from the
//! operations below it.
//!
//! ## Features
//!
//! - **Region-based evaluation**: Outputs are computed in tiles or strips, so
//!   memory use depends on tile size rather than image size
//! - **Parallel sinks**: Tiles are spread over worker lanes, each with its own
//!   per-operation sequence state
//! - **Typed pixels**: Ten band formats from 8-bit unsigned to double complex
//! - **Operations**: Embedding with six edge policies, windowed-kernel
//!   reduction, binary morphology with a compiled fast path, and text
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessella::prelude::*;
//!
//! let input = tessella::create::load("input.png")?;
//!
//! // Pad by 16 pixels of mirrored edge, then halve.
//! let padded = embed(
//!     &input,
//!     16,
//!     16,
//!     input.width() + 32,
//!     input.height() + 32,
//!     &EmbedOptions::new().with_extend(Extend::Mirror),
//! )?;
//! let small = reduce(&padded, 2.0, 2.0, &ReduceOptions::default())?;
//!
//! // Nothing has been computed yet. Saving runs the pipeline.
//! tessella::create::save(&small, "output.png")?;
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`core`]: Buffers, rectangles, formats, images, regions, config and errors
//! - [`execution`]: The sink that evaluates an image into memory
//! - [`conversion`]: Embed, gravity and the helpers they are built from
//! - [`resample`]: Kernels and the reduce family
//! - [`morphology`]: Erode and dilate
//! - [`create`]: Text rendering and file interop
//!
//! ## Writing Operations
//!
//! An operation is a type implementing [`Generate`](core::Generate). It
//! fills one output region at a time, preparing input regions as needed:
//!
//! ```rust,ignore
//! use tessella::prelude::*;
//!
//! struct Invert {
//!     input: Image,
//! }
//!
//! impl Generate for Invert {
//!     type Seq = Region;
//!
//!     fn name(&self) -> &'static str {
//!         "invert"
//!     }
//!
//!     fn start(&self, _stop: &StopFlag) -> PipelineResult<Region> {
//!         Ok(Region::new(&self.input))
//!     }
//!
//!     fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
//!         let valid = out.valid();
//!         ir.prepare(valid)?;
//!         for y in valid.top..valid.bottom() {
//!             let src = ir.row(valid.left, y, valid.width as usize).to_vec();
//!             for (d, s) in out.row_mut(valid.left, y, valid.width as usize).iter_mut().zip(src) {
//!                 *d = 255 - s;
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let inverted = Image::pipeline(*input.desc())
//!     .input(&input)
//!     .generate(Invert { input: input.clone() })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conversion;
pub mod core;
pub mod create;
pub mod execution;
pub mod morphology;
pub mod resample;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use tessella::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::area::{ArrayDouble, ArrayInt, Blob, RefString, TypedArea};
    pub use crate::core::format::{BandFormat, Coding, Interpretation};
    pub use crate::core::image::{DemandStyle, Generate, Image, ImageDesc, StopFlag};
    pub use crate::core::rect::Rect;
    pub use crate::core::region::Region;

    // Configuration
    pub use crate::core::config::EngineConfig;

    // Errors
    pub use crate::core::error::{PipelineError, PipelineResult, TessellaError, TessellaResult};

    // Execution
    pub use crate::execution::engine::{write_to_memory, ExecutionEngine, ExecutionOptions, ExecutionResult};
    pub use crate::execution::progress::{ProgressTracker, ProgressUpdate};

    // Operations
    pub use crate::conversion::{embed, gravity, CompassDirection, EmbedOptions, Extend};
    pub use crate::morphology::{morph, MorphMask, MorphOp, MorphOptions};
    pub use crate::resample::{reduce, reduceh, reducev, Kernel, ReduceOptions};
    pub use crate::create::{text, TextOptions};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn gradient(width: i32, height: i32) -> Image {
        let desc = ImageDesc::new(width, height, 1, BandFormat::UChar);
        Image::from_fn(desc, |x, y, _| ((x * 7 + y * 3) % 256) as f64).unwrap()
    }

    fn pixels(image: &Image) -> Vec<u8> {
        write_to_memory(image).unwrap().memory().unwrap().data().to_vec()
    }

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "tessella");
    }

    #[test]
    fn test_embed_then_reduce_then_morph() {
        let input = gradient(40, 30);
        let padded = embed(&input, 8, 8, 56, 46, &EmbedOptions::new().with_extend(Extend::Mirror)).unwrap();
        let small = reduce(&padded, 2.0, 2.0, &ReduceOptions::default()).unwrap();
        assert_eq!((small.width(), small.height()), (28, 23));

        let mask = MorphMask::square(3, 3).unwrap();
        let eroded = morph(&small, &mask, MorphOp::Erode, &MorphOptions::default()).unwrap();
        assert_eq!((eroded.width(), eroded.height()), (26, 21));
        assert_eq!(pixels(&eroded).len(), 26 * 21);
    }

    #[test]
    fn test_results_do_not_depend_on_lane_count() {
        // Reduce is sequential and always runs on one lane, so use a chain
        // that can spread across lanes.
        let input = gradient(61, 47);
        let padded = embed(&input, 5, 3, 80, 60, &EmbedOptions::new().with_extend(Extend::Repeat)).unwrap();
        let mask = MorphMask::from_rows(&[&[255, 0], &[128, 255]]).unwrap();
        let image = morph(&padded, &mask, MorphOp::Dilate, &MorphOptions::default()).unwrap();
        assert!(!image.is_sequential());

        let one = ExecutionEngine::with_default_options(ExecutionOptions::new().with_concurrency(1))
            .execute(&image, None)
            .unwrap();
        let many = ExecutionEngine::with_default_options(
            ExecutionOptions::new().with_concurrency(4).with_tile_size(16, 16),
        )
        .execute(&image, None)
        .unwrap();

        assert_eq!(one.image.memory().unwrap().data(), many.image.memory().unwrap().data());
    }

    #[test]
    fn test_text_can_be_embedded() {
        let rendered = text("tessella", &TextOptions::new()).unwrap();
        let canvas = gravity(&rendered.image, CompassDirection::Centre, 100, 20, &EmbedOptions::default()).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (100, 20));
        assert!(pixels(&canvas).iter().any(|&p| p == 255));
    }

    #[test]
    fn test_errors_surface_at_build_time() {
        let input = gradient(8, 8);
        assert!(reduce(&input, 0.5, 1.0, &ReduceOptions::default()).unwrap_err().is_precondition());
        assert!(embed(&input, 0, 0, 0, 8, &EmbedOptions::default()).unwrap_err().is_precondition());
        let mask = MorphMask::square(9, 9).unwrap();
        assert!(morph(&input, &mask, MorphOp::Dilate, &MorphOptions::default()).is_err());
    }
}
