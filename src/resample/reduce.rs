//! Reduce by a fractional factor in both directions.
//!
//! [`reduce`] runs the vertical pass and then the horizontal one. Each pass
//! works out its output size and sampling offset the same way; that shared
//! arithmetic lives in [`ReducePlan`].

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::Image;
use crate::resample::kernel::Kernel;
use crate::resample::reduceh::reduceh;
use crate::resample::reducev::reducev;
use serde::{Deserialize, Serialize};

/// Optional arguments of [`reduce`], [`reduceh`] and [`reducev`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceOptions {
    /// Resampling kernel.
    pub kernel: Kernel,
    /// Box-shrink first while at least `gap` times the final size remains.
    /// Zero disables the pre-shrink.
    pub gap: f64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            kernel: Kernel::Lanczos3,
            gap: 0.0,
        }
    }
}

impl ReduceOptions {
    /// Lanczos3 without pre-shrink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `kernel`.
    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Enable the integer pre-shrink.
    pub fn with_gap(mut self, gap: f64) -> Self {
        self.gap = gap;
        self
    }
}

/// Size and sampling geometry of one reduce pass along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ReducePlan {
    /// Output length.
    pub size: i32,
    /// Integer box shrink to apply first; 1 for none.
    pub int_shrink: i32,
    /// Shrink left for the kernel after the box shrink.
    pub residual: f64,
    /// Shift that spreads the rounding slack evenly over both ends.
    pub offset: f64,
}

impl ReducePlan {
    pub fn new(op: &str, in_size: i32, shrink: f64, options: &ReduceOptions) -> PipelineResult<Self> {
        if shrink < 1.0 {
            return Err(PipelineError::bad_parameter(op, "reduce factor should be >= 1.0"));
        }

        // Round half up, so a 3 pixel line halves to 2.
        let size = (in_size as f64 / shrink + 0.5).floor() as i32;
        if size <= 0 {
            return Err(PipelineError::ShrunkToNothing { op: op.to_string() });
        }

        // Positive when the output covers more than the input.
        let mut extra = size as f64 * shrink - in_size as f64;
        let mut residual = shrink;
        let mut int_shrink = 1;

        if options.gap > 0.0 && options.kernel != Kernel::Nearest {
            if options.gap < 1.0 {
                return Err(PipelineError::bad_parameter(op, "reduce gap should be >= 1.0"));
            }
            int_shrink = ((in_size as f64 / size as f64 / options.gap).floor() as i32).max(1);
            residual /= int_shrink as f64;
            extra /= int_shrink as f64;
        }

        Ok(Self {
            size,
            int_shrink,
            residual,
            offset: (1.0 + extra) / 2.0 - 1.0,
        })
    }

    /// Continuous source position of output pixel `o`.
    pub fn position(&self, o: i32) -> f64 {
        (o as f64 + 0.5) * self.residual - 0.5 - self.offset
    }
}

/// Shrink `input` by `hshrink` across and `vshrink` down.
///
/// Each output dimension is the input dimension divided by its factor,
/// rounded to nearest. A factor of exactly 1 leaves that axis untouched.
pub fn reduce(input: &Image, hshrink: f64, vshrink: f64, options: &ReduceOptions) -> PipelineResult<Image> {
    let vertical = reducev(input, vshrink, options)?;
    reduceh(&vertical, hshrink, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::BandFormat;
    use crate::core::image::ImageDesc;
    use crate::execution::write_to_memory;
    use proptest::prelude::*;

    fn constant(width: i32, height: i32, format: BandFormat, value: f64) -> Image {
        Image::from_fn(ImageDesc::new(width, height, 2, format), |_, _, _| value).unwrap()
    }

    #[test]
    fn test_plan_geometry() {
        let plan = ReducePlan::new("reduceh", 3, 2.0, &ReduceOptions::new()).unwrap();
        assert_eq!(plan.size, 2);
        assert_eq!(plan.residual, 2.0);
        assert_eq!(plan.offset, 0.0);
        assert_eq!(plan.position(0), 0.5);
    }

    #[test]
    fn test_plan_gap() {
        let options = ReduceOptions::new().with_gap(2.0);
        let plan = ReducePlan::new("reduceh", 1000, 10.0, &options).unwrap();
        assert_eq!(plan.size, 100);
        assert_eq!(plan.int_shrink, 5);
        assert_eq!(plan.residual, 2.0);

        let nearest = options.with_kernel(Kernel::Nearest);
        assert_eq!(ReducePlan::new("reduceh", 1000, 10.0, &nearest).unwrap().int_shrink, 1);

        let err = ReducePlan::new("reduceh", 1000, 10.0, &ReduceOptions::new().with_gap(0.5)).unwrap_err();
        assert_eq!(err.to_string(), "reduceh: reduce gap should be >= 1.0");
    }

    #[test]
    fn test_plan_rejects_enlargement() {
        let err = ReducePlan::new("reducev", 10, 0.5, &ReduceOptions::new()).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(err.to_string(), "reducev: reduce factor should be >= 1.0");
    }

    #[test]
    fn test_shrunk_to_nothing() {
        let err = ReducePlan::new("reduceh", 2, 5.0, &ReduceOptions::new()).unwrap_err();
        assert!(matches!(err, PipelineError::ShrunkToNothing { .. }));
    }

    #[test]
    fn test_identity_returns_input() {
        let image = constant(7, 5, BandFormat::UChar, 9.0);
        let out = reduce(&image, 1.0, 1.0, &ReduceOptions::new()).unwrap();
        assert!(out.ptr_eq(&image));
    }

    #[test]
    fn test_constant_is_preserved_for_every_kernel() {
        for kernel in Kernel::ALL {
            let options = ReduceOptions::new().with_kernel(kernel);
            for (format, value) in [
                (BandFormat::UChar, 200.0),
                (BandFormat::Short, -1234.0),
                (BandFormat::Float, 0.25),
                (BandFormat::Double, 3.5),
            ] {
                let image = constant(23, 17, format, value);
                let out = write_to_memory(&reduce(&image, 2.7, 1.6, &options).unwrap()).unwrap();
                assert_eq!((out.width(), out.height()), (9, 11));
                let data = out.memory().unwrap().data();
                let size = format.size_of();
                for sample in data.chunks_exact(size) {
                    let got = crate::core::format::read_component(format, sample, 0);
                    if format.is_int() {
                        assert_eq!(got, value, "{} {}", kernel, format);
                    } else {
                        assert!((got - value).abs() < 1e-5, "{} {} got {}", kernel, format, got);
                    }
                }
            }
        }
    }

    #[test]
    fn test_gap_changes_nothing_for_constants() {
        let image = constant(64, 64, BandFormat::UChar, 77.0);
        let options = ReduceOptions::new().with_gap(1.0);
        let out = write_to_memory(&reduce(&image, 8.0, 8.0, &options).unwrap()).unwrap();
        assert_eq!((out.width(), out.height()), (8, 8));
        assert!(out.memory().unwrap().data().iter().all(|&v| v == 77));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_halving_dimension_law(width in 3i32..300, height in 3i32..300) {
            let desc = ImageDesc::new(width, height, 1, BandFormat::UChar);
            let image = Image::from_memory(desc, vec![0; (width * height) as usize]).unwrap();
            let out = reduce(&image, 2.0, 2.0, &ReduceOptions::new()).unwrap();
            prop_assert_eq!(out.width(), (width + 1) / 2);
            prop_assert_eq!(out.height(), (height + 1) / 2);
        }
    }
}
