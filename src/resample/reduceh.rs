//! Horizontal reduce.
//!
//! The input is first widened with copied edge pixels so that every
//! kernel window lies inside it, which keeps edge cases out of the
//! per-pixel loop.

use crate::conversion::embed::{embed, EmbedOptions, Extend};
use crate::core::error::PipelineResult;
use crate::core::image::{DemandStyle, Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use crate::resample::kernel::{phase, reduce_pel, KernelTable, TapSource, Taps};
use crate::resample::reduce::{ReduceOptions, ReducePlan};
use crate::resample::shrink::shrinkh;

struct Reduceh {
    /// The edge-extended input.
    input: Image,
    plan: ReducePlan,
    table: KernelTable,
    taps: TapSource,
}

pub(crate) struct ReduceSeq {
    pub ir: Region,
    /// Scratch weights for the exact path.
    pub mask: Vec<f64>,
}

impl Reduceh {
    /// Columns of the extended input read for output area `r`.
    fn need(&self, r: Rect) -> Rect {
        let n = self.table.n_point() as i32;
        let first = self.plan.position(r.left) as i32;
        let last = self.plan.position(r.right() - 1) as i32;
        Rect::new(first, r.top, last - first + n, r.height).intersect(&self.input.rect())
    }
}

impl Generate for Reduceh {
    type Seq = ReduceSeq;

    fn name(&self) -> &'static str {
        "reduceh"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<ReduceSeq> {
        Ok(ReduceSeq {
            ir: Region::with_stop(&self.input, stop.clone()),
            mask: vec![0.0; self.table.n_point()],
        })
    }

    fn generate(&self, out: &mut Region, seq: &mut ReduceSeq, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        seq.ir.prepare(self.need(r))?;

        let format = self.input.format();
        let components = self.input.bands() * format.components();
        let ps = out.sizeof_pel();

        for y in r.top..r.bottom() {
            let q = out.row_mut(r.left, y, r.width as usize);
            for (i, pel) in q.chunks_exact_mut(ps).enumerate() {
                let x = self.plan.position(r.left + i as i32);
                let (ix, tx) = phase(x);
                let p = &seq.ir.pixels()[seq.ir.offset(ix, y)..];

                match self.taps {
                    TapSource::Fixed => {
                        reduce_pel(format, pel, p, ps, components, &Taps::Fixed(self.table.fixed_row(tx)))
                    }
                    TapSource::Float => {
                        reduce_pel(format, pel, p, ps, components, &Taps::Float(self.table.float_row(tx)))
                    }
                    TapSource::Exact => {
                        self.table.exact(&mut seq.mask, x - ix as f64);
                        reduce_pel(format, pel, p, ps, components, &Taps::Float(&seq.mask))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Shrink `input` horizontally by `hshrink`.
///
/// The output width is `input.width() / hshrink` rounded to nearest. When
/// `options.gap` is set, an integer box shrink does the bulk of the work
/// first and the kernel only handles what remains.
pub fn reduceh(input: &Image, hshrink: f64, options: &ReduceOptions) -> PipelineResult<Image> {
    let plan = ReducePlan::new("reduceh", input.width(), hshrink, options)?;

    let source = shrinkh(input, plan.int_shrink)?;
    if plan.residual == 1.0 {
        return Ok(source);
    }

    let table = KernelTable::new("reduceh", options.kernel, plan.residual)?;
    let n = table.n_point() as i32;
    log::info!("reduceh: {} point mask", n);

    let extended = embed(
        &source,
        (n + 1) / 2 - 1,
        0,
        source.width() + n,
        source.height(),
        &EmbedOptions::new().with_extend(Extend::Copy),
    )?;

    Image::pipeline(input.desc().with_size(plan.size, input.height()))
        .demand(DemandStyle::FatStrip)
        .sequential(true)
        .input(&extended)
        .generate(Reduceh {
            taps: TapSource::for_format(input.format()),
            input: extended,
            plan,
            table,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{read_component, BandFormat};
    use crate::core::image::ImageDesc;
    use crate::execution::write_to_memory;
    use crate::resample::kernel::Kernel;

    fn ramp(width: i32, format: BandFormat) -> Image {
        let desc = ImageDesc::new(width, 2, 1, format);
        Image::from_fn(desc, |x, _, _| (x * 10) as f64).unwrap()
    }

    fn row(image: &Image, y: i32) -> Vec<f64> {
        let format = image.format();
        (0..image.width())
            .map(|x| read_component(format, image.pel(x, y).unwrap(), 0))
            .collect()
    }

    #[test]
    fn test_output_width_rounds_to_nearest() {
        let image = ramp(9, BandFormat::UChar);
        let out = reduceh(&image, 2.0, &ReduceOptions::new()).unwrap();
        assert_eq!((out.width(), out.height()), (5, 2));
        let out = reduceh(&image, 4.0, &ReduceOptions::new()).unwrap();
        assert_eq!(out.width(), 2);
    }

    #[test]
    fn test_linear_halving_averages_pairs() {
        let image = ramp(8, BandFormat::UChar);
        let options = ReduceOptions::new().with_kernel(Kernel::Linear);
        let out = write_to_memory(&reduceh(&image, 2.0, &options).unwrap()).unwrap();
        let values = row(&out, 1);
        assert_eq!(values.len(), 4);
        // Interior outputs sit between input pixels 2k and 2k+1.
        assert_eq!(values[1], 25.0);
        assert_eq!(values[2], 45.0);
    }

    #[test]
    fn test_nearest_picks_samples() {
        let image = ramp(6, BandFormat::UShort);
        let options = ReduceOptions::new().with_kernel(Kernel::Nearest);
        let out = write_to_memory(&reduceh(&image, 3.0, &options).unwrap()).unwrap();
        assert_eq!(row(&out, 0), vec![10.0, 40.0]);
    }

    #[test]
    fn test_float_and_int_paths_agree() {
        let options = ReduceOptions::new().with_kernel(Kernel::Lanczos3);
        let fixed = write_to_memory(&reduceh(&ramp(40, BandFormat::UShort), 2.5, &options).unwrap()).unwrap();
        let float = write_to_memory(&reduceh(&ramp(40, BandFormat::Float), 2.5, &options).unwrap()).unwrap();
        let exact = write_to_memory(&reduceh(&ramp(40, BandFormat::Double), 2.5, &options).unwrap()).unwrap();
        for ((a, b), c) in row(&fixed, 0).iter().zip(row(&float, 0)).zip(row(&exact, 0)) {
            assert!((a - b).abs() <= 1.0, "{} vs {}", a, b);
            assert!((b - c).abs() <= 1.0, "{} vs {}", b, c);
        }
    }

    #[test]
    fn test_tiling_does_not_change_result() {
        let desc = ImageDesc::new(50, 3, 3, BandFormat::UChar);
        let image = Image::from_fn(desc, |x, y, b| ((x * 37 + y * 11 + b as i32 * 5) % 256) as f64).unwrap();
        let reduced = reduceh(&image, 1.7, &ReduceOptions::new()).unwrap();
        let whole = write_to_memory(&reduced).unwrap();

        let mut region = Region::new(&reduced);
        region.prepare(Rect::new(7, 1, 9, 2)).unwrap();
        for x in 7..16 {
            assert_eq!(region.pel(x, 2), whole.pel(x, 2).unwrap());
        }
    }

    #[test]
    fn test_complex_bands_reduce_independently() {
        let desc = ImageDesc::new(4, 1, 1, BandFormat::Complex);
        let image = Image::from_fn(desc, |_, _, _| 2.0).unwrap();
        let out = write_to_memory(&reduceh(&image, 2.0, &ReduceOptions::new()).unwrap()).unwrap();
        let pel = out.pel(1, 0).unwrap();
        assert!((read_component(BandFormat::Complex, pel, 0) - 2.0).abs() < 1e-6);
        assert_eq!(read_component(BandFormat::Complex, pel, 1), 0.0);
    }
}
