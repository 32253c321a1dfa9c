//! Vertical reduce.
//!
//! Mirrors [`reduceh`](crate::resample::reduceh::reduceh) with rows for
//! columns. Every pixel of an output line shares one set of weights, so
//! they are looked up once per line.

use crate::conversion::embed::{embed, EmbedOptions, Extend};
use crate::core::error::PipelineResult;
use crate::core::image::{DemandStyle, Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use crate::resample::kernel::{phase, reduce_pel, KernelTable, TapSource, Taps};
use crate::resample::reduce::{ReduceOptions, ReducePlan};
use crate::resample::reduceh::ReduceSeq;
use crate::resample::shrink::shrinkv;

struct Reducev {
    input: Image,
    plan: ReducePlan,
    table: KernelTable,
    taps: TapSource,
}

impl Reducev {
    fn need(&self, r: Rect) -> Rect {
        let n = self.table.n_point() as i32;
        let first = self.plan.position(r.top) as i32;
        let last = self.plan.position(r.bottom() - 1) as i32;
        Rect::new(r.left, first, r.width, last - first + n).intersect(&self.input.rect())
    }
}

impl Generate for Reducev {
    type Seq = ReduceSeq;

    fn name(&self) -> &'static str {
        "reducev"
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
        let stride = seq.ir.stride();

        for y in r.top..r.bottom() {
            let sy = self.plan.position(y);
            let (iy, ty) = phase(sy);
            let taps = match self.taps {
                TapSource::Fixed => Taps::Fixed(self.table.fixed_row(ty)),
                TapSource::Float => Taps::Float(self.table.float_row(ty)),
                TapSource::Exact => {
                    self.table.exact(&mut seq.mask, sy - iy as f64);
                    Taps::Float(&seq.mask)
                }
            };

            let q = out.row_mut(r.left, y, r.width as usize);
            for (i, pel) in q.chunks_exact_mut(ps).enumerate() {
                let p = &seq.ir.pixels()[seq.ir.offset(r.left + i as i32, iy)..];
                reduce_pel(format, pel, p, stride, components, &taps);
            }
        }
        Ok(())
    }
}

/// Shrink `input` vertically by `vshrink`.
pub fn reducev(input: &Image, vshrink: f64, options: &ReduceOptions) -> PipelineResult<Image> {
    let plan = ReducePlan::new("reducev", input.height(), vshrink, options)?;

    let source = shrinkv(input, plan.int_shrink)?;
    if plan.residual == 1.0 {
        return Ok(source);
    }

    let table = KernelTable::new("reducev", options.kernel, plan.residual)?;
    let n = table.n_point() as i32;
    log::info!("reducev: {} point mask", n);

    let extended = embed(
        &source,
        0,
        (n + 1) / 2 - 1,
        source.width(),
        source.height() + n,
        &EmbedOptions::new().with_extend(Extend::Copy),
    )?;

    Image::pipeline(input.desc().with_size(input.width(), plan.size))
        .demand(DemandStyle::FatStrip)
        .sequential(true)
        .input(&extended)
        .generate(Reducev {
            taps: TapSource::for_format(input.format()),
            input: extended,
            plan,
            table,
        })
}
