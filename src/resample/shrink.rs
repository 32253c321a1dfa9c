//! Integer box shrink.
//!
//! Each output pixel is the mean of `factor` adjacent input pixels along
//! one axis. The output size rounds up, and the missing pixels of the last
//! box repeat the input's edge.

use crate::conversion::flip::Direction;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::{read_component, write_component};
use crate::core::image::{DemandStyle, Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;

struct Shrink {
    input: Image,
    factor: i32,
    direction: Direction,
}

impl Shrink {
    /// Input area covering output area `r`.
    fn need(&self, r: Rect) -> Rect {
        let need = match self.direction {
            Direction::Horizontal => Rect::new(r.left * self.factor, r.top, r.width * self.factor, r.height),
            Direction::Vertical => Rect::new(r.left, r.top * self.factor, r.width, r.height * self.factor),
        };
        need.intersect(&self.input.rect())
    }
}

impl Generate for Shrink {
    type Seq = Region;

    fn name(&self) -> &'static str {
        match self.direction {
            Direction::Horizontal => "shrinkh",
            Direction::Vertical => "shrinkv",
        }
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        let need = self.need(r);
        ir.prepare(need)?;

        let format = self.input.format();
        let components = self.input.bands() * format.components();
        let ps = out.sizeof_pel();
        let mut sum = vec![0.0f64; components];

        for y in r.top..r.bottom() {
            let q = out.row_mut(r.left, y, r.width as usize);
            for (i, pel) in q.chunks_exact_mut(ps).enumerate() {
                let x = r.left + i as i32;
                sum.fill(0.0);
                for k in 0..self.factor {
                    let (sx, sy) = match self.direction {
                        Direction::Horizontal => ((x * self.factor + k).min(need.right() - 1), y),
                        Direction::Vertical => (x, (y * self.factor + k).min(need.bottom() - 1)),
                    };
                    let p = ir.pel(sx, sy);
                    for (z, s) in sum.iter_mut().enumerate() {
                        *s += read_component(format, p, z);
                    }
                }
                for (z, s) in sum.iter().enumerate() {
                    write_component(format, pel, z, s / self.factor as f64);
                }
            }
        }
        Ok(())
    }
}

fn shrink_base(input: &Image, factor: i32, direction: Direction) -> PipelineResult<Image> {
    let op = match direction {
        Direction::Horizontal => "shrinkh",
        Direction::Vertical => "shrinkv",
    };
    if factor < 1 {
        return Err(PipelineError::bad_parameter(op, "shrink factors should be >= 1"));
    }
    if factor == 1 {
        return Ok(input.clone());
    }

    let (width, height, demand) = match direction {
        Direction::Horizontal => (
            (input.width() + factor - 1) / factor,
            input.height(),
            DemandStyle::ThinStrip,
        ),
        Direction::Vertical => (
            input.width(),
            (input.height() + factor - 1) / factor,
            DemandStyle::FatStrip,
        ),
    };

    log::info!("{} by {}", op, factor);

    Image::pipeline(input.desc().with_size(width, height))
        .demand(demand)
        .input(input)
        .generate(Shrink {
            input: input.clone(),
            factor,
            direction,
        })
}

/// Average every `factor` columns.
pub fn shrinkh(input: &Image, factor: i32) -> PipelineResult<Image> {
    shrink_base(input, factor, Direction::Horizontal)
}

/// Average every `factor` rows.
pub fn shrinkv(input: &Image, factor: i32) -> PipelineResult<Image> {
    shrink_base(input, factor, Direction::Vertical)
}
