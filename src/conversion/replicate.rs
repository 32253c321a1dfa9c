//! Tile an image across and down.

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;

struct Replicate {
    input: Image,
}

impl Generate for Replicate {
    type Seq = Region;

    fn name(&self) -> &'static str {
        "replicate"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        let (tw, th) = (self.input.width(), self.input.height());

        // Index of the first and last copy of the input touched by r.
        let xs = r.left.div_euclid(tw);
        let ys = r.top.div_euclid(th);
        let xe = (r.right() - 1).div_euclid(tw);
        let ye = (r.bottom() - 1).div_euclid(th);

        // Inside a single copy: share pixels.
        if xs == xe && ys == ye {
            let need = r.translate(-xs * tw, -ys * th);
            ir.prepare(need)?;
            return out.region_region(ir, r, need.left, need.top);
        }

        for ty in ys..=ye {
            for tx in xs..=xe {
                if stop.is_set() {
                    return Err(PipelineError::Cancelled);
                }
                let copy = Rect::new(tx * tw, ty * th, tw, th);
                let paint = copy.intersect(&r);
                if paint.is_empty() {
                    continue;
                }
                let need = paint.translate(-copy.left, -copy.top);
                ir.prepare_to(out, need, paint.left, paint.top)?;
            }
        }
        Ok(())
    }
}

/// An image made of `across` x `down` copies of `input`.
pub fn replicate(input: &Image, across: i32, down: i32) -> PipelineResult<Image> {
    if across <= 0 || down <= 0 {
        return Err(PipelineError::BadDimensions {
            op: "replicate".to_string(),
        });
    }
    let width = input.width().checked_mul(across);
    let height = input.height().checked_mul(down);
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        _ => {
            return Err(PipelineError::BadDimensions {
                op: "replicate".to_string(),
            })
        }
    };

    let desc = input.desc().with_size(width, height);
    Image::pipeline(desc)
        .input(input)
        .generate(Replicate {
            input: input.clone(),
        })
}
