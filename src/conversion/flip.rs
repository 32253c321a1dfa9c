//! Mirror an image left-right or top-bottom.

use crate::core::error::PipelineResult;
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use serde::{Deserialize, Serialize};

/// Axis along which images are flipped or joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Left to right.
    Horizontal,
    /// Top to bottom.
    Vertical,
}

struct Flip {
    input: Image,
    direction: Direction,
}

impl Generate for Flip {
    type Seq = Region;

    fn name(&self) -> &'static str {
        "flip"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        let ps = out.sizeof_pel();
        let n = r.width as usize;

        match self.direction {
            Direction::Horizontal => {
                let need = Rect::new(self.input.width() - r.right(), r.top, r.width, r.height);
                ir.prepare(need)?;
                for y in r.top..r.bottom() {
                    let src = ir.row(need.left, y, n);
                    let dst = out.row_mut(r.left, y, n);
                    for (q, p) in dst.chunks_exact_mut(ps).zip(src.chunks_exact(ps).rev()) {
                        q.copy_from_slice(p);
                    }
                }
            }
            Direction::Vertical => {
                let need = Rect::new(r.left, self.input.height() - r.bottom(), r.width, r.height);
                ir.prepare(need)?;
                let last = self.input.height() - 1;
                for y in r.top..r.bottom() {
                    let src = ir.row(r.left, last - y, n);
                    out.row_mut(r.left, y, n).copy_from_slice(src);
                }
            }
        }
        Ok(())
    }
}

/// Mirror `input` along `direction`.
pub fn flip(input: &Image, direction: Direction) -> PipelineResult<Image> {
    Image::pipeline(*input.desc())
        .input(input)
        .generate(Flip {
            input: input.clone(),
            direction,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::BandFormat;
    use crate::core::image::ImageDesc;
    use crate::execution::write_to_memory;

    fn rgb_ramp() -> Image {
        let desc = ImageDesc::new(3, 2, 3, BandFormat::UChar);
        Image::from_fn(desc, |x, y, b| (x * 10 + y * 100) as f64 + b as f64).unwrap()
    }

    #[test]
    fn test_flip_horizontal_keeps_band_order() {
        let out = write_to_memory(&flip(&rgb_ramp(), Direction::Horizontal).unwrap()).unwrap();
        assert_eq!(out.pel(0, 0).unwrap(), &[20, 21, 22]);
        assert_eq!(out.pel(2, 1).unwrap(), &[100, 101, 102]);
    }

    #[test]
    fn test_flip_vertical() {
        let out = write_to_memory(&flip(&rgb_ramp(), Direction::Vertical).unwrap()).unwrap();
        assert_eq!(out.pel(1, 0).unwrap(), &[110, 111, 112]);
        assert_eq!(out.pel(1, 1).unwrap(), &[10, 11, 12]);
    }

    #[test]
    fn test_double_flip_is_identity() {
        let image = rgb_ramp();
        let twice = flip(&flip(&image, Direction::Horizontal).unwrap(), Direction::Horizontal).unwrap();
        let out = write_to_memory(&twice).unwrap();
        assert_eq!(out.memory().unwrap().data(), image.memory().unwrap().data());
    }
}
