//! Change the band format of an image.
//!
//! Values are rounded to nearest and clamped to the range of integer
//! targets. Complex sources keep only their real part when cast to a real
//! format; real sources get a zero imaginary part when cast to complex.

use crate::core::error::PipelineResult;
use crate::core::format::{read_component, write_component, BandFormat};
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::region::Region;

struct Cast {
    input: Image,
    format: BandFormat,
}

impl Generate for Cast {
    type Seq = Region;

    fn name(&self) -> &'static str {
        "cast"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        ir.prepare(r)?;

        let from = self.input.format();
        let (ips, ops) = (ir.sizeof_pel(), out.sizeof_pel());
        let (icomp, ocomp) = (from.components(), self.format.components());
        let bands = self.input.bands();
        let n = r.width as usize;

        for y in r.top..r.bottom() {
            let src = ir.row(r.left, y, n);
            let dst = out.row_mut(r.left, y, n);
            for (p, q) in src.chunks_exact(ips).zip(dst.chunks_exact_mut(ops)) {
                for b in 0..bands {
                    write_component(self.format, q, b * ocomp, read_component(from, p, b * icomp));
                    if ocomp == 2 {
                        let imaginary = if icomp == 2 { read_component(from, p, b * 2 + 1) } else { 0.0 };
                        write_component(self.format, q, b * 2 + 1, imaginary);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Convert `input` to `format`. Returns `input` itself when the format
/// already matches.
pub fn cast(input: &Image, format: BandFormat) -> PipelineResult<Image> {
    if input.format() == format {
        return Ok(input.clone());
    }

    let mut desc = *input.desc();
    desc.format = format;
    Image::pipeline(desc).input(input).generate(Cast {
        input: input.clone(),
        format,
    })
}
