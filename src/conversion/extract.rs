//! Cut a rectangle out of an image.

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;

struct ExtractArea {
    input: Image,
    left: i32,
    top: i32,
}

impl Generate for ExtractArea {
    type Seq = Region;

    fn name(&self) -> &'static str {
        "extract_area"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();
        let need = r.translate(self.left, self.top);
        ir.prepare(need)?;
        out.region_region(ir, r, need.left, need.top)
    }
}

/// The `width` x `height` area of `input` whose top-left is `(left, top)`.
///
/// The area must lie entirely inside the input. Pixels are shared with the
/// input, never copied.
pub fn extract_area(input: &Image, left: i32, top: i32, width: i32, height: i32) -> PipelineResult<Image> {
    let area = Rect::new(left, top, width, height);
    if area.is_empty() || !input.rect().includes_rect(&area) {
        return Err(PipelineError::bad_parameter("extract_area", "bad extract area"));
    }
    if area == input.rect() {
        return Ok(input.clone());
    }

    let desc = input.desc().with_size(width, height);
    Image::pipeline(desc)
        .input(input)
        .generate(ExtractArea {
            input: input.clone(),
            left,
            top,
        })
}
