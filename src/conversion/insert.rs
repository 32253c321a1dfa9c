//! Paste one image into another, and join two images side by side.

use crate::conversion::embed::{embed, EmbedOptions, Extend};
use crate::conversion::flip::Direction;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::image::{Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;

struct Insert {
    main: Image,
    sub: Image,
    /// Position of `sub` in output coordinates.
    area: Rect,
}

/// Per-lane regions on the two inputs.
struct InsertSeq {
    main: Region,
    sub: Region,
}

impl Generate for Insert {
    type Seq = InsertSeq;

    fn name(&self) -> &'static str {
        "insert"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<InsertSeq> {
        Ok(InsertSeq {
            main: Region::with_stop(&self.main, stop.clone()),
            sub: Region::with_stop(&self.sub, stop.clone()),
        })
    }

    fn generate(&self, out: &mut Region, seq: &mut InsertSeq, _stop: &StopFlag) -> PipelineResult<()> {
        let r = out.valid();

        if self.area.includes_rect(&r) {
            let need = r.translate(-self.area.left, -self.area.top);
            seq.sub.prepare(need)?;
            return out.region_region(&mut seq.sub, r, need.left, need.top);
        }

        let ovl = r.intersect(&self.area);
        if ovl.is_empty() {
            seq.main.prepare(r)?;
            return out.region_region(&mut seq.main, r, r.left, r.top);
        }

        seq.main.prepare_to(out, r, r.left, r.top)?;
        let need = ovl.translate(-self.area.left, -self.area.top);
        seq.sub.prepare_to(out, need, ovl.left, ovl.top)
    }
}

/// `main` with `sub` pasted over it at `(x, y)`.
///
/// The output has the size of `main`; parts of `sub` falling outside it
/// are clipped. Both images must have the same format and band count.
pub fn insert(main: &Image, sub: &Image, x: i32, y: i32) -> PipelineResult<Image> {
    if main.format() != sub.format() || main.bands() != sub.bands() {
        return Err(PipelineError::Mismatch {
            op: "insert".to_string(),
        });
    }

    let area = Rect::new(x, y, sub.width(), sub.height());
    if !area.overlaps(&main.rect()) {
        return Ok(main.clone());
    }

    Image::pipeline(*main.desc())
        .input(main)
        .input(sub)
        .generate(Insert {
            main: main.clone(),
            sub: sub.clone(),
            area,
        })
}

/// `a` and `b` placed next to each other along `direction`.
///
/// The canvas is the size of both together; any area neither image covers
/// is black.
pub fn join(a: &Image, b: &Image, direction: Direction) -> PipelineResult<Image> {
    if a.format() != b.format() || a.bands() != b.bands() {
        return Err(PipelineError::Mismatch {
            op: "join".to_string(),
        });
    }

    let (width, height, x, y) = match direction {
        Direction::Horizontal => (a.width() + b.width(), a.height().max(b.height()), a.width(), 0),
        Direction::Vertical => (a.width().max(b.width()), a.height() + b.height(), 0, a.height()),
    };

    let canvas = embed(a, 0, 0, width, height, &EmbedOptions::new().with_extend(Extend::Black))?;
    insert(&canvas, b, x, y)
}
