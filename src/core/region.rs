//! Regions: materialized rectangles of an image.
//!
//! A [`Region`] is the unit of work pulled through a pipeline. It is bound
//! to one image and holds pixels for its `valid` rectangle, either in memory
//! it owns or as a zero-copy window onto another region's (or a memory
//! image's) buffer.
//!
//! # Demand-driven evaluation
//!
//! [`Region::prepare`] on a computed image allocates a buffer for the
//! request, starts the lane's sequence state on first use and runs the
//! operation's `generate`, which in turn prepares regions on its inputs.
//! Recursion bottoms out at memory images, whose regions simply view the
//! whole buffer.

use crate::core::area::{AreaType, TypedArea};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::write_component;
use crate::core::image::{Image, Source, StopFlag};
use crate::core::rect::Rect;
use std::any::Any;

enum Buffer {
    None,
    /// Tightly packed pixels for `valid`.
    Owned(Vec<u8>),
    /// A window onto shared pixels, starting at `offset`.
    Shared {
        area: TypedArea,
        offset: usize,
        stride: usize,
    },
}

/// A rectangle of pixels bound to a position within an image.
pub struct Region {
    image: Image,
    valid: Rect,
    buffer: Buffer,
    seq: Option<Box<dyn Any + Send>>,
    stop: StopFlag,
}

impl Region {
    /// Create an empty region on `image`.
    pub fn new(image: &Image) -> Self {
        Self::with_stop(image, StopFlag::new())
    }

    /// Create an empty region that observes `stop`.
    pub fn with_stop(image: &Image, stop: StopFlag) -> Self {
        Self {
            image: image.clone(),
            valid: Rect::default(),
            buffer: Buffer::None,
            seq: None,
            stop,
        }
    }

    /// The image this region reads from.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// The currently materialized rectangle.
    pub fn valid(&self) -> Rect {
        self.valid
    }

    /// The stop flag this region observes.
    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Bytes per pixel.
    pub fn sizeof_pel(&self) -> usize {
        self.image.sizeof_pel()
    }

    /// Bytes between the starts of successive lines.
    pub fn stride(&self) -> usize {
        match &self.buffer {
            Buffer::None => 0,
            Buffer::Owned(_) => self.valid.width.max(0) as usize * self.sizeof_pel(),
            Buffer::Shared { stride, .. } => *stride,
        }
    }

    fn has_pixels(&self) -> bool {
        !matches!(self.buffer, Buffer::None)
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    /// Make sure `want` is materialized with correct pixels.
    ///
    /// A no-op when `want` is already inside `valid`. Fails if `want` is
    /// empty or reaches outside the image: callers clip first. A failed
    /// generate leaves the region empty, never holding a partial tile.
    pub fn prepare(&mut self, want: Rect) -> PipelineResult<()> {
        let bounds = self.image.rect();
        if want.is_empty() || !bounds.includes_rect(&want) {
            return Err(PipelineError::OutOfBounds {
                want,
                width: bounds.width,
                height: bounds.height,
            });
        }
        if self.has_pixels() && self.valid.includes_rect(&want) {
            return Ok(());
        }
        if self.stop.is_set() {
            return Err(PipelineError::Cancelled);
        }

        match self.image.source() {
            Source::Memory(area) => {
                self.buffer = Buffer::Shared {
                    area,
                    offset: 0,
                    stride: self.image.desc().sizeof_line(),
                };
                self.valid = bounds;
                Ok(())
            }
            Source::Generated(op) => {
                self.buffer(want)?;

                let mut seq = match self.seq.take() {
                    Some(seq) => seq,
                    None => op.start_dyn(&self.stop)?,
                };
                let stop = self.stop.clone();
                let result = op.generate_dyn(self, seq.as_mut(), &stop);
                self.seq = Some(seq);

                if result.is_err() {
                    self.buffer = Buffer::None;
                    self.valid = Rect::default();
                }
                result
            }
        }
    }

    /// Bind fresh memory for `r` without computing anything.
    ///
    /// Owned memory is reused when possible; contents are unspecified.
    pub fn buffer(&mut self, r: Rect) -> PipelineResult<()> {
        let bytes = r.width.max(0) as usize * r.height.max(0) as usize * self.sizeof_pel();
        match &mut self.buffer {
            Buffer::Owned(data) => data.resize(bytes, 0),
            _ => {
                let mut data = Vec::new();
                data.try_reserve_exact(bytes)
                    .map_err(|_| PipelineError::OutOfMemory {
                        required: bytes,
                        available: 0,
                    })?;
                data.resize(bytes, 0);
                self.buffer = Buffer::Owned(data);
            }
        }
        self.valid = r;
        Ok(())
    }

    /// Make this region a zero-copy window onto `src`.
    ///
    /// `area` is in this region's coordinates; `(x, y)` is where its
    /// top-left pixel sits in `src`. `src` must already hold that part.
    pub fn region_region(&mut self, src: &mut Region, area: Rect, x: i32, y: i32) -> PipelineResult<()> {
        let want = Rect::new(x, y, area.width, area.height);
        if !src.has_pixels() || !src.valid.includes_rect(&want) {
            return Err(PipelineError::Internal(format!(
                "region_region: {} not materialized in source",
                want
            )));
        }
        if !self.image.rect().includes_rect(&area) {
            let bounds = self.image.rect();
            return Err(PipelineError::OutOfBounds {
                want: area,
                width: bounds.width,
                height: bounds.height,
            });
        }
        let ps = self.sizeof_pel();
        if src.sizeof_pel() != ps {
            return Err(PipelineError::Mismatch {
                op: "region_region".to_string(),
            });
        }

        let (shared, base, stride) = src.share();
        let offset = base
            + (y - src.valid.top) as usize * stride
            + (x - src.valid.left) as usize * ps;
        self.buffer = Buffer::Shared {
            area: shared,
            offset,
            stride,
        };
        self.valid = area;
        Ok(())
    }

    /// Turn owned memory into shared memory and hand out a handle on it.
    fn share(&mut self) -> (TypedArea, usize, usize) {
        let stride = self.stride();
        match std::mem::replace(&mut self.buffer, Buffer::None) {
            Buffer::Owned(data) => {
                let area = TypedArea::from_vec(data, AreaType::Pixels);
                self.buffer = Buffer::Shared {
                    area: area.clone(),
                    offset: 0,
                    stride,
                };
                (area, 0, stride)
            }
            Buffer::Shared {
                area,
                offset,
                stride,
            } => {
                let handle = area.clone();
                self.buffer = Buffer::Shared {
                    area,
                    offset,
                    stride,
                };
                (handle, offset, stride)
            }
            Buffer::None => (TypedArea::from_vec(Vec::new(), AreaType::Pixels), 0, 0),
        }
    }

    /// Prepare `r` of this region and copy it into `dest` at `(x, y)`.
    pub fn prepare_to(&mut self, dest: &mut Region, r: Rect, x: i32, y: i32) -> PipelineResult<()> {
        self.prepare(r)?;
        self.copy_to(dest, r, x, y)
    }

    /// Copy `r` of this region into `dest` at `(x, y)`.
    pub fn copy_to(&self, dest: &mut Region, r: Rect, x: i32, y: i32) -> PipelineResult<()> {
        let target = Rect::new(x, y, r.width, r.height);
        if !self.valid.includes_rect(&r) || !dest.valid.includes_rect(&target) {
            return Err(PipelineError::Internal(format!(
                "copy: {} -> {} outside valid area",
                r, target
            )));
        }
        if self.sizeof_pel() != dest.sizeof_pel() {
            return Err(PipelineError::Mismatch {
                op: "copy".to_string(),
            });
        }

        for row in 0..r.height {
            let src = self.row(r.left, r.top + row, r.width as usize);
            dest.row_mut(x, y + row, r.width as usize).copy_from_slice(src);
        }
        Ok(())
    }

    // ========================================================================
    // Painting
    // ========================================================================

    /// Fill the part of `r` inside `valid` with a constant on every band.
    pub fn paint(&mut self, r: Rect, value: f64) {
        let format = self.image.format();
        let ps = self.sizeof_pel();
        let mut pel = vec![0u8; ps];
        for component in 0..self.image.bands() * format.components() {
            write_component(format, &mut pel, component, value);
        }
        self.fill(r, &pel);
    }

    /// Fill the part of `r` inside `valid` with a whole pixel value.
    pub fn paint_pel(&mut self, r: Rect, pel: &[u8]) -> PipelineResult<()> {
        if pel.len() != self.sizeof_pel() {
            return Err(PipelineError::Internal(format!(
                "paint_pel: ink has {} bytes, pixels have {}",
                pel.len(),
                self.sizeof_pel()
            )));
        }
        self.fill(r, pel);
        Ok(())
    }

    fn fill(&mut self, r: Rect, pel: &[u8]) {
        let todo = r.intersect(&self.valid);
        if todo.is_empty() || !self.has_pixels() {
            return;
        }

        let ps = pel.len();
        for y in todo.top..todo.bottom() {
            let line = self.row_mut(todo.left, y, todo.width as usize);
            for px in line.chunks_exact_mut(ps) {
                px.copy_from_slice(pel);
            }
        }
    }

    // ========================================================================
    // Pixel access
    // ========================================================================

    /// Pixel memory starting at the top-left of `valid`.
    ///
    /// Line `y` of the region starts `stride()` bytes after line `y - 1`.
    pub fn pixels(&self) -> &[u8] {
        match &self.buffer {
            Buffer::None => &[],
            Buffer::Owned(data) => data,
            Buffer::Shared { area, offset, .. } => &area.data()[*offset..],
        }
    }

    /// Byte offset of pixel `(x, y)` within [`pixels`](Self::pixels).
    pub fn offset(&self, x: i32, y: i32) -> usize {
        debug_assert!(self.valid.includes_point(x, y));
        (y - self.valid.top) as usize * self.stride() + (x - self.valid.left) as usize * self.sizeof_pel()
    }

    /// `n` pixels starting at `(x, y)`.
    pub fn row(&self, x: i32, y: i32, n: usize) -> &[u8] {
        let start = self.offset(x, y);
        &self.pixels()[start..start + n * self.sizeof_pel()]
    }

    /// One pixel.
    pub fn pel(&self, x: i32, y: i32) -> &[u8] {
        self.row(x, y, 1)
    }

    /// Writable `n` pixels starting at `(x, y)`.
    ///
    /// A region that is a window onto shared memory first takes a private
    /// copy of its valid area. The region must hold pixels.
    pub fn row_mut(&mut self, x: i32, y: i32, n: usize) -> &mut [u8] {
        debug_assert!(self.has_pixels(), "row_mut on a region of {} with no pixels", self.image.source_name());
        self.make_writable();
        let start = self.offset(x, y);
        let len = n * self.sizeof_pel();
        match &mut self.buffer {
            Buffer::Owned(data) => &mut data[start..start + len],
            _ => &mut [],
        }
    }

    fn make_writable(&mut self) {
        if let Buffer::Shared { .. } = self.buffer {
            let packed = self.to_vec();
            self.buffer = Buffer::Owned(packed);
        }
    }

    /// A tightly packed copy of the valid area.
    pub fn to_vec(&self) -> Vec<u8> {
        if !self.has_pixels() || self.valid.is_empty() {
            return Vec::new();
        }
        let width = self.valid.width as usize;
        let mut out = Vec::with_capacity(width * self.valid.height as usize * self.sizeof_pel());
        for y in self.valid.top..self.valid.bottom() {
            out.extend_from_slice(self.row(self.valid.left, y, width));
        }
        out
    }

    /// True when this region views memory owned elsewhere.
    pub fn is_shared(&self) -> bool {
        matches!(self.buffer, Buffer::Shared { .. })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let (Some(seq), Some(op)) = (self.seq.take(), self.image.generator()) {
            op.stop_dyn(seq);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("image", &self.image.source_name())
            .field("valid", &self.valid)
            .field("shared", &self.is_shared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::BandFormat;
    use crate::core::image::{Generate, ImageDesc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn gradient(width: i32, height: i32) -> Image {
        let desc = ImageDesc::new(width, height, 1, BandFormat::UChar);
        Image::from_fn(desc, |x, y, _| (y * width + x) as f64).unwrap()
    }

    /// Adds one to every sample, counting lifecycle calls.
    struct AddOne {
        input: Image,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl Generate for AddOne {
        type Seq = Region;

        fn name(&self) -> &'static str {
            "add_one"
        }

        fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Region::with_stop(&self.input, stop.clone()))
        }

        fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
            let r = out.valid();
            ir.prepare(r)?;
            for y in r.top..r.bottom() {
                let src = ir.row(r.left, y, r.width as usize).to_vec();
                for (q, p) in out.row_mut(r.left, y, r.width as usize).iter_mut().zip(src) {
                    *q = p.wrapping_add(1);
                }
            }
            Ok(())
        }

        fn stop(&self, _seq: Region) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_prepare_memory_image_views_whole_buffer() {
        let image = gradient(8, 4);
        let mut region = Region::new(&image);
        region.prepare(Rect::new(2, 1, 3, 2)).unwrap();
        assert_eq!(region.valid(), image.rect());
        assert!(region.is_shared());
        assert_eq!(region.pel(5, 3), &[29]);
    }

    #[test]
    fn test_prepare_outside_image_fails() {
        let image = gradient(8, 4);
        let mut region = Region::new(&image);
        let error = region.prepare(Rect::new(6, 0, 4, 1)).unwrap_err();
        assert!(matches!(error, PipelineError::OutOfBounds { .. }));
        assert!(region.prepare(Rect::new(0, 0, 0, 1)).is_err());
    }

    #[test]
    fn test_generate_lifecycle() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let input = gradient(8, 8);
        let desc = *input.desc();
        let image = Image::pipeline(desc)
            .input(&input)
            .generate(AddOne {
                input: input.clone(),
                starts: starts.clone(),
                stops: stops.clone(),
            })
            .unwrap();

        let mut region = Region::new(&image);
        region.prepare(Rect::new(0, 0, 4, 4)).unwrap();
        assert_eq!(region.pel(3, 2), &[20]);
        region.prepare(Rect::new(4, 4, 4, 4)).unwrap();
        assert_eq!(region.pel(7, 7), &[64]);
        // Already valid, so no regeneration.
        region.prepare(Rect::new(5, 5, 1, 1)).unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        drop(region);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_region_region_is_zero_copy() {
        let image = gradient(6, 6);
        let mut src = Region::new(&image);
        src.prepare(image.rect()).unwrap();

        let mut view = Region::new(&image);
        view.region_region(&mut src, Rect::new(0, 0, 2, 2), 3, 4).unwrap();
        assert_eq!(view.valid(), Rect::new(0, 0, 2, 2));
        assert_eq!(view.pel(0, 0), &[27]);
        assert_eq!(view.pel(1, 1), &[34]);
        assert_eq!(view.to_vec(), vec![27, 28, 33, 34]);
    }

    #[test]
    fn test_region_region_freezes_owned_memory() {
        let image = gradient(4, 4);
        let mut src = Region::new(&image);
        src.buffer(Rect::new(0, 0, 4, 4)).unwrap();
        src.paint(Rect::new(0, 0, 4, 4), 9.0);
        assert!(!src.is_shared());

        let mut view = Region::new(&image);
        view.region_region(&mut src, Rect::new(1, 1, 2, 2), 1, 1).unwrap();
        assert!(src.is_shared());
        assert_eq!(view.to_vec(), vec![9; 4]);

        // Writing to the view must not disturb the source.
        view.paint(Rect::new(1, 1, 1, 1), 3.0);
        assert_eq!(view.pel(1, 1), &[3]);
        assert_eq!(src.pel(1, 1), &[9]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "no pixels")]
    fn test_row_mut_needs_pixels() {
        let image = Image::from_memory(ImageDesc::new(2, 2, 1, BandFormat::UChar), vec![0; 4]).unwrap();
        let mut region = Region::new(&image);
        region.row_mut(0, 0, 1);
    }

    #[test]
    fn test_paint_clips_to_valid() {
        let image = gradient(4, 4);
        let mut region = Region::new(&image);
        region.buffer(Rect::new(1, 1, 2, 2)).unwrap();
        region.paint(Rect::new(0, 0, 4, 4), 0.0);
        region.paint(Rect::new(2, 0, 5, 2), 255.0);
        assert_eq!(region.to_vec(), vec![0, 255, 0, 0]);
    }

    #[test]
    fn test_paint_pel_multiband() {
        let desc = ImageDesc::new(3, 1, 3, BandFormat::UChar);
        let image = Image::from_memory(desc, vec![0; 9]).unwrap();
        let mut region = Region::new(&image);
        region.buffer(image.rect()).unwrap();
        region.paint_pel(Rect::new(1, 0, 2, 1), &[1, 2, 3]).unwrap();
        assert_eq!(region.row(1, 0, 2), &[1, 2, 3, 1, 2, 3]);
        assert!(region.paint_pel(image.rect(), &[1]).is_err());
    }

    #[test]
    fn test_prepare_to_copies_into_destination() {
        let image = gradient(5, 5);
        let mut src = Region::new(&image);
        let mut dest = Region::new(&image);
        dest.buffer(Rect::new(0, 0, 3, 3)).unwrap();
        dest.paint(dest.valid(), 0.0);
        src.prepare_to(&mut dest, Rect::new(3, 3, 2, 2), 1, 1).unwrap();
        assert_eq!(dest.to_vec(), vec![0, 0, 0, 0, 18, 19, 0, 23, 24]);
    }
}
