//! Image handles and the generate-callback contract.
//!
//! An [`Image`] is an immutable description of a raster plus a way to
//! obtain pixels: either a memory buffer or an operation implementing
//! [`Generate`]. Handles are cheap to clone and safe to share between
//! worker threads. Pixels are only ever pulled through a
//! [`Region`](crate::core::region::Region).

use crate::core::area::{AreaType, TypedArea};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::{write_component, BandFormat, Coding, Interpretation};
use crate::core::rect::Rect;
use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Header fields of an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageDesc {
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Number of bands.
    pub bands: usize,
    /// Band element format.
    pub format: BandFormat,
    /// How to understand the bands.
    #[serde(default)]
    pub interpretation: Interpretation,
    /// Pixel coding.
    #[serde(default)]
    pub coding: Coding,
    /// Horizontal origin hint.
    #[serde(default)]
    pub xoffset: i32,
    /// Vertical origin hint.
    #[serde(default)]
    pub yoffset: i32,
}

impl ImageDesc {
    /// Create a header with default interpretation and no coding.
    pub fn new(width: i32, height: i32, bands: usize, format: BandFormat) -> Self {
        Self {
            width,
            height,
            bands,
            format,
            interpretation: Interpretation::default(),
            coding: Coding::None,
            xoffset: 0,
            yoffset: 0,
        }
    }

    /// Set the interpretation.
    pub fn with_interpretation(mut self, interpretation: Interpretation) -> Self {
        self.interpretation = interpretation;
        self
    }

    /// Set the size.
    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the origin hint.
    pub fn with_offset(mut self, xoffset: i32, yoffset: i32) -> Self {
        self.xoffset = xoffset;
        self.yoffset = yoffset;
        self
    }

    /// Bytes per pixel.
    pub fn sizeof_pel(&self) -> usize {
        self.bands * self.format.size_of()
    }

    /// Bytes per line.
    pub fn sizeof_line(&self) -> usize {
        self.width.max(0) as usize * self.sizeof_pel()
    }

    /// Bytes for the whole image.
    pub fn sizeof_image(&self) -> usize {
        self.sizeof_line() * self.height.max(0) as usize
    }

    /// The full image rectangle.
    pub fn rect(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }
}

/// Preferred tile shape of an image, from least to most restrictive.
///
/// A pipeline takes the most restrictive hint of any of its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DemandStyle {
    /// Any shape is fine.
    Any,
    /// Full-width strips a few lines high.
    ThinStrip,
    /// Full-width strips many lines high.
    FatStrip,
    /// Small square tiles.
    SmallTile,
}

impl DemandStyle {
    /// The more restrictive of two hints.
    pub fn combine(self, other: DemandStyle) -> DemandStyle {
        self.max(other)
    }
}

/// Cooperative early-exit signal shared by all regions of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this flag to stop.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The start / generate / stop contract of a computed image.
///
/// `start` runs once per worker lane and returns that lane's private
/// sequence state (typically regions on the inputs plus scratch buffers).
/// `generate` fills `out.valid()` and may be called many times with the
/// same sequence. `stop` runs when the lane's region is dropped. Sequence
/// state is never shared between lanes, so `generate` needs no locking.
pub trait Generate: Send + Sync + 'static {
    /// Per-lane state.
    type Seq: Send + 'static;

    /// Operation nickname, used in messages.
    fn name(&self) -> &'static str;

    /// Create the per-lane state.
    fn start(&self, stop: &StopFlag) -> PipelineResult<Self::Seq>;

    /// Compute every pixel of `out.valid()`.
    fn generate(&self, out: &mut Region, seq: &mut Self::Seq, stop: &StopFlag) -> PipelineResult<()>;

    /// Release the per-lane state.
    fn stop(&self, seq: Self::Seq) {
        drop(seq);
    }
}

/// Type-erased form of [`Generate`] stored inside an image.
pub(crate) trait DynGenerate: Send + Sync {
    fn name(&self) -> &'static str;
    fn start_dyn(&self, stop: &StopFlag) -> PipelineResult<Box<dyn Any + Send>>;
    fn generate_dyn(
        &self,
        out: &mut Region,
        seq: &mut (dyn Any + Send),
        stop: &StopFlag,
    ) -> PipelineResult<()>;
    fn stop_dyn(&self, seq: Box<dyn Any + Send>);
}

impl<G: Generate> DynGenerate for G {
    fn name(&self) -> &'static str {
        Generate::name(self)
    }

    fn start_dyn(&self, stop: &StopFlag) -> PipelineResult<Box<dyn Any + Send>> {
        Ok(Box::new(self.start(stop)?))
    }

    fn generate_dyn(
        &self,
        out: &mut Region,
        seq: &mut (dyn Any + Send),
        stop: &StopFlag,
    ) -> PipelineResult<()> {
        let seq = seq.downcast_mut::<G::Seq>().ok_or_else(|| {
            PipelineError::Internal(format!("{}: sequence type mismatch", Generate::name(self)))
        })?;
        self.generate(out, seq, stop)
    }

    fn stop_dyn(&self, seq: Box<dyn Any + Send>) {
        if let Ok(seq) = seq.downcast::<G::Seq>() {
            self.stop(*seq);
        }
    }
}

/// Where an image's pixels come from.
#[derive(Clone)]
pub(crate) enum Source {
    Memory(TypedArea),
    Generated(Arc<dyn DynGenerate>),
}

struct ImageInner {
    desc: ImageDesc,
    demand: DemandStyle,
    sequential: bool,
    source: Source,
    inputs: Vec<Image>,
}

/// A shared handle on a memory or computed image.
#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

impl Image {
    /// Wrap a tightly packed pixel buffer.
    pub fn from_memory(desc: ImageDesc, data: Vec<u8>) -> PipelineResult<Image> {
        Self::from_area(desc, TypedArea::from_vec(data, AreaType::Pixels))
    }

    /// Wrap an existing area holding tightly packed pixels.
    pub fn from_area(desc: ImageDesc, area: TypedArea) -> PipelineResult<Image> {
        check_size("image", &desc)?;
        if area.len() != desc.sizeof_image() {
            return Err(PipelineError::bad_parameter(
                "image",
                format!(
                    "buffer holds {} bytes, {}x{} {} x {} needs {}",
                    area.len(),
                    desc.width,
                    desc.height,
                    desc.bands,
                    desc.format,
                    desc.sizeof_image()
                ),
            ));
        }

        Ok(Image {
            inner: Arc::new(ImageInner {
                desc,
                demand: DemandStyle::Any,
                sequential: false,
                source: Source::Memory(area),
                inputs: Vec::new(),
            }),
        })
    }

    /// Build a memory image by evaluating `f(x, y, band)` for every sample.
    ///
    /// Values are rounded and clamped to the format. Complex formats get
    /// the value in the real part.
    pub fn from_fn<F>(desc: ImageDesc, f: F) -> PipelineResult<Image>
    where
        F: Fn(i32, i32, usize) -> f64,
    {
        check_size("image", &desc)?;
        let ps = desc.sizeof_pel();
        let mut data = vec![0u8; desc.sizeof_image()];
        for y in 0..desc.height {
            for x in 0..desc.width {
                let at = (y as usize * desc.width as usize + x as usize) * ps;
                for band in 0..desc.bands {
                    write_component(
                        desc.format,
                        &mut data[at..at + ps],
                        band * desc.format.components(),
                        f(x, y, band),
                    );
                }
            }
        }
        Self::from_memory(desc, data)
    }

    /// Start describing a computed image.
    pub fn pipeline(desc: ImageDesc) -> ImageBuilder {
        ImageBuilder {
            desc,
            demand: DemandStyle::Any,
            inputs: Vec::new(),
            sequential: false,
        }
    }

    /// Header fields.
    pub fn desc(&self) -> &ImageDesc {
        &self.inner.desc
    }

    /// Width in pixels.
    pub fn width(&self) -> i32 {
        self.inner.desc.width
    }

    /// Height in pixels.
    pub fn height(&self) -> i32 {
        self.inner.desc.height
    }

    /// Number of bands.
    pub fn bands(&self) -> usize {
        self.inner.desc.bands
    }

    /// Band element format.
    pub fn format(&self) -> BandFormat {
        self.inner.desc.format
    }

    /// Band interpretation.
    pub fn interpretation(&self) -> Interpretation {
        self.inner.desc.interpretation
    }

    /// Pixel coding.
    pub fn coding(&self) -> Coding {
        self.inner.desc.coding
    }

    /// Bytes per pixel.
    pub fn sizeof_pel(&self) -> usize {
        self.inner.desc.sizeof_pel()
    }

    /// The full image rectangle.
    pub fn rect(&self) -> Rect {
        self.inner.desc.rect()
    }

    /// Preferred tile shape.
    pub fn demand_style(&self) -> DemandStyle {
        self.inner.demand
    }

    /// True when pixels must be requested top to bottom.
    pub fn is_sequential(&self) -> bool {
        self.inner.sequential
    }

    /// True for images backed by a memory buffer.
    pub fn is_memory(&self) -> bool {
        matches!(self.inner.source, Source::Memory(_))
    }

    /// The pixel buffer of a memory image.
    pub fn memory(&self) -> Option<&TypedArea> {
        match &self.inner.source {
            Source::Memory(area) => Some(area),
            Source::Generated(_) => None,
        }
    }

    /// One pixel of a memory image.
    pub fn pel(&self, x: i32, y: i32) -> Option<&[u8]> {
        let area = self.memory()?;
        if !self.rect().includes_point(x, y) {
            return None;
        }
        let ps = self.sizeof_pel();
        let at = y as usize * self.inner.desc.sizeof_line() + x as usize * ps;
        Some(&area.data()[at..at + ps])
    }

    /// Nickname of the generating operation, or `"memory"`.
    pub fn source_name(&self) -> &'static str {
        match &self.inner.source {
            Source::Memory(_) => "memory",
            Source::Generated(op) => op.name(),
        }
    }

    /// Upstream images this one was computed from.
    pub fn inputs(&self) -> &[Image] {
        &self.inner.inputs
    }

    /// True when both handles refer to the same image.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn source(&self) -> Source {
        self.inner.source.clone()
    }

    pub(crate) fn generator(&self) -> Option<Arc<dyn DynGenerate>> {
        match &self.inner.source {
            Source::Generated(op) => Some(op.clone()),
            Source::Memory(_) => None,
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("desc", &self.inner.desc)
            .field("source", &self.source_name())
            .field("demand", &self.inner.demand)
            .field("sequential", &self.inner.sequential)
            .finish()
    }
}

/// Builder for computed images.
pub struct ImageBuilder {
    desc: ImageDesc,
    demand: DemandStyle,
    inputs: Vec<Image>,
    sequential: bool,
}

impl ImageBuilder {
    /// Set this stage's preferred tile shape.
    pub fn demand(mut self, demand: DemandStyle) -> Self {
        self.demand = demand;
        self
    }

    /// Add an upstream image.
    pub fn input(mut self, input: &Image) -> Self {
        self.inputs.push(input.clone());
        self
    }

    /// Mark this stage as requiring top-to-bottom access.
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Attach the generating operation.
    ///
    /// Demand style and sequential access are inherited from the inputs:
    /// the most restrictive style wins, and one sequential input makes the
    /// whole stage sequential.
    pub fn generate<G: Generate>(self, op: G) -> PipelineResult<Image> {
        check_size(Generate::name(&op), &self.desc)?;

        let demand = self
            .inputs
            .iter()
            .fold(self.demand, |acc, input| acc.combine(input.demand_style()));
        let sequential = self.sequential || self.inputs.iter().any(Image::is_sequential);

        Ok(Image {
            inner: Arc::new(ImageInner {
                desc: self.desc,
                demand,
                sequential,
                source: Source::Generated(Arc::new(op)),
                inputs: self.inputs,
            }),
        })
    }
}

fn check_size(op: &str, desc: &ImageDesc) -> PipelineResult<()> {
    if desc.width <= 0 || desc.height <= 0 || desc.bands == 0 {
        return Err(PipelineError::BadDimensions { op: op.to_string() });
    }
    Ok(())
}
