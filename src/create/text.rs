//! Render text to an image.
//!
//! Layout and glyph rendering are delegated to a [`TextRasterizer`]. The
//! rasterizer lives in one process-wide [`TextContext`], created on first
//! use. A context is not safe to use from two threads at once, so the
//! global lock is held for the whole of a render: font registration,
//! autofit, measuring and drawing.
//!
//! Text is Pango-style markup. Tags are checked for balance and stripped;
//! the built-in [`CellRasterizer`] draws plain text only.

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::{BandFormat, Interpretation};
use crate::core::image::{Image, ImageDesc};
use crate::core::rect::Rect;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Dots per inch used when neither `dpi` nor `height` is given.
pub const DEFAULT_DPI: i32 = 72;

/// Default font description.
pub const DEFAULT_FONT: &str = "sans 12";

const MIN_DPI: i32 = 2;
const MAX_DPI: i32 = 10000;

/// Horizontal alignment of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    /// Left.
    #[default]
    Low,
    /// Centre.
    Centre,
    /// Right.
    High,
}

/// Line wrapping when a width is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextWrap {
    /// Break between words, and inside words wider than a line.
    #[default]
    WordChar,
    /// Break between words only.
    Word,
    /// Break anywhere.
    Char,
    /// Only break at newlines.
    None,
}

/// Optional arguments of [`text`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOptions {
    /// Font description, such as `"sans 12"`.
    pub font: Option<String>,
    /// Wrap width in pixels.
    pub width: Option<i32>,
    /// Fit the text into this height by picking the dpi.
    pub height: Option<i32>,
    /// Extra pixels between lines.
    pub spacing: i32,
    /// Line alignment.
    pub align: Align,
    /// Wrapping mode.
    pub wrap: TextWrap,
    /// Resolution. When unset and `height` is set, it is found by autofit.
    pub dpi: Option<i32>,
    /// Font file to register before rendering.
    pub fontfile: Option<PathBuf>,
    /// Render four-band RGBA instead of a one-band mask.
    pub rgba: bool,
}

impl TextOptions {
    /// Defaults: 72 dpi, left aligned, no width limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the font description.
    pub fn with_font(mut self, font: impl Into<String>) -> Self {
        self.font = Some(font.into());
        self
    }

    /// Set the wrap width.
    pub fn with_width(mut self, width: i32) -> Self {
        self.width = Some(width);
        self
    }

    /// Set the height to autofit into.
    pub fn with_height(mut self, height: i32) -> Self {
        self.height = Some(height);
        self
    }

    /// Set the line spacing.
    pub fn with_spacing(mut self, spacing: i32) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the alignment.
    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    /// Set the wrapping mode.
    pub fn with_wrap(mut self, wrap: TextWrap) -> Self {
        self.wrap = wrap;
        self
    }

    /// Set the resolution.
    pub fn with_dpi(mut self, dpi: i32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    /// Register a font file.
    pub fn with_fontfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.fontfile = Some(path.into());
        self
    }

    /// Render RGBA.
    pub fn with_rgba(mut self, rgba: bool) -> Self {
        self.rgba = rgba;
        self
    }
}

/// Everything a rasterizer needs to lay out one block of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayout {
    /// Plain text, markup removed.
    pub text: String,
    /// Font description.
    pub font: String,
    /// Resolution.
    pub dpi: i32,
    /// Wrap width in pixels.
    pub width: Option<i32>,
    /// Extra pixels between lines.
    pub spacing: i32,
    /// Line alignment.
    pub align: Align,
    /// Wrapping mode.
    pub wrap: TextWrap,
}

/// Lays out and draws text.
pub trait TextRasterizer: Send {
    /// Make the fonts in `path` available.
    fn add_fontfile(&mut self, path: &Path) -> Result<(), String>;

    /// Bounding box of the inked pixels of `layout`, relative to the layout
    /// origin. Empty when nothing would be drawn.
    fn ink_extents(&mut self, layout: &TextLayout) -> Rect;

    /// Draw `layout` as 8-bit coverage into `alpha`, a packed buffer
    /// covering `extents` in layout coordinates.
    fn render(&mut self, layout: &TextLayout, extents: Rect, alpha: &mut [u8]);
}

/// Result of [`text`].
#[derive(Debug, Clone)]
pub struct RenderedText {
    /// The rendered image.
    pub image: Image,
    /// Resolution used, after any autofit.
    pub dpi: i32,
}

// ============================================================================
// Context
// ============================================================================

/// A rasterizer plus the font files already registered with it.
pub struct TextContext {
    rasterizer: Box<dyn TextRasterizer>,
    fontfiles: HashSet<PathBuf>,
}

impl TextContext {
    /// Wrap `rasterizer`.
    pub fn new(rasterizer: Box<dyn TextRasterizer>) -> Self {
        Self {
            rasterizer,
            fontfiles: HashSet::new(),
        }
    }

    /// Register `path` unless it was registered before. Failures are
    /// logged and otherwise ignored.
    fn add_fontfile(&mut self, path: &Path) {
        if self.fontfiles.contains(path) {
            return;
        }
        if let Err(e) = self.rasterizer.add_fontfile(path) {
            log::warn!("text: unable to load fontfile \"{}\": {}", path.display(), e);
        }
        self.fontfiles.insert(path.to_path_buf());
    }

    /// Number of distinct font files registered.
    pub fn fontfile_count(&self) -> usize {
        self.fontfiles.len()
    }

    fn extents(&mut self, layout: &TextLayout) -> Rect {
        self.rasterizer.ink_extents(layout)
    }

    /// Find the largest dpi at which `layout` fits in `width` x `height`.
    ///
    /// Doubles or halves the dpi until the fit flips, then bisects. Every
    /// dpi returned above [`MIN_DPI`] has been measured to fit; when nothing
    /// fits the result is [`MIN_DPI`].
    fn autofit(&mut self, layout: &mut TextLayout, width: i32, height: i32) -> i32 {
        let fits = |context: &mut Self, layout: &mut TextLayout, dpi: i32| -> bool {
            layout.dpi = dpi;
            let extents = context.extents(layout);
            Rect::new(extents.left, extents.top, width, height).includes_rect(&extents)
        };

        // `lower` fits and `upper` does not. The out-of-range sentinels
        // stand in for dpis that are never tried.
        let start = layout.dpi.clamp(MIN_DPI, MAX_DPI);
        let (mut lower, mut upper) = if fits(self, layout, start) {
            let mut lower = start;
            loop {
                if lower >= MAX_DPI {
                    break (lower, MAX_DPI + 1);
                }
                let next = (lower * 2).min(MAX_DPI);
                if !fits(self, layout, next) {
                    break (lower, next);
                }
                lower = next;
            }
        } else {
            let mut upper = start;
            loop {
                if upper <= MIN_DPI {
                    break (MIN_DPI - 1, upper);
                }
                let next = (upper / 2).max(MIN_DPI);
                if fits(self, layout, next) {
                    break (next, upper);
                }
                upper = next;
            }
        };

        while upper - lower > 1 {
            let middle = (upper + lower) / 2;
            if fits(self, layout, middle) {
                lower = middle;
            } else {
                upper = middle;
            }
        }

        lower.max(MIN_DPI)
    }

    /// Render `markup` with this context.
    pub fn render(&mut self, markup: &str, options: &TextOptions) -> PipelineResult<RenderedText> {
        let plain = parse_markup(markup).map_err(|reason| PipelineError::InvalidMarkup {
            op: "text".to_string(),
            reason,
        })?;

        if let Some(path) = &options.fontfile {
            self.add_fontfile(path);
        }

        let mut layout = TextLayout {
            text: plain,
            font: options.font.clone().unwrap_or_else(|| DEFAULT_FONT.to_string()),
            dpi: options.dpi.unwrap_or(DEFAULT_DPI),
            width: options.width.filter(|&w| w > 0),
            spacing: options.spacing,
            align: options.align,
            wrap: options.wrap,
        };

        if let (Some(height), None) = (options.height, options.dpi) {
            layout.dpi = self.autofit(&mut layout, options.width.unwrap_or(0), height);
            log::info!("text: autofit dpi {}", layout.dpi);
        }

        let extents = self.extents(&layout);
        if extents.is_empty() {
            return Err(PipelineError::NoText { op: "text".to_string() });
        }

        let mut alpha = vec![0u8; extents.area() as usize];
        self.rasterizer.render(&layout, extents, &mut alpha);

        let (bands, interpretation, data) = if options.rgba {
            let rgba = alpha.iter().flat_map(|&a| [0, 0, 0, a]).collect();
            (4, Interpretation::Srgb, rgba)
        } else {
            (1, Interpretation::Multiband, alpha)
        };

        let desc = ImageDesc::new(extents.width, extents.height, bands, BandFormat::UChar)
            .with_interpretation(interpretation)
            .with_offset(extents.left, extents.top);

        Ok(RenderedText {
            image: Image::from_memory(desc, data)?,
            dpi: layout.dpi,
        })
    }
}

fn global() -> &'static Mutex<TextContext> {
    static CONTEXT: OnceLock<Mutex<TextContext>> = OnceLock::new();
    CONTEXT.get_or_init(|| Mutex::new(TextContext::new(Box::new(CellRasterizer::new()))))
}

/// Replace the rasterizer of the process-wide context.
///
/// Font files registered with the previous rasterizer are forgotten.
pub fn install_rasterizer(rasterizer: Box<dyn TextRasterizer>) {
    *global().lock() = TextContext::new(rasterizer);
}

/// Render `markup` to an image with the process-wide context.
///
/// The result is a one-band coverage mask, or black RGBA with that
/// coverage as alpha. Its origin hint is the ink offset from the layout
/// origin. When `height` is set and `dpi` is not, the dpi is chosen so the
/// text fits in `width` x `height`.
pub fn text(markup: &str, options: &TextOptions) -> PipelineResult<RenderedText> {
    global().lock().render(markup, options)
}

// ============================================================================
// Markup
// ============================================================================

const TAGS: &[&str] = &["b", "big", "i", "s", "span", "sub", "sup", "small", "tt", "u"];

/// Check `markup` and return its plain text.
pub fn parse_markup(markup: &str) -> Result<String, String> {
    let mut plain = String::with_capacity(markup.len());
    let mut open: Vec<&str> = Vec::new();
    let mut rest = markup;

    while let Some(c) = rest.chars().next() {
        match c {
            '<' => {
                let end = rest.find('>').ok_or("unterminated tag")?;
                let tag = rest[1..end].trim();
                rest = &rest[end + 1..];

                if let Some(name) = tag.strip_prefix('/') {
                    let name = name.trim();
                    match open.pop() {
                        Some(expected) if expected == name => {}
                        Some(expected) => return Err(format!("</{}> closes <{}>", name, expected)),
                        None => return Err(format!("</{}> was never opened", name)),
                    }
                } else {
                    let self_closing = tag.ends_with('/');
                    let name = tag.trim_end_matches('/').split_whitespace().next().unwrap_or("");
                    if !TAGS.contains(&name) {
                        return Err(format!("unknown tag <{}>", name));
                    }
                    if !self_closing {
                        open.push(name);
                    }
                }
            }
            '&' => {
                let end = rest.find(';').ok_or("unterminated entity")?;
                let entity = &rest[1..end];
                rest = &rest[end + 1..];
                plain.push(decode_entity(entity).ok_or_else(|| format!("unknown entity &{};", entity))?);
            }
            _ => {
                plain.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    match open.pop() {
        Some(name) => Err(format!("<{}> is never closed", name)),
        None => Ok(plain),
    }
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

// ============================================================================
// Built-in rasterizer
// ============================================================================

/// A monospaced rasterizer that draws every visible character as a solid
/// block.
///
/// The font description's trailing number is its size in points; the
/// family is ignored.
#[derive(Debug, Default)]
pub struct CellRasterizer {
    fontfiles: Vec<PathBuf>,
}

struct Metrics {
    advance: i32,
    ink_width: i32,
    ascent: i32,
    line_height: i32,
}

impl CellRasterizer {
    /// A rasterizer with no extra fonts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Font files registered so far.
    pub fn fontfiles(&self) -> &[PathBuf] {
        &self.fontfiles
    }

    fn metrics(layout: &TextLayout) -> Metrics {
        let points = layout
            .font
            .split_whitespace()
            .last()
            .and_then(|size| size.parse::<f64>().ok())
            .unwrap_or(12.0);
        let pixels = (points * layout.dpi as f64 / 72.0).max(1.0);

        let advance = ((pixels * 0.6).ceil() as i32).max(1);
        Metrics {
            advance,
            ink_width: advance - advance / 6,
            ascent: pixels.ceil() as i32,
            line_height: (pixels * 1.2).ceil() as i32 + layout.spacing,
        }
    }

    fn lines(layout: &TextLayout, advance: i32) -> Vec<Vec<char>> {
        let max = layout.width.map(|w| (w / advance).max(1) as usize);
        layout
            .text
            .split('\n')
            .flat_map(|paragraph| match max {
                Some(max) => wrap_paragraph(paragraph, max, layout.wrap),
                None => vec![paragraph.chars().collect()],
            })
            .collect()
    }

    /// Ink rectangle of every visible character.
    fn glyphs(layout: &TextLayout) -> Vec<Rect> {
        let m = Self::metrics(layout);
        let lines = Self::lines(layout, m.advance);
        let block = layout
            .width
            .unwrap_or_else(|| lines.iter().map(|l| l.len() as i32).max().unwrap_or(0) * m.advance);

        let mut glyphs = Vec::new();
        for (row, line) in lines.iter().enumerate() {
            let span = line.len() as i32 * m.advance;
            let x0 = match layout.align {
                Align::Low => 0,
                Align::Centre => (block - span) / 2,
                Align::High => block - span,
            };
            for (col, c) in line.iter().enumerate() {
                if !c.is_whitespace() {
                    glyphs.push(Rect::new(
                        x0 + col as i32 * m.advance,
                        row as i32 * m.line_height,
                        m.ink_width,
                        m.ascent,
                    ));
                }
            }
        }
        glyphs
    }
}

fn wrap_paragraph(paragraph: &str, max: usize, wrap: TextWrap) -> Vec<Vec<char>> {
    let chars: Vec<char> = paragraph.chars().collect();
    match wrap {
        TextWrap::None => vec![chars],
        TextWrap::Char if chars.is_empty() => vec![chars],
        TextWrap::Char => chars.chunks(max).map(<[char]>::to_vec).collect(),
        TextWrap::Word | TextWrap::WordChar => {
            let mut lines = Vec::new();
            let mut line: Vec<char> = Vec::new();
            for word in paragraph.split_whitespace() {
                let word: Vec<char> = word.chars().collect();
                let pieces: Vec<&[char]> = if wrap == TextWrap::WordChar {
                    word.chunks(max).collect()
                } else {
                    vec![&word[..]]
                };
                for piece in pieces {
                    if !line.is_empty() && line.len() + 1 + piece.len() > max {
                        lines.push(std::mem::take(&mut line));
                    }
                    if !line.is_empty() {
                        line.push(' ');
                    }
                    line.extend_from_slice(piece);
                }
            }
            lines.push(line);
            lines
        }
    }
}

impl TextRasterizer for CellRasterizer {
    fn add_fontfile(&mut self, path: &Path) -> Result<(), String> {
        if !path.exists() {
            return Err("no such file".to_string());
        }
        self.fontfiles.push(path.to_path_buf());
        Ok(())
    }

    fn ink_extents(&mut self, layout: &TextLayout) -> Rect {
        Self::glyphs(layout)
            .into_iter()
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default()
    }

    fn render(&mut self, layout: &TextLayout, extents: Rect, alpha: &mut [u8]) {
        let stride = extents.width as usize;
        for glyph in Self::glyphs(layout) {
            let ink = glyph.intersect(&extents);
            for y in ink.top..ink.bottom() {
                let row = (y - extents.top) as usize * stride;
                let from = row + (ink.left - extents.left) as usize;
                alpha[from..from + ink.width as usize].fill(255);
            }
        }
    }
}
