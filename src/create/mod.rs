//! Image sources.
//!
//! Operations that make images from something other than another image:
//! rendered text and decoded files.

pub mod convert;
pub mod text;

pub use convert::{from_dynamic, load, save, to_dynamic};
pub use text::{install_rasterizer, text, Align, CellRasterizer, RenderedText, TextContext, TextLayout, TextOptions, TextRasterizer, TextWrap};
