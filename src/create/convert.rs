//! Moving pixels between [`Image`] and the `image` crate.
//!
//! Loading always produces a memory image. Saving evaluates the pipeline
//! first, then maps format and band count onto the nearest
//! [`DynamicImage`] variant.

use crate::core::error::{PipelineError, PipelineResult, TessellaResult};
use crate::core::format::{read_component, BandFormat, Interpretation};
use crate::core::image::{Image, ImageDesc};
use crate::execution::write_to_memory;
use image::{DynamicImage, ImageBuffer, Pixel};
use std::path::Path;

/// Wrap decoded pixels as a memory image.
///
/// 8-bit, 16-bit and float buffers keep their sample type. Anything else
/// is converted to RGBA8 first.
pub fn from_dynamic(decoded: &DynamicImage) -> PipelineResult<Image> {
    let (width, height) = (decoded.width() as i32, decoded.height() as i32);
    let (format, bands, interpretation, data) = match decoded {
        DynamicImage::ImageLuma8(b) => (BandFormat::UChar, 1, Interpretation::BW, b.as_raw().clone()),
        DynamicImage::ImageLumaA8(b) => (BandFormat::UChar, 2, Interpretation::BW, b.as_raw().clone()),
        DynamicImage::ImageRgb8(b) => (BandFormat::UChar, 3, Interpretation::Srgb, b.as_raw().clone()),
        DynamicImage::ImageRgba8(b) => (BandFormat::UChar, 4, Interpretation::Srgb, b.as_raw().clone()),
        DynamicImage::ImageLuma16(b) => (BandFormat::UShort, 1, Interpretation::Grey16, to_bytes(b.as_raw())),
        DynamicImage::ImageLumaA16(b) => (BandFormat::UShort, 2, Interpretation::Grey16, to_bytes(b.as_raw())),
        DynamicImage::ImageRgb16(b) => (BandFormat::UShort, 3, Interpretation::Rgb16, to_bytes(b.as_raw())),
        DynamicImage::ImageRgba16(b) => (BandFormat::UShort, 4, Interpretation::Rgb16, to_bytes(b.as_raw())),
        DynamicImage::ImageRgb32F(b) => (BandFormat::Float, 3, Interpretation::ScRgb, to_bytes(b.as_raw())),
        DynamicImage::ImageRgba32F(b) => (BandFormat::Float, 4, Interpretation::ScRgb, to_bytes(b.as_raw())),
        other => (BandFormat::UChar, 4, Interpretation::Srgb, other.to_rgba8().into_raw()),
    };

    let desc = ImageDesc::new(width, height, bands, format).with_interpretation(interpretation);
    Image::from_memory(desc, data)
}

fn to_bytes<T: bytemuck::Pod>(samples: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(samples).to_vec()
}

fn from_bytes<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

fn buffer<P: Pixel>(width: u32, height: u32, samples: Vec<P::Subpixel>) -> PipelineResult<ImageBuffer<P, Vec<P::Subpixel>>> {
    ImageBuffer::from_raw(width, height, samples)
        .ok_or_else(|| PipelineError::Internal("pixel buffer does not match image size".to_string()))
}

/// Evaluate `image` and copy it into a [`DynamicImage`].
///
/// One to four bands are supported. UChar, UShort and three or four band
/// Float keep their sample type; other formats are clipped to 8 bits, with
/// complex formats losing their imaginary part.
pub fn to_dynamic(image: &Image) -> PipelineResult<DynamicImage> {
    let bands = image.bands();
    if !(1..=4).contains(&bands) {
        return Err(PipelineError::bad_parameter("save", "only 1 to 4 bands can be saved"));
    }

    let memory = write_to_memory(image)?;
    let bytes = memory
        .memory()
        .map(|area| area.data())
        .ok_or_else(|| PipelineError::Internal("evaluated image has no pixels".to_string()))?;
    let (w, h) = (image.width() as u32, image.height() as u32);

    let decoded = match (image.format(), bands) {
        (BandFormat::UChar, 1) => DynamicImage::ImageLuma8(buffer(w, h, bytes.to_vec())?),
        (BandFormat::UChar, 2) => DynamicImage::ImageLumaA8(buffer(w, h, bytes.to_vec())?),
        (BandFormat::UChar, 3) => DynamicImage::ImageRgb8(buffer(w, h, bytes.to_vec())?),
        (BandFormat::UChar, _) => DynamicImage::ImageRgba8(buffer(w, h, bytes.to_vec())?),
        (BandFormat::UShort, 1) => DynamicImage::ImageLuma16(buffer(w, h, from_bytes(bytes))?),
        (BandFormat::UShort, 2) => DynamicImage::ImageLumaA16(buffer(w, h, from_bytes(bytes))?),
        (BandFormat::UShort, 3) => DynamicImage::ImageRgb16(buffer(w, h, from_bytes(bytes))?),
        (BandFormat::UShort, _) => DynamicImage::ImageRgba16(buffer(w, h, from_bytes(bytes))?),
        (BandFormat::Float, 3) => DynamicImage::ImageRgb32F(buffer(w, h, from_bytes(bytes))?),
        (BandFormat::Float, 4) => DynamicImage::ImageRgba32F(buffer(w, h, from_bytes(bytes))?),
        (format, bands) => {
            let clipped = clip_to_uchar(format, bands, bytes);
            match bands {
                1 => DynamicImage::ImageLuma8(buffer(w, h, clipped)?),
                2 => DynamicImage::ImageLumaA8(buffer(w, h, clipped)?),
                3 => DynamicImage::ImageRgb8(buffer(w, h, clipped)?),
                _ => DynamicImage::ImageRgba8(buffer(w, h, clipped)?),
            }
        }
    };

    Ok(decoded)
}

fn clip_to_uchar(format: BandFormat, bands: usize, bytes: &[u8]) -> Vec<u8> {
    let components = format.components();
    bytes
        .chunks_exact(format.size_of() * bands)
        .flat_map(|pel| {
            (0..bands).map(move |b| read_component(format, pel, b * components).round().clamp(0.0, 255.0) as u8)
        })
        .collect()
}

/// Decode the file at `path`.
pub fn load(path: impl AsRef<Path>) -> TessellaResult<Image> {
    let decoded = image::open(path.as_ref())?;
    log::debug!("load: {} is {}x{}", path.as_ref().display(), decoded.width(), decoded.height());
    Ok(from_dynamic(&decoded)?)
}

/// Evaluate `image` and encode it to `path`, picking the codec from the
/// file extension.
pub fn save(image: &Image, path: impl AsRef<Path>) -> TessellaResult<()> {
    let decoded = to_dynamic(image)?;
    let jpeg = matches!(path.as_ref().extension().and_then(|e| e.to_str()), Some("jpg" | "jpeg"));
    let float = matches!(decoded, DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_));
    let decoded = if jpeg {
        // JPEG has no alpha and no 16-bit or float support.
        DynamicImage::ImageRgb8(decoded.to_rgb8())
    } else if float {
        DynamicImage::ImageRgba16(decoded.to_rgba16())
    } else {
        decoded
    };
    decoded.save(path.as_ref())?;
    Ok(())
}
