//! Pixel formats, interpretations and sample conversion.
//!
//! Pixels are stored band-interleaved, row-major, with a fixed native-endian
//! element width per band format. Complex formats store (real, imaginary)
//! pairs per band.

use crate::core::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Numeric format of one band element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandFormat {
    /// Unsigned 8-bit.
    UChar,
    /// Signed 8-bit.
    Char,
    /// Unsigned 16-bit.
    UShort,
    /// Signed 16-bit.
    Short,
    /// Unsigned 32-bit.
    UInt,
    /// Signed 32-bit.
    Int,
    /// 32-bit float.
    Float,
    /// Pair of 32-bit floats.
    Complex,
    /// 64-bit float.
    Double,
    /// Pair of 64-bit floats.
    DpComplex,
}

impl BandFormat {
    /// Size in bytes of one band element.
    pub fn size_of(self) -> usize {
        match self {
            BandFormat::UChar | BandFormat::Char => 1,
            BandFormat::UShort | BandFormat::Short => 2,
            BandFormat::UInt | BandFormat::Int | BandFormat::Float => 4,
            BandFormat::Complex | BandFormat::Double => 8,
            BandFormat::DpComplex => 16,
        }
    }

    /// Number of scalar components per band element.
    pub fn components(self) -> usize {
        if self.is_complex() {
            2
        } else {
            1
        }
    }

    /// Size in bytes of one scalar component.
    pub fn component_size(self) -> usize {
        self.size_of() / self.components()
    }

    /// True for the two complex formats.
    pub fn is_complex(self) -> bool {
        matches!(self, BandFormat::Complex | BandFormat::DpComplex)
    }

    /// True for integer formats.
    pub fn is_int(self) -> bool {
        matches!(
            self,
            BandFormat::UChar
                | BandFormat::Char
                | BandFormat::UShort
                | BandFormat::Short
                | BandFormat::UInt
                | BandFormat::Int
        )
    }

    /// True for signed integer formats.
    pub fn is_signed_int(self) -> bool {
        matches!(self, BandFormat::Char | BandFormat::Short | BandFormat::Int)
    }

    /// Largest representable value.
    pub fn max_value(self) -> f64 {
        match self {
            BandFormat::UChar => u8::MAX as f64,
            BandFormat::Char => i8::MAX as f64,
            BandFormat::UShort => u16::MAX as f64,
            BandFormat::Short => i16::MAX as f64,
            BandFormat::UInt => u32::MAX as f64,
            BandFormat::Int => i32::MAX as f64,
            BandFormat::Float | BandFormat::Complex => f32::MAX as f64,
            BandFormat::Double | BandFormat::DpComplex => f64::MAX,
        }
    }

    /// Smallest representable value.
    pub fn min_value(self) -> f64 {
        match self {
            BandFormat::UChar | BandFormat::UShort | BandFormat::UInt => 0.0,
            BandFormat::Char => i8::MIN as f64,
            BandFormat::Short => i16::MIN as f64,
            BandFormat::Int => i32::MIN as f64,
            BandFormat::Float | BandFormat::Complex => f32::MIN as f64,
            BandFormat::Double | BandFormat::DpComplex => f64::MIN,
        }
    }

    /// Short lowercase name, as used in messages and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            BandFormat::UChar => "uchar",
            BandFormat::Char => "char",
            BandFormat::UShort => "ushort",
            BandFormat::Short => "short",
            BandFormat::UInt => "uint",
            BandFormat::Int => "int",
            BandFormat::Float => "float",
            BandFormat::Complex => "complex",
            BandFormat::Double => "double",
            BandFormat::DpComplex => "dpcomplex",
        }
    }
}

impl std::fmt::Display for BandFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How the bands of an image should be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpretation {
    /// Generic many-band image.
    #[default]
    Multiband,
    /// Single-band greyscale.
    BW,
    /// 8-bit sRGB.
    Srgb,
    /// 16-bit greyscale.
    Grey16,
    /// 16-bit RGB.
    Rgb16,
    /// Linear light float RGB.
    ScRgb,
    /// A matrix of coefficients, e.g. a morphology mask.
    Matrix,
}

impl Interpretation {
    /// The value of a fully opaque alpha (and of "white") in this space.
    pub fn max_alpha(self) -> f64 {
        match self {
            Interpretation::Grey16 | Interpretation::Rgb16 => 65535.0,
            Interpretation::ScRgb => 1.0,
            _ => 255.0,
        }
    }
}

/// Pixel coding. Coded images must be unpacked before most operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coding {
    /// Plain band-interleaved pixels.
    #[default]
    None,
    /// Packed 32-bit Lab.
    LabQ,
    /// Radiance RGBE.
    Rad,
}

// ============================================================================
// Sample conversion
// ============================================================================

fn read<T: bytemuck::Pod>(bytes: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
}

fn write<T: bytemuck::Pod>(bytes: &mut [u8], value: T) {
    bytes[..std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
}

/// Read scalar component `index` of a pixel as f64.
///
/// `bytes` starts at the pixel; `index` counts scalar components, so for
/// complex formats band `b` has its real part at `2 * b`.
pub fn read_component(format: BandFormat, bytes: &[u8], index: usize) -> f64 {
    let at = &bytes[index * format.component_size()..];
    match format {
        BandFormat::UChar => at[0] as f64,
        BandFormat::Char => at[0] as i8 as f64,
        BandFormat::UShort => read::<u16>(at) as f64,
        BandFormat::Short => read::<i16>(at) as f64,
        BandFormat::UInt => read::<u32>(at) as f64,
        BandFormat::Int => read::<i32>(at) as f64,
        BandFormat::Float | BandFormat::Complex => read::<f32>(at) as f64,
        BandFormat::Double | BandFormat::DpComplex => read::<f64>(at),
    }
}

/// Write scalar component `index` of a pixel, rounding to nearest and
/// clamping to the range of integer formats.
pub fn write_component(format: BandFormat, bytes: &mut [u8], index: usize, value: f64) {
    let at = &mut bytes[index * format.component_size()..];
    let clamp = |v: f64| v.round().clamp(format.min_value(), format.max_value());
    match format {
        BandFormat::UChar => at[0] = clamp(value) as u8,
        BandFormat::Char => at[0] = clamp(value) as i8 as u8,
        BandFormat::UShort => write(at, clamp(value) as u16),
        BandFormat::Short => write(at, clamp(value) as i16),
        BandFormat::UInt => write(at, clamp(value) as u32),
        BandFormat::Int => write(at, clamp(value) as i32),
        BandFormat::Float | BandFormat::Complex => write(at, value as f32),
        BandFormat::Double | BandFormat::DpComplex => write(at, value),
    }
}

/// Convert a vector of per-band doubles into one pixel of `format`.
///
/// A single value is replicated to every band; otherwise the vector must
/// have exactly `bands` elements. Complex formats get a zero imaginary part.
pub fn vector_to_ink(
    op: &str,
    format: BandFormat,
    bands: usize,
    values: &[f64],
) -> PipelineResult<Vec<u8>> {
    if values.len() != 1 && values.len() != bands {
        return Err(PipelineError::BadVector {
            op: op.to_string(),
            bands,
        });
    }

    let mut ink = vec![0u8; bands * format.size_of()];
    for band in 0..bands {
        let value = if values.len() == 1 { values[0] } else { values[band] };
        write_component(format, &mut ink, band * format.components(), value);
    }

    Ok(ink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(BandFormat::UChar.size_of(), 1);
        assert_eq!(BandFormat::Short.size_of(), 2);
        assert_eq!(BandFormat::Complex.size_of(), 8);
        assert_eq!(BandFormat::Complex.component_size(), 4);
        assert_eq!(BandFormat::DpComplex.size_of(), 16);
    }

    #[test]
    fn test_max_alpha() {
        assert_eq!(Interpretation::Srgb.max_alpha(), 255.0);
        assert_eq!(Interpretation::Rgb16.max_alpha(), 65535.0);
        assert_eq!(Interpretation::ScRgb.max_alpha(), 1.0);
    }

    #[test]
    fn test_write_clamps_and_rounds() {
        let mut px = [0u8; 2];
        write_component(BandFormat::UChar, &mut px, 1, 300.4);
        assert_eq!(px, [0, 255]);

        let mut px = [0u8; 2];
        write_component(BandFormat::Short, &mut px, 0, -12.6);
        assert_eq!(read_component(BandFormat::Short, &px, 0), -13.0);
    }

    #[test]
    fn test_vector_to_ink() {
        let ink = vector_to_ink("embed", BandFormat::UChar, 3, &[7.0]).unwrap();
        assert_eq!(ink, vec![7, 7, 7]);

        let ink = vector_to_ink("embed", BandFormat::UShort, 2, &[1.0, 65535.0]).unwrap();
        assert_eq!(read_component(BandFormat::UShort, &ink, 1), 65535.0);

        let error = vector_to_ink("embed", BandFormat::UChar, 3, &[1.0, 2.0]).unwrap_err();
        assert_eq!(error.to_string(), "embed: vector must have 1 or 3 elements");
    }

    #[test]
    fn test_complex_ink_has_zero_imaginary() {
        let ink = vector_to_ink("embed", BandFormat::Complex, 1, &[2.5]).unwrap();
        assert_eq!(read_component(BandFormat::Complex, &ink, 0), 2.5);
        assert_eq!(read_component(BandFormat::Complex, &ink, 1), 0.0);
    }
}
