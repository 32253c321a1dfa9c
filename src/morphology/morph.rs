//! Erode and dilate with a structuring element.
//!
//! Output pixel `(x, y)` looks at the mask-sized window of the input whose
//! top-left is `(x, y)`, so the output is smaller than the input by the
//! mask size less one in each direction. Pixel bytes are treated as bit
//! sets: dilate ORs the selected window bytes, erode ANDs them, and mask
//! elements of 0 select the complemented byte.
//!
//! Two strategies compute the same result. The scalar one walks every mask
//! element for every output byte. The vector one runs a [`Program`] of
//! whole-row passes. Which one an image uses is fixed when it is built.

use crate::conversion::cast::cast;
use crate::conversion::embed::{embed, EmbedOptions, Extend};
use crate::core::config;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::BandFormat;
use crate::core::image::{DemandStyle, Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use crate::morphology::mask::{MorphMask, CLEAR};
use crate::morphology::program::{Program, Scratch};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Morphological operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MorphOp {
    /// True where every selected element matches.
    #[default]
    Erode,
    /// True where any selected element matches.
    Dilate,
}

impl MorphOp {
    /// Accumulator start value.
    pub fn seed(self) -> u8 {
        match self {
            MorphOp::Erode => 0xff,
            MorphOp::Dilate => 0,
        }
    }
}

impl FromStr for MorphOp {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "erode" => Ok(MorphOp::Erode),
            "dilate" => Ok(MorphOp::Dilate),
            other => Err(PipelineError::bad_parameter(
                "morph",
                format!("unknown operation '{}'", other),
            )),
        }
    }
}

/// Optional arguments of [`morph`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphOptions {
    /// Extend the input with copied edges first, so the output keeps the
    /// input's size.
    pub pad: bool,
    /// Force the vector path on or off. `None` follows the engine config.
    pub vector: Option<bool>,
}

impl MorphOptions {
    /// Unpadded, vector path per config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the input size.
    pub fn with_pad(mut self, pad: bool) -> Self {
        self.pad = pad;
        self
    }

    /// Force the vector path on or off.
    pub fn with_vector(mut self, vector: bool) -> Self {
        self.vector = Some(vector);
        self
    }
}

type GenerateFn = fn(&Morph, &mut Region, &mut MorphSeq) -> PipelineResult<()>;

struct Morph {
    input: Image,
    mask: MorphMask,
    op: MorphOp,
    program: Option<Program>,
    strategy: GenerateFn,
}

struct MorphSeq {
    ir: Region,
    /// Byte offset of each active mask element from the window origin.
    offsets: Vec<usize>,
    coeffs: Vec<u8>,
    /// Line stride `offsets` was computed for.
    last_stride: Option<usize>,
    scratch: Scratch,
}

impl Morph {
    /// Input area read for output area `r`.
    fn need(&self, r: Rect) -> Rect {
        Rect::new(
            r.left,
            r.top,
            r.width + self.mask.width() - 1,
            r.height + self.mask.height() - 1,
        )
    }
}

fn scalar_gen(morph: &Morph, out: &mut Region, seq: &mut MorphSeq) -> PipelineResult<()> {
    let r = out.valid();
    seq.ir.prepare(morph.need(r))?;

    let bands = morph.input.bands();
    let stride = seq.ir.stride();
    if seq.last_stride != Some(stride) {
        seq.last_stride = Some(stride);
        seq.offsets.clear();
        seq.coeffs.clear();
        for (x, y, c) in morph.mask.active() {
            seq.offsets.push(y as usize * stride + x as usize * bands);
            seq.coeffs.push(c);
        }
    }

    let seed = morph.op.seed();
    for y in r.top..r.bottom() {
        let p = &seq.ir.pixels()[seq.ir.offset(r.left, y)..];
        let q = out.row_mut(r.left, y, r.width as usize);

        for (x, q) in q.iter_mut().enumerate() {
            let taps = seq.offsets.iter().zip(&seq.coeffs).map(|(&off, &c)| {
                let v = p[x + off];
                if c == CLEAR {
                    !v
                } else {
                    v
                }
            });
            *q = match morph.op {
                MorphOp::Dilate => taps.fold(seed, |acc, v| acc | v),
                MorphOp::Erode => taps.fold(seed, |acc, v| acc & v),
            };
        }
    }
    Ok(())
}

fn vector_gen(morph: &Morph, out: &mut Region, seq: &mut MorphSeq) -> PipelineResult<()> {
    let Some(program) = &morph.program else {
        return scalar_gen(morph, out, seq);
    };

    let r = out.valid();
    let need = morph.need(r);
    seq.ir.prepare(need)?;

    let ir = &seq.ir;
    for y in r.top..r.bottom() {
        let q = out.row_mut(r.left, y, r.width as usize);
        program.run(
            |line| ir.row(need.left, y + line as i32, need.width as usize),
            q,
            &mut seq.scratch,
        );
    }
    Ok(())
}

impl Generate for Morph {
    type Seq = MorphSeq;

    fn name(&self) -> &'static str {
        "morph"
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<MorphSeq> {
        Ok(MorphSeq {
            ir: Region::with_stop(&self.input, stop.clone()),
            offsets: Vec::with_capacity(self.mask.n_point()),
            coeffs: Vec::with_capacity(self.mask.n_point()),
            last_stride: None,
            scratch: Scratch::default(),
        })
    }

    fn generate(&self, out: &mut Region, seq: &mut MorphSeq, _stop: &StopFlag) -> PipelineResult<()> {
        (self.strategy)(self, out, seq)
    }
}

/// Erode or dilate `input` with `mask`.
///
/// Other formats are cast to uchar first. Without padding the output is smaller than
/// the input by the mask size less one, and its origin hint records the
/// shift of half a mask.
pub fn morph(input: &Image, mask: &MorphMask, op: MorphOp, options: &MorphOptions) -> PipelineResult<Image> {
    let input = cast(input, BandFormat::UChar)?;

    let (mw, mh) = (mask.width(), mask.height());
    let source = if options.pad {
        embed(
            &input,
            mw / 2,
            mh / 2,
            input.width() + mw - 1,
            input.height() + mh - 1,
            &EmbedOptions::new().with_extend(Extend::Copy),
        )?
    } else {
        input
    };

    if source.width() < mw || source.height() < mh {
        return Err(PipelineError::BadDimensions { op: "morph".to_string() });
    }

    let vector = options.vector.unwrap_or_else(config::vector_enabled);
    let (program, strategy): (Option<Program>, GenerateFn) = if vector {
        match Program::compile(mask, op, source.bands()) {
            Ok(program) => {
                log::info!("morph: using vector path, {} passes", program.passes().len());
                (Some(program), vector_gen)
            }
            Err(e) => {
                log::warn!("morph: {}, using scalar path", e);
                (None, scalar_gen)
            }
        }
    } else {
        (None, scalar_gen)
    };

    let desc = source
        .desc()
        .with_size(source.width() - (mw - 1), source.height() - (mh - 1))
        .with_offset(-mw / 2, -mh / 2);

    Image::pipeline(desc)
        .demand(DemandStyle::SmallTile)
        .input(&source)
        .generate(Morph {
            input: source,
            mask: mask.clone(),
            op,
            program,
            strategy,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageDesc;
    use crate::execution::write_to_memory;
    use proptest::prelude::*;

    fn binary(width: i32, height: i32, bands: usize, bits: &[bool]) -> Image {
        let desc = ImageDesc::new(width, height, bands, BandFormat::UChar);
        let data = bits.iter().map(|&b| if b { 255 } else { 0 }).collect();
        Image::from_memory(desc, data).unwrap()
    }

    fn invert(image: &Image) -> Image {
        let data = image.memory().unwrap().data().iter().map(|v| !v).collect();
        Image::from_memory(*image.desc(), data).unwrap()
    }

    fn pixels(image: &Image) -> Vec<u8> {
        write_to_memory(image).unwrap().memory().unwrap().data().to_vec()
    }

    fn dot() -> Image {
        let mut bits = vec![false; 49];
        bits[3 * 7 + 3] = true;
        binary(7, 7, 1, &bits)
    }

    #[test]
    fn test_output_size() {
        let image = binary(10, 8, 1, &[false; 80]);
        for (mw, mh) in [(1, 1), (3, 3), (2, 4), (5, 1)] {
            let mask = MorphMask::square(mw, mh).unwrap();
            let out = morph(&image, &mask, MorphOp::Erode, &MorphOptions::new()).unwrap();
            assert_eq!((out.width(), out.height()), (10 - (mw - 1), 8 - (mh - 1)));
            assert_eq!((out.desc().xoffset, out.desc().yoffset), (-mw / 2, -mh / 2));
        }
    }

    #[test]
    fn test_unit_mask_is_identity() {
        let image = dot();
        let mask = MorphMask::square(1, 1).unwrap();
        for op in [MorphOp::Erode, MorphOp::Dilate] {
            let out = morph(&image, &mask, op, &MorphOptions::new()).unwrap();
            assert_eq!(pixels(&out), image.memory().unwrap().data());
        }
    }

    #[test]
    fn test_dilate_grows_dot() {
        let mask = MorphMask::square(3, 3).unwrap();
        let options = MorphOptions::new().with_pad(true);
        let out = write_to_memory(&morph(&dot(), &mask, MorphOp::Dilate, &options).unwrap()).unwrap();
        assert_eq!((out.width(), out.height()), (7, 7));
        for y in 0..7 {
            for x in 0..7 {
                let inside = (2..=4).contains(&x) && (2..=4).contains(&y);
                assert_eq!(out.pel(x, y).unwrap()[0] == 255, inside, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_erode_removes_dot() {
        let mask = MorphMask::square(3, 3).unwrap();
        let out = morph(&dot(), &mask, MorphOp::Erode, &MorphOptions::new().with_pad(true)).unwrap();
        assert!(pixels(&out).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_hit_or_miss_finds_isolated_pixel() {
        let mask = MorphMask::from_rows(&[&[0, 0, 0], &[0, 255, 0], &[0, 0, 0]]).unwrap();
        let out = write_to_memory(&morph(&dot(), &mask, MorphOp::Erode, &MorphOptions::new()).unwrap()).unwrap();
        assert_eq!(out.pel(2, 2).unwrap(), &[255]);
        assert_eq!(pixels(&out).iter().filter(|&&v| v == 255).count(), 1);
    }

    #[test]
    fn test_ushort_input_is_cast_to_uchar() {
        let bits: Vec<bool> = (0..36).map(|i| i % 5 != 0).collect();
        let samples: Vec<u16> = bits.iter().map(|&b| if b { 65535 } else { 0 }).collect();
        let wide = Image::from_memory(
            ImageDesc::new(6, 6, 1, BandFormat::UShort),
            bytemuck::cast_slice(&samples).to_vec(),
        )
        .unwrap();

        let mask = MorphMask::square(3, 3).unwrap();
        for op in [MorphOp::Erode, MorphOp::Dilate] {
            let out = morph(&wide, &mask, op, &MorphOptions::new()).unwrap();
            assert_eq!(out.format(), BandFormat::UChar);
            let expected = morph(&binary(6, 6, 1, &bits), &mask, op, &MorphOptions::new()).unwrap();
            assert_eq!(pixels(&out), pixels(&expected));
        }
    }

    #[test]
    fn test_rejects_mask_larger_than_image() {
        let image = binary(2, 2, 1, &[true; 4]);
        let err = morph(&image, &MorphMask::square(3, 1).unwrap(), MorphOp::Dilate, &MorphOptions::new());
        assert!(matches!(err, Err(PipelineError::BadDimensions { .. })));
    }

    #[test]
    fn test_parse_op() {
        assert_eq!("DILATE".parse::<MorphOp>().unwrap(), MorphOp::Dilate);
        assert!("open".parse::<MorphOp>().is_err());
    }

    fn case() -> impl Strategy<Value = (i32, i32, usize, Vec<bool>, MorphMask)> {
        (5i32..16, 5i32..16, 1usize..4, 1i32..6, 1i32..6).prop_flat_map(|(w, h, bands, mw, mh)| {
            let bits = prop::collection::vec(any::<bool>(), (w * h) as usize * bands);
            let coeffs = prop::collection::vec(prop::sample::select(vec![0.0, 128.0, 255.0]), (mw * mh) as usize);
            (Just(w), Just(h), Just(bands), bits, coeffs)
                .prop_map(move |(w, h, bands, bits, coeffs)| (w, h, bands, bits, MorphMask::new(mw, mh, &coeffs).unwrap()))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn test_erode_dilate_duality((w, h, bands, bits, mask) in case()) {
            let image = binary(w, h, bands, &bits);
            let options = MorphOptions::new();
            let eroded = pixels(&morph(&image, &mask, MorphOp::Erode, &options).unwrap());

            let dual = morph(&invert(&image), &mask, MorphOp::Dilate, &options).unwrap();
            let dual: Vec<u8> = pixels(&dual).iter().map(|v| !v).collect();
            prop_assert_eq!(&eroded, &dual);

            let complemented = morph(&image, &mask.complement(), MorphOp::Dilate, &options).unwrap();
            let complemented: Vec<u8> = pixels(&complemented).iter().map(|v| !v).collect();
            prop_assert_eq!(&eroded, &complemented);
        }

        #[test]
        fn test_vector_matches_scalar((w, h, bands, bits, mask) in case()) {
            let image = binary(w, h, bands, &bits);
            for op in [MorphOp::Erode, MorphOp::Dilate] {
                let vector = morph(&image, &mask, op, &MorphOptions::new().with_vector(true)).unwrap();
                let scalar = morph(&image, &mask, op, &MorphOptions::new().with_vector(false)).unwrap();
                prop_assert_eq!(pixels(&vector), pixels(&scalar));
            }
        }
    }

    #[test]
    fn test_uncompilable_mask_falls_back() {
        let bits: Vec<bool> = (0..400).map(|i| i % 3 != 0).collect();
        let image = binary(20, 20, 1, &bits);
        let mask = MorphMask::square(9, 9).unwrap();
        let vector = morph(&image, &mask, MorphOp::Dilate, &MorphOptions::new().with_vector(true)).unwrap();
        let scalar = morph(&image, &mask, MorphOp::Dilate, &MorphOptions::new().with_vector(false)).unwrap();
        assert_eq!(pixels(&vector), pixels(&scalar));
    }
}
