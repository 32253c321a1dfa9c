//! Compiled morphology passes.
//!
//! A mask is split into passes, each a straight-line list of whole-row
//! loads combined into an accumulator row. Every load reads one source
//! scanline at a fixed byte offset, optionally complemented, so a pass
//! runs as a handful of slice operations the compiler can vectorise.
//!
//! A pass may reference at most a few distinct scanlines and column
//! offsets. Masks that need more are split across passes, with each pass
//! seeded from the previous one's result. Past [`MAX_PASS`] passes the
//! mask does not compile and the caller uses the scalar path.

use crate::morphology::mask::{MorphMask, CLEAR, DONT_CARE};
use crate::morphology::morph::MorphOp;
use thiserror::Error;

/// Most passes a compiled mask may use.
pub const MAX_PASS: usize = 10;

/// Constants available to one pass, including the two seeds.
const MAX_CONST: usize = 7;

/// Source scanlines available to one pass, including the previous result.
const MAX_SOURCE: usize = 7;

/// Why a mask could not be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("mask needs more than {max} passes")]
    TooManyPasses { max: usize },
}

/// One row read of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Load {
    /// Index into the pass's scanlines.
    source: usize,
    /// Byte offset along the scanline.
    offset: usize,
    /// Complement before combining.
    invert: bool,
}

/// A contiguous run of mask elements evaluated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    /// Index of the first mask element covered.
    pub first: usize,
    /// Index of the last mask element covered, inclusive.
    pub last: usize,
    /// Constants used: the two seeds plus one per distinct column offset.
    pub n_const: usize,
    /// Mask row of each source scanline.
    pub lines: Vec<usize>,
    loads: Vec<Load>,
}

impl Pass {
    /// Number of source scanlines read.
    pub fn n_scanline(&self) -> usize {
        self.lines.len()
    }
}

/// Per-lane row buffers for chaining passes.
#[derive(Debug, Default)]
pub struct Scratch {
    t1: Vec<u8>,
    t2: Vec<u8>,
}

/// A mask compiled to passes for one operation and band count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    op: MorphOp,
    passes: Vec<Pass>,
}

impl Program {
    /// Split `mask` into passes over images with `bands` bytes per pixel.
    pub fn compile(mask: &MorphMask, op: MorphOp, bands: usize) -> Result<Self, CompileError> {
        let coeffs = mask.coeffs();
        let mut passes = Vec::new();
        let mut i = 0;

        loop {
            while i < coeffs.len() && coeffs[i] == DONT_CARE {
                i += 1;
            }
            if i == coeffs.len() {
                break;
            }
            if passes.len() == MAX_PASS {
                return Err(CompileError::TooManyPasses { max: MAX_PASS });
            }

            let pass = compile_section(mask, i, bands);
            i = pass.last + 1;
            passes.push(pass);

            if i >= coeffs.len() {
                break;
            }
        }

        Ok(Self { op, passes })
    }

    /// The compiled passes.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Compute one output row.
    ///
    /// `scanline(j)` returns input row `j` of the mask window, starting at
    /// the output row's left edge and at least `out.len()` plus the widest
    /// column offset bytes long.
    pub fn run<'a, F>(&self, scanline: F, out: &mut [u8], scratch: &mut Scratch)
    where
        F: Fn(usize) -> &'a [u8],
    {
        let n = out.len();
        let seed = self.op.seed();
        if self.passes.is_empty() {
            out.fill(seed);
            return;
        }

        scratch.t1.resize(n, 0);
        scratch.t2.resize(n, 0);
        let last = self.passes.len() - 1;

        for (i, pass) in self.passes.iter().enumerate() {
            let prev = &scratch.t1[..n];
            let dst: &mut [u8] = if i == last { &mut *out } else { &mut scratch.t2[..n] };

            if i == 0 {
                dst.fill(seed);
            } else {
                dst.copy_from_slice(prev);
            }

            for load in &pass.loads {
                let src = &scanline(pass.lines[load.source])[load.offset..load.offset + n];
                let flip = if load.invert { 0xff } else { 0 };
                match self.op {
                    MorphOp::Dilate => dst.iter_mut().zip(src).for_each(|(d, &s)| *d |= s ^ flip),
                    MorphOp::Erode => dst.iter_mut().zip(src).for_each(|(d, &s)| *d &= s ^ flip),
                }
            }

            std::mem::swap(&mut scratch.t1, &mut scratch.t2);
        }
    }
}

/// Build one pass starting at element `first`, stopping once the pass
/// runs out of constants or sources.
fn compile_section(mask: &MorphMask, first: usize, bands: usize) -> Pass {
    let coeffs = mask.coeffs();
    let width = mask.width() as usize;
    let mut pass = Pass {
        first,
        last: first,
        n_const: 2,
        lines: Vec::new(),
        loads: Vec::new(),
    };
    let mut offsets: Vec<usize> = Vec::new();

    let mut i = first;
    while i < coeffs.len() {
        let (x, y) = (i % width, i / width);
        if coeffs[i] == DONT_CARE {
            i += 1;
            continue;
        }

        let source = match pass.lines.iter().position(|&line| line == y) {
            Some(source) => source,
            None => {
                pass.lines.push(y);
                pass.lines.len() - 1
            }
        };

        if x > 0 && !offsets.contains(&x) {
            offsets.push(x);
            pass.n_const += 1;
        }

        pass.loads.push(Load {
            source,
            offset: x * bands,
            invert: coeffs[i] == CLEAR,
        });

        if pass.n_const >= MAX_CONST || pass.lines.len() + 1 >= MAX_SOURCE {
            break;
        }
        i += 1;
    }

    // Running off the end covers every remaining element.
    pass.last = i.min(coeffs.len() - 1);
    pass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_mask_is_one_pass() {
        let mask = MorphMask::square(5, 5).unwrap();
        let program = Program::compile(&mask, MorphOp::Erode, 1).unwrap();
        assert_eq!(program.passes().len(), 1);
        let pass = &program.passes()[0];
        assert_eq!((pass.first, pass.last), (0, 24));
        assert_eq!(pass.n_const, 6);
        assert_eq!(pass.n_scanline(), 5);
    }

    #[test]
    fn test_wide_mask_splits_on_constants() {
        let mask = MorphMask::square(7, 1).unwrap();
        let program = Program::compile(&mask, MorphOp::Dilate, 1).unwrap();
        let passes = program.passes();
        assert_eq!(passes.len(), 2);
        assert_eq!((passes[0].first, passes[0].last), (0, 5));
        assert_eq!(passes[0].n_const, MAX_CONST);
        assert_eq!(passes[1].first, 6);
    }

    #[test]
    fn test_tall_mask_splits_on_scanlines() {
        let mask = MorphMask::square(1, 8).unwrap();
        let program = Program::compile(&mask, MorphOp::Dilate, 3).unwrap();
        let passes = program.passes();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].lines, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(passes[1].lines, vec![6, 7]);
    }

    #[test]
    fn test_passes_cover_mask_exactly() {
        let mask = MorphMask::from_rows(&[&[255, 0, 255, 0, 255, 0, 255, 128, 128]]).unwrap();
        let passes = Program::compile(&mask, MorphOp::Erode, 1).unwrap().passes().to_vec();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[1].first, passes[0].last + 1);
        assert_eq!(passes[1].last, mask.n_point() - 1);
    }

    #[test]
    fn test_leading_dont_care_is_skipped() {
        let mask = MorphMask::from_rows(&[&[128, 128, 255]]).unwrap();
        let program = Program::compile(&mask, MorphOp::Erode, 1).unwrap();
        assert_eq!(program.passes()[0].first, 2);
    }

    #[test]
    fn test_huge_mask_does_not_compile() {
        let mask = MorphMask::square(9, 9).unwrap();
        let err = Program::compile(&mask, MorphOp::Erode, 1).unwrap_err();
        assert_eq!(err, CompileError::TooManyPasses { max: MAX_PASS });
    }

    #[test]
    fn test_run_chains_passes() {
        let mask = MorphMask::from_rows(&[&[255, 255, 255, 255, 255, 255, 0]]).unwrap();
        let program = Program::compile(&mask, MorphOp::Erode, 1).unwrap();
        assert_eq!(program.passes().len(), 2);

        let row = [255u8, 255, 255, 255, 255, 255, 0, 0];
        let mut out = [0u8; 2];
        program.run(|_| &row[..], &mut out, &mut Scratch::default());
        assert_eq!(out, [255, 0]);
    }

    #[test]
    fn test_all_dont_care_gives_seed() {
        let mask = MorphMask::from_rows(&[&[128]]).unwrap();
        let mut out = [7u8; 3];
        let program = Program::compile(&mask, MorphOp::Erode, 1).unwrap();
        program.run(|_| &[][..], &mut out, &mut Scratch::default());
        assert_eq!(out, [255; 3]);
    }
}
