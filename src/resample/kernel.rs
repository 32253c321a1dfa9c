//! Resampling kernels and their precomputed coefficient tables.
//!
//! A [`Kernel`] turns a fractional source position into `n_point` weights.
//! [`KernelTable`] samples those weights at `TRANSFORM_SCALE + 1` evenly
//! spaced phases, once as doubles and once as fixed-point integers scaled
//! by `INTERPOLATE_SCALE`, so the per-pixel loops only index a row.

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::BandFormat;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// Number of subpixel phases between two source pixels.
pub const TRANSFORM_SCALE: usize = 64;

/// Fixed-point scale of integer coefficients.
pub const INTERPOLATE_SCALE: i64 = 4096;

const INTERPOLATE_SHIFT: u32 = 12;

/// Upper bound on taps per output pixel.
pub const MAX_POINT: usize = 200;

/// Resampling kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// Nearest neighbour.
    Nearest,
    /// Triangle filter.
    Linear,
    /// Catmull-Rom cubic.
    Cubic,
    /// Mitchell-Netravali cubic.
    Mitchell,
    /// Two-lobe Lanczos.
    Lanczos2,
    /// Three-lobe Lanczos.
    #[default]
    Lanczos3,
    /// Magic Kernel Sharp 2013.
    Mks2013,
    /// Magic Kernel Sharp 2021.
    Mks2021,
}

impl Kernel {
    /// All kernels, in declaration order.
    pub const ALL: [Kernel; 8] = [
        Kernel::Nearest,
        Kernel::Linear,
        Kernel::Cubic,
        Kernel::Mitchell,
        Kernel::Lanczos2,
        Kernel::Lanczos3,
        Kernel::Mks2013,
        Kernel::Mks2021,
    ];

    /// Number of taps needed to reduce by `shrink`. Always odd.
    pub fn n_point(self, shrink: f64) -> usize {
        let taps = |support: f64| 2 * (support * shrink).round_ties_even() as usize + 1;
        match self {
            Kernel::Nearest => 1,
            Kernel::Linear => taps(1.0),
            Kernel::Cubic | Kernel::Mitchell | Kernel::Lanczos2 => taps(2.0),
            Kernel::Lanczos3 | Kernel::Mks2013 => taps(3.0),
            Kernel::Mks2021 => taps(5.0),
        }
    }

    /// The continuous kernel at distance `x` from the centre, in output
    /// pixel units.
    pub fn weight(self, x: f64) -> f64 {
        match self {
            Kernel::Nearest => {
                if x.abs() < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Kernel::Linear => (1.0 - x.abs()).max(0.0),
            Kernel::Cubic => cubic_bc(0.0, 0.5, x),
            Kernel::Mitchell => cubic_bc(1.0 / 3.0, 1.0 / 3.0, x),
            Kernel::Lanczos2 => lanczos(2.0, x),
            Kernel::Lanczos3 => lanczos(3.0, x),
            Kernel::Mks2013 => mks2013(x),
            Kernel::Mks2021 => mks2021(x),
        }
    }

    /// Fill `mask` with normalised weights for a source position `x`
    /// pixels past the first tap's centre.
    ///
    /// `mask.len()` is the tap count. Weights always sum to one.
    pub fn make_mask(self, mask: &mut [f64], shrink: f64, x: f64) {
        let n = mask.len();
        if self == Kernel::Nearest {
            mask.fill(0.0);
            mask[n / 2] = 1.0;
            return;
        }

        let half = x + n as f64 / 2.0 - 1.0;
        for (i, c) in mask.iter_mut().enumerate() {
            *c = self.weight((i as f64 - half) / shrink);
        }

        let sum: f64 = mask.iter().sum();
        if sum != 0.0 {
            for c in mask.iter_mut() {
                *c /= sum;
            }
        }
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Kernel::Nearest => "nearest",
            Kernel::Linear => "linear",
            Kernel::Cubic => "cubic",
            Kernel::Mitchell => "mitchell",
            Kernel::Lanczos2 => "lanczos2",
            Kernel::Lanczos3 => "lanczos3",
            Kernel::Mks2013 => "mks2013",
            Kernel::Mks2021 => "mks2021",
        }
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kernel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Kernel::ALL
            .into_iter()
            .find(|kernel| kernel.name() == lower)
            .ok_or_else(|| PipelineError::bad_parameter("reduce", format!("unknown kernel '{}'", s)))
    }
}

/// Keys' two-parameter cubic family.
fn cubic_bc(b: f64, c: f64, x: f64) -> f64 {
    let p = x.abs();
    let p2 = p * p;
    let p3 = p2 * p;

    if p <= 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * p3 + (-18.0 + 12.0 * b + 6.0 * c) * p2 + (6.0 - 2.0 * b)) / 6.0
    } else if p <= 2.0 {
        ((-b - 6.0 * c) * p3 + (6.0 * b + 30.0 * c) * p2 + (-12.0 * b - 48.0 * c) * p + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}

fn lanczos(a: f64, x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    if x.abs() >= a {
        return 0.0;
    }
    let px = PI * x;
    a * px.sin() * (px / a).sin() / (px * px)
}

fn mks2013(x: f64) -> f64 {
    let x = x.abs();
    if x >= 2.5 {
        0.0
    } else if x >= 1.5 {
        (x - 5.0 / 2.0) * (x - 5.0 / 2.0) / 8.0
    } else if x >= 0.5 {
        (4.0 * x * x - 11.0 * x + 7.0) / 4.0
    } else {
        17.0 / 16.0 - 7.0 * x * x / 4.0
    }
}

fn mks2021(x: f64) -> f64 {
    let x = x.abs();
    if x >= 4.5 {
        0.0
    } else if x >= 3.5 {
        (4.0 * x * x - 36.0 * x + 81.0) / 1152.0
    } else if x >= 2.5 {
        (4.0 * x * x - 27.0 * x + 45.0) / -144.0
    } else if x >= 1.5 {
        (24.0 * x * x - 113.0 * x + 130.0) / 144.0
    } else if x >= 0.5 {
        (140.0 * x * x - 379.0 * x + 239.0) / -144.0
    } else {
        577.0 / 576.0 - 239.0 * x * x / 144.0
    }
}

// ============================================================================
// Coefficient tables
// ============================================================================

/// Per-phase coefficients for one kernel at one shrink factor.
///
/// Built once when an operation is constructed and shared read-only by
/// every lane.
#[derive(Debug, Clone)]
pub struct KernelTable {
    kernel: Kernel,
    shrink: f64,
    n_point: usize,
    float: Vec<f64>,
    fixed: Vec<i32>,
}

impl KernelTable {
    /// Sample `kernel` for a reduction by `shrink`.
    ///
    /// Fails when the kernel would need more than [`MAX_POINT`] taps.
    pub fn new(op: &str, kernel: Kernel, shrink: f64) -> PipelineResult<Self> {
        let n_point = kernel.n_point(shrink);
        if n_point > MAX_POINT {
            return Err(PipelineError::ReduceFactorTooLarge {
                op: op.to_string(),
                n_point,
            });
        }

        let mut float = vec![0.0; (TRANSFORM_SCALE + 1) * n_point];
        let mut fixed = vec![0; (TRANSFORM_SCALE + 1) * n_point];
        for phase in 0..=TRANSFORM_SCALE {
            let row = phase * n_point..(phase + 1) * n_point;
            let mask = &mut float[row.clone()];
            kernel.make_mask(mask, shrink, phase as f64 / TRANSFORM_SCALE as f64);
            to_fixed(mask, &mut fixed[row]);
        }

        Ok(Self {
            kernel,
            shrink,
            n_point,
            float,
            fixed,
        })
    }

    /// Kernel family.
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Taps per output pixel.
    pub fn n_point(&self) -> usize {
        self.n_point
    }

    /// Double-precision weights for `phase` in `0..=TRANSFORM_SCALE`.
    pub fn float_row(&self, phase: usize) -> &[f64] {
        &self.float[phase * self.n_point..(phase + 1) * self.n_point]
    }

    /// Fixed-point weights for `phase`; each row sums to `INTERPOLATE_SCALE`.
    pub fn fixed_row(&self, phase: usize) -> &[i32] {
        &self.fixed[phase * self.n_point..(phase + 1) * self.n_point]
    }

    /// Exact weights for fractional offset `x`, skipping phase quantisation.
    pub fn exact(&self, mask: &mut [f64], x: f64) {
        self.kernel.make_mask(&mut mask[..self.n_point], self.shrink, x);
    }
}

/// Round weights to fixed point, then push the rounding error onto the
/// largest tap so the row sums to exactly `INTERPOLATE_SCALE`.
fn to_fixed(mask: &[f64], fixed: &mut [i32]) {
    for (f, &c) in fixed.iter_mut().zip(mask) {
        *f = (c * INTERPOLATE_SCALE as f64).round() as i32;
    }

    let error = INTERPOLATE_SCALE - fixed.iter().map(|&f| f as i64).sum::<i64>();
    if error != 0 {
        let centre = (0..fixed.len()).max_by_key(|&i| fixed[i].abs()).unwrap_or(0);
        fixed[centre] += error as i32;
    }
}

/// Integer tap start and table phase for source position `x`.
///
/// The fraction is taken at twice the table resolution and rounded back
/// down, so the phase is the nearest row and may be `TRANSFORM_SCALE`.
pub fn phase(x: f64) -> (i32, usize) {
    let ix = x as i32;
    let sx = (x * (TRANSFORM_SCALE * 2) as f64) as i32;
    let six = sx & (TRANSFORM_SCALE as i32 * 2 - 1);
    (ix, ((six + 1) >> 1) as usize)
}

// ============================================================================
// Weighted sums
// ============================================================================

/// Weights for one output pixel.
pub(crate) enum Taps<'a> {
    Fixed(&'a [i32]),
    Float(&'a [f64]),
}

fn sample<T: bytemuck::Pod>(p: &[u8], at: usize) -> T {
    bytemuck::pod_read_unaligned(&p[at..at + std::mem::size_of::<T>()])
}

fn store<T: bytemuck::Pod>(q: &mut [u8], z: usize, value: T) {
    let size = std::mem::size_of::<T>();
    q[z * size..(z + 1) * size].copy_from_slice(bytemuck::bytes_of(&value));
}

fn sum_fixed<T: bytemuck::Pod + Into<i64>>(p: &[u8], step: usize, z: usize, weights: &[i32]) -> i64 {
    let offset = z * std::mem::size_of::<T>();
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| w as i64 * sample::<T>(p, i * step + offset).into())
        .sum()
}

fn sum_float<T: bytemuck::Pod + Into<f64>>(p: &[u8], step: usize, z: usize, weights: &[f64]) -> f64 {
    let offset = z * std::mem::size_of::<T>();
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| w * sample::<T>(p, i * step + offset).into())
        .sum()
}

fn unsigned_fixed_round(sum: i64) -> i64 {
    (sum + (INTERPOLATE_SCALE >> 1)) >> INTERPOLATE_SHIFT
}

fn signed_fixed_round(sum: i64) -> i64 {
    if sum < 0 {
        -((-sum + (INTERPOLATE_SCALE >> 1)) >> INTERPOLATE_SHIFT)
    } else {
        unsigned_fixed_round(sum)
    }
}

macro_rules! fixed_pel {
    ($t:ty, $round:ident, $q:expr, $p:expr, $step:expr, $components:expr, $weights:expr) => {
        for z in 0..$components {
            let sum = $round(sum_fixed::<$t>($p, $step, z, $weights));
            store::<$t>($q, z, sum.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t);
        }
    };
}

/// Write one output pixel to `q` as the weighted sum of the taps in `p`.
///
/// Tap `i` of component `z` lives at `i * step` bytes into `p` plus the
/// component's offset. Integer formats need fixed-point weights, float
/// formats double ones.
pub(crate) fn reduce_pel(format: BandFormat, q: &mut [u8], p: &[u8], step: usize, components: usize, taps: &Taps<'_>) {
    match (format, taps) {
        (BandFormat::UChar, Taps::Fixed(w)) => fixed_pel!(u8, unsigned_fixed_round, q, p, step, components, w),
        (BandFormat::Char, Taps::Fixed(w)) => fixed_pel!(i8, signed_fixed_round, q, p, step, components, w),
        (BandFormat::UShort, Taps::Fixed(w)) => fixed_pel!(u16, unsigned_fixed_round, q, p, step, components, w),
        (BandFormat::Short, Taps::Fixed(w)) => fixed_pel!(i16, signed_fixed_round, q, p, step, components, w),
        (BandFormat::UInt, Taps::Fixed(w)) => fixed_pel!(u32, unsigned_fixed_round, q, p, step, components, w),
        (BandFormat::Int, Taps::Fixed(w)) => fixed_pel!(i32, signed_fixed_round, q, p, step, components, w),
        (BandFormat::Float | BandFormat::Complex, Taps::Float(w)) => {
            for z in 0..components {
                store::<f32>(q, z, sum_float::<f32>(p, step, z, w) as f32);
            }
        }
        (BandFormat::Double | BandFormat::DpComplex, Taps::Float(w)) => {
            for z in 0..components {
                store::<f64>(q, z, sum_float::<f64>(p, step, z, w));
            }
        }
        _ => debug_assert!(false, "weights do not match {}", format),
    }
}

/// How an output pixel of `format` picks its weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TapSource {
    /// Fixed-point table row.
    Fixed,
    /// Double table row.
    Float,
    /// Fresh weights from the exact fractional offset.
    Exact,
}

impl TapSource {
    pub(crate) fn for_format(format: BandFormat) -> Self {
        if format.is_int() {
            TapSource::Fixed
        } else if matches!(format, BandFormat::Double | BandFormat::DpComplex) {
            TapSource::Exact
        } else {
            TapSource::Float
        }
    }
}
