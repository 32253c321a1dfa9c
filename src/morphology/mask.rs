//! Structuring elements.
//!
//! A mask element is 255 where the source must be set, 0 where it must be
//! clear, and 128 where it does not matter.

use crate::core::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mask value: source must be set.
pub const SET: u8 = 255;
/// Mask value: source must be clear.
pub const CLEAR: u8 = 0;
/// Mask value: ignored.
pub const DONT_CARE: u8 = 128;

/// A validated morphology mask, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMask", into = "RawMask")]
pub struct MorphMask {
    width: i32,
    height: i32,
    coeffs: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct RawMask {
    width: i32,
    height: i32,
    coeffs: Vec<f64>,
}

impl TryFrom<RawMask> for MorphMask {
    type Error = PipelineError;

    fn try_from(raw: RawMask) -> Result<Self, Self::Error> {
        MorphMask::new(raw.width, raw.height, &raw.coeffs)
    }
}

impl From<MorphMask> for RawMask {
    fn from(mask: MorphMask) -> Self {
        RawMask {
            width: mask.width,
            height: mask.height,
            coeffs: mask.coeffs.iter().map(|&c| c as f64).collect(),
        }
    }
}

/// Elements in a `width` x `height` mask. Both sides must be positive and
/// the product must fit an `i32`.
fn element_count(width: i32, height: i32) -> PipelineResult<usize> {
    match width.checked_mul(height) {
        Some(n) if width > 0 && height > 0 => Ok(n as usize),
        _ => Err(PipelineError::BadDimensions { op: "morph".to_string() }),
    }
}

impl MorphMask {
    /// A `width` x `height` mask from row-major values.
    ///
    /// Every value must be exactly 0, 128 or 255.
    pub fn new(width: i32, height: i32, values: &[f64]) -> PipelineResult<Self> {
        if values.len() != element_count(width, height)? {
            return Err(PipelineError::BadDimensions { op: "morph".to_string() });
        }

        let coeffs = values
            .iter()
            .map(|&value| match value {
                v if v == 0.0 => Ok(CLEAR),
                v if v == 128.0 => Ok(DONT_CARE),
                v if v == 255.0 => Ok(SET),
                value => Err(PipelineError::BadMaskElement {
                    op: "morph".to_string(),
                    value,
                }),
            })
            .collect::<PipelineResult<Vec<u8>>>()?;

        Ok(Self { width, height, coeffs })
    }

    /// A mask from rows of bytes, which must all have the same length.
    pub fn from_rows(rows: &[&[u8]]) -> PipelineResult<Self> {
        let width = rows.first().map_or(0, |row| row.len());
        if rows.iter().any(|row| row.len() != width) {
            return Err(PipelineError::BadDimensions { op: "morph".to_string() });
        }
        let (width, height) = match (i32::try_from(width), i32::try_from(rows.len())) {
            (Ok(width), Ok(height)) => (width, height),
            _ => return Err(PipelineError::BadDimensions { op: "morph".to_string() }),
        };
        let values: Vec<f64> = rows.iter().flat_map(|row| row.iter().map(|&c| c as f64)).collect();
        Self::new(width, height, &values)
    }

    /// A `width` x `height` mask of all-set elements.
    pub fn square(width: i32, height: i32) -> PipelineResult<Self> {
        Self::new(width, height, &vec![SET as f64; element_count(width, height)?])
    }

    /// Width in elements.
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Height in elements.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Number of elements.
    pub fn n_point(&self) -> usize {
        self.coeffs.len()
    }

    /// All elements, row-major.
    pub fn coeffs(&self) -> &[u8] {
        &self.coeffs
    }

    /// Element at column `x`, row `y`.
    pub fn get(&self, x: i32, y: i32) -> u8 {
        self.coeffs[(y * self.width + x) as usize]
    }

    /// `(x, y, value)` of every element other than don't-care.
    pub fn active(&self) -> impl Iterator<Item = (i32, i32, u8)> + '_ {
        let width = self.width;
        self.coeffs
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != DONT_CARE)
            .map(move |(i, &c)| (i as i32 % width, i as i32 / width, c))
    }

    /// This mask with set and clear swapped.
    pub fn complement(&self) -> Self {
        let coeffs = self
            .coeffs
            .iter()
            .map(|&c| match c {
                SET => CLEAR,
                CLEAR => SET,
                other => other,
            })
            .collect();
        Self {
            width: self.width,
            height: self.height,
            coeffs,
        }
    }
}

/// Parses the matrix text format: a header line `width height` followed
/// by `height` lines of `width` whitespace-separated numbers. Extra
/// header fields such as scale and offset are ignored.
impl FromStr for MorphMask {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| PipelineError::bad_parameter("morph", format!("bad mask file: {}", reason));

        let mut lines = s.lines().filter(|line| !line.trim().is_empty());
        let header = lines.next().ok_or_else(|| bad("empty"))?;
        let mut fields = header.split_whitespace();
        let mut dimension = || -> PipelineResult<i32> {
            fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .filter(|d| d.fract() == 0.0)
                .map(|d| d as i32)
                .ok_or_else(|| bad("header must start with width and height"))
        };
        let width = dimension()?;
        let height = dimension()?;

        let values = lines
            .flat_map(str::split_whitespace)
            .map(|f| f.parse::<f64>().map_err(|_| bad(&format!("'{}' is not a number", f))))
            .collect::<PipelineResult<Vec<f64>>>()?;

        Self::new(width, height, &values)
    }
}

impl fmt::Display for MorphMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.width, self.height)?;
        for row in self.coeffs.chunks(self.width as usize) {
            let row: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            writeln!(f, "{}", row.join(" "))?;
        }
        Ok(())
    }
}
