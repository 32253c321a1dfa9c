//! Place an image within a larger canvas.
//!
//! [`embed`] puts the input at `(x, y)` inside a `width` x `height` canvas
//! and synthesizes every pixel the input does not cover according to an
//! [`Extend`] policy. [`gravity`] does the same with the position picked
//! from a compass direction.
//!
//! # Geometry
//!
//! The canvas `rout` splits into `rsub`, the part covered by the input,
//! plus eight border rectangles: the strips above, right of, below and left
//! of `rsub`, then the top-left, top-right, bottom-right and bottom-left
//! corners. The nine pieces partition the canvas exactly. Any piece other
//! than `rsub` may be empty.
//!
//! Solid and edge-copy policies are evaluated tile by tile from this
//! geometry. Repeat and mirror are instead built from replicate, flip,
//! join and extract at build time.

use crate::conversion::extract::extract_area;
use crate::conversion::flip::{flip, Direction};
use crate::conversion::insert::{insert, join};
use crate::conversion::replicate::replicate;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::format::vector_to_ink;
use crate::core::image::{DemandStyle, Generate, Image, StopFlag};
use crate::core::rect::Rect;
use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How to fill the canvas outside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extend {
    /// Zero.
    #[default]
    Black,
    /// Replicate the nearest edge pixel.
    Copy,
    /// Tile the input.
    Repeat,
    /// Tile the input, reflecting alternate copies.
    Mirror,
    /// The interpretation's maximum alpha value.
    White,
    /// A per-band background colour.
    Background,
}

impl FromStr for Extend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "black" => Ok(Extend::Black),
            "copy" => Ok(Extend::Copy),
            "repeat" => Ok(Extend::Repeat),
            "mirror" => Ok(Extend::Mirror),
            "white" => Ok(Extend::White),
            "background" => Ok(Extend::Background),
            other => Err(PipelineError::bad_parameter(
                "embed",
                format!("unknown extend '{}'", other),
            )),
        }
    }
}

/// Where [`gravity`] places the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompassDirection {
    /// Middle of the canvas.
    #[default]
    Centre,
    /// Top middle.
    North,
    /// Right middle.
    East,
    /// Bottom middle.
    South,
    /// Left middle.
    West,
    /// Top right.
    NorthEast,
    /// Bottom right.
    SouthEast,
    /// Bottom left.
    SouthWest,
    /// Top left.
    NorthWest,
}

impl CompassDirection {
    /// Top-left position of an `in_width` x `in_height` image on a
    /// `width` x `height` canvas. Centring rounds towards zero.
    pub fn position(self, in_width: i32, in_height: i32, width: i32, height: i32) -> (i32, i32) {
        let centre_x = (width - in_width) / 2;
        let centre_y = (height - in_height) / 2;
        let right = width - in_width;
        let bottom = height - in_height;

        match self {
            CompassDirection::Centre => (centre_x, centre_y),
            CompassDirection::North => (centre_x, 0),
            CompassDirection::East => (right, centre_y),
            CompassDirection::South => (centre_x, bottom),
            CompassDirection::West => (0, centre_y),
            CompassDirection::NorthEast => (right, 0),
            CompassDirection::SouthEast => (right, bottom),
            CompassDirection::SouthWest => (0, bottom),
            CompassDirection::NorthWest => (0, 0),
        }
    }
}

impl FromStr for CompassDirection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "centre" | "center" => Ok(CompassDirection::Centre),
            "north" | "n" => Ok(CompassDirection::North),
            "east" | "e" => Ok(CompassDirection::East),
            "south" | "s" => Ok(CompassDirection::South),
            "west" | "w" => Ok(CompassDirection::West),
            "north-east" | "ne" => Ok(CompassDirection::NorthEast),
            "south-east" | "se" => Ok(CompassDirection::SouthEast),
            "south-west" | "sw" => Ok(CompassDirection::SouthWest),
            "north-west" | "nw" => Ok(CompassDirection::NorthWest),
            other => Err(PipelineError::bad_parameter(
                "gravity",
                format!("unknown direction '{}'", other),
            )),
        }
    }
}

/// Optional arguments of [`embed`] and [`gravity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedOptions {
    /// Fill policy. Unset means black, or background if a background is set.
    pub extend: Option<Extend>,
    /// Per-band background colour for [`Extend::Background`].
    pub background: Option<Vec<f64>>,
}

impl EmbedOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fill policy.
    pub fn with_extend(mut self, extend: Extend) -> Self {
        self.extend = Some(extend);
        self
    }

    /// Set the background colour.
    pub fn with_background(mut self, background: Vec<f64>) -> Self {
        self.background = Some(background);
        self
    }

    /// The policy in effect.
    pub fn resolved_extend(&self) -> Extend {
        match (self.extend, &self.background) {
            (Some(extend), _) => extend,
            (None, Some(_)) => Extend::Background,
            (None, None) => Extend::Black,
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Build-time layout of the input within the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedGeometry {
    /// Input position on the canvas.
    pub x: i32,
    /// Input position on the canvas.
    pub y: i32,
    /// The whole canvas.
    pub rout: Rect,
    /// The part of the canvas covered by the input.
    pub rsub: Rect,
    /// Top, right, bottom and left strips, then the top-left, top-right,
    /// bottom-right and bottom-left corners.
    pub border: [Rect; 8],
}

impl EmbedGeometry {
    /// Lay out an `in_width` x `in_height` input at `(x, y)` on a
    /// `width` x `height` canvas.
    ///
    /// Fails with "bad dimensions" when the input misses the canvas.
    pub fn new(op: &str, in_width: i32, in_height: i32, x: i32, y: i32, width: i32, height: i32) -> PipelineResult<Self> {
        let rout = Rect::from_size(width, height);
        let rsub = Rect::new(x, y, in_width, in_height).intersect(&rout);
        if rsub.is_empty() {
            return Err(PipelineError::BadDimensions { op: op.to_string() });
        }

        let right = rsub.right();
        let bottom = rsub.bottom();
        let border = [
            Rect::new(rsub.left, 0, rsub.width, rsub.top),
            Rect::new(right, rsub.top, width - right, rsub.height),
            Rect::new(rsub.left, bottom, rsub.width, height - bottom),
            Rect::new(0, rsub.top, rsub.left, rsub.height),
            Rect::new(0, 0, rsub.left, rsub.top),
            Rect::new(right, 0, width - right, rsub.top),
            Rect::new(right, bottom, width - right, height - bottom),
            Rect::new(0, bottom, rsub.left, height - bottom),
        ];

        Ok(Self {
            x,
            y,
            rout,
            rsub,
            border,
        })
    }

    /// `rsub` followed by the eight borders.
    pub fn pieces(&self) -> impl Iterator<Item = Rect> + '_ {
        std::iter::once(self.rsub).chain(self.border.iter().copied())
    }

    /// The strip of `rsub` whose pixels fill `todo`, a part of border `i`.
    ///
    /// The border grown by one pixel meets `rsub` along its edge. Straight
    /// borders then trim that edge to the columns or rows of `todo`.
    fn find_edge(&self, todo: &Rect, i: usize) -> Rect {
        let mut edge = self.border[i].expand_margin(1).intersect(&self.rsub);
        match i {
            0 | 2 => {
                let span = Rect::new(todo.left, 0, todo.width, self.rout.height);
                edge = edge.intersect(&span);
            }
            1 | 3 => {
                let span = Rect::new(0, todo.top, self.rout.width, todo.height);
                edge = edge.intersect(&span);
            }
            _ => {}
        }
        edge
    }
}

// ============================================================================
// Tile compositor
// ============================================================================

#[derive(Debug, Clone)]
enum Fill {
    Solid(f64),
    Ink(Vec<u8>),
    Copy,
}

struct Embed {
    name: &'static str,
    input: Image,
    geometry: EmbedGeometry,
    fill: Fill,
}

impl Generate for Embed {
    type Seq = Region;

    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&self, stop: &StopFlag) -> PipelineResult<Region> {
        Ok(Region::with_stop(&self.input, stop.clone()))
    }

    fn generate(&self, out: &mut Region, ir: &mut Region, _stop: &StopFlag) -> PipelineResult<()> {
        let g = &self.geometry;
        let r = out.valid();

        // Entirely within the input: share its pixels.
        if g.rsub.includes_rect(&r) {
            let need = r.translate(-g.x, -g.y);
            ir.prepare(need)?;
            return out.region_region(ir, r, need.left, need.top);
        }

        let ovl = r.intersect(&g.rsub);
        if !ovl.is_empty() {
            ir.prepare_to(out, ovl.translate(-g.x, -g.y), ovl.left, ovl.top)?;
        }

        match &self.fill {
            Fill::Solid(value) => {
                for border in &g.border {
                    out.paint(*border, *value);
                }
            }
            Fill::Ink(ink) => {
                for border in &g.border {
                    out.paint_pel(*border, ink)?;
                }
            }
            Fill::Copy => {
                for i in 0..8 {
                    let todo = r.intersect(&g.border[i]);
                    if todo.is_empty() {
                        continue;
                    }
                    let edge = g.find_edge(&todo, i);

                    // Edge pixels come from the overlap just painted, if any.
                    let source = if !ovl.is_empty() {
                        edge_pixels(out, i, edge)
                    } else {
                        let need = edge.translate(-g.x, -g.y);
                        ir.prepare(need)?;
                        edge_pixels(ir, i, need)
                    };
                    paint_edge(out, i, todo, &source);
                }
            }
        }
        Ok(())
    }
}

/// Read the pixels of `edge`: a column for side borders, a row otherwise.
fn edge_pixels(region: &Region, i: usize, edge: Rect) -> Vec<u8> {
    if i == 1 || i == 3 {
        (edge.top..edge.bottom())
            .flat_map(|y| region.pel(edge.left, y).iter().copied())
            .collect()
    } else {
        region.row(edge.left, edge.top, edge.width as usize).to_vec()
    }
}

/// Fill `todo`, part of border `i`, by propagating `source` outward.
fn paint_edge(out: &mut Region, i: usize, todo: Rect, source: &[u8]) {
    let ps = out.sizeof_pel();
    let n = todo.width as usize;
    let mut todo = todo;
    let mut line = source.to_vec();

    // Corners: spread the single pixel along the first line, then copy
    // that line down the rest.
    if i > 3 {
        line = source[..ps].repeat(n);
        out.row_mut(todo.left, todo.top, n).copy_from_slice(&line);
        todo.top += 1;
        todo.height -= 1;
    }

    if i == 1 || i == 3 {
        for (y, pel) in (todo.top..todo.bottom()).zip(line.chunks_exact(ps)) {
            for q in out.row_mut(todo.left, y, n).chunks_exact_mut(ps) {
                q.copy_from_slice(pel);
            }
        }
    } else {
        for y in todo.top..todo.bottom() {
            out.row_mut(todo.left, y, n).copy_from_slice(&line);
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

fn embed_base(
    name: &'static str,
    input: &Image,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    options: &EmbedOptions,
) -> PipelineResult<Image> {
    if width <= 0 || height <= 0 {
        return Err(PipelineError::BadDimensions { op: name.to_string() });
    }

    let (sw, sh) = (input.width(), input.height());
    if x == 0 && y == 0 && width == sw && height == sh {
        return Ok(input.clone());
    }

    let extend = options.resolved_extend();
    let fill = match extend {
        Extend::Repeat => {
            // Clock arithmetic, so negative offsets wrap.
            let nx = if x < 0 { -x % sw } else { sw - x % sw };
            let ny = if y < 0 { -y % sh } else { sh - y % sh };
            let tiled = replicate(input, width / sw + 2, height / sh + 2)?;
            return extract_area(&tiled, nx, ny, width, height);
        }
        Extend::Mirror => {
            let w2 = sw * 2;
            let h2 = sh * 2;
            let nx = if x < 0 { -x % w2 } else { w2 - x % w2 };
            let ny = if y < 0 { -y % h2 } else { h2 - y % h2 };

            // A 2x2 mirror tile, repeated, then cut out.
            let mirrored = flip(input, Direction::Horizontal)?;
            let pair = join(input, &mirrored, Direction::Horizontal)?;
            let upside = flip(&pair, Direction::Vertical)?;
            let tile = join(&pair, &upside, Direction::Vertical)?;
            let tiled = replicate(&tile, width / w2 + 2, height / h2 + 2)?;
            let window = extract_area(&tiled, nx, ny, width, height)?;

            // The exact input over the centre.
            return insert(&window, input, x, y);
        }
        Extend::Black => Fill::Solid(0.0),
        Extend::White => Fill::Solid(input.interpretation().max_alpha()),
        Extend::Background => {
            let background = options.background.as_deref().unwrap_or(&[0.0]);
            Fill::Ink(vector_to_ink(name, input.format(), input.bands(), background)?)
        }
        Extend::Copy => Fill::Copy,
    };

    let geometry = EmbedGeometry::new(name, sw, sh, x, y, width, height)?;
    log::debug!("{}: {:?} with {} inside {}", name, extend, geometry.rsub, geometry.rout);

    let desc = input.desc().with_size(width, height);
    Image::pipeline(desc)
        .demand(DemandStyle::Any)
        .input(input)
        .generate(Embed {
            name,
            input: input.clone(),
            geometry,
            fill,
        })
}

/// Place `input` at `(x, y)` on a `width` x `height` canvas.
///
/// Embedding at the origin on a canvas of the input's own size returns the
/// input unchanged.
pub fn embed(input: &Image, x: i32, y: i32, width: i32, height: i32, options: &EmbedOptions) -> PipelineResult<Image> {
    embed_base("embed", input, x, y, width, height, options)
}

/// Place `input` on a `width` x `height` canvas at a compass position.
pub fn gravity(
    input: &Image,
    direction: CompassDirection,
    width: i32,
    height: i32,
    options: &EmbedOptions,
) -> PipelineResult<Image> {
    let (x, y) = direction.position(input.width(), input.height(), width, height);
    embed_base("gravity", input, x, y, width, height, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{BandFormat, Interpretation};
    use crate::core::image::ImageDesc;
    use crate::execution::write_to_memory;
    use proptest::prelude::*;

    /// 3x3 image with distinct values 1..=9.
    fn small() -> Image {
        let desc = ImageDesc::new(3, 3, 1, BandFormat::UChar);
        Image::from_fn(desc, |x, y, _| (1 + x + 3 * y) as f64).unwrap()
    }

    fn at(image: &Image, x: i32, y: i32) -> u8 {
        image.pel(x, y).unwrap()[0]
    }

    fn embed_small(extend: Extend) -> Image {
        let out = embed(&small(), 3, 3, 9, 9, &EmbedOptions::new().with_extend(extend)).unwrap();
        write_to_memory(&out).unwrap()
    }

    #[test]
    fn test_noop_returns_input() {
        let image = small();
        let out = embed(&image, 0, 0, 3, 3, &EmbedOptions::new().with_extend(Extend::Copy)).unwrap();
        assert!(out.ptr_eq(&image));
    }

    #[test]
    fn test_off_canvas_is_bad_dimensions() {
        let error = embed(&small(), 20, 0, 9, 9, &EmbedOptions::new()).unwrap_err();
        assert_eq!(error.to_string(), "embed: bad dimensions");
        assert!(embed(&small(), 0, 0, 0, 9, &EmbedOptions::new()).is_err());
    }

    #[test]
    fn test_black_and_white() {
        let out = embed_small(Extend::Black);
        assert_eq!(at(&out, 0, 0), 0);
        assert_eq!(at(&out, 4, 4), 5);
        assert_eq!(at(&out, 8, 4), 0);

        let out = embed_small(Extend::White);
        assert_eq!(at(&out, 0, 8), 255);
        assert_eq!(at(&out, 3, 5), 7);
    }

    #[test]
    fn test_white_follows_interpretation() {
        let desc = ImageDesc::new(2, 2, 1, BandFormat::UShort).with_interpretation(Interpretation::Grey16);
        let image = Image::from_memory(desc, vec![0; 8]).unwrap();
        let out = write_to_memory(
            &embed(&image, 1, 1, 4, 4, &EmbedOptions::new().with_extend(Extend::White)).unwrap(),
        )
        .unwrap();
        assert_eq!(out.pel(0, 0).unwrap(), &65535u16.to_ne_bytes());
    }

    #[test]
    fn test_background_implies_extend() {
        let desc = ImageDesc::new(2, 2, 3, BandFormat::UChar);
        let image = Image::from_memory(desc, vec![1; 12]).unwrap();
        let options = EmbedOptions::new().with_background(vec![10.0, 20.0, 30.0]);
        assert_eq!(options.resolved_extend(), Extend::Background);

        let out = write_to_memory(&embed(&image, 1, 0, 4, 2, &options).unwrap()).unwrap();
        assert_eq!(out.pel(0, 0).unwrap(), &[10, 20, 30]);
        assert_eq!(out.pel(1, 1).unwrap(), &[1, 1, 1]);
        assert_eq!(out.pel(3, 1).unwrap(), &[10, 20, 30]);

        let bad = EmbedOptions::new().with_background(vec![1.0, 2.0]);
        let error = embed(&image, 1, 0, 4, 2, &bad).unwrap_err();
        assert_eq!(error.to_string(), "embed: vector must have 1 or 3 elements");
    }

    #[test]
    fn test_copy_replicates_edges() {
        let out = embed_small(Extend::Copy);
        for y in 0..9 {
            for x in 0..9 {
                let sx = (x - 3).clamp(0, 2);
                let sy = (y - 3).clamp(0, 2);
                assert_eq!(at(&out, x, y), (1 + sx + 3 * sy) as u8, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_copy_with_tiles_outside_input() {
        // Tiles that miss the input fetch edges straight from it.
        let desc = ImageDesc::new(3, 3, 1, BandFormat::UChar);
        let image = Image::from_fn(desc, |x, y, _| (1 + x + 3 * y) as f64).unwrap();
        let embedded = embed(&image, 10, 10, 20, 20, &EmbedOptions::new().with_extend(Extend::Copy)).unwrap();
        let mut region = Region::new(&embedded);
        region.prepare(Rect::new(0, 0, 4, 4)).unwrap();
        assert_eq!(region.pel(0, 0), &[1]);
        region.prepare(Rect::new(11, 15, 3, 2)).unwrap();
        assert_eq!(region.row(11, 16, 3), &[8, 9, 9]);
        region.prepare(Rect::new(16, 9, 4, 3)).unwrap();
        assert_eq!(region.pel(19, 11), &[6]);
        assert_eq!(region.pel(19, 9), &[3]);
    }

    #[test]
    fn test_repeat_is_periodic() {
        let out = embed_small(Extend::Repeat);
        for y in 0..9i32 {
            for x in 0..9i32 {
                let sx = (x - 3).rem_euclid(3);
                let sy = (y - 3).rem_euclid(3);
                assert_eq!(at(&out, x, y), (1 + sx + 3 * sy) as u8, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_repeat_negative_offset() {
        let out = embed(&small(), -4, -1, 7, 5, &EmbedOptions::new().with_extend(Extend::Repeat)).unwrap();
        let out = write_to_memory(&out).unwrap();
        for y in 0..5i32 {
            for x in 0..7i32 {
                let sx = (x + 4).rem_euclid(3);
                let sy = (y + 1).rem_euclid(3);
                assert_eq!(at(&out, x, y), (1 + sx + 3 * sy) as u8);
            }
        }
    }

    #[test]
    fn test_mirror_reflects() {
        fn reflect(d: i32, n: i32) -> i32 {
            let m = d.rem_euclid(2 * n);
            if m < n {
                m
            } else {
                2 * n - 1 - m
            }
        }

        let out = embed_small(Extend::Mirror);
        for y in 0..9 {
            for x in 0..9 {
                let sx = reflect(x - 3, 3);
                let sy = reflect(y - 3, 3);
                assert_eq!(at(&out, x, y), (1 + sx + 3 * sy) as u8, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_gravity_positions() {
        assert_eq!(CompassDirection::Centre.position(3, 3, 10, 8), (3, 2));
        assert_eq!(CompassDirection::North.position(3, 3, 10, 8), (3, 0));
        assert_eq!(CompassDirection::East.position(3, 3, 10, 8), (7, 2));
        assert_eq!(CompassDirection::SouthWest.position(3, 3, 10, 8), (0, 5));
        assert_eq!(CompassDirection::NorthWest.position(3, 3, 10, 8), (0, 0));
        // Cropping: the canvas is smaller than the input.
        assert_eq!(CompassDirection::Centre.position(9, 9, 4, 4), (-2, -2));

        let out = gravity(&small(), CompassDirection::SouthEast, 5, 5, &EmbedOptions::new()).unwrap();
        let out = write_to_memory(&out).unwrap();
        assert_eq!(at(&out, 4, 4), 9);
        assert_eq!(at(&out, 1, 1), 0);
        assert_eq!(at(&out, 2, 2), 1);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("mirror".parse::<Extend>().unwrap(), Extend::Mirror);
        assert!("sideways".parse::<Extend>().is_err());
        assert_eq!("NE".parse::<CompassDirection>().unwrap(), CompassDirection::NorthEast);
    }

    #[test]
    fn test_geometry_borders() {
        let g = EmbedGeometry::new("embed", 3, 3, 3, 3, 9, 9).unwrap();
        assert_eq!(g.rsub, Rect::new(3, 3, 3, 3));
        assert_eq!(g.border[0], Rect::new(3, 0, 3, 3));
        assert_eq!(g.border[1], Rect::new(6, 3, 3, 3));
        assert_eq!(g.border[6], Rect::new(6, 6, 3, 3));
        assert_eq!(g.border[7], Rect::new(0, 6, 3, 3));
    }

    proptest! {
        #[test]
        fn test_pieces_partition_canvas(
            sw in 1i32..12, sh in 1i32..12,
            x in -15i32..25, y in -15i32..25,
            w in 1i32..20, h in 1i32..20,
        ) {
            match EmbedGeometry::new("embed", sw, sh, x, y, w, h) {
                Ok(g) => {
                    let pieces: Vec<Rect> = g.pieces().collect();
                    let area: i64 = pieces.iter().map(Rect::area).sum();
                    prop_assert_eq!(area, w as i64 * h as i64);
                    for (i, a) in pieces.iter().enumerate() {
                        prop_assert!(a.is_empty() || g.rout.includes_rect(a));
                        for b in &pieces[i + 1..] {
                            prop_assert!(!a.overlaps(b));
                        }
                    }
                }
                Err(_) => {
                    prop_assert!(Rect::new(x, y, sw, sh).intersect(&Rect::from_size(w, h)).is_empty());
                }
            }
        }

        #[test]
        fn test_copy_keeps_interior(x in -2i32..6, y in -2i32..6) {
            let image = small();
            let out = embed(&image, x, y, 7, 7, &EmbedOptions::new().with_extend(Extend::Copy)).unwrap();
            let out = write_to_memory(&out).unwrap();
            for sy in 0..3 {
                for sx in 0..3 {
                    let (ox, oy) = (x + sx, y + sy);
                    if Rect::from_size(7, 7).includes_point(ox, oy) {
                        prop_assert_eq!(at(&out, ox, oy), at(&image, sx, sy));
                    }
                }
            }
        }
    }
}
