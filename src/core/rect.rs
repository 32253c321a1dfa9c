//! Integer rectangle algebra.
//!
//! Rectangles are half-open on the right and bottom: a rect covers columns
//! `left..right()` and rows `top..bottom()`. Left and top may be negative.
//! All operations are allocation-free value computations.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle of pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge (inclusive).
    pub left: i32,
    /// Top edge (inclusive).
    pub top: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// A rectangle anchored at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Get the right edge coordinate (exclusive).
    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    /// Get the bottom edge coordinate (exclusive).
    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    /// Calculate the area of this rectangle in pixels. Empty rects have area 0.
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True when the point lies inside the rectangle.
    pub fn includes_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && y >= self.top && x < self.right() && y < self.bottom()
    }

    /// True when every edge of `inner` lies within this rectangle.
    pub fn includes_rect(&self, inner: &Rect) -> bool {
        self.left <= inner.left
            && self.top <= inner.top
            && self.right() >= inner.right()
            && self.bottom() >= inner.bottom()
    }

    /// Intersection of two rectangles.
    ///
    /// The result never has a negative width or height: disjoint inputs, or
    /// either input empty, give an empty rectangle.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        let mut out = Rect::new(left, top, (right - left).max(0), (bottom - top).max(0));
        if self.is_empty() || other.is_empty() {
            out.width = 0;
            out.height = 0;
        }
        out
    }

    /// Smallest rectangle enclosing both inputs. Empty inputs are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, right - left, bottom - top)
    }

    /// Grow the rectangle by `n` pixels on every side.
    pub fn expand_margin(&self, n: i32) -> Rect {
        Rect::new(
            self.left - n,
            self.top - n,
            self.width + 2 * n,
            self.height + 2 * n,
        )
    }

    /// Move the rectangle by (dx, dy).
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.width, self.height)
    }

    /// True when the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_edges_and_area() {
        let r = Rect::new(10, 20, 100, 200);
        assert_eq!(r.right(), 110);
        assert_eq!(r.bottom(), 220);
        assert_eq!(r.area(), 20000);
        assert_eq!(Rect::new(5, 5, -3, 10).area(), 0);
    }

    #[test]
    fn test_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -5, 10, 10);
        assert_eq!(a.intersect(&b), Rect::new(5, 0, 5, 5));

        let far = Rect::new(50, 50, 3, 3);
        let none = a.intersect(&far);
        assert!(none.is_empty());
        assert!(none.width >= 0 && none.height >= 0);
    }

    #[test]
    fn test_intersect_with_empty_is_empty() {
        let a = Rect::new(0, 0, 10, 10);
        let thin = Rect::new(2, 2, 0, 5);
        assert!(a.intersect(&thin).is_empty());
        assert!(thin.intersect(&a).is_empty());
    }

    #[test]
    fn test_includes() {
        let outer = Rect::new(-4, -4, 10, 10);
        assert!(outer.includes_rect(&Rect::new(-4, -4, 10, 10)));
        assert!(outer.includes_rect(&Rect::new(0, 0, 2, 2)));
        assert!(!outer.includes_rect(&Rect::new(0, 0, 7, 2)));
        assert!(outer.includes_point(-4, 5));
        assert!(!outer.includes_point(6, 0));
    }

    #[test]
    fn test_expand_margin() {
        let r = Rect::new(50, 50, 100, 100).expand_margin(10);
        assert_eq!(r, Rect::new(40, 40, 120, 120));
        assert_eq!(r.expand_margin(-10), Rect::new(50, 50, 100, 100));
    }

    #[test]
    fn test_union_and_translate() {
        let a = Rect::new(0, 0, 2, 2);
        let b = Rect::new(5, 5, 1, 1);
        assert_eq!(a.union(&b), Rect::new(0, 0, 6, 6));
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(b.translate(-5, 2), Rect::new(0, 7, 1, 1));
    }

    proptest! {
        #[test]
        fn test_intersection_is_contained(
            l1 in -50i32..50, t1 in -50i32..50, w1 in 0i32..60, h1 in 0i32..60,
            l2 in -50i32..50, t2 in -50i32..50, w2 in 0i32..60, h2 in 0i32..60,
        ) {
            let a = Rect::new(l1, t1, w1, h1);
            let b = Rect::new(l2, t2, w2, h2);
            let i = a.intersect(&b);
            prop_assert!(i.width >= 0 && i.height >= 0);
            prop_assert_eq!(i, b.intersect(&a));
            if !i.is_empty() {
                prop_assert!(a.includes_rect(&i));
                prop_assert!(b.includes_rect(&i));
            }
        }
    }
}
