//! Collision geometry primitives.
//!
//! Pure functions with no state. Degenerate inputs are tolerated: a
//! zero-length segment behaves as a point and a zero-radius circle never
//! intersects a ray.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Tolerance for parallel and degenerate checks.
const EPSILON: f32 = 1e-9;

/// A 2D point (or vector) in floor meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector for a math-convention direction angle.
    #[inline]
    pub fn from_angle(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(c, s)
    }

    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// 2D cross product (z component).
    #[inline]
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point2D {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2D {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point2D {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point2D {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// A circle (obstacle, checkpoint, robot footprint).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2D,
    pub radius: f32,
}

impl Circle {
    pub const fn new(center: Point2D, radius: f32) -> Self {
        Self { center, radius }
    }

    #[inline]
    pub fn contains(&self, p: Point2D) -> bool {
        p.distance(self.center) <= self.radius
    }

    pub fn bounding_rect(&self) -> Rect {
        let r = Point2D::new(self.radius, self.radius);
        Rect::new(self.center - r, self.center + r)
    }
}

/// Axis-aligned rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point2D,
    pub max: Point2D,
}

impl Rect {
    /// Create from two corners in any order.
    pub fn new(a: Point2D, b: Point2D) -> Self {
        Self {
            min: Point2D::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point2D::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Rectangle from the origin with the given size.
    pub fn from_size(width: f32, height: f32) -> Self {
        Self::new(Point2D::default(), Point2D::new(width, height))
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn contains(&self, p: Point2D) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Clamp a point into the rectangle shrunk by `inset` on every side.
    ///
    /// If the inset exceeds half the size, the point collapses to the center
    /// on that axis.
    pub fn clamp_point(&self, p: Point2D, inset: f32) -> Point2D {
        let clamp_axis = |v: f32, lo: f32, hi: f32| {
            let (lo, hi) = (lo + inset, hi - inset);
            if lo > hi { (lo + hi) * 0.5 } else { v.clamp(lo, hi) }
        };
        Point2D::new(
            clamp_axis(p.x, self.min.x, self.max.x),
            clamp_axis(p.y, self.min.y, self.max.y),
        )
    }

    /// Corners in order: min, (max.x, min.y), max, (min.x, max.y).
    pub fn corners(&self) -> [Point2D; 4] {
        [
            self.min,
            Point2D::new(self.max.x, self.min.y),
            self.max,
            Point2D::new(self.min.x, self.max.y),
        ]
    }
}

/// Closest point to `p` on segment `ab`.
pub fn closest_point_on_segment(p: Point2D, a: Point2D, b: Point2D) -> Point2D {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Euclidean distance from `p` to segment `ab`.
pub fn point_to_segment_distance(p: Point2D, a: Point2D, b: Point2D) -> f32 {
    p.distance(closest_point_on_segment(p, a, b))
}

/// Distance along a ray to segment `ab`, if hit.
///
/// The ray starts at `origin` with direction `(cos angle, sin angle)`.
/// Returns `None` when the intersection parameters fall outside `[0, ∞)` on
/// the ray or `[0, 1]` on the segment. Collinear overlap reports the nearest
/// covered point.
pub fn ray_segment_intersection(origin: Point2D, angle: f32, a: Point2D, b: Point2D) -> Option<f32> {
    let d = Point2D::from_angle(angle);
    let e = b - a;
    let w = a - origin;

    if e.length_squared() < EPSILON {
        // Zero-length segment: hit only if the point sits on the ray
        let t = w.dot(d);
        return (t >= 0.0 && w.cross(d).abs() < 1e-6).then_some(t);
    }

    let denom = d.cross(e);
    if denom.abs() < EPSILON {
        if w.cross(d).abs() > 1e-6 {
            return None;
        }
        // Collinear: nearest endpoint ahead, or zero if origin is on the segment
        let ta = w.dot(d);
        let tb = (b - origin).dot(d);
        return match (ta >= 0.0, tb >= 0.0) {
            (true, true) => Some(ta.min(tb)),
            (false, false) => None,
            _ => Some(0.0),
        };
    }

    let t = w.cross(e) / denom;
    let s = w.cross(d) / denom;
    (t >= 0.0 && (0.0..=1.0).contains(&s)).then_some(t)
}

/// Distance along a ray to a circle, if hit.
///
/// Returns the nearest non-negative root; a ray starting inside the circle
/// reports the exit distance.
pub fn ray_circle_intersection(origin: Point2D, angle: f32, center: Point2D, radius: f32) -> Option<f32> {
    if radius <= 0.0 {
        return None;
    }
    let d = Point2D::from_angle(angle);
    let f = origin - center;
    let b = f.dot(d);
    let c = f.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t1 = -b - sq;
    let t2 = -b + sq;
    if t1 >= 0.0 {
        Some(t1)
    } else if t2 >= 0.0 {
        Some(t2)
    } else {
        None
    }
}

/// Whether two axis-aligned rectangles overlap (touching counts).
pub fn aabb_overlap(a: &Rect, b: &Rect) -> bool {
    a.min.x <= b.max.x && a.max.x >= b.min.x && a.min.y <= b.max.y && a.max.y >= b.min.y
}

/// Whether a circle touches an axis-aligned rectangle.
pub fn circle_aabb_overlap(circle: &Circle, rect: &Rect) -> bool {
    let nearest = Point2D::new(
        circle.center.x.clamp(rect.min.x, rect.max.x),
        circle.center.y.clamp(rect.min.y, rect.max.y),
    );
    circle.contains(nearest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_point_to_segment_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);

        assert_relative_eq!(point_to_segment_distance(Point2D::new(5.0, 3.0), a, b), 3.0);
        // Beyond endpoint measures to the endpoint
        assert_relative_eq!(point_to_segment_distance(Point2D::new(13.0, 4.0), a, b), 5.0);
    }

    #[test]
    fn test_zero_length_segment_is_point() {
        let a = Point2D::new(1.0, 1.0);
        assert_relative_eq!(point_to_segment_distance(Point2D::new(4.0, 5.0), a, a), 5.0);

        let hit = ray_segment_intersection(Point2D::new(0.0, 1.0), 0.0, a, a);
        assert_relative_eq!(hit.unwrap(), 1.0, epsilon = 1e-6);
        assert!(ray_segment_intersection(Point2D::new(0.0, 0.0), 0.0, a, a).is_none());
    }

    #[test]
    fn test_ray_segment_hit() {
        // Vertical wall at x = 5
        let a = Point2D::new(5.0, -1.0);
        let b = Point2D::new(5.0, 1.0);
        let t = ray_segment_intersection(Point2D::new(0.0, 0.0), 0.0, a, b);
        assert_relative_eq!(t.unwrap(), 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ray_segment_miss() {
        let a = Point2D::new(5.0, 1.0);
        let b = Point2D::new(5.0, 2.0);
        // Segment above the ray
        assert!(ray_segment_intersection(Point2D::new(0.0, 0.0), 0.0, a, b).is_none());
        // Segment behind the ray
        assert!(ray_segment_intersection(Point2D::new(0.0, 1.5), PI, a, b).is_none());
    }

    #[test]
    fn test_ray_segment_parallel() {
        let a = Point2D::new(0.0, 1.0);
        let b = Point2D::new(5.0, 1.0);
        assert!(ray_segment_intersection(Point2D::new(0.0, 0.0), 0.0, a, b).is_none());

        // Collinear segment ahead reports the near end
        let a = Point2D::new(2.0, 0.0);
        let b = Point2D::new(5.0, 0.0);
        let t = ray_segment_intersection(Point2D::new(0.0, 0.0), 0.0, a, b);
        assert_relative_eq!(t.unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ray_circle() {
        let c = Point2D::new(0.0, 5.0);
        let t = ray_circle_intersection(Point2D::new(0.0, 0.0), FRAC_PI_2, c, 1.0);
        assert_relative_eq!(t.unwrap(), 4.0, epsilon = 1e-5);

        // Origin inside reports exit distance
        let t = ray_circle_intersection(c, FRAC_PI_2, c, 1.0);
        assert_relative_eq!(t.unwrap(), 1.0, epsilon = 1e-5);

        // Pointing away
        assert!(ray_circle_intersection(Point2D::new(0.0, 0.0), -FRAC_PI_2, c, 1.0).is_none());
        // Zero radius
        assert!(ray_circle_intersection(Point2D::new(0.0, 0.0), FRAC_PI_2, c, 0.0).is_none());
    }

    #[test]
    fn test_aabb_overlap() {
        let a = Rect::new(Point2D::new(0.0, 0.0), Point2D::new(2.0, 2.0));
        let b = Rect::new(Point2D::new(1.0, 1.0), Point2D::new(3.0, 3.0));
        let c = Rect::new(Point2D::new(2.5, 2.5), Point2D::new(4.0, 4.0));
        let touching = Rect::new(Point2D::new(2.0, 0.0), Point2D::new(3.0, 1.0));

        assert!(aabb_overlap(&a, &b));
        assert!(!aabb_overlap(&a, &c));
        assert!(aabb_overlap(&a, &touching));
    }

    #[test]
    fn test_circle_aabb_overlap() {
        let rect = Rect::new(Point2D::new(0.0, 0.0), Point2D::new(2.0, 1.0));
        assert!(circle_aabb_overlap(&Circle::new(Point2D::new(1.0, 0.5), 0.1), &rect));
        assert!(circle_aabb_overlap(&Circle::new(Point2D::new(1.0, 1.5), 0.5), &rect));
        // Near the corner the bounding boxes overlap but the circle misses
        let corner = Circle::new(Point2D::new(2.3, 1.3), 0.35);
        assert!(aabb_overlap(&corner.bounding_rect(), &rect));
        assert!(!circle_aabb_overlap(&corner, &rect));
    }

    #[test]
    fn test_rect_clamp_point() {
        let r = Rect::from_size(2.0, 2.0);
        let p = r.clamp_point(Point2D::new(-1.0, 3.0), 0.1);
        assert_relative_eq!(p.x, 0.1);
        assert_relative_eq!(p.y, 1.9);

        // Inset larger than the rectangle collapses to center
        let p = Rect::from_size(0.1, 0.1).clamp_point(Point2D::new(5.0, 5.0), 1.0);
        assert_relative_eq!(p.x, 0.05);
    }
}
