//! Angle utilities for the floor frame.
//!
//! The floor frame is screen-like: X to the right, Y downward, meters.
//! Heading 0 faces "up" (-Y) and positive rotation is counter-clockwise when
//! viewed from above, so the forward unit vector is `(-sin θ, -cos θ)`.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

/// Normalize angle to (-π, π].
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Signed shortest rotation from `from` to `to`, in (-π, π].
#[inline]
pub fn angle_diff(from: f32, to: f32) -> f32 {
    normalize_angle(to - from)
}

/// Forward unit vector for a robot heading.
#[inline]
pub fn heading_vector(heading: f32) -> (f32, f32) {
    let (s, c) = heading.sin_cos();
    (-s, -c)
}

/// Convert a robot heading into the math-convention direction angle
/// (direction vector `(cos φ, sin φ)`) used by the ray casts.
#[inline]
pub fn heading_to_direction(heading: f32) -> f32 {
    normalize_angle(-FRAC_PI_2 - heading)
}

/// Inverse of [`heading_to_direction`].
#[inline]
pub fn direction_to_heading(direction: f32) -> f32 {
    normalize_angle(-FRAC_PI_2 - direction)
}

/// Heading in compass degrees [0, 360).
#[inline]
pub fn heading_degrees(heading: f32) -> f32 {
    let deg = heading.to_degrees() % 360.0;
    if deg < 0.0 { deg + 360.0 } else { deg }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_angle_range() {
        assert_relative_eq!(normalize_angle(0.0), 0.0);
        assert_relative_eq!(normalize_angle(PI), PI);
        assert_relative_eq!(normalize_angle(-PI), PI, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(3.0 * FRAC_PI_2), -FRAC_PI_2, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(-5.0 * PI / 2.0), -FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert_relative_eq!(angle_diff(0.9 * PI, -0.9 * PI), 0.2 * PI, epsilon = 1e-5);
    }

    #[test]
    fn test_heading_zero_faces_up() {
        let (fx, fy) = heading_vector(0.0);
        assert_relative_eq!(fx, 0.0, epsilon = 1e-6);
        assert_relative_eq!(fy, -1.0, epsilon = 1e-6);

        let dir = heading_to_direction(0.0);
        assert_relative_eq!(dir.cos(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(dir.sin(), -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_direction_heading_inverse() {
        for h in [-2.5f32, -1.0, 0.0, 0.4, 1.5, 3.0] {
            assert_relative_eq!(direction_to_heading(heading_to_direction(h)), h, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_heading_degrees() {
        assert_relative_eq!(heading_degrees(0.0), 0.0);
        assert_relative_eq!(heading_degrees(-FRAC_PI_2), 270.0, epsilon = 1e-3);
        assert_relative_eq!(heading_degrees(FRAC_PI_2), 90.0, epsilon = 1e-3);
    }
}
