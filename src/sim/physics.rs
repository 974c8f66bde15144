//! Differential drive kinematics and collision resolution
//!
//! Wheel speeds come from signed PWM duty scaled by the maximum wheel surface
//! speed. The body twist follows the standard differential drive model:
//!
//! ```text
//! linear  = (vL + vR) / 2
//! angular = (vR - vL) / wheel_base      (counter-clockwise positive)
//! ```
//!
//! Poses integrate along the forward vector `(-sin θ, -cos θ)` of the floor
//! frame (see [`crate::core::math`]).

use std::f32::consts::{FRAC_PI_2, FRAC_PI_6};

use serde::{Deserialize, Serialize};

use super::config::RobotConfig;
use super::floor_map::{FloorMap, GeometryRef};
use crate::core::geometry::{
    Circle, Point2D, Rect, aabb_overlap, circle_aabb_overlap, closest_point_on_segment,
};
use crate::core::math::{angle_diff, direction_to_heading, heading_vector, normalize_angle};
use crate::core::types::{BumperState, MAX_PWM, MotorState, RobotPose, RobotVelocity};

/// Extra reach of the bumper shell beyond the chassis radius (meters)
pub const BUMPER_TRIGGER_DISTANCE: f32 = 0.005;

/// Which half of the chassis made contact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSide {
    Front,
    Back,
}

/// A contact between the robot footprint and map geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub target: GeometryRef,
    /// Closest point on the geometry
    pub point: Point2D,
    /// Bearing of the contact relative to the heading, (-π, π], left positive
    pub bearing: f32,
    /// Distance from the robot center to the contact point
    pub distance: f32,
}

impl Contact {
    /// Front when the contact lies within ±90° of the heading.
    pub fn side(&self) -> ContactSide {
        if self.bearing.abs() < FRAC_PI_2 {
            ContactSide::Front
        } else {
            ContactSide::Back
        }
    }
}

/// Wheel surface speeds (m/s) and RPM for the current duty.
pub fn wheel_speeds(motors: &MotorState, robot: &RobotConfig) -> (f32, f32, f32, f32) {
    let scale = 1.0 / MAX_PWM as f32;
    let left = motors.left_pwm as f32 * scale;
    let right = motors.right_pwm as f32 * scale;
    let max_speed = robot.max_wheel_speed();
    (
        left * max_speed,
        right * max_speed,
        left * robot.max_rpm,
        right * robot.max_rpm,
    )
}

/// Body twist from wheel surface speeds.
pub fn body_velocity(left: f32, right: f32, wheel_base: f32) -> RobotVelocity {
    RobotVelocity {
        linear: (left + right) * 0.5,
        angular: if wheel_base > 0.0 {
            (right - left) / wheel_base
        } else {
            0.0
        },
    }
}

/// Candidate pose after `dt` seconds of constant twist.
pub fn integrate(pose: &RobotPose, velocity: &RobotVelocity, dt: f32) -> RobotPose {
    let (fx, fy) = heading_vector(pose.rotation);
    RobotPose {
        x: pose.x + velocity.linear * fx * dt,
        y: pose.y + velocity.linear * fy * dt,
        rotation: normalize_angle(pose.rotation + velocity.angular * dt),
    }
}

/// All geometry within `reach` of `center`, nearest first.
pub fn contacts_within(map: &FloorMap, center: Point2D, heading: f32, reach: f32) -> Vec<Contact> {
    let mut contacts = Vec::new();
    let mut push = |target: GeometryRef, point: Point2D, distance: f32| {
        let d = point - center;
        let bearing = if d.length_squared() > 0.0 {
            angle_diff(heading, direction_to_heading(d.y.atan2(d.x)))
        } else {
            0.0
        };
        contacts.push(Contact {
            target,
            point,
            bearing,
            distance,
        });
    };

    let reach_circle = Circle::new(center, reach);
    let reach_box = reach_circle.bounding_rect();

    for wall in map.walls() {
        if !circle_aabb_overlap(&reach_circle, &Rect::new(wall.start, wall.end)) {
            continue;
        }
        let point = closest_point_on_segment(center, wall.start, wall.end);
        let distance = center.distance(point);
        if distance < reach {
            push(GeometryRef::Wall(wall.id), point, distance);
        }
    }
    for obstacle in map.obstacles() {
        let c = obstacle.shape;
        if !aabb_overlap(&reach_box, &c.bounding_rect()) {
            continue;
        }
        let to_center = c.center - center;
        let center_distance = to_center.length();
        let distance = (center_distance - c.radius).max(0.0);
        if distance < reach {
            let point = if center_distance > 0.0 {
                center + to_center * (distance / center_distance)
            } else {
                center
            };
            push(GeometryRef::Obstacle(obstacle.id), point, distance);
        }
    }

    contacts.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    contacts
}

/// Blocking contact for a move from `from` to `to`.
///
/// Only geometry overlapping the footprint at `to` and lying in the
/// direction of travel blocks; backing out of an overlap is allowed.
pub fn blocking_contact(
    map: &FloorMap,
    from: Point2D,
    to: Point2D,
    heading: f32,
    radius: f32,
) -> Option<Contact> {
    let step = to - from;
    if step.length_squared() == 0.0 {
        return None;
    }
    contacts_within(map, to, heading, radius)
        .into_iter()
        .find(|c| (c.point - to).dot(step) > 0.0 || c.distance == 0.0)
}

/// Bumper flags for the contacts around a pose.
pub fn bumper_state(contacts: &[Contact]) -> BumperState {
    let mut state = BumperState::default();
    for c in contacts {
        match c.side() {
            ContactSide::Front => state.front = true,
            ContactSide::Back => state.back = true,
        }
        if c.bearing > FRAC_PI_6 && c.bearing < 5.0 * FRAC_PI_6 {
            state.left = true;
        } else if c.bearing < -FRAC_PI_6 && c.bearing > -5.0 * FRAC_PI_6 {
            state.right = true;
        }
    }
    state
}

/// Outcome of one kinematic step
#[derive(Clone, Copy, Debug)]
pub struct StepResult {
    pub pose: RobotPose,
    pub collision: Option<Contact>,
}

/// Advance `pose` by `velocity` for `dt`, stopping translation on contact
/// and clamping into the map bounds.
pub fn step(
    pose: &RobotPose,
    velocity: &RobotVelocity,
    dt: f32,
    map: &FloorMap,
    robot: &RobotConfig,
) -> StepResult {
    let candidate = integrate(pose, velocity, dt);
    let collision = blocking_contact(
        map,
        pose.position(),
        candidate.position(),
        candidate.rotation,
        robot.robot_radius,
    );

    let mut next = match collision {
        // Rotation still applies; translation is discarded
        Some(_) => RobotPose::new(pose.x, pose.y, candidate.rotation),
        None => candidate,
    };

    let clamped = map
        .bounds()
        .clamp_point(next.position(), robot.robot_radius);
    next.x = clamped.x;
    next.y = clamped.y;

    StepResult {
        pose: next,
        collision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Rect;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn open_floor() -> FloorMap {
        FloorMap::new(Rect::from_size(2.0, 2.0), RobotPose::new(1.0, 1.0, 0.0))
    }

    #[test]
    fn test_equal_pwm_has_no_rotation() {
        let robot = RobotConfig::default();
        let mut motors = MotorState::default();
        motors.set_pwm(120, 120);
        let (l, r, _, _) = wheel_speeds(&motors, &robot);
        let v = body_velocity(l, r, robot.wheel_base);
        assert_eq!(v.angular, 0.0);
        assert!(v.linear > 0.0);
    }

    #[test]
    fn test_spin_is_clockwise_for_positive_left() {
        let robot = RobotConfig::default();
        let mut motors = MotorState::default();
        motors.set_pwm(100, -100);
        let (l, r, _, _) = wheel_speeds(&motors, &robot);
        let v = body_velocity(l, r, robot.wheel_base);
        assert_relative_eq!(v.linear, 0.0);
        assert!(v.angular < 0.0);
    }

    #[test]
    fn test_forward_moves_up() {
        let pose = RobotPose::new(1.0, 1.0, 0.0);
        let vel = RobotVelocity {
            linear: 0.1,
            angular: 0.0,
        };
        let next = integrate(&pose, &vel, 1.0);
        assert_relative_eq!(next.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(next.y, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_wall_ahead_blocks_translation() {
        let map = open_floor().with_wall(Point2D::new(0.0, 0.95), Point2D::new(2.0, 0.95));
        let robot = RobotConfig::default();
        let pose = RobotPose::new(1.0, 1.0, 0.0);
        let vel = RobotVelocity {
            linear: 0.2,
            angular: 0.1,
        };
        let result = step(&pose, &vel, 0.1, &map, &robot);

        let contact = result.collision.expect("wall should block");
        assert_eq!(contact.side(), ContactSide::Front);
        assert_relative_eq!(result.pose.y, 1.0);
        // Rotation is still committed
        assert_relative_eq!(result.pose.rotation, 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_reversing_away_from_wall_is_free() {
        let map = open_floor().with_wall(Point2D::new(0.0, 0.97), Point2D::new(2.0, 0.97));
        let robot = RobotConfig::default();
        // Already overlapping the wall ahead
        let pose = RobotPose::new(1.0, 1.0, 0.0);
        let vel = RobotVelocity {
            linear: -0.1,
            angular: 0.0,
        };
        let result = step(&pose, &vel, 0.1, &map, &robot);
        assert!(result.collision.is_none());
        assert_relative_eq!(result.pose.y, 1.01, epsilon = 1e-6);
    }

    #[test]
    fn test_obstacle_behind_is_back_contact() {
        let map = open_floor().with_obstacle(Point2D::new(1.0, 1.08), 0.03);
        let robot = RobotConfig::default();
        let pose = RobotPose::new(1.0, 1.0, 0.0);
        let vel = RobotVelocity {
            linear: -0.2,
            angular: 0.0,
        };
        let result = step(&pose, &vel, 0.1, &map, &robot);
        let contact = result.collision.expect("obstacle should block");
        assert_eq!(contact.side(), ContactSide::Back);
        assert!(matches!(contact.target, GeometryRef::Obstacle(_)));
    }

    #[test]
    fn test_pose_clamped_into_bounds() {
        let map = open_floor();
        let robot = RobotConfig::default();
        let pose = RobotPose::new(1.0, 0.05, 0.0);
        let vel = RobotVelocity {
            linear: 0.2,
            angular: 0.0,
        };
        let result = step(&pose, &vel, 1.0, &map, &robot);
        assert!(result.collision.is_none());
        assert_relative_eq!(result.pose.y, robot.robot_radius);
    }

    #[test]
    fn test_bumper_sides() {
        let map = open_floor().with_wall(Point2D::new(0.96, 0.0), Point2D::new(0.96, 2.0));
        // Heading 0 faces -Y; a wall at smaller X is on the left
        let contacts = contacts_within(&map, Point2D::new(1.0, 1.0), 0.0, 0.045);
        assert_eq!(contacts.len(), 1);
        assert_relative_eq!(contacts[0].bearing, PI / 2.0, epsilon = 1e-5);
        let bumper = bumper_state(&contacts);
        assert!(bumper.left);
        assert!(!bumper.right);
    }
}
