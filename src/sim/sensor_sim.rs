//! Line sensor array simulation
//!
//! Sensors sit on a row perpendicular to the heading, `forward_offset` ahead
//! of the robot center, ordered left to right. Each reads 255 when it is over
//! a painted track (within half the track width of the centerline), fading
//! linearly to 0 across `edge_falloff` beyond the edge.

use super::config::LineSensorConfig;
use super::floor_map::FloorMap;
use crate::core::geometry::Point2D;
use crate::core::math::heading_vector;
use crate::core::types::RobotPose;
use std::f32::consts::FRAC_PI_2;

/// Intensity above which a sensor counts as "on the line"
pub const ON_LINE_THRESHOLD: u8 = 128;

/// Line sensor array simulator
pub struct LineSensorArray {
    config: LineSensorConfig,
}

impl LineSensorArray {
    pub fn new(config: &LineSensorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// World positions of the sensors, left to right.
    pub fn sensor_positions(&self, pose: &RobotPose) -> Vec<Point2D> {
        let (fx, fy) = heading_vector(pose.rotation);
        let (lx, ly) = heading_vector(pose.rotation + FRAC_PI_2);
        let forward = Point2D::new(fx, fy);
        let left = Point2D::new(lx, ly);
        let base = pose.position() + forward * self.config.forward_offset;
        let half_span = (self.config.count.saturating_sub(1)) as f32 * 0.5;

        (0..self.config.count)
            .map(|i| {
                let lateral = (half_span - i as f32) * self.config.spacing;
                base + left * lateral
            })
            .collect()
    }

    /// Read all sensors.
    pub fn read(&self, map: &FloorMap, pose: &RobotPose) -> Vec<u8> {
        self.sensor_positions(pose)
            .into_iter()
            .map(|p| self.intensity_at(map, p))
            .collect()
    }

    fn intensity_at(&self, map: &FloorMap, p: Point2D) -> u8 {
        let falloff = self.config.edge_falloff;
        map.lines()
            .iter()
            .map(|line| {
                let outside = line.distance_to(p) - line.width * 0.5;
                if outside <= 0.0 {
                    255.0
                } else if falloff > 0.0 && outside < falloff {
                    255.0 * (1.0 - outside / falloff)
                } else {
                    0.0
                }
            })
            .fold(0.0f32, f32::max)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}
