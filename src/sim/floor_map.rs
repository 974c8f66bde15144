//! Floor map geometry
//!
//! A floor map is a small arena of indexed geometry records. Walls, obstacles
//! and line tracks carry explicit ids, so collision and raycast results can
//! refer back to the exact record that caused them.
//!
//! All coordinates are floor meters (X right, Y down). The JSON form is a
//! plain record:
//!
//! ```json
//! {
//!   "bounds": {"min": {"x": 0, "y": 0}, "max": {"x": 2, "y": 2}},
//!   "walls": [{"start": {"x": 0, "y": 0}, "end": {"x": 2, "y": 0}}],
//!   "obstacles": [{"center": {"x": 1, "y": 0.5}, "radius": 0.05}],
//!   "lines": [{"points": [{"x": 0.2, "y": 1}, {"x": 1.8, "y": 1}], "width": 0.02}],
//!   "checkpoints": [{"position": {"x": 1, "y": 0.3}, "radius": 0.1}],
//!   "start_pose": {"x": 1, "y": 1, "rotation": 0}
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::core::geometry::{
    Circle, Point2D, Rect, point_to_segment_distance, ray_circle_intersection,
    ray_segment_intersection,
};
use crate::core::types::RobotPose;

/// Index of a wall segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WallId(pub u32);

/// Stable id of an obstacle (survives removal of other obstacles)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObstacleId(pub u32);

/// Index of a line track
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(pub u32);

/// Reference from a query result back to the geometry it hit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GeometryRef {
    Wall(WallId),
    Obstacle(ObstacleId),
}

/// Wall segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wall {
    pub id: WallId,
    pub start: Point2D,
    pub end: Point2D,
}

/// Circular obstacle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub shape: Circle,
}

/// Line track: a polyline with a painted width
#[derive(Clone, Debug, PartialEq)]
pub struct LineTrack {
    pub id: LineId,
    pub points: Vec<Point2D>,
    pub width: f32,
}

impl LineTrack {
    /// Distance from `p` to the track's centerline.
    pub fn distance_to(&self, p: Point2D) -> f32 {
        match self.points.as_slice() {
            [] => f32::INFINITY,
            [only] => p.distance(*only),
            pts => pts
                .windows(2)
                .map(|w| point_to_segment_distance(p, w[0], w[1]))
                .fold(f32::INFINITY, f32::min),
        }
    }
}

/// Checkpoint: a goal disc; its index in the map is its identity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub position: Point2D,
    pub radius: f32,
}

/// Nearest hit of a ray cast
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub target: GeometryRef,
}

/// Static geometry one robot navigates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "FloorMapRecord", into = "FloorMapRecord")]
pub struct FloorMap {
    bounds: Rect,
    walls: Vec<Wall>,
    obstacles: Vec<Obstacle>,
    lines: Vec<LineTrack>,
    checkpoints: Vec<Checkpoint>,
    start_pose: RobotPose,
    next_obstacle_id: u32,
}

impl Default for FloorMap {
    /// 2 m × 2 m walled arena, spawn at the center facing up
    fn default() -> Self {
        FloorMap::new(Rect::from_size(2.0, 2.0), RobotPose::new(1.0, 1.0, 0.0)).with_boundary_walls()
    }
}

impl FloorMap {
    /// Empty map with the given bounds and spawn pose.
    pub fn new(bounds: Rect, start_pose: RobotPose) -> Self {
        Self {
            bounds,
            walls: Vec::new(),
            obstacles: Vec::new(),
            lines: Vec::new(),
            checkpoints: Vec::new(),
            start_pose,
            next_obstacle_id: 0,
        }
    }

    pub fn with_wall(mut self, start: Point2D, end: Point2D) -> Self {
        self.push_wall(start, end);
        self
    }

    /// Add four walls along the bounds.
    pub fn with_boundary_walls(mut self) -> Self {
        let c = self.bounds.corners();
        for i in 0..4 {
            self.push_wall(c[i], c[(i + 1) % 4]);
        }
        self
    }

    pub fn with_obstacle(mut self, center: Point2D, radius: f32) -> Self {
        self.add_obstacle(center, radius);
        self
    }

    pub fn with_line(mut self, points: Vec<Point2D>, width: f32) -> Self {
        let id = LineId(self.lines.len() as u32);
        self.lines.push(LineTrack {
            id,
            points,
            width: width.max(0.0),
        });
        self
    }

    pub fn with_checkpoint(mut self, position: Point2D, radius: f32) -> Self {
        self.checkpoints.push(Checkpoint {
            position,
            radius: radius.max(0.0),
        });
        self
    }

    fn push_wall(&mut self, start: Point2D, end: Point2D) {
        let id = WallId(self.walls.len() as u32);
        self.walls.push(Wall { id, start, end });
    }

    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn lines(&self) -> &[LineTrack] {
        &self.lines
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn start_pose(&self) -> RobotPose {
        self.start_pose
    }

    pub fn wall(&self, id: WallId) -> Option<&Wall> {
        self.walls.get(id.0 as usize)
    }

    pub fn obstacle(&self, id: ObstacleId) -> Option<&Obstacle> {
        self.obstacles.iter().find(|o| o.id == id)
    }

    /// Add an obstacle at runtime. Non-finite input is rejected as `None`.
    pub fn add_obstacle(&mut self, center: Point2D, radius: f32) -> Option<ObstacleId> {
        if !center.is_finite() || !radius.is_finite() {
            return None;
        }
        let id = ObstacleId(self.next_obstacle_id);
        self.next_obstacle_id += 1;
        self.obstacles.push(Obstacle {
            id,
            shape: Circle::new(center, radius.max(0.0)),
        });
        Some(id)
    }

    pub fn clear_obstacles(&mut self) {
        self.obstacles.clear();
    }

    /// Nearest wall or obstacle hit along a ray within `max_range` meters.
    ///
    /// `angle` uses the math convention (direction `(cos, sin)`); bounds are
    /// not solid unless walled.
    pub fn raycast(&self, origin: Point2D, angle: f32, max_range: f32) -> Option<RayHit> {
        let walls = self.walls.iter().filter_map(|w| {
            ray_segment_intersection(origin, angle, w.start, w.end).map(|d| RayHit {
                distance: d,
                target: GeometryRef::Wall(w.id),
            })
        });
        let obstacles = self.obstacles.iter().filter_map(|o| {
            ray_circle_intersection(origin, angle, o.shape.center, o.shape.radius).map(|d| RayHit {
                distance: d,
                target: GeometryRef::Obstacle(o.id),
            })
        });
        walls
            .chain(obstacles)
            .filter(|hit| hit.distance <= max_range)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

// ============================================================================
// Serialized form
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
struct WallRecord {
    start: Point2D,
    end: Point2D,
}

#[derive(Clone, Serialize, Deserialize)]
struct LineRecord {
    points: Vec<Point2D>,
    width: f32,
}

#[derive(Clone, Serialize, Deserialize)]
struct FloorMapRecord {
    bounds: Rect,
    #[serde(default)]
    walls: Vec<WallRecord>,
    #[serde(default)]
    obstacles: Vec<Circle>,
    #[serde(default)]
    lines: Vec<LineRecord>,
    #[serde(default)]
    checkpoints: Vec<Checkpoint>,
    start_pose: RobotPose,
}

impl From<FloorMapRecord> for FloorMap {
    fn from(r: FloorMapRecord) -> Self {
        let bounds = Rect::new(r.bounds.min, r.bounds.max);
        let mut map = FloorMap::new(bounds, r.start_pose);
        for w in r.walls {
            map.push_wall(w.start, w.end);
        }
        for o in r.obstacles {
            map.add_obstacle(o.center, o.radius);
        }
        for l in r.lines {
            map = map.with_line(l.points, l.width);
        }
        for c in r.checkpoints {
            map = map.with_checkpoint(c.position, c.radius);
        }
        map
    }
}

impl From<FloorMap> for FloorMapRecord {
    fn from(m: FloorMap) -> Self {
        Self {
            bounds: m.bounds,
            walls: m
                .walls
                .iter()
                .map(|w| WallRecord {
                    start: w.start,
                    end: w.end,
                })
                .collect(),
            obstacles: m.obstacles.iter().map(|o| o.shape).collect(),
            lines: m
                .lines
                .into_iter()
                .map(|l| LineRecord {
                    points: l.points,
                    width: l.width,
                })
                .collect(),
            checkpoints: m.checkpoints,
            start_pose: m.start_pose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_default_arena_is_walled() {
        let map = FloorMap::default();
        assert_eq!(map.walls().len(), 4);
        assert_relative_eq!(map.bounds().width(), 2.0);
        assert_eq!(map.start_pose(), RobotPose::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_raycast_reports_nearest_geometry() {
        let map = FloorMap::default().with_obstacle(Point2D::new(1.0, 0.5), 0.1);
        // Straight up (-Y) from the center: obstacle at 0.4 before the wall at 1.0
        let hit = map.raycast(Point2D::new(1.0, 1.0), -FRAC_PI_2, 5.0).unwrap();
        assert_relative_eq!(hit.distance, 0.4, epsilon = 1e-5);
        assert_eq!(hit.target, GeometryRef::Obstacle(ObstacleId(0)));

        let hit = map.raycast(Point2D::new(1.0, 1.0), 0.0, 5.0).unwrap();
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-5);
        assert!(matches!(hit.target, GeometryRef::Wall(_)));
    }

    #[test]
    fn test_raycast_respects_max_range() {
        let map = FloorMap::default();
        assert!(map.raycast(Point2D::new(1.0, 1.0), 0.0, 0.5).is_none());
    }

    #[test]
    fn test_obstacle_ids_are_stable() {
        let mut map = FloorMap::default();
        let a = map.add_obstacle(Point2D::new(0.5, 0.5), 0.05).unwrap();
        map.clear_obstacles();
        let b = map.add_obstacle(Point2D::new(0.5, 0.5), 0.05).unwrap();
        assert_ne!(a, b);
        assert!(map.obstacle(a).is_none());
        assert!(map.obstacle(b).is_some());
        assert!(map.add_obstacle(Point2D::new(f32::NAN, 0.0), 0.1).is_none());
    }

    #[test]
    fn test_line_track_distance() {
        let map = FloorMap::default().with_line(
            vec![Point2D::new(0.0, 1.0), Point2D::new(1.0, 1.0), Point2D::new(1.0, 2.0)],
            0.02,
        );
        let line = &map.lines()[0];
        assert_relative_eq!(line.distance_to(Point2D::new(0.5, 1.1)), 0.1, epsilon = 1e-6);
        assert_relative_eq!(line.distance_to(Point2D::new(1.2, 1.5)), 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_json_round_trip_assigns_ids() {
        let json = r#"{
            "bounds": {"min": {"x": 2, "y": 2}, "max": {"x": 0, "y": 0}},
            "walls": [{"start": {"x": 0, "y": 0}, "end": {"x": 2, "y": 0}}],
            "obstacles": [{"center": {"x": 1, "y": 0.5}, "radius": 0.05}],
            "checkpoints": [{"position": {"x": 1, "y": 0.3}, "radius": 0.1}],
            "start_pose": {"x": 1, "y": 1, "rotation": 0}
        }"#;
        let map: FloorMap = serde_json::from_str(json).unwrap();
        // Corners given in any order are normalized
        assert_relative_eq!(map.bounds().min.x, 0.0);
        assert_eq!(map.walls()[0].id, WallId(0));
        assert_eq!(map.obstacles()[0].id, ObstacleId(0));
        assert_eq!(map.checkpoints().len(), 1);

        let back = serde_json::to_value(&map).unwrap();
        assert_eq!(back["walls"].as_array().unwrap().len(), 1);
    }
}
