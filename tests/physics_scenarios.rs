//! Physics Engine Scenario Tests
//!
//! End-to-end checks of the simulated cube robot through the public engine
//! API. All maps are in meters; the 200×200 cm floor of the reference
//! scenario is the default 2 m arena with the robot spawned at its center.
//!
//! Run with: `cargo test --test physics_scenarios`

use approx::assert_relative_eq;
use yantra_io::core::geometry::{Point2D, Rect};
use yantra_io::core::types::{LedState, RobotPose};
use yantra_io::sim::{FloorMap, PhysicsEngine, SimEvent, SimulationConfig};

const DT: f32 = 0.01;

// ============================================================================
// Helpers
// ============================================================================

/// 2 m × 2 m floor without walls, spawn at the center
fn open_floor(rotation: f32) -> FloorMap {
    FloorMap::new(Rect::from_size(2.0, 2.0), RobotPose::new(1.0, 1.0, rotation))
}

fn noiseless(map: FloorMap) -> PhysicsEngine {
    PhysicsEngine::new(SimulationConfig::noiseless(), map)
}

fn run(engine: &mut PhysicsEngine, ticks: usize) {
    for _ in 0..ticks {
        engine.tick(DT);
    }
}

fn collisions(events: &[SimEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SimEvent::Collision(_)))
        .count()
}

// ============================================================================
// Kinematics
// ============================================================================

#[test]
fn test_equal_pwm_never_turns() {
    for pwm in [-255, -120, -1, 0, 1, 50, 200, 255] {
        let mut engine = noiseless(open_floor(0.3));
        engine.drive(pwm, pwm);
        engine.tick(DT);
        assert_eq!(engine.velocity().angular, 0.0, "pwm {}", pwm);
        assert_eq!(engine.pose().rotation, 0.3, "pwm {}", pwm);
    }
}

#[test]
fn test_forward_drive_follows_heading() {
    // Heading 0 faces −y; heading +π/2 faces −x
    for (rotation, dir) in [
        (0.0f32, Point2D::new(0.0, -1.0)),
        (std::f32::consts::FRAC_PI_2, Point2D::new(-1.0, 0.0)),
        (std::f32::consts::PI, Point2D::new(0.0, 1.0)),
    ] {
        let mut engine = noiseless(open_floor(rotation));
        engine.drive(120, 120);
        let n = 50;
        run(&mut engine, n);

        let linear = engine.velocity().linear;
        let travelled = linear * n as f32 * DT;
        let pose = engine.pose();
        assert_relative_eq!(pose.x, 1.0 + dir.x * travelled, epsilon = 1e-4);
        assert_relative_eq!(pose.y, 1.0 + dir.y * travelled, epsilon = 1e-4);
    }
}

#[test]
fn test_reference_scenario_drive_up_one_second() {
    let mut engine = PhysicsEngine::new(SimulationConfig::noiseless(), FloorMap::default());
    let events = engine.subscribe();
    engine.drive(50, 50);
    run(&mut engine, 100);

    let linear = engine.velocity().linear;
    assert!(linear > 0.0);
    let pose = engine.pose();
    assert_relative_eq!(pose.y, 1.0 - linear * 1.0, epsilon = 1e-4);
    assert_relative_eq!(pose.x, 1.0, epsilon = 1e-6);
    assert_eq!(collisions(&events.drain()), 0);
}

#[test]
fn test_spin_direction() {
    // Right wheel faster turns counter-clockwise (positive rotation)
    let mut engine = noiseless(open_floor(0.0));
    engine.drive(-100, 100);
    run(&mut engine, 10);
    assert!(engine.pose().rotation > 0.0);
    assert_relative_eq!(engine.pose().x, 1.0, epsilon = 1e-5);
    assert_relative_eq!(engine.pose().y, 1.0, epsilon = 1e-5);
}

#[test]
fn test_pwm_is_clamped() {
    let mut engine = noiseless(open_floor(0.0));
    engine.drive(10_000, -10_000);
    assert_eq!(engine.motors().left_pwm, 255);
    assert_eq!(engine.motors().right_pwm, -255);
}

// ============================================================================
// Bounds and collisions
// ============================================================================

#[test]
fn test_pose_stays_inside_unwalled_bounds() {
    let mut engine = noiseless(open_floor(0.0));
    engine.drive(255, 255);
    run(&mut engine, 2_000);

    let radius = engine.config().robot.robot_radius;
    let pose = engine.pose();
    assert!(pose.y >= radius - 1e-5, "y = {}", pose.y);
    assert!(pose.x > 0.0 && pose.x < 2.0);
}

#[test]
fn test_wall_blocks_and_reports_collision() {
    let mut engine = PhysicsEngine::new(SimulationConfig::noiseless(), FloorMap::default());
    let events = engine.subscribe();
    engine.drive(255, 255);
    run(&mut engine, 1_000);

    let drained = events.drain();
    assert!(collisions(&drained) >= 1);
    assert!(engine.motors().is_stopped());
    let radius = engine.config().robot.robot_radius;
    assert!(engine.pose().y >= radius - 1e-4);
    assert!(engine.sensors().bumper.front);
}

#[test]
fn test_can_back_away_from_wall() {
    let mut engine = PhysicsEngine::new(SimulationConfig::noiseless(), FloorMap::default());
    engine.drive(255, 255);
    run(&mut engine, 1_000);
    let stuck_y = engine.pose().y;

    engine.drive(-150, -150);
    run(&mut engine, 20);
    assert!(engine.pose().y > stuck_y);
}

// ============================================================================
// Sensors
// ============================================================================

#[test]
fn test_front_sensor_sees_wall_30cm_ahead() {
    let map = open_floor(0.0).with_wall(Point2D::new(0.0, 0.7), Point2D::new(2.0, 0.7));
    let config = SimulationConfig {
        random_seed: 42,
        ..SimulationConfig::default()
    };
    let mut engine = PhysicsEngine::new(config, map);
    for _ in 0..20 {
        engine.tick(DT);
        let front = engine.sensors().distance.front;
        assert!((29.0..=31.0).contains(&front), "front = {}", front);
    }
}

#[test]
fn test_distance_never_exceeds_max_range() {
    let config = SimulationConfig {
        random_seed: 7,
        ..SimulationConfig::default()
    };
    let max_range = config.distance.max_range_cm;
    let mut engine = PhysicsEngine::new(config, FloorMap::default());
    engine.drive(80, -60);
    for _ in 0..300 {
        engine.tick(DT);
        let d = engine.sensors().distance;
        for v in [
            d.front,
            d.front_left,
            d.front_right,
            d.left,
            d.right,
            d.back,
            d.back_left,
            d.back_right,
        ] {
            assert!((0.0..=max_range).contains(&v), "reading {}", v);
        }
    }
}

#[test]
fn test_encoders_count_forward_travel() {
    let mut engine = noiseless(open_floor(0.0));
    engine.drive(100, 100);
    run(&mut engine, 100);
    let expected = engine.velocity().linear * 1.0 * engine.config().robot.ticks_per_meter;
    let enc = engine.sensors().encoders;
    assert!((enc.left as f32 - expected).abs() <= 2.0, "left {}", enc.left);
    assert!((enc.right as f32 - expected).abs() <= 2.0, "right {}", enc.right);
}

// ============================================================================
// Battery and checkpoints
// ============================================================================

#[test]
fn test_battery_never_increases() {
    let mut engine = PhysicsEngine::new(SimulationConfig::default(), FloorMap::default());
    let mut last = engine.battery().percentage;
    for i in 0..2_000 {
        if i % 100 == 0 {
            let pwm = (i as i32 / 100 % 7) * 40 - 120;
            engine.drive(pwm, -pwm);
            engine.set_led(LedState::Color {
                r: (i % 255) as u8,
                g: 255,
                b: 0,
            });
        }
        engine.tick(DT);
        let battery = engine.battery();
        assert!(!battery.charging);
        assert!(battery.percentage <= last, "tick {}", i);
        assert!((0.0..=100.0).contains(&battery.percentage));
        last = battery.percentage;
    }
}

#[test]
fn test_checkpoint_at_spawn_fires_once() {
    let map = FloorMap::default().with_checkpoint(Point2D::new(1.0, 1.0), 0.1);
    let mut engine = noiseless(map);
    let events = engine.subscribe();
    run(&mut engine, 50);

    let reached: Vec<usize> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::CheckpointReached(i) => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(reached, vec![0]);
}

#[test]
fn test_loading_map_resets_pose_and_checkpoints() {
    let map = FloorMap::default().with_checkpoint(Point2D::new(1.0, 1.0), 0.1);
    let mut engine = noiseless(map.clone());
    engine.drive(100, 100);
    run(&mut engine, 30);
    assert_eq!(engine.reached_checkpoints(), vec![0]);

    engine.load_floor_map(map);
    assert_eq!(engine.pose(), RobotPose::new(1.0, 1.0, 0.0));
    assert!(engine.reached_checkpoints().is_empty());
    assert!(engine.motors().is_stopped());
}
