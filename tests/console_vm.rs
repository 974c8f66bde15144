//! Console VM Integration Tests
//!
//! Couples a console to a virtual robot through the device registry and
//! checks drive forwarding, sync modes, feedback tones, reset and the frame
//! stream.
//!
//! Run with: `cargo test --test console_vm`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use yantra_io::config::{ConsoleConfig, TransportConfig};
use yantra_io::console::mapping::CRUISE_PWM;
use yantra_io::console::{
    Button, Cartridge, Channel, ConsoleEvent, ConsoleVm, SoundEvent, SyncMode, VmState,
};
use yantra_io::core::geometry::{Point2D, Rect};
use yantra_io::core::types::RobotPose;
use yantra_io::devices::{DeviceRegistry, VIRTUAL_DEVICE_ID};
use yantra_io::sim::{EngineHandle, FloorMap, SimulationConfig};
use yantra_io::transport::MockPortProvider;

// ============================================================================
// Helpers
// ============================================================================

fn arena() -> FloorMap {
    FloorMap::new(Rect::from_size(2.0, 2.0), RobotPose::new(1.0, 1.0, 0.0))
}

/// Registry with the virtual robot connected on `map`
fn connected(map: FloorMap) -> (DeviceRegistry, EngineHandle) {
    let registry = DeviceRegistry::new(
        Arc::new(MockPortProvider::new()),
        TransportConfig::default(),
        SimulationConfig::noiseless(),
    );
    registry.set_default_floor_map(map);
    registry.discover();
    registry.connect(VIRTUAL_DEVICE_ID).unwrap();
    let engine = registry.engine(VIRTUAL_DEVICE_ID).unwrap();
    (registry, engine)
}

fn console(registry: &DeviceRegistry, mode: SyncMode) -> ConsoleVm {
    let config = ConsoleConfig {
        sync_mode: mode,
        ..ConsoleConfig::default()
    };
    let vm = ConsoleVm::new("test", &config);
    vm.attach(registry, VIRTUAL_DEVICE_ID).unwrap();
    vm.load_cartridge(&Cartridge::new(Some("tank"), Vec::new()).to_bytes(), None)
        .unwrap();
    vm
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn sounds(events: &[ConsoleEvent]) -> Vec<SoundEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            ConsoleEvent::Sound(s) => Some(s.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

// ============================================================================
// Drive coupling
// ============================================================================

#[test]
fn test_game_mode_forwards_drive_every_frame() {
    let (registry, engine) = connected(arena());
    let vm = console(&registry, SyncMode::Game);

    vm.press(Button::Up);
    vm.step_frame().unwrap();
    let motors = engine.lock().motors();
    assert_eq!(motors.left_pwm, CRUISE_PWM as i16);
    assert_eq!(motors.right_pwm, CRUISE_PWM as i16);

    // Held buttons re-assert the command after an outside stop
    engine.lock().stop_motors();
    vm.step_frame().unwrap();
    assert_eq!(engine.lock().motors().left_pwm, CRUISE_PWM as i16);

    // Spin left in place
    vm.release(Button::Up);
    vm.press(Button::Left);
    vm.step_frame().unwrap();
    let motors = engine.lock().motors();
    assert_eq!(motors.left_pwm, -CRUISE_PWM as i16);
    assert_eq!(motors.right_pwm, CRUISE_PWM as i16);

    // Pausing releases the robot
    vm.start().unwrap();
    vm.pause().unwrap();
    assert!(engine.lock().motors().is_stopped());
}

#[test]
fn test_held_buttons_drive_again_after_collision() {
    let map = arena().with_wall(Point2D::new(0.0, 0.93), Point2D::new(2.0, 0.93));
    let (registry, engine) = connected(map);
    let vm = console(&registry, SyncMode::Game);

    // Arc into the wall; contact zeroes the motors
    vm.press(Button::Up);
    vm.press(Button::Left);
    vm.step_frame().unwrap();
    assert!(wait_until(|| engine.lock().motors().is_stopped()));
    let heading = engine.lock().pose().rotation;

    // Same buttons, no new input: the frames keep pushing and the robot turns
    assert!(wait_until(|| {
        vm.step_frame().unwrap();
        thread::sleep(Duration::from_millis(20));
        engine.lock().pose().rotation != heading
    }));
}

#[test]
fn test_observe_mode_leaves_robot_alone() {
    let (registry, engine) = connected(arena());
    let vm = console(&registry, SyncMode::Observe);

    vm.press(Button::Up);
    vm.press(Button::X);
    for _ in 0..3 {
        vm.step_frame().unwrap();
    }
    assert!(engine.lock().motors().is_stopped());

    // The console still renders whatever the robot does
    engine.lock().drive(100, 100);
    assert!(wait_until(|| engine.lock().pose().y < 0.98));
    let events = vm.subscribe();
    vm.step_frame().unwrap();
    assert!(
        events
            .drain()
            .iter()
            .any(|e| matches!(e, ConsoleEvent::FrameUpdate { .. }))
    );
}

#[test]
fn test_switching_to_observe_stops_robot() {
    let (registry, engine) = connected(arena());
    let vm = console(&registry, SyncMode::Game);

    vm.press(Button::Down);
    vm.step_frame().unwrap();
    assert_eq!(engine.lock().motors().left_pwm, -CRUISE_PWM as i16);

    vm.set_sync_mode(SyncMode::Observe);
    assert_eq!(vm.sync_mode(), SyncMode::Observe);
    assert!(engine.lock().motors().is_stopped());
}

// ============================================================================
// Feedback tones
// ============================================================================

#[test]
fn test_collision_plays_noise_tone() {
    let map = arena().with_wall(Point2D::new(0.0, 0.93), Point2D::new(2.0, 0.93));
    let (registry, engine) = connected(map);
    let vm = console(&registry, SyncMode::Game);
    let events = vm.subscribe();

    vm.press(Button::Up);
    vm.step_frame().unwrap();
    // The engine zeroes the PWMs on contact
    assert!(wait_until(|| engine.lock().motors().is_stopped()));

    vm.step_frame().unwrap();
    let tones = sounds(&events.drain());
    assert!(!tones.is_empty());
    assert!(tones.iter().all(|t| t.channel == Channel::Noise));
    assert_eq!(tones[0].frequency_hz, 220);
    assert_eq!(tones[0].duration_ms, 100);
}

#[test]
fn test_checkpoint_plays_pulse_tone_once() {
    let map = arena().with_checkpoint(Point2D::new(1.0, 0.9), 0.05);
    let (registry, engine) = connected(map);
    let vm = console(&registry, SyncMode::Game);
    let events = vm.subscribe();

    vm.press(Button::Up);
    vm.step_frame().unwrap();
    assert!(wait_until(|| !engine.lock().reached_checkpoints().is_empty()));
    vm.step_frame().unwrap();
    vm.step_frame().unwrap();

    let tones = sounds(&events.drain());
    assert_eq!(tones, vec![SoundEvent::checkpoint()]);
    assert_eq!(tones[0].channel, Channel::Pulse1);
    assert_eq!(tones[0].frequency_hz, 880);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_reset_respawns_robot() {
    let (registry, engine) = connected(arena());
    let vm = console(&registry, SyncMode::Game);

    vm.press(Button::Up);
    vm.press(Button::X);
    vm.step_frame().unwrap();
    assert!(wait_until(|| engine.lock().pose().y < 0.95));

    vm.reset().unwrap();
    assert_eq!(vm.state(), VmState::Paused);
    assert_eq!(vm.frame_index(), 0);
    assert!(vm.buttons().pressed().is_empty());

    let engine = engine.lock();
    assert!(engine.motors().is_stopped());
    assert_relative_eq!(engine.pose().x, 1.0, epsilon = 1e-5);
    assert_relative_eq!(engine.pose().y, 1.0, epsilon = 1e-5);
}

#[test]
fn test_frames_render_robot() {
    let (registry, _engine) = connected(arena());
    let vm = console(&registry, SyncMode::Observe);
    let events = vm.subscribe();

    for expected in 0..3 {
        assert_eq!(vm.step_frame().unwrap(), expected);
    }
    let frames: Vec<(u64, u8)> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ConsoleEvent::FrameUpdate {
                frame_index,
                framebuffer,
            } => Some((frame_index, framebuffer.get(80, 80).unwrap_or(0))),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![(0, 3), (1, 3), (2, 3)]);
}

#[test]
fn test_running_loop_streams_frames() {
    let (registry, _engine) = connected(arena());
    let vm = console(&registry, SyncMode::Game);
    let events = vm.subscribe();

    vm.start().unwrap();
    assert_eq!(vm.state(), VmState::Running);
    assert!(vm.step_frame().is_err());

    let mut frames = 0;
    let deadline = Instant::now() + Duration::from_secs(3);
    while frames < 5 && Instant::now() < deadline {
        if let Some(ConsoleEvent::FrameUpdate { .. }) = events.recv_timeout(Duration::from_millis(100)) {
            frames += 1;
        }
    }
    assert_eq!(frames, 5);

    vm.stop();
    assert_eq!(vm.state(), VmState::Idle);
    assert_eq!(vm.frame_index(), 0);
    assert!(vm.has_cartridge());
}

#[test]
fn test_attach_requires_connected_device() {
    let registry = DeviceRegistry::new(
        Arc::new(MockPortProvider::new()),
        TransportConfig::default(),
        SimulationConfig::noiseless(),
    );
    registry.discover();
    let vm = ConsoleVm::new("test", &ConsoleConfig::default());
    assert!(vm.attach(&registry, VIRTUAL_DEVICE_ID).is_err());
    assert!(vm.attach(&registry, "ghost").is_err());
    assert!(vm.attached_device().is_none());
}
