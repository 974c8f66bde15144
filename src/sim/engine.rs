//! Per-robot physics engine
//!
//! [`PhysicsEngine`] owns the true state of one simulated robot and advances
//! it in fixed ticks. Each tick:
//!
//! ```text
//! 1. PWM → wheel speeds → (linear, angular)
//! 2. Integrate a candidate pose
//! 3. Collision check; on contact keep the old position, zero the PWMs
//! 4. Commit pose, clamp into bounds
//! 5. Distance, line, IMU, encoder and bumper readings
//! 6. Battery drain
//! 7. Checkpoints (each fires once per map load)
//! 8. Events: Collision / CheckpointReached / LowBattery, then StateUpdate
//! ```
//!
//! Out-of-range inputs are clamped, never rejected. A tick never fails.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use super::battery_sim::BatterySimulator;
use super::config::SimulationConfig;
use super::distance_sim::DistanceSimulator;
use super::encoder_sim::EncoderSimulator;
use super::events::{CollisionEvent, SimEvent};
use super::floor_map::{FloorMap, ObstacleId};
use super::imu_sim::ImuSimulator;
use super::noise::NoiseGenerator;
use super::physics::{self, BUMPER_TRIGGER_DISTANCE, Contact, ContactSide};
use super::sensor_sim::LineSensorArray;
use crate::core::events::{EventBus, Subscription};
use crate::core::geometry::Point2D;
use crate::core::math::normalize_angle;
use crate::core::types::{
    BatteryState, LedState, MotorState, RobotPose, RobotState, RobotVelocity, SensorData,
};
use crate::protocol::{Command, Response, actions};

/// Shared handle to an engine; the lock is held for a whole tick
pub type EngineHandle = Arc<Mutex<PhysicsEngine>>;

/// Simulated GPIO pin
#[derive(Clone, Copy, Debug, Default)]
struct GpioPin {
    level: bool,
    duty: Option<u8>,
}

/// Physics and sensor simulation for one robot
pub struct PhysicsEngine {
    config: SimulationConfig,
    map: FloorMap,

    pose: RobotPose,
    velocity: RobotVelocity,
    motors: MotorState,
    sensors: SensorData,
    battery: BatteryState,
    led: LedState,
    elapsed_s: f64,

    distance_sim: DistanceSimulator,
    line_sim: LineSensorArray,
    imu_sim: ImuSimulator,
    encoder_sim: EncoderSimulator,
    battery_sim: BatterySimulator,

    reached: BTreeSet<usize>,
    gpio: HashMap<u8, GpioPin>,
    events: EventBus<SimEvent>,
}

impl PhysicsEngine {
    pub fn new(config: SimulationConfig, map: FloorMap) -> Self {
        let mut root = NoiseGenerator::new(config.random_seed);
        let distance_sim = DistanceSimulator::new(&config.distance, root.fork());
        let imu_sim = ImuSimulator::new(&config.imu, root.fork());
        let encoder_sim =
            EncoderSimulator::new(&config.encoder, config.robot.ticks_per_meter, root.fork());
        let battery_sim = BatterySimulator::new(&config.battery);
        let line_sim = LineSensorArray::new(&config.line);

        let mut engine = Self {
            pose: map.start_pose(),
            velocity: RobotVelocity::default(),
            motors: MotorState::default(),
            sensors: SensorData::default(),
            battery: battery_sim.state(),
            led: LedState::default(),
            elapsed_s: 0.0,
            distance_sim,
            line_sim,
            imu_sim,
            encoder_sim,
            battery_sim,
            reached: BTreeSet::new(),
            gpio: HashMap::new(),
            events: EventBus::new(),
            config,
            map,
        };
        engine.place_at_start();
        engine
    }

    /// Wrap in a shared handle.
    pub fn into_handle(self) -> EngineHandle {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Store motor duty; applied on the next tick.
    pub fn drive(&mut self, left: i32, right: i32) {
        self.motors.set_pwm(left, right);
    }

    pub fn stop_motors(&mut self) {
        self.motors.stop();
    }

    pub fn set_led(&mut self, led: LedState) {
        self.led = match led {
            LedState::Matrix { matrix } => LedState::matrix(matrix),
            color => color,
        };
    }

    /// Return to the spawn pose with fresh encoders, battery and checkpoints.
    pub fn reset(&mut self) {
        self.encoder_sim.reset();
        self.battery_sim.reset();
        self.battery = self.battery_sim.state();
        self.led = LedState::default();
        self.elapsed_s = 0.0;
        self.reached.clear();
        self.gpio.clear();
        self.place_at_start();
        log::debug!("Simulation reset");
    }

    /// Return to the spawn pose, keeping counters and battery.
    pub fn respawn(&mut self) {
        self.place_at_start();
        log::debug!("Robot respawned at {:?}", self.pose);
    }

    /// Replace the floor map; resets pose and checkpoint progress.
    pub fn load_floor_map(&mut self, map: FloorMap) {
        log::info!(
            "Loaded floor map: {:.2}x{:.2} m, {} walls, {} obstacles, {} checkpoints",
            map.bounds().width(),
            map.bounds().height(),
            map.walls().len(),
            map.obstacles().len(),
            map.checkpoints().len()
        );
        self.map = map;
        self.reached.clear();
        self.place_at_start();
    }

    pub fn add_obstacle(&mut self, center: Point2D, radius: f32) -> Option<ObstacleId> {
        self.map.add_obstacle(center, radius)
    }

    pub fn clear_obstacles(&mut self) {
        self.map.clear_obstacles();
    }

    fn place_at_start(&mut self) {
        let start = self.map.start_pose();
        let position = self
            .map
            .bounds()
            .clamp_point(start.position(), self.config.robot.robot_radius);
        self.pose = RobotPose::new(position.x, position.y, normalize_angle(start.rotation));
        self.velocity = RobotVelocity::default();
        self.motors.stop();
        self.imu_sim.reset();
        self.sense(0.0, None);
    }

    // ------------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let robot = &self.config.robot;
        let half_base = robot.wheel_base * 0.5;

        let (vl, vr, left_rpm, right_rpm) = physics::wheel_speeds(&self.motors, robot);
        self.motors.left_rpm = left_rpm;
        self.motors.right_rpm = right_rpm;
        let commanded = physics::body_velocity(vl, vr, robot.wheel_base);
        let draw_motors = self.motors;

        let result = physics::step(&self.pose, &commanded, dt, &self.map, robot);
        self.pose = result.pose;
        self.velocity = match result.collision {
            Some(_) => RobotVelocity {
                linear: 0.0,
                angular: commanded.angular,
            },
            None => commanded,
        };

        let mut events = Vec::new();
        if let Some(contact) = result.collision {
            self.motors.stop();
            log::debug!(
                "Collision ({:?}) with {:?} at ({:.3}, {:.3})",
                contact.side(),
                contact.target,
                self.pose.x,
                self.pose.y
            );
            events.push(SimEvent::Collision(CollisionEvent {
                side: contact.side(),
                target: contact.target,
                pose: self.pose,
            }));
        }

        // Encoders follow the committed motion
        let wheel_left = self.velocity.linear - self.velocity.angular * half_base;
        let wheel_right = self.velocity.linear + self.velocity.angular * half_base;
        self.sensors.encoders = self.encoder_sim.update(wheel_left, wheel_right, dt);
        self.sense(dt, result.collision.as_ref());

        let (battery, crossed_low) = self.battery_sim.update(&draw_motors, &self.led, dt);
        self.battery = battery;
        if crossed_low {
            log::warn!("Battery low: {:.1}%", battery.percentage);
            events.push(SimEvent::LowBattery {
                percentage: battery.percentage,
            });
        }

        let position = self.pose.position();
        for (index, checkpoint) in self.map.checkpoints().iter().enumerate() {
            if position.distance(checkpoint.position) <= checkpoint.radius
                && self.reached.insert(index)
            {
                log::info!("Checkpoint {} reached", index);
                events.push(SimEvent::CheckpointReached(index));
            }
        }

        self.elapsed_s += dt as f64;

        for event in events {
            self.events.emit(event);
        }
        self.events.emit(SimEvent::StateUpdate(Box::new(self.state())));
    }

    /// Refresh exteroceptive and inertial readings at the current pose.
    fn sense(&mut self, dt: f32, collision: Option<&Contact>) {
        let reach = self.config.robot.robot_radius + BUMPER_TRIGGER_DISTANCE;
        let contacts = physics::contacts_within(&self.map, self.pose.position(), self.pose.rotation, reach);
        let mut bumper = physics::bumper_state(&contacts);
        match collision.map(Contact::side) {
            Some(ContactSide::Front) => bumper.front = true,
            Some(ContactSide::Back) => bumper.back = true,
            None => {}
        }

        self.sensors.bumper = bumper;
        self.sensors.distance = self.distance_sim.measure(&self.map, &self.pose);
        self.sensors.line = self.line_sim.read(&self.map, &self.pose);
        self.sensors.imu = self.imu_sim.generate(&self.velocity, self.pose.rotation, dt);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Full state snapshot.
    pub fn state(&self) -> RobotState {
        RobotState {
            pose: self.pose,
            velocity: self.velocity,
            motors: self.motors,
            sensors: self.sensors.clone(),
            battery: self.battery,
            led: self.led.clone(),
            uptime_ms: (self.elapsed_s * 1000.0) as u64,
        }
    }

    pub fn pose(&self) -> RobotPose {
        self.pose
    }

    pub fn velocity(&self) -> RobotVelocity {
        self.velocity
    }

    pub fn motors(&self) -> MotorState {
        self.motors
    }

    pub fn sensors(&self) -> &SensorData {
        &self.sensors
    }

    pub fn battery(&self) -> BatteryState {
        self.battery
    }

    pub fn led(&self) -> &LedState {
        &self.led
    }

    pub fn floor_map(&self) -> &FloorMap {
        &self.map
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Indices of checkpoints reached since the last map load or reset.
    pub fn reached_checkpoints(&self) -> Vec<usize> {
        self.reached.iter().copied().collect()
    }

    pub fn subscribe(&self) -> Subscription<SimEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus<SimEvent> {
        &self.events
    }

    // ------------------------------------------------------------------------
    // In-process protocol handler
    // ------------------------------------------------------------------------

    /// Handle a wire command exactly as a physical device would.
    pub fn handle_command(&mut self, cmd: &Command) -> Response {
        match cmd.action.as_str() {
            actions::GET_INFO => Response::ok()
                .with("device", "cube-sim")
                .with("hardware", "virtual-cube")
                .with("firmware", concat!("sim-", env!("CARGO_PKG_VERSION")))
                .with("virtual", true)
                .with("distance_sensors", 8)
                .with("line_sensors", self.config.line.count),
            actions::DRIVE => match (cmd.param_i64("left"), cmd.param_i64("right")) {
                (Some(l), Some(r)) => {
                    self.drive(saturate_i32(l), saturate_i32(r));
                    Response::ok()
                        .with("left", self.motors.left_pwm)
                        .with("right", self.motors.right_pwm)
                }
                _ => Response::error("drive requires 'left' and 'right'"),
            },
            actions::STOP => {
                self.stop_motors();
                Response::ok()
            }
            actions::SET_LED => match cmd.params_as::<LedState>() {
                Ok(led) => {
                    self.set_led(led);
                    Response::ok()
                }
                Err(e) => Response::error(format!("invalid LED state: {}", e)),
            },
            actions::READ_SENSORS => Response::ok().with_record(&self.sensors),
            actions::GET_STATE => Response::ok().with_record(&self.state()),
            actions::RESET => {
                self.reset();
                Response::ok()
            }
            actions::RESPAWN => {
                self.respawn();
                Response::ok()
            }
            actions::ADD_OBSTACLE => {
                #[derive(Deserialize)]
                struct Params {
                    x: f32,
                    y: f32,
                    radius: f32,
                }
                match cmd.params_as::<Params>() {
                    Ok(p) => match self.add_obstacle(Point2D::new(p.x, p.y), p.radius) {
                        Some(id) => Response::ok().with("id", id.0),
                        None => Response::error("obstacle coordinates must be finite"),
                    },
                    Err(e) => Response::error(format!("invalid obstacle: {}", e)),
                }
            }
            actions::CLEAR_OBSTACLES => {
                self.clear_obstacles();
                Response::ok()
            }
            actions::SET_GPIO => match (gpio_pin(cmd), cmd.param("value")) {
                (Some(pin), Some(v)) => {
                    let level = v.as_bool().unwrap_or_else(|| v.as_i64().unwrap_or(0) != 0);
                    let entry = self.gpio.entry(pin).or_default();
                    entry.level = level;
                    entry.duty = None;
                    Response::ok()
                }
                _ => Response::error("set_gpio requires 'pin' and 'value'"),
            },
            actions::READ_GPIO => match gpio_pin(cmd) {
                Some(pin) => {
                    let level = self.gpio.get(&pin).map(|p| p.level).unwrap_or(false);
                    Response::ok().with("pin", pin).with("value", level as u8)
                }
                None => Response::error("read_gpio requires 'pin'"),
            },
            actions::SET_PWM => match (gpio_pin(cmd), cmd.param_i64("duty")) {
                (Some(pin), Some(duty)) => {
                    let duty = duty.clamp(0, 255) as u8;
                    let entry = self.gpio.entry(pin).or_default();
                    entry.duty = Some(duty);
                    entry.level = duty > 0;
                    Response::ok().with("pin", pin).with("duty", duty)
                }
                _ => Response::error("set_pwm requires 'pin' and 'duty'"),
            },
            actions::INSTALL_WASM => {
                let size = cmd.param_i64("size").unwrap_or(0);
                Response::ok()
                    .with("message", "simulated")
                    .with("size", size)
            }
            other => Response::error(format!("unknown action: {}", other)),
        }
    }
}

fn saturate_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn gpio_pin(cmd: &Command) -> Option<u8> {
    cmd.param_i64("pin").and_then(|p| u8::try_from(p).ok())
}
