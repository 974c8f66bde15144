//! Screen ⇄ floor mappings
//!
//! A [`GameMapping`] is a stateless bundle of three functions: pixel to
//! floor, floor to pixel, and buttons to a drive command. Mappings are picked
//! per cartridge title through the [`MappingRegistry`] and can be swapped
//! while the device keeps running.
//!
//! The floor rectangle is scaled uniformly to fit the screen and centred.
//! Both frames have y pointing down, so no axis is flipped.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::framebuffer::{SCREEN_HEIGHT, SCREEN_WIDTH};
use super::input::{Button, ButtonState};
use crate::core::geometry::{Point2D, Rect};
use crate::protocol::Command;

/// Cruise duty of the built-in mappings
pub const CRUISE_PWM: i32 = 160;
/// Duty with the boost button (X) held
pub const BOOST_PWM: i32 = 255;

/// Wheel duty pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: i32,
    pub right: i32,
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand { left: 0, right: 0 };

    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    pub fn is_stop(&self) -> bool {
        self.left == 0 && self.right == 0
    }

    pub fn to_command(self) -> Command {
        Command::drive(self.left, self.right)
    }
}

/// Uniform fit of `bounds` into the screen: (pixels per meter, x offset, y offset)
fn fit(bounds: &Rect) -> (f32, f32, f32) {
    let w = bounds.width().max(f32::EPSILON);
    let h = bounds.height().max(f32::EPSILON);
    let scale = (SCREEN_WIDTH as f32 / w).min(SCREEN_HEIGHT as f32 / h);
    let ox = (SCREEN_WIDTH as f32 - w * scale) / 2.0;
    let oy = (SCREEN_HEIGHT as f32 - h * scale) / 2.0;
    (scale, ox, oy)
}

pub trait GameMapping: Send + Sync {
    fn name(&self) -> &str;

    /// Screen pixel to floor position (meters).
    fn pixel_to_floor(&self, px: f32, py: f32, bounds: &Rect) -> Point2D {
        let (scale, ox, oy) = fit(bounds);
        Point2D::new(
            bounds.min.x + (px - ox) / scale,
            bounds.min.y + (py - oy) / scale,
        )
    }

    /// Floor position to the nearest screen pixel.
    fn floor_to_pixel(&self, p: Point2D, bounds: &Rect) -> (i32, i32) {
        let (scale, ox, oy) = fit(bounds);
        (
            ((p.x - bounds.min.x) * scale + ox).round() as i32,
            ((p.y - bounds.min.y) * scale + oy).round() as i32,
        )
    }

    /// Meters to pixels, for radii and widths.
    fn length_to_pixels(&self, meters: f32, bounds: &Rect) -> i32 {
        let (scale, _, _) = fit(bounds);
        (meters * scale).round() as i32
    }

    fn input_to_command(&self, buttons: ButtonState) -> DriveCommand;
}

/// Both tracks forward or back with UP/DOWN; LEFT/RIGHT alone spin in
/// place, combined with UP/DOWN they slow the inner track to an arc. X
/// boosts, Z is a brake.
#[derive(Clone, Copy, Debug, Default)]
pub struct TankMapping;

impl GameMapping for TankMapping {
    fn name(&self) -> &str {
        "tank"
    }

    fn input_to_command(&self, buttons: ButtonState) -> DriveCommand {
        if buttons.is_pressed(Button::Z) {
            return DriveCommand::STOP;
        }
        let speed = if buttons.is_pressed(Button::X) {
            BOOST_PWM
        } else {
            CRUISE_PWM
        };
        let throttle = match (buttons.is_pressed(Button::Up), buttons.is_pressed(Button::Down)) {
            (true, false) => speed,
            (false, true) => -speed,
            _ => 0,
        };
        let turn = match (buttons.is_pressed(Button::Left), buttons.is_pressed(Button::Right)) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };

        match (throttle, turn) {
            (0, 0) => DriveCommand::STOP,
            (0, t) => DriveCommand::new(-t * speed, t * speed),
            (v, 0) => DriveCommand::new(v, v),
            // Arc: inner track at half duty
            (v, 1) => DriveCommand::new(v / 2, v),
            (v, _) => DriveCommand::new(v, v / 2),
        }
    }
}

/// Throttle/steer mixing: `left = throttle − steer`, `right = throttle + steer`
/// with steer at half the throttle duty, so turns are gentler than the tank
/// mapping's spin. X boosts, Z is a brake.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArcadeMapping;

impl GameMapping for ArcadeMapping {
    fn name(&self) -> &str {
        "arcade"
    }

    fn input_to_command(&self, buttons: ButtonState) -> DriveCommand {
        if buttons.is_pressed(Button::Z) {
            return DriveCommand::STOP;
        }
        let speed = if buttons.is_pressed(Button::X) {
            BOOST_PWM
        } else {
            CRUISE_PWM
        };
        let axis = |pos: Button, neg: Button| -> i32 {
            buttons.is_pressed(pos) as i32 - buttons.is_pressed(neg) as i32
        };
        let throttle = axis(Button::Up, Button::Down) * speed;
        let steer = axis(Button::Left, Button::Right) * speed / 2;
        DriveCommand::new(
            (throttle - steer).clamp(-BOOST_PWM, BOOST_PWM),
            (throttle + steer).clamp(-BOOST_PWM, BOOST_PWM),
        )
    }
}

/// Title → mapping lookup with a tank fallback
pub struct MappingRegistry {
    mappings: HashMap<String, Arc<dyn GameMapping>>,
    default: Arc<dyn GameMapping>,
}

impl Default for MappingRegistry {
    fn default() -> Self {
        let mut registry = Self {
            mappings: HashMap::new(),
            default: Arc::new(TankMapping),
        };
        registry.register("tank", Arc::new(TankMapping));
        registry.register("arcade", Arc::new(ArcadeMapping));
        registry
    }
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a cartridge title (case-insensitive) with a mapping.
    pub fn register(&mut self, title: &str, mapping: Arc<dyn GameMapping>) {
        self.mappings.insert(title.trim().to_lowercase(), mapping);
    }

    pub fn get(&self, title: &str) -> Option<Arc<dyn GameMapping>> {
        self.mappings.get(&title.trim().to_lowercase()).cloned()
    }

    /// Mapping for a cartridge title, or the default.
    pub fn resolve(&self, title: Option<&str>) -> Arc<dyn GameMapping> {
        title
            .and_then(|t| self.get(t))
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    pub fn default_mapping(&self) -> Arc<dyn GameMapping> {
        Arc::clone(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn buttons(list: &[Button]) -> ButtonState {
        let mut s = ButtonState::default();
        for b in list {
            s.press(*b);
        }
        s
    }

    #[test]
    fn test_floor_pixel_round_trip() {
        let bounds = Rect::from_size(2.0, 2.0);
        let m = TankMapping;
        assert_eq!(m.floor_to_pixel(Point2D::new(1.0, 1.0), &bounds), (80, 80));
        assert_eq!(m.floor_to_pixel(Point2D::new(0.0, 0.0), &bounds), (0, 0));
        let p = m.pixel_to_floor(40.0, 120.0, &bounds);
        assert_relative_eq!(p.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_non_square_floor_is_centred() {
        let bounds = Rect::from_size(4.0, 2.0);
        let m = TankMapping;
        // 40 px/m, 40 px vertical margin
        assert_eq!(m.floor_to_pixel(Point2D::new(0.0, 0.0), &bounds), (0, 40));
        assert_eq!(m.length_to_pixels(0.5, &bounds), 20);
    }

    #[test]
    fn test_tank_mapping() {
        let m = TankMapping;
        assert_eq!(m.input_to_command(buttons(&[])), DriveCommand::STOP);
        assert_eq!(m.input_to_command(buttons(&[Button::Up])), DriveCommand::new(160, 160));
        assert_eq!(m.input_to_command(buttons(&[Button::Down, Button::X])), DriveCommand::new(-255, -255));
        assert_eq!(m.input_to_command(buttons(&[Button::Left])), DriveCommand::new(-160, 160));
        assert_eq!(m.input_to_command(buttons(&[Button::Up, Button::Right])), DriveCommand::new(160, 80));
        assert_eq!(m.input_to_command(buttons(&[Button::Up, Button::Z])), DriveCommand::STOP);
    }

    #[test]
    fn test_arcade_mapping() {
        let m = ArcadeMapping;
        assert_eq!(m.input_to_command(buttons(&[Button::Left])), DriveCommand::new(-80, 80));
        assert_eq!(m.input_to_command(buttons(&[Button::Up, Button::Left])), DriveCommand::new(80, 240));
        assert_eq!(
            m.input_to_command(buttons(&[Button::Up, Button::Left, Button::X])),
            DriveCommand::new(128, 255)
        );
    }

    #[test]
    fn test_registry_resolves_titles() {
        let registry = MappingRegistry::new();
        assert_eq!(registry.resolve(Some("Arcade")).name(), "arcade");
        assert_eq!(registry.resolve(Some("unknown game")).name(), "tank");
        assert_eq!(registry.resolve(None).name(), "tank");
    }
}
