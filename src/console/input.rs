//! Button state

use serde::{Deserialize, Serialize};

/// Console buttons and their bit in the mask
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    X,
    Z,
    Left,
    Right,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::X,
        Button::Z,
        Button::Left,
        Button::Right,
        Button::Up,
        Button::Down,
    ];

    pub fn bit(self) -> u8 {
        match self {
            Button::X => 0x01,
            Button::Z => 0x02,
            Button::Left => 0x10,
            Button::Right => 0x20,
            Button::Up => 0x40,
            Button::Down => 0x80,
        }
    }

    pub fn from_name(name: &str) -> Option<Button> {
        match name.to_ascii_lowercase().as_str() {
            "x" | "a" => Some(Button::X),
            "z" | "b" => Some(Button::Z),
            "left" => Some(Button::Left),
            "right" => Some(Button::Right),
            "up" => Some(Button::Up),
            "down" => Some(Button::Down),
            _ => None,
        }
    }
}

/// Pressed-button bit mask
///
/// Press and release are idempotent; unknown bits are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonState(u8);

impl ButtonState {
    const VALID: u8 = 0x01 | 0x02 | 0x10 | 0x20 | 0x40 | 0x80;

    pub fn from_mask(mask: u8) -> Self {
        ButtonState(mask & Self::VALID)
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn press(&mut self, button: Button) {
        self.0 |= button.bit();
    }

    pub fn release(&mut self, button: Button) {
        self.0 &= !button.bit();
    }

    pub fn is_pressed(self, button: Button) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn pressed(self) -> Vec<Button> {
        Button::ALL
            .into_iter()
            .filter(|b| self.is_pressed(*b))
            .collect()
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}
