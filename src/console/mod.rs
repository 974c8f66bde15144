//! Fantasy console coupled to a robot
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Framebuffer`] | 160×160 screen, 4-colour [`Palette`] |
//! | [`ButtonState`] | X, Z and the d-pad as a bit mask |
//! | [`SoundEvent`] | tone requests on four channels |
//! | [`Cartridge`] | program container; executed by a [`CartridgeRuntime`] |
//! | [`GameMapping`] | screen ⇄ floor and buttons → drive command |
//! | [`ConsoleVm`] | frame loop, sync mode and robot feedback |

pub mod cartridge;
pub mod framebuffer;
pub mod input;
pub mod mapping;
pub mod sound;
mod vm;

pub use cartridge::{Cartridge, CartridgeRuntime, FloorViewRuntime, FrameContext};
pub use framebuffer::{Framebuffer, Palette, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use input::{Button, ButtonState};
pub use mapping::{ArcadeMapping, DriveCommand, GameMapping, MappingRegistry, TankMapping};
pub use sound::{Channel, SoundEvent};
pub use vm::{ConsoleEvent, ConsoleVm, SyncMode, VmState};
