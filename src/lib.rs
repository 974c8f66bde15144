//! YantraIO - Cube robot simulation and device fleet library
//!
//! This library drives a differential-drive "cube robot" either in a
//! fixed-timestep simulation or on a physical microcontroller, behind a single
//! command vocabulary, and couples a fantasy-console frame loop to the same
//! robot state.
//!
//! ## Layers
//!
//! - [`sim`]: physics and sensor simulation ([`sim::PhysicsEngine`])
//! - [`transport`]: newline-delimited JSON links to physical devices
//! - [`devices`]: the [`devices::DeviceRegistry`] fleet and binary deployment
//! - [`console`]: the 160x160 console VM and its game mappings
//! - [`control`]: the typed inward command surface

pub mod config;
pub mod console;
pub mod control;
pub mod core;
pub mod devices;
pub mod error;
pub mod protocol;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
