//! Tone channels

use serde::{Deserialize, Serialize};

pub const MIN_FREQUENCY_HZ: u32 = 100;
pub const MAX_FREQUENCY_HZ: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
}

/// One tone request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundEvent {
    pub channel: Channel,
    pub frequency_hz: u32,
    pub duration_ms: u32,
    pub volume: u8,
}

impl SoundEvent {
    /// Frequency is clamped into the audible range of the buzzer.
    pub fn tone(channel: Channel, frequency_hz: u32, duration_ms: u32, volume: u8) -> Self {
        Self {
            channel,
            frequency_hz: frequency_hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ),
            duration_ms,
            volume,
        }
    }

    /// Feedback tone for a blocked move
    pub fn collision() -> Self {
        Self::tone(Channel::Noise, 220, 100, 200)
    }

    /// Feedback tone for a reached checkpoint
    pub fn checkpoint() -> Self {
        Self::tone(Channel::Pulse1, 880, 150, 200)
    }
}

/// Tones requested during the current frame
#[derive(Debug, Default)]
pub struct SoundQueue {
    pending: Vec<SoundEvent>,
}

impl SoundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&mut self, event: SoundEvent) {
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<SoundEvent> {
        std::mem::take(&mut self.pending)
    }
}
