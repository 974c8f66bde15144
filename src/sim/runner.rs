//! Fixed-rate simulation thread
//!
//! One named thread per running engine. Each iteration takes the engine lock,
//! runs one whole tick, releases it, and sleeps until the next deadline.
//! Stopping sets the shutdown flag and joins, so no tick is ever cut short.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::engine::EngineHandle;
use crate::error::{Error, Result};

/// Maximum number of missed deadlines before the schedule is re-based
const MAX_LAG_TICKS: u32 = 10;

/// Drives an engine at a fixed tick rate on its own thread
pub struct SimulationRunner {
    shutdown: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SimulationRunner {
    /// Spawn the tick thread.
    pub fn start(name: &str, engine: EngineHandle, tick_rate_hz: f32) -> Result<Self> {
        if !(tick_rate_hz.is_finite() && tick_rate_hz > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "tick rate must be positive, got {}",
                tick_rate_hz
            )));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let dt = 1.0 / tick_rate_hz;

        let shutdown_clone = Arc::clone(&shutdown);
        let ticks_clone = Arc::clone(&ticks);
        let handle = thread::Builder::new()
            .name(format!("sim-{}", name))
            .spawn(move || simulation_loop(engine, shutdown_clone, ticks_clone, dt))
            .map_err(|e| Error::Other(format!("Failed to spawn simulation thread: {}", e)))?;

        log::info!("Simulation '{}' started at {:.0} Hz", name, tick_rate_hz);
        Ok(Self {
            shutdown,
            ticks,
            handle: Some(handle),
        })
    }

    /// Stop and join the tick thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Simulation thread panicked");
            }
            log::debug!("Simulation stopped after {} ticks", self.tick_count());
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn simulation_loop(
    engine: EngineHandle,
    shutdown: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    dt: f32,
) {
    let interval = Duration::from_secs_f32(dt);
    let mut next_tick = Instant::now() + interval;

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
        }

        engine.lock().tick(dt);
        ticks.fetch_add(1, Ordering::Relaxed);

        next_tick += interval;
        let now = Instant::now();
        if now > next_tick + interval * MAX_LAG_TICKS {
            log::trace!("Simulation fell behind, re-basing schedule");
            next_tick = now + interval;
        }
    }
}
