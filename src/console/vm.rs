//! Console virtual machine
//!
//! ```text
//!            load            start
//!   Idle ─────────▶ Paused ─────────▶ Running
//!    ▲                ▲   ◀── pause ──   │
//!    └──── stop ──────┴──────────────────┘
//!   any state ── fatal cartridge error ──▶ Error
//! ```
//!
//! Each frame, with the core lock held: drain robot events into feedback
//! tones, run one runtime update with the current buttons, map the buttons
//! to a drive command (game mode only). After the lock is released the drive
//! command is sent, then `FrameUpdate` and `Sound` are emitted.
//!
//! Only collisions and checkpoints are queued from the robot, at most
//! [`FEEDBACK_QUEUE`] of them between frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::cartridge::{Cartridge, CartridgeRuntime, FloorViewRuntime, FrameContext};
use super::framebuffer::{Framebuffer, Palette};
use super::input::{Button, ButtonState};
use super::mapping::{DriveCommand, GameMapping, MappingRegistry};
use super::sound::{SoundEvent, SoundQueue};
use crate::config::ConsoleConfig;
use crate::core::events::{EventBus, Subscription};
use crate::devices::DeviceRegistry;
use crate::error::{Error, Result};
use crate::protocol::{Command, actions};
use crate::sim::SimEvent;

/// Missed frames tolerated before the schedule is re-based
const MAX_LAG_FRAMES: u32 = 10;

/// Robot events held for the next frame; later ones are dropped
pub const FEEDBACK_QUEUE: usize = 64;

fn is_feedback(event: &SimEvent) -> bool {
    matches!(event, SimEvent::Collision(_) | SimEvent::CheckpointReached(_))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    #[default]
    Idle,
    Paused,
    Running,
    Error,
}

/// Who drives the robot while a game runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Buttons are mapped to drive commands
    #[default]
    Game,
    /// The cartridge only reads robot state
    Observe,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleEvent {
    StateChanged(VmState),
    FrameUpdate {
        frame_index: u64,
        framebuffer: Arc<Framebuffer>,
    },
    /// Tones requested during one frame
    Sound(Vec<SoundEvent>),
    Error(String),
}

struct RobotLink {
    registry: DeviceRegistry,
    device_id: String,
    sim_events: Option<Subscription<SimEvent>>,
}

struct Core {
    state: VmState,
    cartridge: Option<Cartridge>,
    runtime: Box<dyn CartridgeRuntime>,
    screen: Framebuffer,
    palette: Palette,
    buttons: ButtonState,
    frame_index: u64,
    sound: SoundQueue,
    mapping: Arc<dyn GameMapping>,
    sync_mode: SyncMode,
    last_drive: Option<DriveCommand>,
    robot: Option<RobotLink>,
}

struct Shared {
    name: String,
    core: Mutex<Core>,
    shutdown: AtomicBool,
    events: EventBus<ConsoleEvent>,
    mappings: MappingRegistry,
    frame_interval: Duration,
}

impl Shared {
    fn set_state(&self, core: &mut Core, state: VmState) {
        if core.state != state {
            log::info!("Console '{}': {:?} -> {:?}", self.name, core.state, state);
            core.state = state;
            self.events.emit(ConsoleEvent::StateChanged(state));
        }
    }

    fn fail(&self, core: &mut Core, message: String) -> Error {
        log::error!("Console '{}': {}", self.name, message);
        self.set_state(core, VmState::Error);
        self.events.emit(ConsoleEvent::Error(message.clone()));
        Error::Console(message)
    }

    /// Run one frame. Returns the index of the frame just rendered.
    fn step(&self) -> Result<u64> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.cartridge.is_none() {
            return Err(Error::Console("no cartridge loaded".to_string()));
        }
        if core.state == VmState::Error {
            return Err(Error::Console("console is in error state".to_string()));
        }

        let mut robot_state = None;
        let mut floor = None;
        let mut reached = Vec::new();
        if let Some(link) = &core.robot {
            if let Some(events) = &link.sim_events {
                for event in events.drain() {
                    match event {
                        SimEvent::Collision(_) => core.sound.play(SoundEvent::collision()),
                        SimEvent::CheckpointReached(_) => core.sound.play(SoundEvent::checkpoint()),
                        _ => {}
                    }
                }
            }
            if let Some(engine) = link.registry.engine(&link.device_id) {
                let engine = engine.lock();
                robot_state = Some(engine.state());
                floor = Some(engine.floor_map().clone());
                reached = engine.reached_checkpoints();
            }
        }

        let frame_index = core.frame_index;
        let mut ctx = FrameContext {
            frame_index,
            buttons: core.buttons,
            screen: &mut core.screen,
            sound: &mut core.sound,
            mapping: core.mapping.as_ref(),
            robot: robot_state.as_ref(),
            floor: floor.as_ref(),
            reached: &reached,
        };
        if let Err(e) = core.runtime.update(&mut ctx) {
            return Err(self.fail(core, format!("cartridge failed at frame {}: {}", frame_index, e)));
        }
        core.frame_index += 1;

        let mut drive = None;
        if core.sync_mode == SyncMode::Game
            && let Some(link) = &core.robot
        {
            let cmd = core.mapping.input_to_command(core.buttons);
            let changed = core.last_drive.replace(cmd) != Some(cmd);
            drive = Some((link.registry.clone(), link.device_id.clone(), cmd, changed));
        }
        let framebuffer = Arc::new(core.screen.clone());
        let sounds = core.sound.drain();
        drop(guard);

        if let Some((registry, id, cmd, changed)) = drive {
            if changed {
                log::debug!("Console drive {} <- ({}, {})", id, cmd.left, cmd.right);
            }
            if let Err(e) = registry.send_command(&id, &cmd.to_command()) {
                log::warn!("Console: drive to {} failed: {}", id, e);
            }
        }
        self.events.emit(ConsoleEvent::FrameUpdate {
            frame_index,
            framebuffer,
        });
        if !sounds.is_empty() {
            self.events.emit(ConsoleEvent::Sound(sounds));
        }
        Ok(frame_index)
    }

    /// Stop the robot if the console last told it to move.
    fn release_robot(&self) {
        let target = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            match (&core.robot, core.last_drive) {
                (Some(link), Some(last)) if !last.is_stop() => {
                    core.last_drive = Some(DriveCommand::STOP);
                    Some((link.registry.clone(), link.device_id.clone()))
                }
                _ => None,
            }
        };
        if let Some((registry, id)) = target
            && let Err(e) = registry.send_command(&id, &Command::new(actions::STOP))
        {
            log::warn!("Console: stop to {} failed: {}", id, e);
        }
    }
}

fn frame_loop(shared: Arc<Shared>) {
    let interval = shared.frame_interval;
    let mut next = Instant::now();

    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.core.lock().state != VmState::Running {
            break;
        }
        if shared.step().is_err() {
            break;
        }

        next += interval;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else if now - next > interval * MAX_LAG_FRAMES {
            log::warn!("Console '{}' fell behind, skipping frames", shared.name);
            next = now;
        }
    }
}

/// Frame-based game loop coupled to one robot
pub struct ConsoleVm {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleVm {
    /// Console with the built-in floor view runtime and mappings.
    pub fn new(name: &str, config: &ConsoleConfig) -> Self {
        Self::with_runtime(
            name,
            config,
            Box::new(FloorViewRuntime::default()),
            MappingRegistry::default(),
        )
    }

    pub fn with_runtime(
        name: &str,
        config: &ConsoleConfig,
        runtime: Box<dyn CartridgeRuntime>,
        mappings: MappingRegistry,
    ) -> Self {
        let fps = if config.fps.is_finite() && config.fps > 0.0 {
            config.fps
        } else {
            log::warn!("Invalid console fps {}, using 60", config.fps);
            60.0
        };
        let core = Core {
            state: VmState::Idle,
            cartridge: None,
            runtime,
            screen: Framebuffer::new(),
            palette: Palette::default(),
            buttons: ButtonState::default(),
            frame_index: 0,
            sound: SoundQueue::new(),
            mapping: mappings.default_mapping(),
            sync_mode: config.sync_mode,
            last_drive: None,
            robot: None,
        };
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                core: Mutex::new(core),
                shutdown: AtomicBool::new(false),
                events: EventBus::new(),
                mappings,
                frame_interval: Duration::from_secs_f32(1.0 / fps),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> Subscription<ConsoleEvent> {
        self.shared.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Robot
    // ------------------------------------------------------------------------

    /// Couple the console to a connected device.
    pub fn attach(&self, registry: &DeviceRegistry, device_id: &str) -> Result<()> {
        let device = registry
            .device(device_id)
            .ok_or_else(|| Error::Connection(format!("unknown device '{}'", device_id)))?;
        if !device.is_connected() {
            return Err(Error::Connection(format!(
                "device '{}' is not connected",
                device_id
            )));
        }
        self.release_robot();
        let sim_events = registry
            .engine(device_id)
            .map(|e| e.lock().events().subscribe_bounded(FEEDBACK_QUEUE, is_feedback));
        let mut core = self.shared.core.lock();
        core.robot = Some(RobotLink {
            registry: registry.clone(),
            device_id: device_id.to_string(),
            sim_events,
        });
        core.last_drive = None;
        log::info!("Console '{}' attached to {}", self.shared.name, device_id);
        Ok(())
    }

    pub fn detach(&self) {
        self.release_robot();
        self.shared.core.lock().robot = None;
    }

    pub fn attached_device(&self) -> Option<String> {
        self.shared.core.lock().robot.as_ref().map(|r| r.device_id.clone())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Load a cartridge image; the console ends up `Paused` at frame 0.
    pub fn load_cartridge(&self, bytes: &[u8], palette: Option<Palette>) -> Result<()> {
        self.halt_thread();
        self.release_robot();

        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        let cartridge = match Cartridge::parse(bytes) {
            Ok(c) => c,
            Err(e) => return Err(self.shared.fail(core, e.to_string())),
        };
        if let Err(e) = core.runtime.init(&cartridge) {
            return Err(self.shared.fail(core, format!("cartridge init failed: {}", e)));
        }

        core.mapping = self.shared.mappings.resolve(cartridge.title.as_deref());
        core.palette = palette.unwrap_or_default();
        core.frame_index = 0;
        core.buttons.clear();
        core.screen.clear(0);
        core.sound.drain();
        core.last_drive = None;
        log::info!(
            "Console '{}' loaded '{}' ({} bytes, mapping {})",
            self.shared.name,
            cartridge.title.as_deref().unwrap_or("untitled"),
            cartridge.code.len(),
            core.mapping.name()
        );
        core.cartridge = Some(cartridge);
        self.shared.set_state(core, VmState::Paused);
        Ok(())
    }

    /// Run the frame loop.
    pub fn start(&self) -> Result<()> {
        {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            match core.state {
                VmState::Running => return Ok(()),
                VmState::Error => {
                    return Err(Error::Console(
                        "console is in error state; load or reset first".to_string(),
                    ));
                }
                VmState::Idle => {
                    let Some(cartridge) = core.cartridge.as_ref() else {
                        return Err(Error::Console("no cartridge loaded".to_string()));
                    };
                    if let Err(e) = core.runtime.init(cartridge) {
                        return Err(self.shared.fail(core, format!("cartridge init failed: {}", e)));
                    }
                }
                VmState::Paused => {}
            }
            self.shared.set_state(core, VmState::Running);
        }
        self.spawn_thread()
    }

    pub fn pause(&self) -> Result<()> {
        {
            let mut core = self.shared.core.lock();
            match core.state {
                VmState::Running => self.shared.set_state(&mut core, VmState::Paused),
                VmState::Paused => return Ok(()),
                other => return Err(Error::Console(format!("cannot pause while {:?}", other))),
            }
        }
        self.halt_thread();
        self.release_robot();
        Ok(())
    }

    /// Halt the loop and rewind to frame 0; the cartridge stays loaded.
    pub fn stop(&self) {
        {
            let mut core = self.shared.core.lock();
            self.shared.set_state(&mut core, VmState::Idle);
        }
        self.halt_thread();
        self.shared.core.lock().frame_index = 0;
        self.release_robot();
    }

    /// Re-initialise the cartridge and respawn the attached robot.
    pub fn reset(&self) -> Result<()> {
        let was_running = self.state() == VmState::Running;
        self.halt_thread();
        self.release_robot();

        let respawn = {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            let Some(cartridge) = core.cartridge.as_ref() else {
                return Err(Error::Console("no cartridge loaded".to_string()));
            };
            if let Err(e) = core.runtime.init(cartridge) {
                return Err(self.shared.fail(core, format!("cartridge init failed: {}", e)));
            }
            core.frame_index = 0;
            core.buttons.clear();
            core.screen.clear(0);
            core.sound.drain();
            core.last_drive = None;
            if let Some(link) = &core.robot
                && let Some(events) = &link.sim_events
            {
                let _ = events.drain();
            }
            let next = if was_running {
                VmState::Running
            } else {
                VmState::Paused
            };
            self.shared.set_state(core, next);
            core.robot
                .as_ref()
                .map(|l| (l.registry.clone(), l.device_id.clone()))
        };

        if let Some((registry, id)) = respawn
            && let Err(e) = registry.send_command(&id, &Command::new(actions::RESPAWN))
        {
            log::warn!("Console: respawn of {} failed: {}", id, e);
        }
        if was_running {
            self.spawn_thread()?;
        }
        Ok(())
    }

    /// Run exactly one frame on the caller's thread.
    pub fn step_frame(&self) -> Result<u64> {
        if self.state() == VmState::Running {
            return Err(Error::Console("frame loop is running".to_string()));
        }
        self.shared.step()
    }

    fn spawn_thread(&self) -> Result<()> {
        // A loop that ended on its own still holds the slot
        self.halt_thread();
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("console-{}", self.shared.name))
            .spawn(move || frame_loop(shared))
            .map_err(|e| Error::Other(format!("Failed to spawn console thread: {}", e)))?;
        *slot = Some(handle);
        Ok(())
    }

    fn halt_thread(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            log::error!("Console '{}' thread panicked", self.shared.name);
        }
    }

    fn release_robot(&self) {
        self.shared.release_robot();
    }

    // ------------------------------------------------------------------------
    // Input and settings
    // ------------------------------------------------------------------------

    pub fn press(&self, button: Button) {
        self.shared.core.lock().buttons.press(button);
    }

    pub fn release(&self, button: Button) {
        self.shared.core.lock().buttons.release(button);
    }

    pub fn set_buttons(&self, buttons: ButtonState) {
        self.shared.core.lock().buttons = buttons;
    }

    pub fn buttons(&self) -> ButtonState {
        self.shared.core.lock().buttons
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        let previous = std::mem::replace(&mut self.shared.core.lock().sync_mode, mode);
        if previous == SyncMode::Game && mode == SyncMode::Observe {
            self.release_robot();
        }
        if previous != mode {
            log::info!("Console '{}' sync mode {:?}", self.shared.name, mode);
        }
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.shared.core.lock().sync_mode
    }

    pub fn set_palette(&self, palette: Palette) {
        self.shared.core.lock().palette = palette;
    }

    pub fn palette(&self) -> Palette {
        self.shared.core.lock().palette
    }

    /// Use a different mapping without reloading.
    pub fn set_mapping(&self, mapping: Arc<dyn GameMapping>) {
        let mut core = self.shared.core.lock();
        core.mapping = mapping;
        core.last_drive = None;
    }

    pub fn mapping_name(&self) -> String {
        self.shared.core.lock().mapping.name().to_string()
    }

    pub fn mappings(&self) -> &MappingRegistry {
        &self.shared.mappings
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn state(&self) -> VmState {
        self.shared.core.lock().state
    }

    /// Frames rendered since load, stop or reset
    pub fn frame_index(&self) -> u64 {
        self.shared.core.lock().frame_index
    }

    pub fn framebuffer(&self) -> Framebuffer {
        self.shared.core.lock().screen.clone()
    }

    pub fn cartridge_title(&self) -> Option<String> {
        self.shared
            .core
            .lock()
            .cartridge
            .as_ref()
            .and_then(|c| c.title.clone())
    }

    pub fn has_cartridge(&self) -> bool {
        self.shared.core.lock().cartridge.is_some()
    }
}

impl Drop for ConsoleVm {
    fn drop(&mut self) {
        self.halt_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::devices::VIRTUAL_DEVICE_ID;
    use crate::sim::SimulationConfig;
    use crate::transport::MockPortProvider;

    fn virtual_robot() -> DeviceRegistry {
        let registry = DeviceRegistry::new(
            Arc::new(MockPortProvider::new()),
            TransportConfig::default(),
            SimulationConfig::noiseless(),
        );
        registry.discover();
        registry.connect(VIRTUAL_DEVICE_ID).unwrap();
        registry
    }

    fn queued_robot_events(vm: &ConsoleVm) -> usize {
        let core = vm.shared.core.lock();
        core.robot
            .as_ref()
            .and_then(|link| link.sim_events.as_ref())
            .map_or(0, |events| events.pending())
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    struct FailingRuntime {
        fail_at: u64,
    }

    impl CartridgeRuntime for FailingRuntime {
        fn init(&mut self, _cartridge: &Cartridge) -> Result<()> {
            Ok(())
        }

        fn update(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
            if ctx.frame_index == self.fail_at {
                return Err(Error::Other("trap".to_string()));
            }
            ctx.screen.pixel(0, 0, 1);
            Ok(())
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let vm = ConsoleVm::new("test", &ConsoleConfig::default());
        assert_eq!(vm.state(), VmState::Idle);
        assert!(vm.start().is_err());

        vm.load_cartridge(b"code", None).unwrap();
        assert_eq!(vm.state(), VmState::Paused);
        assert_eq!(vm.step_frame().unwrap(), 0);
        assert_eq!(vm.step_frame().unwrap(), 1);
        assert_eq!(vm.frame_index(), 2);

        vm.stop();
        assert_eq!(vm.state(), VmState::Idle);
        assert_eq!(vm.frame_index(), 0);
        assert!(vm.pause().is_err());
    }

    #[test]
    fn test_runtime_failure_moves_to_error() {
        let vm = ConsoleVm::with_runtime(
            "test",
            &ConsoleConfig::default(),
            Box::new(FailingRuntime { fail_at: 1 }),
            MappingRegistry::default(),
        );
        let events = vm.subscribe();
        vm.load_cartridge(b"code", None).unwrap();
        vm.step_frame().unwrap();
        assert!(matches!(vm.step_frame(), Err(Error::Console(_))));
        assert_eq!(vm.state(), VmState::Error);
        assert!(vm.start().is_err());
        assert!(
            events
                .drain()
                .iter()
                .any(|e| matches!(e, ConsoleEvent::Error(_)))
        );

        vm.reset().unwrap();
        assert_eq!(vm.state(), VmState::Paused);
    }

    #[test]
    fn test_mapping_selected_by_title() {
        let vm = ConsoleVm::new("test", &ConsoleConfig::default());
        let cart = Cartridge::new(Some("Arcade"), vec![1]).to_bytes();
        vm.load_cartridge(&cart, None).unwrap();
        assert_eq!(vm.mapping_name(), "arcade");
        assert_eq!(vm.cartridge_title().as_deref(), Some("Arcade"));

        vm.load_cartridge(b"raw", None).unwrap();
        assert_eq!(vm.mapping_name(), "tank");
    }

    #[test]
    fn test_running_loop_advances_frames() {
        let vm = ConsoleVm::new("test", &ConsoleConfig::default());
        vm.load_cartridge(b"code", None).unwrap();
        vm.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        vm.pause().unwrap();
        let frames = vm.frame_index();
        assert!(frames > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(vm.frame_index(), frames);
    }

    #[test]
    fn test_paused_console_queues_only_feedback() {
        let registry = virtual_robot();
        let vm = ConsoleVm::new("test", &ConsoleConfig::default());
        vm.attach(&registry, VIRTUAL_DEVICE_ID).unwrap();
        vm.load_cartridge(b"code", None).unwrap();
        assert_eq!(vm.state(), VmState::Paused);

        // Per-tick snapshots keep flowing but are not queued
        thread::sleep(Duration::from_millis(300));
        assert_eq!(queued_robot_events(&vm), 0);

        let engine = registry.engine(VIRTUAL_DEVICE_ID).unwrap();
        for _ in 0..FEEDBACK_QUEUE * 3 {
            engine.lock().events().emit(SimEvent::CheckpointReached(0));
        }
        assert_eq!(queued_robot_events(&vm), FEEDBACK_QUEUE);

        vm.step_frame().unwrap();
        assert_eq!(queued_robot_events(&vm), 0);
    }

    #[test]
    fn test_start_reaps_loop_that_exited_on_error() {
        let vm = ConsoleVm::with_runtime(
            "test",
            &ConsoleConfig::default(),
            Box::new(FailingRuntime { fail_at: 3 }),
            MappingRegistry::default(),
        );
        vm.load_cartridge(b"code", None).unwrap();
        vm.start().unwrap();
        assert!(wait_for(|| vm.state() == VmState::Error));
        assert_eq!(vm.frame_index(), 3);
        assert!(vm.thread.lock().is_some());

        // Recover in place; the finished loop's handle is still in the slot
        {
            let mut core = vm.shared.core.lock();
            core.frame_index = 10;
            vm.shared.set_state(&mut core, VmState::Paused);
        }
        vm.start().unwrap();
        assert!(wait_for(|| vm.frame_index() > 12));
        assert_eq!(vm.state(), VmState::Running);
        vm.stop();
    }
}
