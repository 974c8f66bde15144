//! Cartridges and the runtime that executes them
//!
//! Container layout (little endian):
//!
//! ```text
//! "R4CART" | version u8 | title_len u8 | title (UTF-8) | code_len u32 | code
//! ```
//!
//! Bytes without the magic are taken as an untitled cartridge whose whole
//! content is code. Running the code is the job of a [`CartridgeRuntime`];
//! the sandboxed executor lives outside this crate and plugs in through the
//! trait. [`FloorViewRuntime`] is the built-in runtime that draws the floor.

use super::framebuffer::Framebuffer;
use super::input::ButtonState;
use super::mapping::GameMapping;
use super::sound::SoundQueue;
use crate::core::types::RobotState;
use crate::error::{Error, Result};
use crate::sim::FloorMap;

pub const CARTRIDGE_MAGIC: &[u8; 6] = b"R4CART";
pub const CARTRIDGE_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cartridge {
    pub title: Option<String>,
    pub version: u8,
    pub code: Vec<u8>,
}

impl Cartridge {
    pub fn new(title: Option<&str>, code: Vec<u8>) -> Self {
        Self {
            title: title.map(str::to_string),
            version: CARTRIDGE_VERSION,
            code,
        }
    }

    /// Decode a cartridge image.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(body) = bytes.strip_prefix(CARTRIDGE_MAGIC.as_slice()) else {
            return Ok(Self {
                title: None,
                version: 0,
                code: bytes.to_vec(),
            });
        };

        let mut reader = ByteReader { data: body, pos: 0 };
        let version = reader.u8()?;
        let title_len = reader.u8()? as usize;
        let title = std::str::from_utf8(reader.take(title_len)?)
            .map_err(|e| Error::Console(format!("cartridge title is not UTF-8: {}", e)))?
            .to_string();
        let code_len = reader.u32()? as usize;
        let code = reader.take(code_len)?.to_vec();
        if reader.remaining() > 0 {
            log::warn!("Ignoring {} trailing cartridge bytes", reader.remaining());
        }

        Ok(Self {
            title: (!title.is_empty()).then_some(title),
            version,
            code,
        })
    }

    /// Encode with the magic header. Titles longer than 255 bytes are cut.
    pub fn to_bytes(&self) -> Vec<u8> {
        let title = self.title.as_deref().unwrap_or("");
        let mut cut = title.len().min(u8::MAX as usize);
        while !title.is_char_boundary(cut) {
            cut -= 1;
        }
        let title = &title.as_bytes()[..cut];

        let mut out = Vec::with_capacity(CARTRIDGE_MAGIC.len() + 6 + title.len() + self.code.len());
        out.extend_from_slice(CARTRIDGE_MAGIC);
        out.push(self.version);
        out.push(title.len() as u8);
        out.extend_from_slice(title);
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len()).ok_or_else(|| {
            Error::Console(format!(
                "truncated cartridge: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            ))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Everything a cartridge sees during one frame
pub struct FrameContext<'a> {
    pub frame_index: u64,
    pub buttons: ButtonState,
    pub screen: &'a mut Framebuffer,
    pub sound: &'a mut SoundQueue,
    pub mapping: &'a dyn GameMapping,
    /// Attached virtual robot, if any
    pub robot: Option<&'a RobotState>,
    pub floor: Option<&'a FloorMap>,
    /// Checkpoints reached since the map was loaded
    pub reached: &'a [usize],
}

/// Executes cartridge code one frame at a time
///
/// An `Err` from either method is fatal and moves the console to `Error`.
pub trait CartridgeRuntime: Send {
    /// Prepare a freshly loaded or reset cartridge.
    fn init(&mut self, cartridge: &Cartridge) -> Result<()>;

    /// Run one frame.
    fn update(&mut self, ctx: &mut FrameContext<'_>) -> Result<()>;
}

/// Robot body size drawn on screen
const ROBOT_MARKER_RADIUS: f32 = 0.04;

/// Top-down view of the floor and the attached robot
#[derive(Debug, Default)]
pub struct FloorViewRuntime {
    title: Option<String>,
}

impl CartridgeRuntime for FloorViewRuntime {
    fn init(&mut self, cartridge: &Cartridge) -> Result<()> {
        self.title = cartridge.title.clone();
        Ok(())
    }

    fn update(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        ctx.screen.clear(0);
        let Some(floor) = ctx.floor else {
            return Ok(());
        };
        let bounds = floor.bounds();
        let m = ctx.mapping;

        let (x0, y0) = m.floor_to_pixel(bounds.min, bounds);
        let (x1, y1) = m.floor_to_pixel(bounds.max, bounds);
        ctx.screen.rect(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0), 1);

        for track in floor.lines() {
            for pair in track.points.windows(2) {
                let (ax, ay) = m.floor_to_pixel(pair[0], bounds);
                let (bx, by) = m.floor_to_pixel(pair[1], bounds);
                ctx.screen.line(ax, ay, bx, by, 1);
            }
        }
        for wall in floor.walls() {
            let (ax, ay) = m.floor_to_pixel(wall.start, bounds);
            let (bx, by) = m.floor_to_pixel(wall.end, bounds);
            ctx.screen.line(ax, ay, bx, by, 2);
        }
        for obstacle in floor.obstacles() {
            let (cx, cy) = m.floor_to_pixel(obstacle.shape.center, bounds);
            let r = m.length_to_pixels(obstacle.shape.radius, bounds).max(1);
            ctx.screen.fill_circle(cx, cy, r, 2);
        }
        for (i, checkpoint) in floor.checkpoints().iter().enumerate() {
            let (cx, cy) = m.floor_to_pixel(checkpoint.position, bounds);
            let r = m.length_to_pixels(checkpoint.radius, bounds).max(1);
            if ctx.reached.contains(&i) {
                ctx.screen.fill_circle(cx, cy, r, 1);
            } else {
                ctx.screen.circle(cx, cy, r, 2);
            }
        }

        if let Some(robot) = ctx.robot {
            let pose = robot.pose;
            let (cx, cy) = m.floor_to_pixel(pose.position(), bounds);
            let r = m.length_to_pixels(ROBOT_MARKER_RADIUS, bounds).max(2);
            ctx.screen.fill_circle(cx, cy, r, 3);
            // Heading tick, forward is (−sin θ, −cos θ)
            let tick = r.saturating_add(2) as f32;
            let hx = cx.saturating_sub((pose.rotation.sin() * tick).round() as i32);
            let hy = cy.saturating_sub((pose.rotation.cos() * tick).round() as i32);
            ctx.screen.line(cx, cy, hx, hy, 3);
        }
        Ok(())
    }
}
