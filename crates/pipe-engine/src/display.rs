//! Debug display sink.
//!
//! The runner can mirror one output stream to a rendering sink regardless of
//! client selection. Only the frame-submission contract lives here; a real
//! implementation would hand frames to a display service. The sink releases
//! pixel buffers through the free-packet callback once it is done with them.

use std::sync::Mutex;

use pipe_types::{MemHandle, PacketType, Result, RunnerComponent};
use tracing::debug;

pub type FreePacketFn = Box<dyn Fn(i32) -> Result + Send + Sync>;

pub trait DebugDisplay: RunnerComponent {
    /// Registered by the engine before the config phase; invoked with the
    /// buffer id of every pixel packet the display has finished with.
    fn set_free_packet_callback(&self, callback: FreePacketFn);

    fn display_frame(&self, packet: &MemHandle) -> Result;
}

/// Display sink that renders to the log and releases frames immediately.
#[derive(Default)]
pub struct LoggingDisplay {
    free_packet: Mutex<Option<FreePacketFn>>,
}

impl LoggingDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunnerComponent for LoggingDisplay {}

impl DebugDisplay for LoggingDisplay {
    fn set_free_packet_callback(&self, callback: FreePacketFn) {
        if let Ok(mut slot) = self.free_packet.lock() {
            *slot = Some(callback);
        }
    }

    fn display_frame(&self, packet: &MemHandle) -> Result {
        match packet.pixel_contents() {
            Some((desc, _data)) => debug!(
                target: "engine.display",
                stream = packet.stream_id(),
                width = desc.width,
                height = desc.height,
                timestamp_us = packet.timestamp_us(),
                "frame_presented"
            ),
            None => debug!(
                target: "engine.display",
                stream = packet.stream_id(),
                "non_pixel_packet_ignored"
            ),
        }
        if packet.packet_type() == PacketType::Pixel {
            if let Ok(slot) = self.free_packet.lock() {
                if let Some(free_packet) = slot.as_ref() {
                    free_packet(packet.buffer_id())?;
                }
            }
        }
        Ok(())
    }
}
