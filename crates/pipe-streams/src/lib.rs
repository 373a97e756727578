//! Per-output-stream packet management.
//!
//! One stream manager exists per output stream the client configured. It
//! meters the number of packets in flight, owns the backing storage for
//! pixel packets, and hands shared handles upward to the engine. Dispatch to
//! the engine always happens on a short-lived thread so a manager never
//! calls into the engine while holding its own locks.
//!
//! State machine (identical for both variants):
//!
//! `RESET` → (`set_max_in_flight`) → `CONFIG_DONE` → (RUN entry) →
//! `RUNNING` → (stop entry) → `STOPPED` → (stop transition-complete) →
//! `CONFIG_DONE`. A RUN abort drops `RUNNING` back to `CONFIG_DONE`; a stop
//! abort returns `STOPPED` to `RUNNING`.

mod pixel;
mod semantic;

use std::sync::Arc;

use pipe_types::{
    Error, InputFrame, MemHandle, OutputConfig, PacketType, Result, RunnerComponent,
};

pub use pixel::PixelStreamManager;
pub use semantic::SemanticStreamManager;

/// Stream manager → engine notifications. Implemented by the engine per
/// stream; calls may arrive from detached dispatch threads.
pub trait StreamEngineInterface: Send + Sync + 'static {
    /// Forward a packet toward the client. Must not block on the stream
    /// manager that produced it.
    fn dispatch_packet(&self, packet: MemHandle) -> Result;

    /// All in-flight packets have been reclaimed after a stop entry.
    /// Invoked from a thread other than the one driving the stop.
    fn notify_end_of_stream(&self);

    fn notify_error(&self, message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Reset,
    ConfigDone,
    Running,
    Stopped,
}

/// Common surface of both manager variants.
pub trait StreamManager: RunnerComponent {
    fn stream_id(&self) -> i32;

    fn packet_type(&self) -> PacketType;

    fn state(&self) -> StreamState;

    /// Adds a reference to the packet's slot. Returns `None` when the slot
    /// is no longer in flight or the handle belongs to another stream kind.
    fn clone_packet(&self, handle: &MemHandle) -> Option<MemHandle>;

    /// Releases one reference to a previously dispatched packet. Silently
    /// succeeds after the manager has stopped so late client releases are
    /// harmless.
    fn free_packet(&self, buffer_id: i32) -> Result;

    fn queue_semantic_packet(&self, data: &[u8], timestamp_us: u64) -> Result;

    fn queue_pixel_packet(&self, frame: &InputFrame<'_>, timestamp_us: u64) -> Result;
}

/// Builds and initializes the manager variant matching the stream's
/// descriptor. The returned manager is in `CONFIG_DONE`.
pub fn create_stream_manager(
    config: &OutputConfig,
    engine: Arc<dyn StreamEngineInterface>,
    max_in_flight: u32,
) -> Result<Arc<dyn StreamManager>> {
    match config.packet_type {
        PacketType::Semantic => {
            let manager = Arc::new(SemanticStreamManager::new(
                config.stream_name.clone(),
                config.stream_id,
                engine,
            ));
            manager.set_max_in_flight(max_in_flight)?;
            Ok(manager)
        }
        PacketType::Pixel => {
            let manager = Arc::new(PixelStreamManager::new(
                config.stream_name.clone(),
                config.stream_id,
                engine,
            ));
            manager.set_max_in_flight(max_in_flight)?;
            Ok(manager)
        }
    }
}

/// Validation shared by both variants.
fn check_max_in_flight(max_in_flight: u32) -> Result {
    if max_in_flight == 0 {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver, Sender};

    /// Records engine-side notifications for assertions. Dispatches arrive
    /// on channels because the managers deliver them from detached threads.
    pub(crate) struct MockEngine {
        packet_tx: Sender<MemHandle>,
        eos_tx: Sender<()>,
        error_tx: Sender<String>,
    }

    pub(crate) struct MockEngineProbe {
        pub packets: Receiver<MemHandle>,
        pub eos: Receiver<()>,
        pub errors: Receiver<String>,
    }

    pub(crate) fn mock_engine() -> (Arc<MockEngine>, MockEngineProbe) {
        let (packet_tx, packets) = unbounded();
        let (eos_tx, eos) = unbounded();
        let (error_tx, errors) = unbounded();
        (
            Arc::new(MockEngine {
                packet_tx,
                eos_tx,
                error_tx,
            }),
            MockEngineProbe {
                packets,
                eos,
                errors,
            },
        )
    }

    impl StreamEngineInterface for MockEngine {
        fn dispatch_packet(&self, packet: MemHandle) -> Result {
            let _ = self.packet_tx.send(packet);
            Ok(())
        }

        fn notify_end_of_stream(&self) {
            let _ = self.eos_tx.send(());
        }

        fn notify_error(&self, message: String) {
            let _ = self.error_tx.send(message);
        }
    }
}
