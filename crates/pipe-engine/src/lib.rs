//! Runner engine: lifecycle owner of the whole pipeline.
//!
//! The engine owns the config builder, the per-stream and per-input
//! managers, the graph adapter, and the client/display handles. A single
//! worker thread consumes a command/error queue and drives the
//! RESET → CONFIG → RUN → STOP phase machine; every phase broadcast happens
//! on that thread, so transitions are serialized by construction. Inbound
//! calls from the client, the graph, and the stream managers only enqueue
//! work or touch the protected maps briefly.

mod config;
mod display;
mod engine;

use pipe_types::{ConfigurationCommand, ControlCommand, MemHandle, Result, RunnerComponent};

pub use config::ConfigBuilder;
pub use display::{DebugDisplay, FreePacketFn, LoggingDisplay};
pub use engine::{Engine, EnginePhase, EngineSettings, ErrorSource};

/// Engine → client boundary. Implemented by the client-interface adapter;
/// also receives every phase broadcast through [`RunnerComponent`].
pub trait ClientInterface: RunnerComponent {
    /// Opens the interface to external clients.
    fn activate(&self) -> Result;

    /// Forwards one output packet. Must not call back into the stream
    /// manager that produced the packet.
    fn dispatch_packet_to_client(&self, stream_id: i32, packet: &MemHandle) -> Result;

    fn deliver_graph_debug_info(&self, data: &str) -> Result;
}

/// Client → engine boundary.
pub trait ClientEngineInterface: Send + Sync {
    fn process_client_config_update(&self, command: &ConfigurationCommand) -> Result;

    fn process_client_command(&self, command: &ControlCommand) -> Result;

    /// Client is done with a previously dispatched packet.
    fn free_packet(&self, buffer_id: i32, stream_id: i32) -> Result;
}
