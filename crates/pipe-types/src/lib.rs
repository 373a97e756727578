//! Shared data model for the framepipe runner.
//!
//! Leaf crate: every other runner crate depends on these types, so nothing in
//! here may reach upward (no engine, stream, or graph knowledge). The crate
//! holds the closed status taxonomy, packet handles, the phase/event model
//! components subscribe to, the graph options descriptor, and the two client
//! command families exchanged as opaque payloads at the runner boundary.

mod command;
mod error;
mod event;
mod frame;
mod handle;
mod options;
mod packet;

pub use command::{ConfigurationCommand, ControlCommand, ProfilingMode};
pub use error::{Error, Result, StatusCode};
pub use event::{
    ClientConfig, ClientState, EventPhase, PhaseState, RunnerComponent, RunnerEvent, INVALID_ID,
};
pub use frame::{FrameInfo, InputFrame};
pub use handle::{
    BufferDesc, MemHandle, PixelSlot, SemanticHandle, INVALID_BUFFER_ID, MAX_SEMANTIC_BYTES,
    USAGE_CPU_WRITE,
};
pub use options::{
    GraphOptions, InputConfig, InputStreamConfig, InputStreamSource, OutputConfig,
};
pub use packet::{PacketType, PixelFormat};
