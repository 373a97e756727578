//! Client-interface adapter.
//!
//! The boundary between the runner engine and whatever transport carries
//! the client. [`ClientHost`] translates opaque command payloads into typed
//! engine calls, converts phase broadcasts into the five-value client state,
//! hands packets to per-stream handlers, and owns the [`Debugger`] that
//! persists profiling artifacts. Transport bindings sit on top of this crate
//! and only shuttle bytes.

mod debugger;
mod host;

pub use debugger::{Debugger, ProfilingArtifact, PROFILING_READ_TIMEOUT};
pub use host::{ClientHost, ClientPacket, PacketHandler, StateListener};
