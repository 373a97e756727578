//! Graph adapters.
//!
//! The engine consumes the computation graph through one polymorphic
//! surface, [`PrebuiltGraph`], with two implementations: an in-process
//! dynamic library speaking a flat C ABI ([`local`]) and a remote service
//! reached over a line-framed RPC connection ([`remote`]). Both report
//! produced packets and termination through [`PrebuiltEngineInterface`],
//! held weakly so adapters never keep the engine alive.

mod local;
mod remote;

use pipe_types::{GraphOptions, InputFrame, Result, RunnerComponent};

pub use local::{local_graph_from_library, LocalGraph};
pub use remote::wire;
pub use remote::{remote_graph_from_address, RemoteGraph, RPC_DEADLINE};

/// Lifecycle of the underlying graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Uninitialized,
    Stopped,
    Running,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Local,
    Remote,
}

/// Callbacks absorbed by the engine. Implementations must tolerate calls
/// from arbitrary adapter threads.
pub trait PrebuiltEngineInterface: Send + Sync {
    fn dispatch_pixel_data(&self, stream_id: i32, timestamp_us: u64, frame: &InputFrame<'_>);

    fn dispatch_semantic_data(&self, stream_id: i32, timestamp_us: u64, data: Vec<u8>);

    /// Exactly one termination per RUN cycle; `Ok(())` is a natural finish.
    fn dispatch_graph_termination(&self, status: Result, message: String);
}

/// Engine-facing capability set of a graph, local or remote. Lifecycle
/// operations arrive through the [`RunnerComponent`] phase handlers.
pub trait PrebuiltGraph: RunnerComponent {
    fn graph_kind(&self) -> GraphKind;

    fn graph_state(&self) -> GraphState;

    /// Last status reported by the graph; the execution is asynchronous, so
    /// a successful call can still be followed by a failed status here.
    fn status(&self) -> Result;

    fn error_message(&self) -> String;

    fn graph_options(&self) -> GraphOptions;

    fn set_input_stream_data(&self, stream_id: i32, timestamp_us: u64, data: &[u8]) -> Result;

    fn set_input_stream_pixel_data(
        &self,
        stream_id: i32,
        timestamp_us: u64,
        frame: &InputFrame<'_>,
    ) -> Result;

    fn start_profiling(&self) -> Result;

    fn stop_profiling(&self) -> Result;

    /// Profiling/debug blob; empty when the graph was started without
    /// debugging enabled.
    fn debug_info(&self) -> String;
}
