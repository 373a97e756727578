//! Remote graph adapter.
//!
//! The graph runs in another process and is controlled over a line-framed
//! RPC connection. Every unary call opens a fresh connection and applies a
//! hard 100 ms read deadline; output streams are consumed by dedicated
//! observer threads (see [`observer`]).

mod observer;
pub mod wire;

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use pipe_types::{
    ClientConfig, Error, GraphOptions, InputFrame, Result, RunnerComponent, RunnerEvent,
    StatusCode,
};
use tracing::{error, info, warn};

use crate::{GraphKind, GraphState, PrebuiltEngineInterface, PrebuiltGraph};
use observer::StreamSetObserver;
use wire::{GraphRequest, GraphResponse};

/// Upper bound on every unary exchange with the graph service.
pub const RPC_DEADLINE: Duration = Duration::from_millis(100);

struct RemoteShared {
    state: GraphState,
    code: StatusCode,
    message: String,
}

pub(crate) struct RemoteCore {
    address: String,
    engine: RwLock<Weak<dyn PrebuiltEngineInterface>>,
    shared: Mutex<RemoteShared>,
}

impl RemoteCore {
    fn new(address: String, engine: Weak<dyn PrebuiltEngineInterface>) -> Self {
        Self {
            address,
            engine: RwLock::new(engine),
            shared: Mutex::new(RemoteShared {
                state: GraphState::Uninitialized,
                code: StatusCode::Success,
                message: String::new(),
            }),
        }
    }

    pub(crate) fn engine(&self) -> Option<Arc<dyn PrebuiltEngineInterface>> {
        self.engine.read().ok().and_then(|weak| weak.upgrade())
    }

    fn state(&self) -> GraphState {
        self.shared
            .lock()
            .map(|s| s.state)
            .unwrap_or(GraphState::Uninitialized)
    }

    fn set_state(&self, state: GraphState) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.state = state;
        }
    }

    fn record(&self, code: StatusCode, message: String) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.code = code;
            shared.message = message;
        }
    }

    fn unary(&self, request: &GraphRequest) -> Result<GraphResponse> {
        let mut socket = TcpStream::connect(&self.address).map_err(|e| {
            error!(target: "graph.remote", error = %e, "service_connect_failed");
            Error::Fatal
        })?;
        socket
            .set_read_timeout(Some(RPC_DEADLINE))
            .map_err(|_| Error::Fatal)?;
        socket
            .set_write_timeout(Some(RPC_DEADLINE))
            .map_err(|_| Error::Fatal)?;
        wire::write_message(&mut socket, request).map_err(|_| Error::Fatal)?;
        let mut reader = BufReader::new(socket);
        match wire::read_message::<_, GraphResponse>(&mut reader) {
            Ok(Some(response)) => Ok(response),
            Ok(None) | Err(_) => {
                error!(target: "graph.remote", request = ?request, "rpc_deadline_or_disconnect");
                Err(Error::Fatal)
            }
        }
    }

    /// Unary call whose response is a status; records code and message for
    /// later queries.
    fn status_call(&self, request: &GraphRequest) -> Result {
        match self.unary(request) {
            Ok(GraphResponse::Status { code, message }) => {
                if code != StatusCode::Success {
                    warn!(
                        target: "graph.remote",
                        request = ?request,
                        code = ?code,
                        message = %message,
                        "service_reported_failure"
                    );
                }
                self.record(code, message);
                code.into_result()
            }
            Ok(_) => {
                self.record(StatusCode::Internal, "unexpected response".to_string());
                Err(Error::Internal)
            }
            Err(e) => {
                self.record(StatusCode::from(Err(e)), "rpc transport failure".to_string());
                Err(e)
            }
        }
    }

    /// Terminal event from the stream set; also the point where the state
    /// flips so queries and the engine agree on what happened.
    pub(crate) fn dispatch_termination(&self, status: Result, message: String) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.state = GraphState::Stopped;
            shared.code = StatusCode::from(status);
            shared.message = message.clone();
        }
        if let Some(engine) = self.engine() {
            engine.dispatch_graph_termination(status, message);
        }
    }
}

pub struct RemoteGraph {
    core: Arc<RemoteCore>,
    options: GraphOptions,
    observers: Mutex<Option<StreamSetObserver>>,
}

/// Connects to the remote graph service and fetches its options descriptor.
pub fn remote_graph_from_address(
    address: &str,
    engine: Weak<dyn PrebuiltEngineInterface>,
) -> Result<Arc<RemoteGraph>> {
    let core = Arc::new(RemoteCore::new(address.to_string(), engine));
    let options = match core.unary(&GraphRequest::GetGraphOptions)? {
        GraphResponse::Options { serialized_options } => {
            GraphOptions::from_serialized(&serialized_options).map_err(|e| {
                error!(target: "graph.remote", "options_descriptor_parse_failed");
                e
            })?
        }
        _ => return Err(Error::Fatal),
    };
    info!(
        target: "graph.remote",
        graph = %options.graph_name,
        address,
        "remote_graph_initialized"
    );
    core.set_state(GraphState::Stopped);
    Ok(Arc::new(RemoteGraph {
        core,
        options,
        observers: Mutex::new(None),
    }))
}

impl RunnerComponent for RemoteGraph {
    fn handle_config_phase(&self, config: &ClientConfig) -> Result {
        if self.core.state() == GraphState::Uninitialized {
            return Err(Error::IllegalState);
        }
        if config.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if config.is_transition_complete() {
            return Ok(());
        }

        let serialized_config = config.serialized()?;
        self.core
            .status_call(&GraphRequest::SetGraphConfig { serialized_config })?;

        let stream_ids: Vec<i32> = config
            .output_stream_configs()?
            .keys()
            .copied()
            .collect();
        let observers = StreamSetObserver::new(
            self.core.address.clone(),
            stream_ids,
            Arc::downgrade(&self.core),
        );
        *self.observers.lock().map_err(|_| Error::Internal)? = Some(observers);
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if self.core.state() != GraphState::Stopped {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }

        {
            let observers = self.observers.lock().map_err(|_| Error::Internal)?;
            let Some(observers) = observers.as_ref() else {
                return Err(Error::IllegalState);
            };
            observers.start()?;
        }
        self.core.status_call(&GraphRequest::StartGraphExecution)?;
        self.core.set_state(GraphState::Running);
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if self.core.state() != GraphState::Running {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }

        self.core.status_call(&GraphRequest::StopGraphExecution {
            stop_immediate: false,
        })?;
        if let Ok(observers) = self.observers.lock() {
            if let Some(observers) = observers.as_ref() {
                // Streams drain at the server's pace; the set observer
                // reports termination when the last one closes.
                observers.stop(false);
            }
        }
        self.core.set_state(GraphState::Flushing);
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        if self.core.state() != GraphState::Running {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }

        self.core.status_call(&GraphRequest::StopGraphExecution {
            stop_immediate: true,
        })?;
        if let Ok(observers) = self.observers.lock() {
            if let Some(observers) = observers.as_ref() {
                observers.stop(true);
            }
        }
        self.core.set_state(GraphState::Stopped);
        Ok(())
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if self.core.state() != GraphState::Stopped {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }

        self.core.status_call(&GraphRequest::ResetGraph)?;
        *self.observers.lock().map_err(|_| Error::Internal)? = None;
        Ok(())
    }
}

impl PrebuiltGraph for RemoteGraph {
    fn graph_kind(&self) -> GraphKind {
        GraphKind::Remote
    }

    fn graph_state(&self) -> GraphState {
        self.core.state()
    }

    fn status(&self) -> Result {
        self.core
            .shared
            .lock()
            .map(|s| s.code.into_result())
            .unwrap_or(Err(Error::Internal))
    }

    fn error_message(&self) -> String {
        self.core
            .shared
            .lock()
            .map(|s| s.message.clone())
            .unwrap_or_default()
    }

    fn graph_options(&self) -> GraphOptions {
        self.options.clone()
    }

    fn set_input_stream_data(&self, _stream_id: i32, _timestamp_us: u64, _data: &[u8]) -> Result {
        error!(target: "graph.remote", "input_streams_unsupported_for_remote_graph");
        Err(Error::Fatal)
    }

    fn set_input_stream_pixel_data(
        &self,
        _stream_id: i32,
        _timestamp_us: u64,
        _frame: &InputFrame<'_>,
    ) -> Result {
        error!(target: "graph.remote", "input_streams_unsupported_for_remote_graph");
        Err(Error::Fatal)
    }

    fn start_profiling(&self) -> Result {
        if self.core.state() != GraphState::Running {
            return Err(Error::IllegalState);
        }
        self.core.status_call(&GraphRequest::StartGraphProfiling)
    }

    fn stop_profiling(&self) -> Result {
        // Legal after the graph stopped; the service treats it as a no-op.
        self.core.status_call(&GraphRequest::StopGraphProfiling)
    }

    fn debug_info(&self) -> String {
        match self.core.unary(&GraphRequest::GetProfilingData) {
            Ok(GraphResponse::ProfilingData { data }) => {
                String::from_utf8_lossy(&data).into_owned()
            }
            _ => String::new(),
        }
    }
}
