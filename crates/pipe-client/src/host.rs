//! In-process client host.
//!
//! Owns the client-visible surface of the runner: typed setters that feed
//! the engine's config builder, lifecycle controls, per-stream packet
//! handlers, and the state callback. A transport binding forwards opaque
//! payloads to [`ClientHost::configure`]/[`ClientHost::control`] and
//! registers a death notification that lands in
//! [`ClientHost::notify_client_death`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use pipe_engine::{ClientEngineInterface, ClientInterface};
use pipe_types::{
    ClientConfig, ClientState, ConfigurationCommand, ControlCommand, Error, GraphOptions,
    MemHandle, PacketType, ProfilingMode, Result, RunnerComponent, RunnerEvent,
};
use tracing::{debug, error, info, warn};

use crate::debugger::{Debugger, ProfilingArtifact};

/// Receives client state transitions derived from engine phase events.
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, state: ClientState);
}

/// One delivered packet. Pixel packets must be returned through
/// [`ClientHost::free_packet`]; semantic packets carry their bytes inline
/// and need no release call.
#[derive(Debug, Clone)]
pub struct ClientPacket {
    pub stream_id: i32,
    pub buffer_id: i32,
    pub packet_type: PacketType,
    pub timestamp_us: u64,
    pub handle: MemHandle,
}

impl ClientPacket {
    pub fn semantic_data(&self) -> Option<&[u8]> {
        self.handle.semantic_data()
    }

    pub fn pixel_contents(&self) -> Option<(pipe_types::BufferDesc, Vec<u8>)> {
        self.handle.pixel_contents()
    }
}

/// Per-stream packet sink registered by the client.
pub trait PacketHandler: Send + Sync {
    fn deliver_packet(&self, packet: &ClientPacket) -> Result;
}

pub struct ClientHost {
    engine: RwLock<Weak<dyn ClientEngineInterface>>,
    graph_options: GraphOptions,
    state_listener: RwLock<Option<Arc<dyn StateListener>>>,
    packet_handlers: RwLock<HashMap<i32, Arc<dyn PacketHandler>>>,
    debugger: Debugger,
}

impl ClientHost {
    pub fn new(graph_options: GraphOptions, profiling_dir: PathBuf) -> Arc<Self> {
        let debugger = Debugger::new(profiling_dir, graph_options.graph_name.clone());
        Arc::new(Self {
            engine: RwLock::new(Weak::<NullEngine>::new() as Weak<dyn ClientEngineInterface>),
            graph_options,
            state_listener: RwLock::new(None),
            packet_handlers: RwLock::new(HashMap::new()),
            debugger,
        })
    }

    pub fn set_engine(&self, engine: Weak<dyn ClientEngineInterface>) {
        if let Ok(mut slot) = self.engine.write() {
            *slot = engine;
        }
    }

    fn engine(&self) -> Result<Arc<dyn ClientEngineInterface>> {
        self.engine
            .read()
            .ok()
            .and_then(|weak| weak.upgrade())
            .ok_or(Error::IllegalState)
    }

    /// Registers the state callback; required before any command is
    /// accepted. A second registration is rejected.
    pub fn init(&self, listener: Arc<dyn StateListener>) -> Result {
        let mut slot = self.state_listener.write().map_err(|_| Error::Internal)?;
        if slot.is_some() {
            return Err(Error::IllegalState);
        }
        *slot = Some(listener);
        Ok(())
    }

    fn is_init_done(&self) -> bool {
        self.state_listener
            .read()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    fn notify_state(&self, state: ClientState) {
        debug!(target: "client.state", state = ?state, "state_change");
        if let Ok(listener) = self.state_listener.read() {
            if let Some(listener) = listener.as_ref() {
                listener.on_state_change(state);
            }
        }
    }

    /// Graph capabilities, as advertised to clients.
    pub fn pipe_descriptor(&self) -> GraphOptions {
        self.graph_options.clone()
    }

    pub fn set_packet_handler(&self, stream_id: i32, handler: Arc<dyn PacketHandler>) -> Result {
        self.packet_handlers
            .write()
            .map_err(|_| Error::Internal)?
            .insert(stream_id, handler);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Typed command surface
    // -----------------------------------------------------------------

    fn config_update(&self, command: ConfigurationCommand) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        self.engine()?.process_client_config_update(&command)
    }

    fn control_command(&self, command: ControlCommand) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        self.engine()?.process_client_command(&command)
    }

    pub fn set_pipe_input_source(&self, source_id: i32) -> Result {
        self.config_update(ConfigurationCommand::SetInputSource { source_id })
    }

    pub fn set_pipe_offload_options(&self, offload_id: i32) -> Result {
        self.config_update(ConfigurationCommand::SetOffload { offload_id })
    }

    pub fn set_pipe_termination(&self, termination_id: i32) -> Result {
        self.config_update(ConfigurationCommand::SetTermination { termination_id })
    }

    pub fn set_pipe_output_config(&self, stream_id: i32, max_in_flight: u32) -> Result {
        self.config_update(ConfigurationCommand::SetOutputStream {
            stream_id,
            max_in_flight,
        })
    }

    pub fn set_profiling_mode(&self, mode: ProfilingMode) -> Result {
        self.config_update(ConfigurationCommand::SetProfileOptions { mode })
    }

    pub fn apply_pipe_configs(&self) -> Result {
        self.control_command(ControlCommand::ApplyConfigs)
    }

    pub fn reset_pipe_configs(&self) -> Result {
        self.control_command(ControlCommand::ResetConfigs)
    }

    pub fn start_pipe(&self) -> Result {
        self.control_command(ControlCommand::StartGraph)
    }

    pub fn stop_pipe(&self) -> Result {
        self.control_command(ControlCommand::StopGraph)
    }

    pub fn start_profiling(&self) -> Result {
        self.control_command(ControlCommand::StartPipeProfile)
    }

    pub fn stop_profiling(&self) -> Result {
        self.control_command(ControlCommand::StopPipeProfile)
    }

    /// Requests the current profiling blob and waits briefly for it.
    pub fn read_profiling_data(&self) -> Result<ProfilingArtifact> {
        self.control_command(ControlCommand::ReadDebugData)?;
        self.debugger.take()
    }

    pub fn release_debugger(&self) -> Result {
        self.debugger.release();
        self.control_command(ControlCommand::ReleaseDebugger)
    }

    /// Returns a consumed packet to its stream manager.
    pub fn free_packet(&self, buffer_id: i32, stream_id: i32) -> Result {
        self.engine()?.free_packet(buffer_id, stream_id)
    }

    // -----------------------------------------------------------------
    // Opaque payload surface (transport bindings)
    // -----------------------------------------------------------------

    pub fn configure(&self, payload: &[u8]) -> Result {
        let command = ConfigurationCommand::from_payload(payload)?;
        self.config_update(command)
    }

    pub fn control(&self, payload: &[u8]) -> Result {
        let command = ControlCommand::from_payload(payload)?;
        self.control_command(command)
    }

    /// Death-recipient entry point: tears the whole pipeline down.
    pub fn notify_client_death(&self) {
        info!(target: "client.state", "client_died");
        if let Ok(engine) = self.engine() {
            let _ = engine.process_client_command(&ControlCommand::DeathNotification);
        }
    }
}

impl RunnerComponent for ClientHost {
    fn handle_config_phase(&self, config: &ClientConfig) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        if config.is_transition_complete() {
            self.notify_state(ClientState::ConfigDone);
        } else if config.is_aborted() {
            self.notify_state(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        if event.is_transition_complete() {
            self.notify_state(ClientState::Running);
        } else if event.is_aborted() {
            self.notify_state(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        if event.is_transition_complete() {
            self.notify_state(ClientState::Done);
        }
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        if event.is_transition_complete() {
            self.notify_state(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if !self.is_init_done() {
            return Err(Error::IllegalState);
        }
        if event.is_transition_complete() {
            self.notify_state(ClientState::Reset);
        }
        Ok(())
    }
}

impl ClientInterface for ClientHost {
    fn activate(&self) -> Result {
        // In-process host: nothing to register with a service directory.
        info!(target: "client.state", "client_interface_active");
        Ok(())
    }

    fn dispatch_packet_to_client(&self, stream_id: i32, packet: &MemHandle) -> Result {
        let handler = {
            let handlers = self.packet_handlers.read().map_err(|_| Error::Internal)?;
            handlers.get(&stream_id).cloned()
        };
        let Some(handler) = handler else {
            warn!(target: "client.state", stream = stream_id, "packet_for_unhandled_stream");
            return Err(Error::InvalidArgument);
        };
        let client_packet = ClientPacket {
            stream_id,
            buffer_id: packet.buffer_id(),
            packet_type: packet.packet_type(),
            timestamp_us: packet.timestamp_us(),
            handle: packet.clone(),
        };
        handler.deliver_packet(&client_packet).map_err(|e| {
            error!(
                target: "client.state",
                stream = stream_id,
                status = ?e,
                "packet_delivery_failed"
            );
            Error::Internal
        })
    }

    fn deliver_graph_debug_info(&self, data: &str) -> Result {
        self.debugger.deliver(data.as_bytes())
    }
}

/// Placeholder target for the engine slot before wiring; never upgrades.
struct NullEngine;

impl ClientEngineInterface for NullEngine {
    fn process_client_config_update(&self, _command: &ConfigurationCommand) -> Result {
        Err(Error::IllegalState)
    }

    fn process_client_command(&self, _command: &ControlCommand) -> Result {
        Err(Error::IllegalState)
    }

    fn free_packet(&self, _buffer_id: i32, _stream_id: i32) -> Result {
        Err(Error::IllegalState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_types::{EventPhase, PhaseState};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct RecordingListener {
        states: Mutex<Vec<ClientState>>,
    }

    impl StateListener for RecordingListener {
        fn on_state_change(&self, state: ClientState) {
            self.states.lock().unwrap().push(state);
        }
    }

    fn host_with_listener() -> (Arc<ClientHost>, Arc<RecordingListener>) {
        let dir = std::env::temp_dir();
        let host = ClientHost::new(GraphOptions::default(), dir);
        let listener = Arc::new(RecordingListener {
            states: Mutex::new(Vec::new()),
        });
        host.init(Arc::clone(&listener) as Arc<dyn StateListener>)
            .unwrap();
        (host, listener)
    }

    fn config_event(state: PhaseState) -> ClientConfig {
        let mut outputs = BTreeMap::new();
        outputs.insert(1, 1u32);
        let mut config =
            ClientConfig::new(-1, -1, -1, outputs, ProfilingMode::Disabled, None);
        config.set_phase_state(state);
        config
    }

    #[test]
    fn phase_events_translate_to_client_states() {
        let (host, listener) = host_with_listener();

        host.handle_config_phase(&config_event(PhaseState::TransitionComplete))
            .unwrap();
        host.handle_execution_phase(&RunnerEvent::transition_complete(EventPhase::Run))
            .unwrap();
        host.handle_stop_with_flush_phase(&RunnerEvent::transition_complete(
            EventPhase::StopWithFlush,
        ))
        .unwrap();
        host.handle_stop_immediate_phase(&RunnerEvent::transition_complete(
            EventPhase::StopImmediate,
        ))
        .unwrap();
        host.handle_reset_phase(&RunnerEvent::transition_complete(EventPhase::Reset))
            .unwrap();

        assert_eq!(
            *listener.states.lock().unwrap(),
            vec![
                ClientState::ConfigDone,
                ClientState::Running,
                ClientState::Done,
                ClientState::ErrHalt,
                ClientState::Reset,
            ]
        );
    }

    #[test]
    fn aborts_surface_as_err_halt() {
        let (host, listener) = host_with_listener();
        host.handle_config_phase(&config_event(PhaseState::Aborted))
            .unwrap();
        host.handle_execution_phase(&RunnerEvent::abort(EventPhase::Run))
            .unwrap();
        assert_eq!(
            *listener.states.lock().unwrap(),
            vec![ClientState::ErrHalt, ClientState::ErrHalt]
        );
    }

    #[test]
    fn entries_produce_no_client_state() {
        let (host, listener) = host_with_listener();
        host.handle_config_phase(&config_event(PhaseState::Entry))
            .unwrap();
        host.handle_execution_phase(&RunnerEvent::entry(EventPhase::Run))
            .unwrap();
        host.handle_stop_with_flush_phase(&RunnerEvent::entry(EventPhase::StopWithFlush))
            .unwrap();
        assert!(listener.states.lock().unwrap().is_empty());
    }

    #[test]
    fn commands_before_init_are_illegal() {
        let host = ClientHost::new(GraphOptions::default(), std::env::temp_dir());
        assert_eq!(
            host.apply_pipe_configs().unwrap_err(),
            Error::IllegalState
        );
        assert_eq!(
            host.set_pipe_input_source(1).unwrap_err(),
            Error::IllegalState
        );
    }

    #[test]
    fn double_init_is_rejected() {
        let (host, _listener) = host_with_listener();
        let second = Arc::new(RecordingListener {
            states: Mutex::new(Vec::new()),
        });
        assert_eq!(
            host.init(second as Arc<dyn StateListener>).unwrap_err(),
            Error::IllegalState
        );
    }

    #[test]
    fn commands_without_engine_are_illegal() {
        let (host, _listener) = host_with_listener();
        // Initialized but never wired to an engine.
        assert_eq!(host.start_pipe().unwrap_err(), Error::IllegalState);
    }

    #[test]
    fn malformed_payloads_are_invalid_argument() {
        let (host, _listener) = host_with_listener();
        assert_eq!(
            host.configure(b"garbage").unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(host.control(b"{}").unwrap_err(), Error::InvalidArgument);
    }
}
