//! Engine worker, command queue, and phase broadcasts.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use pipe_graph::{GraphKind, PrebuiltEngineInterface, PrebuiltGraph};
use pipe_input::{create_input_manager, InputEngineInterface, InputManager};
use pipe_streams::{create_stream_manager, StreamEngineInterface, StreamManager, StreamState};
use pipe_types::{
    ClientConfig, ConfigurationCommand, ControlCommand, Error, EventPhase, InputFrame, MemHandle,
    PhaseState, ProfilingMode, Result, RunnerEvent, INVALID_ID,
};
use tracing::{debug, error, info, warn};

use crate::config::ConfigBuilder;
use crate::display::DebugDisplay;
use crate::{ClientEngineInterface, ClientInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Reset,
    Config,
    Run,
    Stop,
}

impl EnginePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EnginePhase::Reset => "reset",
            EnginePhase::Config => "config",
            EnginePhase::Run => "running",
            EnginePhase::Stop => "stopping",
        }
    }
}

/// Identifies the component a command or error originated from; the halt
/// broadcast skips the source so a failed component is not told to stop
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSource {
    Client,
    Graph,
    Stream(i32),
    Input(i32),
    Display,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Client => write!(f, "client_interface"),
            ErrorSource::Graph => write!(f, "prebuilt_graph"),
            ErrorSource::Stream(id) => write!(f, "stream_manager:{id}"),
            ErrorSource::Input(id) => write!(f, "input_manager:{id}"),
            ErrorSource::Display => write!(f, "debug_display"),
        }
    }
}

#[derive(Debug)]
struct ComponentError {
    source: ErrorSource,
    message: String,
    phase: EnginePhase,
    fatal: bool,
}

#[derive(Debug)]
enum EngineCommand {
    BroadcastConfig,
    BroadcastStartRun,
    BroadcastInitiateStop { source: ErrorSource },
    PollStopComplete { stream_id: i32 },
    ResetConfig,
    ReleaseDebugger,
    ReadProfiling,
}

enum Work {
    Command(EngineCommand),
    Error(ComponentError),
}

struct EngineState {
    phase: EnginePhase,
    queue: VecDeque<EngineCommand>,
    error: Option<ComponentError>,
    config: ConfigBuilder,
    stop_from_client: bool,
    ignore_input_manager: bool,
    running: bool,
}

#[derive(Default)]
struct Components {
    client: Option<Arc<dyn ClientInterface>>,
    graph: Option<Arc<dyn PrebuiltGraph>>,
    display: Option<Arc<dyn DebugDisplay>>,
    streams: BTreeMap<i32, Arc<dyn StreamManager>>,
    inputs: BTreeMap<i32, Arc<dyn InputManager>>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Stream mirrored to the debug display; [`INVALID_ID`] disables it.
    pub display_stream_id: i32,
    /// Skip input-manager creation even for local graphs with inputs.
    pub ignore_input_manager: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            display_stream_id: INVALID_ID,
            ignore_input_manager: false,
        }
    }
}

pub struct Engine {
    settings: EngineSettings,
    // Handed to hooks and adapters; they must never keep the engine alive.
    weak_self: Weak<Engine>,
    state: Mutex<EngineState>,
    wake: Condvar,
    components: Mutex<Components>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Arc<Self> {
        let mut config = ConfigBuilder::new();
        if settings.display_stream_id != INVALID_ID {
            config.set_debug_display_stream(settings.display_stream_id);
        }
        Arc::new_cyclic(|weak_self| Self {
            settings,
            weak_self: weak_self.clone(),
            state: Mutex::new(EngineState {
                phase: EnginePhase::Reset,
                queue: VecDeque::new(),
                error: None,
                config,
                stop_from_client: false,
                ignore_input_manager: false,
                running: false,
            }),
            wake: Condvar::new(),
            components: Mutex::new(Components::default()),
            worker: Mutex::new(None),
        })
    }

    pub fn set_client(&self, client: Arc<dyn ClientInterface>) {
        if let Ok(mut components) = self.components.lock() {
            components.client = Some(client);
        }
    }

    pub fn set_graph(&self, graph: Arc<dyn PrebuiltGraph>) {
        let descriptor = graph.graph_options();
        if let Ok(mut state) = self.state.lock() {
            if graph.graph_kind() == GraphKind::Remote || descriptor.input_configs.is_empty() {
                state.ignore_input_manager = true;
            }
            if self.settings.ignore_input_manager {
                state.ignore_input_manager = true;
            }
        }
        if let Ok(mut components) = self.components.lock() {
            components.graph = Some(graph);
        }
    }

    pub fn set_display(&self, display: Arc<dyn DebugDisplay>) {
        if let Ok(mut components) = self.components.lock() {
            components.display = Some(display);
        }
    }

    pub fn current_phase(&self) -> EnginePhase {
        self.state
            .lock()
            .map(|s| s.phase)
            .unwrap_or(EnginePhase::Reset)
    }

    /// Starts the worker and opens the client interface.
    pub fn activate(&self) -> Result {
        {
            let mut state = self.state.lock().map_err(|_| Error::Internal)?;
            if state.running {
                return Err(Error::IllegalState);
            }
            state.running = true;
            state.config.reset();
        }
        let engine = self.weak_self.upgrade().ok_or(Error::Internal)?;
        let handle = thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || engine.worker_loop())
            .map_err(|_| Error::Internal)?;
        *self.worker.lock().map_err(|_| Error::Internal)? = Some(handle);

        let client = self
            .components
            .lock()
            .map_err(|_| Error::Internal)?
            .client
            .clone();
        match client {
            Some(client) => client.activate(),
            None => Ok(()),
        }
    }

    /// Stops the worker thread. Pending commands are discarded.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.running = false;
            self.wake.notify_all();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }

    /// Records an asynchronous component error. Only the first error per
    /// phase is kept; the worker processes it ahead of pending commands.
    pub fn notify_component_error(&self, source: ErrorSource, message: String, fatal: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.error.is_some() {
            debug!(target: "engine.queue", source = %source, "error_slot_occupied_discarding");
            return;
        }
        warn!(
            target: "engine.queue",
            source = %source,
            message = %message,
            fatal,
            "component_error_recorded"
        );
        state.error = Some(ComponentError {
            source,
            message,
            phase: state.phase,
            fatal,
        });
        self.wake.notify_all();
    }

    fn queue_command(&self, state: &mut EngineState, command: EngineCommand) {
        debug!(target: "engine.queue", command = ?command, "command_enqueued");
        state.queue.push_back(command);
        self.wake.notify_all();
    }

    // ---------------------------------------------------------------------
    // Worker
    // ---------------------------------------------------------------------

    fn worker_loop(self: Arc<Self>) {
        info!(target: "engine.queue", "worker_started");
        loop {
            let work = {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(_) => return,
                };
                loop {
                    if !state.running {
                        info!(target: "engine.queue", "worker_stopped");
                        return;
                    }
                    if let Some(error) = state.error.take() {
                        // Errors preempt queued work; whatever the client
                        // had pending is meaningless after a halt.
                        state.queue.clear();
                        break Work::Error(error);
                    }
                    if let Some(command) = state.queue.pop_front() {
                        break Work::Command(command);
                    }
                    state = match self.wake.wait(state) {
                        Ok(state) => state,
                        Err(_) => return,
                    };
                }
            };
            match work {
                Work::Error(error) => self.process_component_error(error),
                Work::Command(command) => self.process_command(command),
            }
        }
    }

    fn process_command(&self, command: EngineCommand) {
        match command {
            EngineCommand::BroadcastConfig => {
                if let Err(e) = self.broadcast_client_config() {
                    error!(target: "engine.phase", status = ?e, "config_broadcast_failed");
                }
            }
            EngineCommand::BroadcastStartRun => {
                if let Err(e) = self.broadcast_start_run() {
                    error!(target: "engine.phase", status = ?e, "run_broadcast_failed");
                }
            }
            EngineCommand::BroadcastInitiateStop { source } => {
                if let Ok(mut state) = self.state.lock() {
                    state.stop_from_client = source == ErrorSource::Client;
                }
                self.broadcast_stop_with_flush();
            }
            EngineCommand::PollStopComplete { stream_id } => {
                self.poll_stop_complete(stream_id);
            }
            EngineCommand::ResetConfig => self.broadcast_reset(),
            EngineCommand::ReleaseDebugger => {
                let saved = match self.state.lock() {
                    Ok(state) => state.config.clone(),
                    Err(_) => return,
                };
                self.broadcast_reset();
                if let Ok(mut state) = self.state.lock() {
                    state.config = saved;
                    state.config.update_profiling(ProfilingMode::Disabled);
                }
                if let Err(e) = self.broadcast_client_config() {
                    error!(target: "engine.phase", status = ?e, "debugger_release_reconfig_failed");
                }
            }
            EngineCommand::ReadProfiling => self.read_profiling(),
        }
    }

    fn process_component_error(&self, error: ComponentError) {
        warn!(
            target: "engine.phase",
            source = %error.source,
            phase = error.phase.as_str(),
            message = %error.message,
            "processing_component_error"
        );
        let phase = self.current_phase();
        if phase == EnginePhase::Run || phase == EnginePhase::Stop {
            self.broadcast_halt(&error.source);
        }
        if error.source == ErrorSource::Client || error.fatal {
            self.broadcast_reset();
        }
    }

    // ---------------------------------------------------------------------
    // Broadcasts (worker thread only)
    // ---------------------------------------------------------------------

    fn snapshot(
        &self,
    ) -> (
        Option<Arc<dyn ClientInterface>>,
        Option<Arc<dyn PrebuiltGraph>>,
        Option<Arc<dyn DebugDisplay>>,
        Vec<(i32, Arc<dyn StreamManager>)>,
        Vec<(i32, Arc<dyn InputManager>)>,
    ) {
        let components = match self.components.lock() {
            Ok(components) => components,
            Err(_) => return (None, None, None, Vec::new(), Vec::new()),
        };
        (
            components.client.clone(),
            components.graph.clone(),
            components.display.clone(),
            components
                .streams
                .iter()
                .map(|(id, m)| (*id, Arc::clone(m)))
                .collect(),
            components
                .inputs
                .iter()
                .map(|(id, m)| (*id, Arc::clone(m)))
                .collect(),
        )
    }

    fn set_phase(&self, phase: EnginePhase) {
        if let Ok(mut state) = self.state.lock() {
            info!(
                target: "engine.phase",
                from = state.phase.as_str(),
                to = phase.as_str(),
                "phase_transition"
            );
            state.phase = phase;
        }
    }

    fn teardown_managers(&self) {
        if let Ok(mut components) = self.components.lock() {
            components.streams.clear();
            components.inputs.clear();
        }
    }

    fn broadcast_client_config(&self) -> Result {
        let (mut config, ignore_input) = {
            let state = self.state.lock().map_err(|_| Error::Internal)?;
            (state.config.emit(), state.ignore_input_manager)
        };
        let descriptor = {
            let components = self.components.lock().map_err(|_| Error::Internal)?;
            components
                .graph
                .as_ref()
                .map(|graph| graph.graph_options())
                .unwrap_or_default()
        };

        info!(target: "engine.phase", "building_stream_managers");
        if let Err(e) = self.populate_stream_managers(&config, &descriptor) {
            self.teardown_managers();
            return Err(e);
        }

        let (client, graph, display, _, _) = self.snapshot();
        if graph.is_some() && !ignore_input {
            if let Err(e) = self.populate_input_managers(&config, &descriptor) {
                self.abort_client_config(&mut config);
                return Err(e);
            }
        }

        if let Some(display) = &display {
            let weak = self.weak_self.clone();
            let display_stream = self.settings.display_stream_id;
            display.set_free_packet_callback(Box::new(move |buffer_id| {
                weak.upgrade()
                    .ok_or(Error::IllegalState)?
                    .free_packet(buffer_id, display_stream)
            }));
        }

        for phase_state in [PhaseState::Entry, PhaseState::TransitionComplete] {
            config.set_phase_state(phase_state);
            if let Some(graph) = &graph {
                if let Err(e) = graph.handle_config_phase(&config) {
                    error!(target: "engine.phase", status = ?e, "graph_rejected_config");
                    self.abort_client_config(&mut config);
                    return Err(e);
                }
            }
            if let Some(display) = &display {
                if let Err(e) = display.handle_config_phase(&config) {
                    error!(target: "engine.phase", status = ?e, "display_rejected_config");
                    self.abort_client_config(&mut config);
                    return Err(e);
                }
            }
            if let Some(client) = &client {
                if let Err(e) = client.handle_config_phase(&config) {
                    error!(target: "engine.phase", status = ?e, "client_rejected_config");
                    self.abort_client_config(&mut config);
                    return Err(e);
                }
            }
        }

        self.set_phase(EnginePhase::Config);
        Ok(())
    }

    fn abort_client_config(&self, config: &mut ClientConfig) {
        config.set_phase_state(PhaseState::Aborted);
        let (client, graph, display, _, _) = self.snapshot();
        if let Some(graph) = graph {
            let _ = graph.handle_config_phase(config);
        }
        if let Some(display) = display {
            let _ = display.handle_config_phase(config);
        }
        if let Some(client) = client {
            let _ = client.handle_config_phase(config);
        }
        self.teardown_managers();
    }

    fn populate_stream_managers(
        &self,
        config: &ClientConfig,
        descriptor: &pipe_types::GraphOptions,
    ) -> Result {
        let outputs = config.output_stream_configs()?;
        let mut components = self.components.lock().map_err(|_| Error::Internal)?;
        for (stream_id, max_in_flight) in outputs {
            let Some(output_config) = descriptor.output_config(*stream_id) else {
                error!(
                    target: "engine.phase",
                    stream = stream_id,
                    "no_matching_output_config"
                );
                return Err(Error::InvalidArgument);
            };
            let hooks = Arc::new(StreamHooks {
                engine: self.weak_self.clone(),
                stream_id: *stream_id,
            });
            let manager = create_stream_manager(output_config, hooks, *max_in_flight)?;
            components.streams.insert(*stream_id, manager);
        }
        Ok(())
    }

    fn populate_input_managers(
        &self,
        config: &ClientConfig,
        descriptor: &pipe_types::GraphOptions,
    ) -> Result {
        let selected = config.input_config_id().map_err(|_| {
            error!(target: "engine.phase", "config_has_no_input_selection");
            Error::InvalidArgument
        })?;
        let Some(input_config) = descriptor.input_config(selected) else {
            error!(target: "engine.phase", input = selected, "no_matching_input_config");
            return Err(Error::InvalidArgument);
        };
        let hooks = Arc::new(InputHooks {
            engine: self.weak_self.clone(),
            input_id: selected,
        });
        let manager = create_input_manager(input_config, hooks)?;
        self.components
            .lock()
            .map_err(|_| Error::Internal)?
            .inputs
            .insert(selected, manager);
        Ok(())
    }

    fn broadcast_start_run(&self) -> Result {
        let (client, graph, display, streams, inputs) = self.snapshot();
        let entry = RunnerEvent::entry(EventPhase::Run);

        let mut started_streams = Vec::new();
        let mut started_inputs = Vec::new();
        for (stream_id, manager) in &streams {
            if manager.handle_execution_phase(&entry).is_err() {
                error!(target: "engine.phase", stream = stream_id, "stream_rejected_run_entry");
                self.broadcast_abort_run(&streams, &started_streams, &inputs, &[], false);
                return Err(Error::Internal);
            }
            started_streams.push(*stream_id);
        }
        if let Some(display) = &display {
            let _ = display.handle_execution_phase(&entry);
        }
        if let Some(graph) = &graph {
            info!(target: "engine.phase", "sending_run_entry_to_graph");
            if let Err(e) = graph.handle_execution_phase(&entry) {
                error!(target: "engine.phase", status = ?e, "graph_rejected_run_entry");
                self.broadcast_abort_run(&streams, &started_streams, &inputs, &[], false);
                return Err(e);
            }
            for (input_id, manager) in &inputs {
                if manager.handle_execution_phase(&entry).is_err() {
                    error!(target: "engine.phase", input = input_id, "input_rejected_run_entry");
                    self.broadcast_abort_run(
                        &streams,
                        &started_streams,
                        &inputs,
                        &started_inputs,
                        true,
                    );
                    return Err(Error::Internal);
                }
                started_inputs.push(*input_id);
            }
        }

        let complete = RunnerEvent::transition_complete(EventPhase::Run);
        if let Some(client) = &client {
            info!(target: "engine.phase", "sending_run_transition_complete_to_client");
            if let Err(e) = client.handle_execution_phase(&complete) {
                error!(target: "engine.phase", status = ?e, "client_rejected_run_complete");
                self.broadcast_abort_run(
                    &streams,
                    &started_streams,
                    &inputs,
                    &started_inputs,
                    true,
                );
                return Err(e);
            }
        }
        for (_, manager) in &streams {
            let _ = manager.handle_execution_phase(&complete);
        }
        if let Some(display) = &display {
            let _ = display.handle_execution_phase(&complete);
        }
        if let Some(graph) = &graph {
            let _ = graph.handle_execution_phase(&complete);
            for (_, manager) in &inputs {
                let _ = manager.handle_execution_phase(&complete);
            }
        }

        self.set_phase(EnginePhase::Run);
        Ok(())
    }

    fn broadcast_abort_run(
        &self,
        streams: &[(i32, Arc<dyn StreamManager>)],
        started_streams: &[i32],
        inputs: &[(i32, Arc<dyn InputManager>)],
        started_inputs: &[i32],
        abort_graph: bool,
    ) {
        let abort = RunnerEvent::abort(EventPhase::Run);
        let (client, graph, display, _, _) = self.snapshot();
        if let Some(display) = display {
            let _ = display.handle_execution_phase(&abort);
        }
        for (stream_id, manager) in streams {
            if started_streams.contains(stream_id) {
                let _ = manager.handle_execution_phase(&abort);
            }
        }
        for (input_id, manager) in inputs {
            if started_inputs.contains(input_id) {
                let _ = manager.handle_execution_phase(&abort);
            }
        }
        if abort_graph {
            if let Some(graph) = graph {
                let _ = graph.handle_execution_phase(&abort);
            }
        }
        if let Some(client) = client {
            let _ = client.handle_execution_phase(&abort);
        }
    }

    fn broadcast_stop_with_flush(&self) {
        let stop_from_client = self
            .state
            .lock()
            .map(|s| s.stop_from_client)
            .unwrap_or(true);
        // Phase flips before the entries go out so a graph termination
        // racing this broadcast cannot enqueue a second stop.
        self.set_phase(EnginePhase::Stop);
        let entry = RunnerEvent::entry(EventPhase::StopWithFlush);
        let (client, graph, display, streams, inputs) = self.snapshot();

        if let Some(display) = &display {
            let _ = display.handle_stop_with_flush_phase(&entry);
        }
        for (_, manager) in &inputs {
            let _ = manager.handle_stop_with_flush_phase(&entry);
        }
        if stop_from_client {
            if let Some(graph) = &graph {
                let _ = graph.handle_stop_with_flush_phase(&entry);
            }
        }
        for (_, manager) in &streams {
            let _ = manager.handle_stop_with_flush_phase(&entry);
        }
        if !stop_from_client {
            if let Some(client) = &client {
                let _ = client.handle_stop_with_flush_phase(&entry);
            }
        }
    }

    fn poll_stop_complete(&self, stream_id: i32) {
        if self.current_phase() != EnginePhase::Stop {
            warn!(
                target: "engine.phase",
                stream = stream_id,
                "stale_end_of_stream_ignored"
            );
            return;
        }
        let (_, _, _, streams, _) = self.snapshot();
        let all_done = streams
            .iter()
            .filter(|(id, _)| *id != stream_id)
            .all(|(_, manager)| manager.state() == StreamState::Stopped);
        if all_done {
            self.broadcast_stop_complete();
        }
    }

    fn broadcast_stop_complete(&self) {
        let complete = RunnerEvent::transition_complete(EventPhase::StopWithFlush);
        let (client, graph, display, streams, inputs) = self.snapshot();
        for (_, manager) in &inputs {
            let _ = manager.handle_stop_with_flush_phase(&complete);
        }
        if let Some(graph) = &graph {
            let _ = graph.handle_stop_with_flush_phase(&complete);
        }
        if let Some(display) = &display {
            let _ = display.handle_stop_with_flush_phase(&complete);
        }
        for (_, manager) in &streams {
            let _ = manager.handle_stop_with_flush_phase(&complete);
        }
        if let Some(client) = &client {
            let _ = client.handle_stop_with_flush_phase(&complete);
        }
        self.set_phase(EnginePhase::Config);
    }

    fn broadcast_halt(&self, source: &ErrorSource) {
        info!(target: "engine.phase", source = %source, "halting_pipeline");
        let (client, graph, display, streams, inputs) = self.snapshot();
        for event in [
            RunnerEvent::entry(EventPhase::StopImmediate),
            RunnerEvent::transition_complete(EventPhase::StopImmediate),
        ] {
            for (input_id, manager) in &inputs {
                if *source != ErrorSource::Input(*input_id) {
                    let _ = manager.handle_stop_immediate_phase(&event);
                }
            }
            if *source != ErrorSource::Graph {
                if let Some(graph) = &graph {
                    let _ = graph.handle_stop_immediate_phase(&event);
                }
            }
            if *source != ErrorSource::Display {
                if let Some(display) = &display {
                    let _ = display.handle_stop_immediate_phase(&event);
                }
            }
            for (stream_id, manager) in &streams {
                if *source != ErrorSource::Stream(*stream_id) {
                    let _ = manager.handle_stop_immediate_phase(&event);
                }
            }
            if *source != ErrorSource::Client {
                if let Some(client) = &client {
                    let _ = client.handle_stop_immediate_phase(&event);
                }
            }
        }
        self.set_phase(EnginePhase::Config);
    }

    fn broadcast_reset(&self) {
        self.teardown_managers();
        let (client, graph, display, _, _) = self.snapshot();
        for event in [
            RunnerEvent::entry(EventPhase::Reset),
            RunnerEvent::transition_complete(EventPhase::Reset),
        ] {
            if let Some(client) = &client {
                let _ = client.handle_reset_phase(&event);
            }
            if let Some(graph) = &graph {
                let _ = graph.handle_reset_phase(&event);
            }
            if event.is_transition_complete() {
                if let Some(display) = &display {
                    let _ = display.handle_reset_phase(&event);
                }
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.config.reset();
            state.stop_from_client = false;
            info!(
                target: "engine.phase",
                from = state.phase.as_str(),
                to = EnginePhase::Reset.as_str(),
                "phase_transition"
            );
            state.phase = EnginePhase::Reset;
        }
    }

    fn read_profiling(&self) {
        let (client, graph, _, _, _) = self.snapshot();
        let phase = self.current_phase();
        let debug_data = match (&graph, phase) {
            (Some(graph), EnginePhase::Config | EnginePhase::Run | EnginePhase::Stop) => {
                graph.debug_info()
            }
            _ => String::new(),
        };
        if let Some(client) = client {
            if client.deliver_graph_debug_info(&debug_data).is_err() {
                error!(target: "engine.queue", "debug_info_delivery_failed");
            }
        }
    }

    // ---------------------------------------------------------------------
    // Packet routing
    // ---------------------------------------------------------------------

    fn forward_output_to_client(&self, stream_id: i32, packet: MemHandle) -> Result {
        let display_enabled = self
            .state
            .lock()
            .map(|s| s.config.client_enables_display_stream())
            .unwrap_or(false);
        let (client, display, manager) = {
            let components = self.components.lock().map_err(|_| Error::Internal)?;
            (
                components.client.clone(),
                components.display.clone(),
                components.streams.get(&stream_id).cloned(),
            )
        };

        if stream_id != self.settings.display_stream_id {
            let Some(client) = client else {
                return Err(Error::IllegalState);
            };
            if let Err(e) = client.dispatch_packet_to_client(stream_id, &packet) {
                // The client is the sink of last resort; failing to deliver
                // is a client-side fault and forces a reset.
                self.notify_component_error(
                    ErrorSource::Client,
                    format!("packet delivery failed: {e}"),
                    true,
                );
            }
            return Ok(());
        }

        // Display stream: the client sees a clone only if it subscribed;
        // the original always reaches the display sink.
        if display_enabled {
            if let (Some(client), Some(manager)) = (&client, &manager) {
                if let Some(clone) = manager.clone_packet(&packet) {
                    if let Err(e) = client.dispatch_packet_to_client(stream_id, &clone) {
                        let _ = manager.free_packet(clone.buffer_id());
                        self.notify_component_error(
                            ErrorSource::Client,
                            format!("packet delivery failed: {e}"),
                            true,
                        );
                    }
                }
            }
        }
        match display {
            Some(display) => display.display_frame(&packet),
            None => {
                // No sink attached: release the reference so the pool does
                // not fill up with unrenderable frames.
                if let Some(manager) = &manager {
                    let _ = manager.free_packet(packet.buffer_id());
                }
                Ok(())
            }
        }
    }
}

impl ClientEngineInterface for Engine {
    fn process_client_config_update(&self, command: &ConfigurationCommand) -> Result {
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        if state.phase != EnginePhase::Reset {
            return Err(Error::IllegalState);
        }
        match command {
            ConfigurationCommand::SetInputSource { source_id } => {
                state.config.update_input_config(*source_id);
            }
            ConfigurationCommand::SetOutputStream {
                stream_id,
                max_in_flight,
            } => {
                state.config.update_output_stream(*stream_id, *max_in_flight);
            }
            ConfigurationCommand::SetOffload { offload_id } => {
                state.config.update_offload(*offload_id);
            }
            ConfigurationCommand::SetTermination { termination_id } => {
                state.config.update_termination(*termination_id);
            }
            ConfigurationCommand::SetProfileOptions { mode } => {
                state.config.update_profiling(*mode);
            }
        }
        Ok(())
    }

    fn process_client_command(&self, command: &ControlCommand) -> Result {
        match command {
            ControlCommand::ApplyConfigs => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                if state.phase != EnginePhase::Reset {
                    return Err(Error::IllegalState);
                }
                self.queue_command(&mut state, EngineCommand::BroadcastConfig);
                Ok(())
            }
            ControlCommand::StartGraph => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                if state.phase != EnginePhase::Config {
                    return Err(Error::IllegalState);
                }
                self.queue_command(&mut state, EngineCommand::BroadcastStartRun);
                Ok(())
            }
            ControlCommand::StopGraph => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                if state.phase != EnginePhase::Run {
                    return Err(Error::IllegalState);
                }
                state.stop_from_client = true;
                self.queue_command(
                    &mut state,
                    EngineCommand::BroadcastInitiateStop {
                        source: ErrorSource::Client,
                    },
                );
                Ok(())
            }
            ControlCommand::DeathNotification => {
                {
                    let state = self.state.lock().map_err(|_| Error::Internal)?;
                    if state.phase == EnginePhase::Reset {
                        info!(target: "engine.queue", "client_death_without_configuration");
                        return Ok(());
                    }
                }
                self.notify_component_error(
                    ErrorSource::Client,
                    "client death".to_string(),
                    true,
                );
                Ok(())
            }
            ControlCommand::ResetConfigs => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                if state.phase != EnginePhase::Config {
                    return Err(Error::IllegalState);
                }
                self.queue_command(&mut state, EngineCommand::ResetConfig);
                Ok(())
            }
            ControlCommand::StartPipeProfile => {
                {
                    let state = self.state.lock().map_err(|_| Error::Internal)?;
                    if state.phase != EnginePhase::Run {
                        return Err(Error::IllegalState);
                    }
                }
                let graph = self
                    .components
                    .lock()
                    .map_err(|_| Error::Internal)?
                    .graph
                    .clone();
                match graph {
                    Some(graph) => graph.start_profiling(),
                    None => Ok(()),
                }
            }
            ControlCommand::StopPipeProfile => {
                {
                    let state = self.state.lock().map_err(|_| Error::Internal)?;
                    if state.phase != EnginePhase::Run {
                        return Ok(());
                    }
                }
                let graph = self
                    .components
                    .lock()
                    .map_err(|_| Error::Internal)?
                    .graph
                    .clone();
                match graph {
                    Some(graph) => graph.stop_profiling(),
                    None => Ok(()),
                }
            }
            ControlCommand::ReadDebugData => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                self.queue_command(&mut state, EngineCommand::ReadProfiling);
                Ok(())
            }
            ControlCommand::ReleaseDebugger => {
                let mut state = self.state.lock().map_err(|_| Error::Internal)?;
                if state.phase != EnginePhase::Config && state.phase != EnginePhase::Reset {
                    return Err(Error::IllegalState);
                }
                self.queue_command(&mut state, EngineCommand::ReleaseDebugger);
                Ok(())
            }
        }
    }

    fn free_packet(&self, buffer_id: i32, stream_id: i32) -> Result {
        let manager = {
            let components = self.components.lock().map_err(|_| Error::Internal)?;
            components.streams.get(&stream_id).cloned()
        };
        match manager {
            Some(manager) => manager.free_packet(buffer_id),
            None => {
                error!(
                    target: "engine.queue",
                    stream = stream_id,
                    "free_for_unknown_stream"
                );
                Err(Error::InvalidArgument)
            }
        }
    }
}

impl PrebuiltEngineInterface for Engine {
    fn dispatch_pixel_data(&self, stream_id: i32, timestamp_us: u64, frame: &InputFrame<'_>) {
        let manager = self
            .components
            .lock()
            .ok()
            .and_then(|c| c.streams.get(&stream_id).cloned());
        match manager {
            Some(manager) => {
                if let Err(e) = manager.queue_pixel_packet(frame, timestamp_us) {
                    debug!(
                        target: "engine.queue",
                        stream = stream_id,
                        status = ?e,
                        "pixel_packet_not_queued"
                    );
                }
            }
            None => error!(
                target: "engine.queue",
                stream = stream_id,
                "pixel_data_for_unknown_stream"
            ),
        }
    }

    fn dispatch_semantic_data(&self, stream_id: i32, timestamp_us: u64, data: Vec<u8>) {
        let manager = self
            .components
            .lock()
            .ok()
            .and_then(|c| c.streams.get(&stream_id).cloned());
        match manager {
            Some(manager) => {
                if let Err(e) = manager.queue_semantic_packet(&data, timestamp_us) {
                    debug!(
                        target: "engine.queue",
                        stream = stream_id,
                        status = ?e,
                        "semantic_packet_not_queued"
                    );
                }
            }
            None => error!(
                target: "engine.queue",
                stream = stream_id,
                "semantic_data_for_unknown_stream"
            ),
        }
    }

    fn dispatch_graph_termination(&self, status: Result, message: String) {
        match status {
            Ok(()) => {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                if state.phase == EnginePhase::Run {
                    self.queue_command(
                        &mut state,
                        EngineCommand::BroadcastInitiateStop {
                            source: ErrorSource::Graph,
                        },
                    );
                } else {
                    warn!(
                        target: "engine.phase",
                        phase = state.phase.as_str(),
                        "graph_termination_outside_run"
                    );
                }
            }
            Err(_) => {
                self.notify_component_error(ErrorSource::Graph, message, false);
            }
        }
    }
}

/// Per-stream callback object handed to stream managers.
struct StreamHooks {
    engine: Weak<Engine>,
    stream_id: i32,
}

impl StreamEngineInterface for StreamHooks {
    fn dispatch_packet(&self, packet: MemHandle) -> Result {
        let engine = self.engine.upgrade().ok_or(Error::IllegalState)?;
        engine.forward_output_to_client(self.stream_id, packet)
    }

    fn notify_end_of_stream(&self) {
        if let Some(engine) = self.engine.upgrade() {
            if let Ok(mut state) = engine.state.lock() {
                engine.queue_command(
                    &mut state,
                    EngineCommand::PollStopComplete {
                        stream_id: self.stream_id,
                    },
                );
            }
        }
    }

    fn notify_error(&self, message: String) {
        if let Some(engine) = self.engine.upgrade() {
            engine.notify_component_error(ErrorSource::Stream(self.stream_id), message, false);
        }
    }
}

/// Per-input callback object; forwards frames straight into the graph.
struct InputHooks {
    engine: Weak<Engine>,
    input_id: i32,
}

impl InputEngineInterface for InputHooks {
    fn dispatch_input_frame(
        &self,
        stream_id: i32,
        timestamp_us: u64,
        frame: &InputFrame<'_>,
    ) -> Result {
        let engine = self.engine.upgrade().ok_or(Error::IllegalState)?;
        let graph = {
            let components = engine.components.lock().map_err(|_| Error::Internal)?;
            components.graph.clone()
        };
        match graph {
            Some(graph) => graph.set_input_stream_pixel_data(stream_id, timestamp_us, frame),
            None => Err(Error::IllegalState),
        }
    }

    fn notify_input_error(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.notify_component_error(
                ErrorSource::Input(self.input_id),
                "input source failure".to_string(),
                false,
            );
        }
    }
}
