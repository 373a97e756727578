#![allow(dead_code)] // Shared across integration tests; each binary uses a subset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use pipe_engine::{
    ClientEngineInterface, ClientInterface, DebugDisplay, Engine, EngineSettings, FreePacketFn,
};
use pipe_graph::{GraphKind, GraphState, PrebuiltEngineInterface, PrebuiltGraph};
use pipe_types::{
    ClientConfig, ClientState, Error, FrameInfo, GraphOptions, InputFrame, MemHandle,
    OutputConfig, PacketType, PixelFormat, Result, RunnerComponent, RunnerEvent,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_TIMEOUT: Duration = Duration::from_millis(200);

// -------------------------------------------------------------------------
// Fake graph
// -------------------------------------------------------------------------

/// Scriptable in-process graph: tests drive its output callbacks directly.
pub struct FakeGraph {
    options: GraphOptions,
    kind: GraphKind,
    engine: Mutex<Weak<dyn PrebuiltEngineInterface>>,
    // Shared with the thread simulating the flush drain.
    state: Arc<Mutex<GraphState>>,
    events: Mutex<Vec<String>>,
    terminate_on_flush: AtomicBool,
}

impl FakeGraph {
    pub fn new(options: GraphOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            kind: GraphKind::Local,
            engine: Mutex::new(Weak::<Engine>::new() as Weak<dyn PrebuiltEngineInterface>),
            state: Arc::new(Mutex::new(GraphState::Stopped)),
            events: Mutex::new(Vec::new()),
            terminate_on_flush: AtomicBool::new(true),
        })
    }

    pub fn set_engine(&self, engine: Weak<dyn PrebuiltEngineInterface>) {
        *self.engine.lock().unwrap() = engine;
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    fn engine(&self) -> Option<Arc<dyn PrebuiltEngineInterface>> {
        self.engine.lock().unwrap().upgrade()
    }

    pub fn emit_pixel(&self, stream_id: i32, timestamp_us: u64, width: u32, height: u32) -> Vec<u8> {
        let data: Vec<u8> = (0..width * height * 3)
            .map(|i| (timestamp_us as u8).wrapping_add(i as u8))
            .collect();
        let frame = InputFrame::new(
            FrameInfo {
                width,
                height,
                format: PixelFormat::Rgb,
                stride: width * 3,
                camera_id: 0,
            },
            &data,
        )
        .unwrap();
        if let Some(engine) = self.engine() {
            engine.dispatch_pixel_data(stream_id, timestamp_us, &frame);
        }
        data
    }

    pub fn emit_semantic(&self, stream_id: i32, timestamp_us: u64, data: &[u8]) {
        if let Some(engine) = self.engine() {
            engine.dispatch_semantic_data(stream_id, timestamp_us, data.to_vec());
        }
    }

    pub fn emit_termination(&self, status: Result, message: &str) {
        *self.state.lock().unwrap() = GraphState::Stopped;
        if let Some(engine) = self.engine() {
            engine.dispatch_graph_termination(status, message.to_string());
        }
    }
}

impl RunnerComponent for FakeGraph {
    fn handle_config_phase(&self, config: &ClientConfig) -> Result {
        if config.is_phase_entry() {
            self.record("config_entry");
        }
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_phase_entry() {
            self.record("run_entry");
            *self.state.lock().unwrap() = GraphState::Running;
        }
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_phase_entry() {
            self.record("stop_flush_entry");
            *self.state.lock().unwrap() = GraphState::Flushing;
            if self.terminate_on_flush.load(Ordering::SeqCst) {
                // A real graph drains and fires its termination callback
                // from its own thread; simulate exactly that.
                let engine = self.engine();
                let state = Arc::clone(&self.state);
                std::thread::spawn(move || {
                    *state.lock().unwrap() = GraphState::Stopped;
                    if let Some(engine) = engine {
                        engine.dispatch_graph_termination(Ok(()), String::new());
                    }
                });
            }
        }
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_phase_entry() {
            self.record("stop_immediate_entry");
            *self.state.lock().unwrap() = GraphState::Stopped;
        }
        Ok(())
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_phase_entry() {
            self.record("reset_entry");
        }
        Ok(())
    }
}

impl PrebuiltGraph for FakeGraph {
    fn graph_kind(&self) -> GraphKind {
        self.kind
    }

    fn graph_state(&self) -> GraphState {
        *self.state.lock().unwrap()
    }

    fn status(&self) -> Result {
        Ok(())
    }

    fn error_message(&self) -> String {
        String::new()
    }

    fn graph_options(&self) -> GraphOptions {
        self.options.clone()
    }

    fn set_input_stream_data(&self, _stream_id: i32, _timestamp_us: u64, _data: &[u8]) -> Result {
        Ok(())
    }

    fn set_input_stream_pixel_data(
        &self,
        _stream_id: i32,
        _timestamp_us: u64,
        _frame: &InputFrame<'_>,
    ) -> Result {
        Ok(())
    }

    fn start_profiling(&self) -> Result {
        Ok(())
    }

    fn stop_profiling(&self) -> Result {
        Ok(())
    }

    fn debug_info(&self) -> String {
        "fake-debug".to_string()
    }
}

// -------------------------------------------------------------------------
// Recording client
// -------------------------------------------------------------------------

pub struct RecordingClient {
    states_tx: Sender<ClientState>,
    packets_tx: Sender<(i32, MemHandle)>,
    debug_tx: Sender<String>,
    pub fail_dispatch: AtomicBool,
}

pub struct ClientProbe {
    pub states: Receiver<ClientState>,
    pub packets: Receiver<(i32, MemHandle)>,
    pub debug: Receiver<String>,
}

pub fn recording_client() -> (Arc<RecordingClient>, ClientProbe) {
    let (states_tx, states) = unbounded();
    let (packets_tx, packets) = unbounded();
    let (debug_tx, debug) = unbounded();
    (
        Arc::new(RecordingClient {
            states_tx,
            packets_tx,
            debug_tx,
            fail_dispatch: AtomicBool::new(false),
        }),
        ClientProbe {
            states,
            packets,
            debug,
        },
    )
}

impl RecordingClient {
    fn notify(&self, state: ClientState) {
        let _ = self.states_tx.send(state);
    }
}

impl RunnerComponent for RecordingClient {
    fn handle_config_phase(&self, config: &ClientConfig) -> Result {
        if config.is_transition_complete() {
            self.notify(ClientState::ConfigDone);
        } else if config.is_aborted() {
            self.notify(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_transition_complete() {
            self.notify(ClientState::Running);
        } else if event.is_aborted() {
            self.notify(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_transition_complete() {
            self.notify(ClientState::Done);
        }
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_transition_complete() {
            self.notify(ClientState::ErrHalt);
        }
        Ok(())
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_transition_complete() {
            self.notify(ClientState::Reset);
        }
        Ok(())
    }
}

impl ClientInterface for RecordingClient {
    fn activate(&self) -> Result {
        Ok(())
    }

    fn dispatch_packet_to_client(&self, stream_id: i32, packet: &MemHandle) -> Result {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(Error::Internal);
        }
        let _ = self.packets_tx.send((stream_id, packet.clone()));
        Ok(())
    }

    fn deliver_graph_debug_info(&self, data: &str) -> Result {
        let _ = self.debug_tx.send(data.to_string());
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Recording display
// -------------------------------------------------------------------------

pub struct RecordingDisplay {
    frames_tx: Sender<MemHandle>,
    free_packet: Mutex<Option<FreePacketFn>>,
}

pub fn recording_display() -> (Arc<RecordingDisplay>, Receiver<MemHandle>) {
    let (frames_tx, frames) = unbounded();
    (
        Arc::new(RecordingDisplay {
            frames_tx,
            free_packet: Mutex::new(None),
        }),
        frames,
    )
}

impl RunnerComponent for RecordingDisplay {}

impl DebugDisplay for RecordingDisplay {
    fn set_free_packet_callback(&self, callback: FreePacketFn) {
        *self.free_packet.lock().unwrap() = Some(callback);
    }

    fn display_frame(&self, packet: &MemHandle) -> Result {
        let _ = self.frames_tx.send(packet.clone());
        if packet.packet_type() == PacketType::Pixel {
            if let Some(free_packet) = self.free_packet.lock().unwrap().as_ref() {
                free_packet(packet.buffer_id())?;
            }
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Wiring helpers
// -------------------------------------------------------------------------

pub fn sample_options() -> GraphOptions {
    GraphOptions {
        graph_name: "fake_graph".to_string(),
        input_configs: Vec::new(),
        output_configs: vec![
            OutputConfig {
                stream_id: 7,
                stream_name: "overlay".to_string(),
                packet_type: PacketType::Pixel,
            },
            OutputConfig {
                stream_id: 3,
                stream_name: "detections".to_string(),
                packet_type: PacketType::Semantic,
            },
            OutputConfig {
                stream_id: 5,
                stream_name: "display".to_string(),
                packet_type: PacketType::Pixel,
            },
        ],
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub graph: Arc<FakeGraph>,
    pub client: Arc<RecordingClient>,
    pub probe: ClientProbe,
}

impl Harness {
    pub fn start(settings: EngineSettings) -> Self {
        let engine = Engine::new(settings);
        let graph = FakeGraph::new(sample_options());
        graph.set_engine(Arc::downgrade(&engine) as Weak<dyn PrebuiltEngineInterface>);
        let (client, probe) = recording_client();
        engine.set_graph(Arc::clone(&graph) as Arc<dyn PrebuiltGraph>);
        engine.set_client(Arc::clone(&client) as Arc<dyn ClientInterface>);
        engine.activate().expect("engine activation");
        Self {
            engine,
            graph,
            client,
            probe,
        }
    }

    pub fn configure_stream(&self, stream_id: i32, max_in_flight: u32) {
        self.engine
            .process_client_config_update(&pipe_types::ConfigurationCommand::SetOutputStream {
                stream_id,
                max_in_flight,
            })
            .expect("config update");
    }

    pub fn apply_configs(&self) {
        self.engine
            .process_client_command(&pipe_types::ControlCommand::ApplyConfigs)
            .expect("apply configs");
        assert_eq!(
            self.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
            ClientState::ConfigDone
        );
    }

    pub fn start_graph(&self) {
        self.engine
            .process_client_command(&pipe_types::ControlCommand::StartGraph)
            .expect("start graph");
        assert_eq!(
            self.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
            ClientState::Running
        );
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
