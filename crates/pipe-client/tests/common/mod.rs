#![allow(dead_code)] // Shared across integration tests.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use pipe_client::{ClientHost, ClientPacket, PacketHandler, StateListener};
use pipe_engine::{ClientEngineInterface, ClientInterface, Engine, EngineSettings};
use pipe_graph::{GraphKind, GraphState, PrebuiltEngineInterface, PrebuiltGraph};
use pipe_types::{
    ClientState, FrameInfo, GraphOptions, InputFrame, OutputConfig, PacketType, PixelFormat,
    Result, RunnerComponent,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_TIMEOUT: Duration = Duration::from_millis(200);

/// Minimal scripted graph: accepts every phase event and lets tests push
/// packets through the engine callbacks.
pub struct FakeGraph {
    options: GraphOptions,
    engine: Mutex<Weak<dyn PrebuiltEngineInterface>>,
}

impl FakeGraph {
    pub fn new(options: GraphOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            engine: Mutex::new(Weak::<Engine>::new() as Weak<dyn PrebuiltEngineInterface>),
        })
    }

    pub fn set_engine(&self, engine: Weak<dyn PrebuiltEngineInterface>) {
        *self.engine.lock().unwrap() = engine;
    }

    fn engine(&self) -> Option<Arc<dyn PrebuiltEngineInterface>> {
        self.engine.lock().unwrap().upgrade()
    }

    pub fn emit_semantic(&self, stream_id: i32, timestamp_us: u64, data: &[u8]) {
        if let Some(engine) = self.engine() {
            engine.dispatch_semantic_data(stream_id, timestamp_us, data.to_vec());
        }
    }

    pub fn emit_pixel(&self, stream_id: i32, timestamp_us: u64, width: u32, height: u32) {
        let data: Vec<u8> = (0..width * height * 3).map(|i| i as u8).collect();
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
    }
}

impl RunnerComponent for FakeGraph {}

impl PrebuiltGraph for FakeGraph {
    fn graph_kind(&self) -> GraphKind {
        GraphKind::Local
    }

    fn graph_state(&self) -> GraphState {
        GraphState::Stopped
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

pub struct ChannelListener {
    tx: Sender<ClientState>,
}

impl StateListener for ChannelListener {
    fn on_state_change(&self, state: ClientState) {
        let _ = self.tx.send(state);
    }
}

pub struct ChannelHandler {
    tx: Sender<ClientPacket>,
}

impl PacketHandler for ChannelHandler {
    fn deliver_packet(&self, packet: &ClientPacket) -> Result {
        let _ = self.tx.send(packet.clone());
        Ok(())
    }
}

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

pub struct Stack {
    pub engine: Arc<Engine>,
    pub graph: Arc<FakeGraph>,
    pub host: Arc<ClientHost>,
    pub states: Receiver<ClientState>,
    pub profiling_dir: tempfile::TempDir,
}

impl Stack {
    /// Full wiring: engine + fake graph + real client host.
    pub fn bring_up(settings: EngineSettings) -> Self {
        let profiling_dir = tempfile::tempdir().expect("profiling dir");
        let engine = Engine::new(settings);
        let graph = FakeGraph::new(sample_options());
        graph.set_engine(Arc::downgrade(&engine) as Weak<dyn PrebuiltEngineInterface>);
        engine.set_graph(Arc::clone(&graph) as Arc<dyn PrebuiltGraph>);

        let host = ClientHost::new(graph.graph_options(), profiling_dir.path().to_path_buf());
        host.set_engine(Arc::downgrade(&engine) as Weak<dyn ClientEngineInterface>);
        engine.set_client(Arc::clone(&host) as Arc<dyn ClientInterface>);

        let (tx, states) = unbounded();
        host.init(Arc::new(ChannelListener { tx })).expect("init");
        engine.activate().expect("activate");

        Self {
            engine,
            graph,
            host,
            states,
            profiling_dir,
        }
    }

    pub fn packet_channel(&self, stream_id: i32) -> Receiver<ClientPacket> {
        let (tx, rx) = unbounded();
        self.host
            .set_packet_handler(stream_id, Arc::new(ChannelHandler { tx }))
            .expect("handler registration");
        rx
    }

    pub fn expect_state(&self, expected: ClientState) {
        assert_eq!(self.states.recv_timeout(RECV_TIMEOUT).unwrap(), expected);
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
