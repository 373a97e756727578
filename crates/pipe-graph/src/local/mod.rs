//! In-process graph adapter over a prebuilt dynamic library.
//!
//! The library is a process-level resource and is not multi-instance safe,
//! so exactly one adapter exists per process: the first load wins and stays
//! resident for the lifetime of the process. Callbacks from the library
//! carry a cookie that encodes the adapter; the adapter recovers itself from
//! the cookie and fans the data out through a weak engine reference.

mod abi;

use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use pipe_types::{
    ClientConfig, Error, FrameInfo, GraphOptions, InputFrame, PixelFormat, Result, RunnerComponent,
    RunnerEvent,
};
use tracing::{error, info, warn};

use crate::{GraphKind, GraphState, PrebuiltEngineInterface, PrebuiltGraph};
use abi::GraphLibrary;

/// The one resident library adapter. Never cleared: the cookie handed to the
/// library must stay valid for as long as the library can call back.
static INSTANCE: Mutex<Option<Arc<LocalInner>>> = Mutex::new(None);

struct LocalInner {
    library: GraphLibrary,
    version: String,
    options: GraphOptions,
    state: Mutex<GraphState>,
    engine: RwLock<Weak<dyn PrebuiltEngineInterface>>,
    debug_enabled: AtomicBool,
}

pub struct LocalGraph {
    inner: Arc<LocalInner>,
}

/// Loads (or reuses) the process-wide library adapter.
pub fn local_graph_from_library(
    library_path: &Path,
    engine: Weak<dyn PrebuiltEngineInterface>,
) -> Result<Arc<LocalGraph>> {
    let mut guard = INSTANCE.lock().map_err(|_| Error::Internal)?;
    if let Some(inner) = guard.as_ref() {
        info!(target: "graph.local", "library_adapter_reused");
        return Ok(Arc::new(LocalGraph {
            inner: Arc::clone(inner),
        }));
    }
    let library = GraphLibrary::load(library_path)?;
    let inner = init_inner(library, engine)?;
    *guard = Some(Arc::clone(&inner));
    Ok(Arc::new(LocalGraph { inner }))
}

fn init_inner(
    library: GraphLibrary,
    engine: Weak<dyn PrebuiltEngineInterface>,
) -> Result<Arc<LocalInner>> {
    // A callback sink that can never be recovered is a wiring bug.
    engine.upgrade().ok_or(Error::InvalidArgument)?;

    let version = library.version();
    let options = {
        let mut ptr: *const c_void = std::ptr::null();
        let mut size: usize = 0;
        let code = unsafe { (library.symbols().get_graph_options)(&mut ptr, &mut size) };
        GraphLibrary::check(code)?;
        if ptr.is_null() || size == 0 {
            error!(target: "graph.local", "library_reported_empty_options");
            return Err(Error::Internal);
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, size) };
        GraphOptions::from_serialized(bytes)?
    };
    info!(
        target: "graph.local",
        graph = %options.graph_name,
        version = %version,
        "library_adapter_initialized"
    );
    Ok(Arc::new(LocalInner {
        library,
        version,
        options,
        state: Mutex::new(GraphState::Stopped),
        engine: RwLock::new(engine),
        debug_enabled: AtomicBool::new(false),
    }))
}

impl LocalInner {
    fn state(&self) -> GraphState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(GraphState::Uninitialized)
    }

    fn set_state(&self, state: GraphState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    fn engine(&self) -> Option<Arc<dyn PrebuiltEngineInterface>> {
        self.engine.read().ok().and_then(|weak| weak.upgrade())
    }

    fn stop_execution(&self, flush: bool) -> Result {
        let code = unsafe { (self.library.symbols().stop_graph_execution)(flush) };
        GraphLibrary::check(code)?;
        self.set_state(if flush {
            GraphState::Flushing
        } else {
            GraphState::Stopped
        });
        Ok(())
    }
}

unsafe extern "C" fn semantic_output_trampoline(
    cookie: *mut c_void,
    stream_id: c_int,
    timestamp_us: i64,
    data: *const u8,
    size: usize,
) {
    if cookie.is_null() || data.is_null() || size == 0 {
        return;
    }
    let inner = &*(cookie as *const LocalInner);
    if let Some(engine) = inner.engine() {
        let bytes = std::slice::from_raw_parts(data, size).to_vec();
        engine.dispatch_semantic_data(stream_id, timestamp_us as u64, bytes);
    }
}

unsafe extern "C" fn pixel_output_trampoline(
    cookie: *mut c_void,
    stream_id: c_int,
    timestamp_us: i64,
    pixels: *const u8,
    width: c_int,
    height: c_int,
    step: c_int,
    format: c_int,
) {
    if cookie.is_null() || pixels.is_null() || width <= 0 || height <= 0 || step <= 0 {
        return;
    }
    let inner = &*(cookie as *const LocalInner);
    let Some(engine) = inner.engine() else {
        return;
    };
    let Some(format) = PixelFormat::from_raw(format) else {
        warn!(target: "graph.local", stream = stream_id, format, "unknown_pixel_format");
        return;
    };
    let info = FrameInfo {
        width: width as u32,
        height: height as u32,
        format,
        stride: step as u32,
        camera_id: 0,
    };
    if info.stride < info.row_bytes() {
        warn!(target: "graph.local", stream = stream_id, "pixel_callback_stride_underrun");
        return;
    }
    let len = step as usize * (height as usize - 1) + info.row_bytes() as usize;
    let data = std::slice::from_raw_parts(pixels, len);
    match InputFrame::new(info, data) {
        Ok(frame) => engine.dispatch_pixel_data(stream_id, timestamp_us as u64, &frame),
        Err(_) => warn!(target: "graph.local", stream = stream_id, "malformed_pixel_callback"),
    }
}

unsafe extern "C" fn termination_trampoline(cookie: *mut c_void, message: *const u8, size: usize) {
    if cookie.is_null() {
        return;
    }
    let inner = &*(cookie as *const LocalInner);
    // The graph is done producing: record the terminal state before the
    // engine hears about it so state queries are consistent.
    inner.set_state(GraphState::Stopped);
    if let Some(engine) = inner.engine() {
        let message = if message.is_null() || size == 0 {
            String::new()
        } else {
            String::from_utf8_lossy(std::slice::from_raw_parts(message, size)).into_owned()
        };
        let code = (inner.library.symbols().get_error_code)();
        engine.dispatch_graph_termination(GraphLibrary::check(code), message);
    }
}

impl LocalGraph {
    pub fn version(&self) -> &str {
        &self.inner.version
    }
}

impl RunnerComponent for LocalGraph {
    fn handle_config_phase(&self, config: &ClientConfig) -> Result {
        if self.inner.state() == GraphState::Uninitialized {
            return Err(Error::IllegalState);
        }
        // Applying the config is a blocking call, so there is nothing for an
        // abort to interrupt.
        if config.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if config.is_transition_complete() {
            return Ok(());
        }

        let serialized = config.serialized()?;
        let symbols = self.inner.library.symbols();
        let code =
            unsafe { (symbols.update_graph_config)(serialized.as_ptr(), serialized.len()) };
        GraphLibrary::check(code)?;

        self.inner.debug_enabled.store(
            config.profiling() != pipe_types::ProfilingMode::Disabled,
            Ordering::Relaxed,
        );

        if self.inner.engine().is_some() {
            let code = unsafe { (symbols.set_output_pixel_stream_callback)(pixel_output_trampoline) };
            GraphLibrary::check(code)?;
            let code = unsafe { (symbols.set_output_stream_callback)(semantic_output_trampoline) };
            GraphLibrary::check(code)?;
            let code =
                unsafe { (symbols.set_graph_termination_callback)(termination_trampoline) };
            GraphLibrary::check(code)?;
        }
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if self.inner.state() != GraphState::Stopped {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }
        // The cookie stays valid for the process lifetime because the
        // singleton (or the owning adapter) keeps the inner state alive.
        let cookie = Arc::as_ptr(&self.inner) as *mut c_void;
        let debug = self.inner.debug_enabled.load(Ordering::Relaxed);
        let code = unsafe { (self.inner.library.symbols().start_graph_execution)(cookie, debug) };
        GraphLibrary::check(code)?;
        self.inner.set_state(GraphState::Running);
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if self.inner.state() != GraphState::Running {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }
        // Flushing ends when the library fires the termination callback.
        self.inner.stop_execution(true)
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        if self.inner.state() != GraphState::Running {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }
        self.inner.stop_execution(false)
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if self.inner.state() != GraphState::Stopped {
            return Err(Error::IllegalState);
        }
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }
        unsafe { (self.inner.library.symbols().reset_graph)() };
        Ok(())
    }
}

impl PrebuiltGraph for LocalGraph {
    fn graph_kind(&self) -> GraphKind {
        GraphKind::Local
    }

    fn graph_state(&self) -> GraphState {
        self.inner.state()
    }

    fn status(&self) -> Result {
        if self.inner.state() == GraphState::Uninitialized {
            return Err(Error::IllegalState);
        }
        let code = unsafe { (self.inner.library.symbols().get_error_code)() };
        GraphLibrary::check(code)
    }

    fn error_message(&self) -> String {
        if self.inner.state() == GraphState::Uninitialized {
            return "graph library has not been initialized".to_string();
        }
        match self
            .inner
            .library
            .read_sized(self.inner.library.symbols().get_error_message)
        {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => "unable to read error message from the graph library".to_string(),
        }
    }

    fn graph_options(&self) -> GraphOptions {
        self.inner.options.clone()
    }

    fn set_input_stream_data(&self, stream_id: i32, timestamp_us: u64, data: &[u8]) -> Result {
        if self.inner.state() == GraphState::Uninitialized {
            return Err(Error::IllegalState);
        }
        let code = unsafe {
            (self.inner.library.symbols().set_input_stream_data)(
                stream_id,
                timestamp_us as i64,
                data.as_ptr(),
                data.len(),
            )
        };
        GraphLibrary::check(code)
    }

    fn set_input_stream_pixel_data(
        &self,
        stream_id: i32,
        timestamp_us: u64,
        frame: &InputFrame<'_>,
    ) -> Result {
        if self.inner.state() == GraphState::Uninitialized {
            return Err(Error::IllegalState);
        }
        let info = frame.info();
        let code = unsafe {
            (self.inner.library.symbols().set_input_stream_pixel_data)(
                stream_id,
                timestamp_us as i64,
                frame.data().as_ptr(),
                info.width as c_int,
                info.height as c_int,
                info.stride as c_int,
                info.format.as_raw(),
            )
        };
        GraphLibrary::check(code)
    }

    fn start_profiling(&self) -> Result {
        let code = unsafe { (self.inner.library.symbols().start_graph_profiling)() };
        GraphLibrary::check(code)
    }

    fn stop_profiling(&self) -> Result {
        let code = unsafe { (self.inner.library.symbols().stop_graph_profiling)() };
        GraphLibrary::check(code)
    }

    fn debug_info(&self) -> String {
        if self.inner.state() == GraphState::Uninitialized {
            return String::new();
        }
        match self
            .inner
            .library
            .read_sized(self.inner.library.symbols().get_debug_info)
        {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }
}
