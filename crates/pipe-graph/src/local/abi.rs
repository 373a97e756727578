//! C ABI of the prebuilt graph library.
//!
//! The library exports a flat set of `FramepipeGraph_*` symbols. All
//! callbacks are plain C functions taking a `cookie` because no object
//! context crosses the boundary; payload pointers are only valid for the
//! duration of each call and must be copied out immediately.
//!
//! Function pointers are copied out of their [`libloading::Symbol`]s at load
//! time and remain valid while the owning [`libloading::Library`] is alive;
//! `GraphLibrary` keeps the library for exactly that reason and never
//! unloads it early.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::path::Path;

use pipe_types::{Error, Result, StatusCode};
use tracing::error;

pub(crate) type SemanticCallbackFn = unsafe extern "C" fn(
    cookie: *mut c_void,
    stream_id: c_int,
    timestamp_us: i64,
    data: *const c_uchar,
    size: usize,
);

pub(crate) type PixelCallbackFn = unsafe extern "C" fn(
    cookie: *mut c_void,
    stream_id: c_int,
    timestamp_us: i64,
    pixels: *const u8,
    width: c_int,
    height: c_int,
    step: c_int,
    format: c_int,
);

pub(crate) type TerminationCallbackFn =
    unsafe extern "C" fn(cookie: *mut c_void, message: *const c_uchar, size: usize);

pub(crate) type GetVersionFn = unsafe extern "C" fn() -> *const c_char;
pub(crate) type GetErrorCodeFn = unsafe extern "C" fn() -> c_int;
pub(crate) type GetErrorMessageFn =
    unsafe extern "C" fn(buffer: *mut c_uchar, buffer_size: usize, out_size: *mut usize) -> c_int;
pub(crate) type GetGraphOptionsFn =
    unsafe extern "C" fn(out_options: *mut *const c_void, out_size: *mut usize) -> c_int;
pub(crate) type UpdateGraphConfigFn =
    unsafe extern "C" fn(config: *const c_uchar, config_size: usize) -> c_int;
pub(crate) type SetInputStreamDataFn = unsafe extern "C" fn(
    stream_id: c_int,
    timestamp_us: i64,
    data: *const c_uchar,
    size: usize,
) -> c_int;
pub(crate) type SetInputStreamPixelDataFn = unsafe extern "C" fn(
    stream_id: c_int,
    timestamp_us: i64,
    pixels: *const u8,
    width: c_int,
    height: c_int,
    step: c_int,
    format: c_int,
) -> c_int;
pub(crate) type SetOutputStreamCallbackFn =
    unsafe extern "C" fn(callback: SemanticCallbackFn) -> c_int;
pub(crate) type SetOutputPixelStreamCallbackFn =
    unsafe extern "C" fn(callback: PixelCallbackFn) -> c_int;
pub(crate) type SetGraphTerminationCallbackFn =
    unsafe extern "C" fn(callback: TerminationCallbackFn) -> c_int;
pub(crate) type StartGraphExecutionFn =
    unsafe extern "C" fn(cookie: *mut c_void, debugging_enabled: bool) -> c_int;
pub(crate) type StopGraphExecutionFn = unsafe extern "C" fn(flush_output_frames: bool) -> c_int;
pub(crate) type ResetGraphFn = unsafe extern "C" fn();
pub(crate) type StartGraphProfilingFn = unsafe extern "C" fn() -> c_int;
pub(crate) type StopGraphProfilingFn = unsafe extern "C" fn() -> c_int;
pub(crate) type GetDebugInfoFn =
    unsafe extern "C" fn(buffer: *mut c_uchar, buffer_size: usize, out_size: *mut usize) -> c_int;

/// Every symbol the runner requires from a graph library.
pub(crate) struct SymbolTable {
    pub get_version: GetVersionFn,
    pub get_error_code: GetErrorCodeFn,
    pub get_error_message: GetErrorMessageFn,
    pub get_graph_options: GetGraphOptionsFn,
    pub update_graph_config: UpdateGraphConfigFn,
    pub set_input_stream_data: SetInputStreamDataFn,
    pub set_input_stream_pixel_data: SetInputStreamPixelDataFn,
    pub set_output_stream_callback: SetOutputStreamCallbackFn,
    pub set_output_pixel_stream_callback: SetOutputPixelStreamCallbackFn,
    pub set_graph_termination_callback: SetGraphTerminationCallbackFn,
    pub start_graph_execution: StartGraphExecutionFn,
    pub stop_graph_execution: StopGraphExecutionFn,
    pub reset_graph: ResetGraphFn,
    pub start_graph_profiling: StartGraphProfilingFn,
    pub stop_graph_profiling: StopGraphProfilingFn,
    pub get_debug_info: GetDebugInfoFn,
}

pub(crate) struct GraphLibrary {
    // Held solely to keep the resolved function pointers valid.
    _library: Option<libloading::Library>,
    symbols: SymbolTable,
}

macro_rules! resolve {
    ($lib:expr, $name:literal, $ty:ty) => {{
        let symbol: libloading::Symbol<'_, $ty> = $lib.get($name).map_err(|e| {
            error!(
                target: "graph.local",
                symbol = std::str::from_utf8($name).unwrap_or("?"),
                error = %e,
                "symbol_resolution_failed"
            );
            Error::Internal
        })?;
        *symbol
    }};
}

impl GraphLibrary {
    /// Loads the library and resolves the full symbol set up front; a
    /// library missing any symbol is rejected outright.
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            error!(target: "graph.local", path = %path.display(), error = %e, "dlopen_failed");
            Error::Internal
        })?;
        let symbols = unsafe {
            SymbolTable {
                get_version: resolve!(library, b"FramepipeGraph_get_version\0", GetVersionFn),
                get_error_code: resolve!(
                    library,
                    b"FramepipeGraph_get_error_code\0",
                    GetErrorCodeFn
                ),
                get_error_message: resolve!(
                    library,
                    b"FramepipeGraph_get_error_message\0",
                    GetErrorMessageFn
                ),
                get_graph_options: resolve!(
                    library,
                    b"FramepipeGraph_get_graph_options\0",
                    GetGraphOptionsFn
                ),
                update_graph_config: resolve!(
                    library,
                    b"FramepipeGraph_update_graph_config\0",
                    UpdateGraphConfigFn
                ),
                set_input_stream_data: resolve!(
                    library,
                    b"FramepipeGraph_set_input_stream_data\0",
                    SetInputStreamDataFn
                ),
                set_input_stream_pixel_data: resolve!(
                    library,
                    b"FramepipeGraph_set_input_stream_pixel_data\0",
                    SetInputStreamPixelDataFn
                ),
                set_output_stream_callback: resolve!(
                    library,
                    b"FramepipeGraph_set_output_stream_callback\0",
                    SetOutputStreamCallbackFn
                ),
                set_output_pixel_stream_callback: resolve!(
                    library,
                    b"FramepipeGraph_set_output_pixel_stream_callback\0",
                    SetOutputPixelStreamCallbackFn
                ),
                set_graph_termination_callback: resolve!(
                    library,
                    b"FramepipeGraph_set_graph_termination_callback\0",
                    SetGraphTerminationCallbackFn
                ),
                start_graph_execution: resolve!(
                    library,
                    b"FramepipeGraph_start_graph_execution\0",
                    StartGraphExecutionFn
                ),
                stop_graph_execution: resolve!(
                    library,
                    b"FramepipeGraph_stop_graph_execution\0",
                    StopGraphExecutionFn
                ),
                reset_graph: resolve!(library, b"FramepipeGraph_reset_graph\0", ResetGraphFn),
                start_graph_profiling: resolve!(
                    library,
                    b"FramepipeGraph_start_graph_profiling\0",
                    StartGraphProfilingFn
                ),
                stop_graph_profiling: resolve!(
                    library,
                    b"FramepipeGraph_stop_graph_profiling\0",
                    StopGraphProfilingFn
                ),
                get_debug_info: resolve!(
                    library,
                    b"FramepipeGraph_get_debug_info\0",
                    GetDebugInfoFn
                ),
            }
        };
        Ok(Self {
            _library: Some(library),
            symbols,
        })
    }

    /// Wraps an already-resolved table; used by in-process stub graphs.
    #[cfg(test)]
    pub fn from_table(symbols: SymbolTable) -> Self {
        Self {
            _library: None,
            symbols,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Converts an ABI return code to a `Result`.
    pub fn check(code: c_int) -> Result {
        StatusCode::from_raw(code).into_result()
    }

    /// Reads the version string; the library owns the storage.
    pub fn version(&self) -> String {
        let ptr = unsafe { (self.symbols.get_version)() };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }

    /// Two-call buffer protocol shared by the error-message and debug-info
    /// queries: first call sizes the payload, second fills the buffer.
    pub fn read_sized(
        &self,
        f: unsafe extern "C" fn(*mut c_uchar, usize, *mut usize) -> c_int,
    ) -> Result<Vec<u8>> {
        let mut size: usize = 0;
        unsafe { f(std::ptr::null_mut(), 0, &mut size) };
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; size];
        let code = unsafe { f(buffer.as_mut_ptr(), buffer.len(), &mut size) };
        Self::check(code)?;
        buffer.truncate(size);
        Ok(buffer)
    }
}
