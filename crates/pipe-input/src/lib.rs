//! Input-side components: sources that feed frames into the graph.
//!
//! An input manager owns the subscription to one input configuration (one or
//! more camera streams) and relays `(stream, timestamp, frame)` tuples into
//! the frame sink the engine supplies. Sources are started on RUN entry and
//! stopped synchronously on any stop or reset; after a stop no callback may
//! reach the engine even if the device still has frames in flux.

mod camera;
mod pattern;

use std::sync::Arc;

use pipe_types::{Error, InputConfig, InputFrame, InputStreamSource, Result, RunnerComponent};

pub use camera::{CameraDevice, CameraFrame, CameraInputManager, FrameRelay};
pub use pattern::PatternCamera;

/// Input manager → engine interface. The engine routes frames to the graph
/// adapter and turns input errors into component errors.
pub trait InputEngineInterface: Send + Sync + 'static {
    fn dispatch_input_frame(
        &self,
        stream_id: i32,
        timestamp_us: u64,
        frame: &InputFrame<'_>,
    ) -> Result;

    /// Source-side failure for the input this interface was built for.
    fn notify_input_error(&self);
}

/// Marker surface for engine ownership; all behavior arrives via phase
/// events.
pub trait InputManager: RunnerComponent {}

/// Builds the input manager for a selected input configuration. Only camera
/// sources are supported; the synthetic pattern camera stands in for real
/// capture hardware.
pub fn create_input_manager(
    config: &InputConfig,
    engine: Arc<dyn InputEngineInterface>,
) -> Result<Arc<dyn InputManager>> {
    let manager = CameraInputManager::with_devices(config, engine, |stream| {
        match &stream.source {
            InputStreamSource::Camera { camera_id } => Ok(Box::new(PatternCamera::new(
                camera_id.clone(),
                stream.width,
                stream.height,
                stream.format,
            ))),
            _ => Err(Error::InvalidArgument),
        }
    })?;
    Ok(Arc::new(manager))
}
