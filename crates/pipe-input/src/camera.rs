//! Camera input manager.
//!
//! Each camera stream gets a [`FrameRelay`] that the device delivers frames
//! into. The relay holds the engine sink behind a swap-out slot: it is
//! populated only after every camera in the set has started, and cleared
//! before devices are stopped, so no frame can reach the engine outside the
//! RUN window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use pipe_types::{
    ClientConfig, Error, FrameInfo, InputConfig, InputFrame, InputStreamConfig, Result,
    RunnerComponent, RunnerEvent,
};
use tracing::{error, info, warn};

use crate::{InputEngineInterface, InputManager};

/// One owned frame produced by a camera device.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub info: FrameInfo,
    pub data: Vec<u8>,
}

/// Delivery endpoint handed to a camera device.
pub struct FrameRelay {
    stream_id: i32,
    engine: RwLock<Option<Arc<dyn InputEngineInterface>>>,
}

impl FrameRelay {
    fn new(stream_id: i32) -> Self {
        Self {
            stream_id,
            engine: RwLock::new(None),
        }
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn set_engine(&self, engine: Option<Arc<dyn InputEngineInterface>>) {
        if let Ok(mut slot) = self.engine.write() {
            *slot = engine;
        }
    }

    /// Called by the device for every captured frame. Frames arriving while
    /// no engine is attached are dropped.
    pub fn deliver(&self, frame: &CameraFrame) {
        let guard = match self.engine.read() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let Some(engine) = guard.as_ref() else {
            return;
        };
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        match InputFrame::new(frame.info, &frame.data) {
            Ok(view) => {
                if let Err(e) = engine.dispatch_input_frame(self.stream_id, timestamp_us, &view) {
                    warn!(
                        target: "input.camera",
                        stream = self.stream_id,
                        status = ?e,
                        "frame_dispatch_failed"
                    );
                }
            }
            Err(_) => {
                error!(
                    target: "input.camera",
                    stream = self.stream_id,
                    "malformed_camera_frame"
                );
                engine.notify_input_error();
            }
        }
    }

    /// Device-side failure, relayed as an input error.
    pub fn report_error(&self) {
        if let Ok(guard) = self.engine.read() {
            if let Some(engine) = guard.as_ref() {
                engine.notify_input_error();
            }
        }
    }
}

/// Abstraction over one capture device. `start_stream` begins delivering
/// frames into the relay from a device-owned thread; `stop_stream` blocks
/// until delivery has ceased.
pub trait CameraDevice: Send {
    fn start_stream(&mut self, relay: Arc<FrameRelay>) -> Result;
    fn stop_stream(&mut self);
}

pub struct CameraInputManager {
    engine: Arc<dyn InputEngineInterface>,
    cameras: Mutex<HashMap<i32, Box<dyn CameraDevice>>>,
    relays: Vec<Arc<FrameRelay>>,
}

impl CameraInputManager {
    /// Builds the manager with one device per configured camera stream.
    pub fn with_devices<F>(
        config: &InputConfig,
        engine: Arc<dyn InputEngineInterface>,
        mut device_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&InputStreamConfig) -> Result<Box<dyn CameraDevice>>,
    {
        let mut cameras = HashMap::new();
        let mut relays = Vec::new();
        for stream in &config.input_streams {
            let device = device_for(stream)?;
            if cameras.insert(stream.stream_id, device).is_some() {
                error!(
                    target: "input.camera",
                    stream = stream.stream_id,
                    "duplicate_camera_stream_id"
                );
                return Err(Error::InvalidArgument);
            }
            relays.push(Arc::new(FrameRelay::new(stream.stream_id)));
        }
        Ok(Self {
            engine,
            cameras: Mutex::new(cameras),
            relays,
        })
    }

    fn relay_for(&self, stream_id: i32) -> Option<&Arc<FrameRelay>> {
        self.relays.iter().find(|r| r.stream_id() == stream_id)
    }

    fn detach_and_stop(&self) {
        // Detach first so frames still in flux inside a device cannot reach
        // the engine while streams wind down.
        for relay in &self.relays {
            relay.set_engine(None);
        }
        if let Ok(mut cameras) = self.cameras.lock() {
            for (stream_id, camera) in cameras.iter_mut() {
                info!(target: "input.camera", stream = stream_id, "stopping_camera_stream");
                camera.stop_stream();
            }
        }
    }
}

impl InputManager for CameraInputManager {}

impl RunnerComponent for CameraInputManager {
    fn handle_config_phase(&self, _config: &ClientConfig) -> Result {
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_aborted() {
            // Starting the sources is a blocking call; there is nothing to
            // unwind mid-flight.
            return Err(Error::InvalidArgument);
        }
        if event.is_transition_complete() {
            return Ok(());
        }

        let mut cameras = self.cameras.lock().map_err(|_| Error::Internal)?;
        if cameras.is_empty() {
            error!(target: "input.camera", "run_entry_without_configured_cameras");
            return Err(Error::IllegalState);
        }

        let mut started = Vec::new();
        let mut start_failed = false;
        for (stream_id, camera) in cameras.iter_mut() {
            let relay = self
                .relay_for(*stream_id)
                .cloned()
                .ok_or(Error::Internal)?;
            if let Err(e) = camera.start_stream(relay) {
                error!(
                    target: "input.camera",
                    stream = stream_id,
                    status = ?e,
                    "camera_start_failed"
                );
                start_failed = true;
                break;
            }
            info!(target: "input.camera", stream = stream_id, "camera_stream_started");
            started.push(*stream_id);
        }
        if start_failed {
            for stream_id in &started {
                if let Some(camera) = cameras.get_mut(stream_id) {
                    camera.stop_stream();
                }
            }
            return Err(Error::Internal);
        }

        // Attach the sink only once every stream is up, so no frame goes
        // out before the whole set is running.
        for relay in &self.relays {
            relay.set_engine(Some(Arc::clone(&self.engine)));
        }
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_transition_complete() {
            return Ok(());
        }
        if event.is_aborted() {
            warn!(target: "input.camera", "stop_abort_ignored_streams_must_restart");
        }
        self.detach_and_stop();
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        self.handle_stop_with_flush_phase(event)
    }

    fn handle_reset_phase(&self, event: &RunnerEvent) -> Result {
        if event.is_aborted() {
            return Err(Error::InvalidArgument);
        }
        if event.is_phase_entry() {
            self.detach_and_stop();
            if let Ok(mut cameras) = self.cameras.lock() {
                cameras.clear();
            }
        }
        Ok(())
    }
}
