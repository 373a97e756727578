//! Semantic stream manager: owned byte blobs, no release bookkeeping.

use std::sync::{Arc, Mutex};
use std::thread;

use pipe_types::{
    ClientConfig, Error, InputFrame, MemHandle, PacketType, Result, RunnerComponent, RunnerEvent,
    SemanticHandle,
};
use tracing::{debug, error};

use crate::{check_max_in_flight, StreamEngineInterface, StreamManager, StreamState};

/// Manages one semantic output stream. Every packet is copied into an owned
/// handle, so there is no pool and no reference counting; `clone_packet` is
/// identity and `free_packet` always succeeds.
pub struct SemanticStreamManager {
    name: String,
    stream_id: i32,
    engine: Arc<dyn StreamEngineInterface>,
    state: Mutex<StreamState>,
}

impl SemanticStreamManager {
    pub fn new(name: String, stream_id: i32, engine: Arc<dyn StreamEngineInterface>) -> Self {
        Self {
            name,
            stream_id,
            engine,
            state: Mutex::new(StreamState::Reset),
        }
    }

    pub fn set_max_in_flight(&self, max_in_flight: u32) -> Result {
        check_max_in_flight(max_in_flight)?;
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        if *state != StreamState::Reset {
            return Err(Error::IllegalState);
        }
        *state = StreamState::ConfigDone;
        Ok(())
    }

    fn handle_stop_event(&self, event: &RunnerEvent) -> Result {
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        match *state {
            StreamState::ConfigDone | StreamState::Reset => Err(Error::IllegalState),
            StreamState::Running if event.is_aborted() || event.is_transition_complete() => {
                Err(Error::IllegalState)
            }
            StreamState::Running => {
                *state = StreamState::Stopped;
                let engine = Arc::clone(&self.engine);
                // End-of-stream must not be signalled from the thread
                // driving the stop broadcast.
                thread::spawn(move || engine.notify_end_of_stream());
                Ok(())
            }
            StreamState::Stopped if event.is_transition_complete() => {
                *state = StreamState::ConfigDone;
                Ok(())
            }
            StreamState::Stopped if event.is_aborted() => {
                *state = StreamState::Running;
                Ok(())
            }
            StreamState::Stopped => Ok(()),
        }
    }
}

impl StreamManager for SemanticStreamManager {
    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn packet_type(&self) -> PacketType {
        PacketType::Semantic
    }

    fn state(&self) -> StreamState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(StreamState::Reset)
    }

    fn clone_packet(&self, handle: &MemHandle) -> Option<MemHandle> {
        // Bytes are owned by the handle itself.
        Some(handle.clone())
    }

    fn free_packet(&self, _buffer_id: i32) -> Result {
        Ok(())
    }

    fn queue_semantic_packet(&self, data: &[u8], timestamp_us: u64) -> Result {
        {
            let state = self.state.lock().map_err(|_| Error::Internal)?;
            // Packets arriving after a stop notification are dropped, not
            // treated as an error.
            if *state != StreamState::Running {
                return Ok(());
            }
        }

        let handle = SemanticHandle::new(self.stream_id, data, timestamp_us)?;
        debug!(
            target: "stream.semantic",
            stream = %self.name,
            size = data.len(),
            timestamp_us,
            "packet_dispatched"
        );
        let engine = Arc::clone(&self.engine);
        let packet = MemHandle::Semantic(Arc::new(handle));
        let stream_id = self.stream_id;
        thread::spawn(move || {
            if engine.dispatch_packet(packet).is_err() {
                engine.notify_error(format!(
                    "semantic stream {stream_id}: failed to dispatch packet"
                ));
            }
        });
        Ok(())
    }

    fn queue_pixel_packet(&self, _frame: &InputFrame<'_>, _timestamp_us: u64) -> Result {
        error!(
            target: "stream.semantic",
            stream = %self.name,
            "pixel_packet_on_semantic_stream"
        );
        Err(Error::IllegalState)
    }
}

impl RunnerComponent for SemanticStreamManager {
    fn handle_config_phase(&self, _config: &ClientConfig) -> Result {
        Ok(())
    }

    fn handle_execution_phase(&self, event: &RunnerEvent) -> Result {
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        match *state {
            StreamState::ConfigDone if event.is_phase_entry() => {
                *state = StreamState::Running;
                Ok(())
            }
            StreamState::Reset => Err(Error::IllegalState),
            StreamState::Running if event.is_aborted() => {
                *state = StreamState::ConfigDone;
                Ok(())
            }
            StreamState::Running => Err(Error::IllegalState),
            _ => Ok(()),
        }
    }

    fn handle_stop_with_flush_phase(&self, event: &RunnerEvent) -> Result {
        self.handle_stop_event(event)
    }

    fn handle_stop_immediate_phase(&self, event: &RunnerEvent) -> Result {
        self.handle_stop_event(event)
    }
}
