//! Pixel stream manager: pooled, reference-counted buffer slots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use pipe_types::{
    ClientConfig, Error, InputFrame, MemHandle, PacketType, PixelSlot, Result, RunnerComponent,
    RunnerEvent,
};
use tracing::{debug, error, info};

use crate::{check_max_in_flight, StreamEngineInterface, StreamManager, StreamState};

struct InUseSlot {
    refcount: u32,
    slot: Arc<PixelSlot>,
}

#[derive(Default)]
struct Pool {
    max_in_flight: u32,
    next_buffer_id: i32,
    in_use: HashMap<i32, InUseSlot>,
    ready: Vec<Arc<PixelSlot>>,
}

impl Pool {
    fn reclaim_all(&mut self) {
        let drained: Vec<_> = self.in_use.drain().map(|(_, entry)| entry.slot).collect();
        self.ready.extend(drained);
    }
}

/// Owns the pixel storage for one output stream.
///
/// Slots are allocated lazily up to `max_in_flight` and recycled through the
/// `ready` stack; a slot keeps its buffer id for the manager's lifetime, so
/// ids stay unique and stable while a packet is in flight.
pub struct PixelStreamManager {
    name: String,
    stream_id: i32,
    engine: Arc<dyn StreamEngineInterface>,
    state: Mutex<StreamState>,
    // Shared with the stop-entry drain thread.
    pool: Arc<Mutex<Pool>>,
}

impl PixelStreamManager {
    pub fn new(name: String, stream_id: i32, engine: Arc<dyn StreamEngineInterface>) -> Self {
        Self {
            name,
            stream_id,
            engine,
            state: Mutex::new(StreamState::Reset),
            pool: Arc::new(Mutex::new(Pool::default())),
        }
    }

    pub fn set_max_in_flight(&self, max_in_flight: u32) -> Result {
        check_max_in_flight(max_in_flight)?;
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        if *state != StreamState::Reset {
            error!(
                target: "stream.pixel",
                stream = %self.name,
                "max_in_flight_change_after_config"
            );
            return Err(Error::IllegalState);
        }
        self.pool.lock().map_err(|_| Error::Internal)?.max_in_flight = max_in_flight;
        *state = StreamState::ConfigDone;
        Ok(())
    }

    /// Number of packets currently dispatched and not yet freed.
    pub fn in_flight_count(&self) -> usize {
        self.pool.lock().map(|p| p.in_use.len()).unwrap_or(0)
    }

    fn dispatch_async(&self, slot: Arc<PixelSlot>) {
        let engine = Arc::clone(&self.engine);
        let stream_id = self.stream_id;
        // Fresh thread: dispatching while holding a manager lock could
        // deadlock against an engine that calls back into this manager.
        thread::spawn(move || {
            if engine.dispatch_packet(MemHandle::Pixel(slot)).is_err() {
                engine.notify_error(format!(
                    "pixel stream {stream_id}: failed to dispatch packet"
                ));
            }
        });
    }

    fn handle_stop_event(&self, event: &RunnerEvent) -> Result {
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;
        match *state {
            StreamState::ConfigDone | StreamState::Reset => Err(Error::IllegalState),
            StreamState::Running if event.is_aborted() || event.is_transition_complete() => {
                // Stop cannot complete or unwind before it was entered.
                Err(Error::IllegalState)
            }
            StreamState::Running => {
                *state = StreamState::Stopped;
                let engine = Arc::clone(&self.engine);
                let pool = Arc::clone(&self.pool);
                thread::spawn(move || {
                    if let Ok(mut pool) = pool.lock() {
                        pool.reclaim_all();
                    }
                    engine.notify_end_of_stream();
                });
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

impl StreamManager for PixelStreamManager {
    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn packet_type(&self) -> PacketType {
        PacketType::Pixel
    }

    fn state(&self) -> StreamState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(StreamState::Reset)
    }

    fn clone_packet(&self, handle: &MemHandle) -> Option<MemHandle> {
        let MemHandle::Pixel(_) = handle else {
            error!(target: "stream.pixel", stream = %self.name, "clone_of_non_pixel_handle");
            return None;
        };
        let mut pool = self.pool.lock().ok()?;
        match pool.in_use.get_mut(&handle.buffer_id()) {
            Some(entry) => {
                entry.refcount += 1;
                Some(handle.clone())
            }
            None => {
                error!(
                    target: "stream.pixel",
                    stream = %self.name,
                    buffer_id = handle.buffer_id(),
                    "clone_of_freed_packet"
                );
                None
            }
        }
    }

    fn free_packet(&self, buffer_id: i32) -> Result {
        // Lock order is state before pool everywhere in this manager.
        let stopped = {
            let state = self.state.lock().map_err(|_| Error::Internal)?;
            *state == StreamState::Stopped
        };
        let mut pool = self.pool.lock().map_err(|_| Error::Internal)?;
        let Some(entry) = pool.in_use.get_mut(&buffer_id) else {
            // After stop the pool is reclaimed asynchronously; a late
            // release from the client is expected and harmless.
            if stopped {
                return Ok(());
            }
            error!(
                target: "stream.pixel",
                stream = %self.name,
                buffer_id,
                "free_of_unknown_buffer"
            );
            return Err(Error::InvalidArgument);
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let entry = pool.in_use.remove(&buffer_id).expect("entry exists");
            pool.ready.push(entry.slot);
        }
        Ok(())
    }

    fn queue_semantic_packet(&self, _data: &[u8], _timestamp_us: u64) -> Result {
        error!(target: "stream.pixel", stream = %self.name, "semantic_packet_on_pixel_stream");
        Err(Error::IllegalState)
    }

    fn queue_pixel_packet(&self, frame: &InputFrame<'_>, timestamp_us: u64) -> Result {
        {
            let state = self.state.lock().map_err(|_| Error::Internal)?;
            if *state != StreamState::Running {
                error!(
                    target: "stream.pixel",
                    stream = %self.name,
                    state = ?*state,
                    "packet_queued_outside_running"
                );
                return Err(Error::IllegalState);
            }
        }

        let slot = {
            let mut pool = self.pool.lock().map_err(|_| Error::Internal)?;
            if pool.in_use.len() >= pool.max_in_flight as usize {
                info!(
                    target: "stream.pixel",
                    stream = %self.name,
                    timestamp_us,
                    "in_flight_limit_reached_dropping_frame"
                );
                return Ok(());
            }
            let slot = match pool.ready.pop() {
                Some(slot) => slot,
                None => {
                    let id = pool.next_buffer_id;
                    pool.next_buffer_id += 1;
                    Arc::new(PixelSlot::new(id, self.stream_id, 0))
                }
            };
            if let Err(e) = slot.set_frame_data(timestamp_us, frame) {
                error!(
                    target: "stream.pixel",
                    stream = %self.name,
                    status = ?e,
                    "frame_commit_failed"
                );
                pool.ready.push(slot);
                return Err(e);
            }
            pool.in_use.insert(
                slot.buffer_id(),
                InUseSlot {
                    refcount: 1,
                    slot: Arc::clone(&slot),
                },
            );
            slot
        };

        debug!(
            target: "stream.pixel",
            stream = %self.name,
            buffer_id = slot.buffer_id(),
            timestamp_us,
            "packet_dispatched"
        );
        self.dispatch_async(slot);
        Ok(())
    }
}

impl RunnerComponent for PixelStreamManager {
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
