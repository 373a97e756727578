//! Per-stream observers for the remote graph.
//!
//! Each configured output stream gets one dedicated connection and reader
//! thread. Closures are funneled into the set observer, which counts active
//! streams and reports exactly one graph termination when the last stream
//! goes away, regardless of whether streams drained naturally or were cut
//! by an immediate stop.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use pipe_types::{Error, FrameInfo, InputFrame, Result};
use tracing::{debug, info, warn};

use super::wire::{self, GraphRequest, OutputStreamMessage, OutputStreamPayload};
use super::RemoteCore;

struct ActiveStream {
    stop: Arc<AtomicBool>,
    socket: TcpStream,
}

struct SetInner {
    graph: Weak<RemoteCore>,
    active: Mutex<HashMap<i32, ActiveStream>>,
    all_closed: Condvar,
    terminated: AtomicBool,
}

impl SetInner {
    fn dispatch(&self, stream_id: i32, message: OutputStreamMessage) {
        let Some(core) = self.graph.upgrade() else {
            return;
        };
        let Some(engine) = core.engine() else {
            return;
        };
        match message.payload {
            OutputStreamPayload::SemanticData { data } => {
                engine.dispatch_semantic_data(stream_id, message.timestamp_us, data);
            }
            OutputStreamPayload::PixelData {
                data,
                width,
                height,
                step,
                format,
            } => {
                let info = FrameInfo {
                    width,
                    height,
                    format,
                    stride: step,
                    camera_id: 0,
                };
                match InputFrame::new(info, &data) {
                    Ok(frame) => {
                        engine.dispatch_pixel_data(stream_id, message.timestamp_us, &frame)
                    }
                    Err(_) => warn!(
                        target: "graph.remote",
                        stream = stream_id,
                        "malformed_pixel_message_dropped"
                    ),
                }
            }
        }
    }

    fn report_closed(&self, stream_id: i32) {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(_) => return,
        };
        if active.remove(&stream_id).is_none() {
            return;
        }
        debug!(target: "graph.remote", stream = stream_id, "observer_closed");
        if active.is_empty() {
            self.all_closed.notify_all();
            drop(active);
            self.signal_termination();
        }
    }

    /// Exactly-once latch shared by every path that can end the stream set.
    fn signal_termination(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let graph = self.graph.clone();
        // Separate thread: the engine reacts to a termination by issuing
        // phase broadcasts that may call straight back into the adapter.
        thread::spawn(move || {
            if let Some(core) = graph.upgrade() {
                core.dispatch_termination(Ok(()), String::new());
            }
        });
    }
}

pub(crate) struct StreamSetObserver {
    inner: Arc<SetInner>,
    address: String,
    stream_ids: Vec<i32>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSetObserver {
    pub fn new(address: String, stream_ids: Vec<i32>, graph: Weak<RemoteCore>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                graph,
                active: Mutex::new(HashMap::new()),
                all_closed: Condvar::new(),
                terminated: AtomicBool::new(false),
            }),
            address,
            stream_ids,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) -> Result {
        {
            let active = self.inner.active.lock().map_err(|_| Error::Internal)?;
            if !active.is_empty() {
                warn!(target: "graph.remote", "observers_already_started");
                return Err(Error::IllegalState);
            }
        }
        self.inner.terminated.store(false, Ordering::SeqCst);

        // Open every connection before any reader starts so a partial
        // failure can be unwound without racing closure reports.
        let mut connections = Vec::new();
        for stream_id in &self.stream_ids {
            match self.observe_connection(*stream_id) {
                Ok(socket) => connections.push((*stream_id, socket)),
                Err(e) => {
                    for (_, socket) in &connections {
                        let _ = socket.shutdown(Shutdown::Both);
                    }
                    return Err(e);
                }
            }
        }

        let mut threads = self.threads.lock().map_err(|_| Error::Internal)?;
        let mut active = self.inner.active.lock().map_err(|_| Error::Internal)?;
        for (stream_id, socket) in connections {
            let stop = Arc::new(AtomicBool::new(false));
            let reader_socket = socket.try_clone().map_err(|_| Error::Internal)?;
            active.insert(
                stream_id,
                ActiveStream {
                    stop: Arc::clone(&stop),
                    socket,
                },
            );
            let inner = Arc::clone(&self.inner);
            threads.push(thread::spawn(move || {
                observe_loop(inner, stream_id, reader_socket, stop)
            }));
        }
        Ok(())
    }

    fn observe_connection(&self, stream_id: i32) -> Result<TcpStream> {
        let mut socket = TcpStream::connect(&self.address).map_err(|e| {
            warn!(
                target: "graph.remote",
                stream = stream_id,
                error = %e,
                "observer_connect_failed"
            );
            Error::Fatal
        })?;
        wire::write_message(&mut socket, &GraphRequest::ObserveOutputStream { stream_id })?;
        info!(target: "graph.remote", stream = stream_id, "observer_started");
        Ok(socket)
    }

    /// Stops the stream set. A flush stop lets observers drain naturally;
    /// an immediate stop cancels them and blocks until every stream has
    /// reported closed.
    pub fn stop(&self, stop_immediately: bool) {
        let mut active = match self.inner.active.lock() {
            Ok(active) => active,
            Err(_) => return,
        };
        if active.is_empty() {
            drop(active);
            self.inner.signal_termination();
            self.join_threads();
            return;
        }
        if !stop_immediately {
            return;
        }
        for stream in active.values() {
            stream.stop.store(true, Ordering::SeqCst);
            let _ = stream.socket.shutdown(Shutdown::Both);
        }
        while !active.is_empty() {
            active = match self.inner.all_closed.wait(active) {
                Ok(active) => active,
                Err(_) => return,
            };
        }
        drop(active);
        self.join_threads();
    }

    fn join_threads(&self) {
        if let Ok(mut threads) = self.threads.lock() {
            for thread in threads.drain(..) {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for StreamSetObserver {
    fn drop(&mut self) {
        if let Ok(active) = self.inner.active.lock() {
            for stream in active.values() {
                stream.stop.store(true, Ordering::SeqCst);
                let _ = stream.socket.shutdown(Shutdown::Both);
            }
        }
        self.join_threads();
    }
}

fn observe_loop(inner: Arc<SetInner>, stream_id: i32, socket: TcpStream, stop: Arc<AtomicBool>) {
    let mut reader = BufReader::new(socket);
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match wire::read_message::<_, OutputStreamMessage>(&mut reader) {
            Ok(Some(message)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                inner.dispatch(stream_id, message);
            }
            Ok(None) => break,
            Err(_) => {
                // Socket shutdown during an immediate stop lands here; a
                // genuine transport error ends the stream the same way.
                break;
            }
        }
    }
    inner.report_closed(stream_id);
}
