//! Synthetic camera producing a moving test pattern.
//!
//! Stands in for capture hardware in demos and tests: a worker thread emits
//! one frame per interval until the stop channel fires.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use pipe_types::{Error, FrameInfo, PixelFormat, Result};
use tracing::info;

use crate::camera::{CameraDevice, CameraFrame, FrameRelay};
use std::sync::Arc;

const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub struct PatternCamera {
    camera_id: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PatternCamera {
    pub fn new(camera_id: String, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            camera_id,
            width,
            height,
            format,
            interval: DEFAULT_FRAME_INTERVAL,
            stop_tx: None,
            worker: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn render(seq: u64, width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
        let row_bytes = (width * format.bytes_per_pixel()) as usize;
        let mut data = vec![0u8; row_bytes * height as usize];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (seq as usize + i) as u8;
        }
        data
    }
}

impl CameraDevice for PatternCamera {
    fn start_stream(&mut self, relay: Arc<FrameRelay>) -> Result {
        if self.worker.is_some() {
            return Err(Error::IllegalState);
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (width, height, format) = (self.width, self.height, self.format);
        let interval = self.interval;
        let camera_id = self.camera_id.clone();
        let worker = thread::spawn(move || {
            info!(target: "input.camera", camera = %camera_id, "pattern_stream_started");
            let mut seq: u64 = 0;
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        let frame = CameraFrame {
                            info: FrameInfo {
                                width,
                                height,
                                format,
                                stride: width * format.bytes_per_pixel(),
                                camera_id: 0,
                            },
                            data: Self::render(seq, width, height, format),
                        };
                        relay.deliver(&frame);
                        seq += 1;
                    }
                    _ => break,
                }
            }
            info!(target: "input.camera", camera = %camera_id, "pattern_stream_stopped");
        });
        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PatternCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
