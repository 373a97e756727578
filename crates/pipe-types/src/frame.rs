//! Borrowed view over one frame of input pixel data.
//!
//! `InputFrame` never owns the pixels; producers (camera sources, graph
//! callbacks, remote observers) keep the backing storage alive for the
//! duration of the call and consumers copy what they need before returning.

use crate::error::{Error, Result};
use crate::packet::PixelFormat;

/// Geometry of a frame. `stride` is in bytes and may exceed
/// `width * bytes_per_pixel` when rows are padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: u32,
    pub camera_id: i32,
}

impl FrameInfo {
    pub fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputFrame<'a> {
    info: FrameInfo,
    data: &'a [u8],
}

impl<'a> InputFrame<'a> {
    /// Wraps pixel data. The slice must cover every addressable row; a
    /// short buffer is rejected so downstream row copies cannot read past
    /// the end.
    pub fn new(info: FrameInfo, data: &'a [u8]) -> Result<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(Error::InvalidArgument);
        }
        if info.stride < info.row_bytes() {
            return Err(Error::InvalidArgument);
        }
        let min_len = info.stride as usize * (info.height as usize - 1) + info.row_bytes() as usize;
        if data.len() < min_len {
            return Err(Error::InvalidArgument);
        }
        Ok(Self { info, data })
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Row `y` of the frame, `row_bytes` long (stride padding excluded).
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.info.stride as usize;
        &self.data[start..start + self.info.row_bytes() as usize]
    }
}
