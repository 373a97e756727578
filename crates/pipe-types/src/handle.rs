//! Packet handles dispatched from stream managers to the engine and client.
//!
//! Two ownership models share one `MemHandle` surface: a `SemanticHandle`
//! owns a heap copy of its bytes outright, while a `PixelSlot` is pooled
//! storage owned by its stream manager and only referenced by the handles in
//! flight. Slot lifetime is governed by the manager's reference counts; a
//! handle never frees pixel storage itself.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::frame::InputFrame;
use crate::packet::{PacketType, PixelFormat};

/// Semantic payloads are small by contract; anything larger is a graph bug.
pub const MAX_SEMANTIC_BYTES: usize = 1024;

/// Buffer id reported for packets that need no release bookkeeping.
pub const INVALID_BUFFER_ID: i32 = -1;

/// Usage bits for pooled pixel storage. Mirrors the hardware-buffer usage
/// flags of the underlying allocator; only CPU-write is required here.
pub const USAGE_CPU_WRITE: u32 = 1 << 0;

/// Owned copy of one semantic packet.
#[derive(Debug)]
pub struct SemanticHandle {
    stream_id: i32,
    timestamp_us: u64,
    data: Box<[u8]>,
}

impl SemanticHandle {
    pub fn new(stream_id: i32, data: &[u8], timestamp_us: u64) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_SEMANTIC_BYTES {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            stream_id,
            timestamp_us,
            data: data.into(),
        })
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Geometry and usage of an allocated pixel buffer. `stride` is in pixels,
/// unlike `FrameInfo::stride` which is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub usage: u32,
}

impl BufferDesc {
    pub fn row_bytes(&self) -> usize {
        self.stride as usize * self.format.bytes_per_pixel() as usize
    }

    pub fn byte_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

#[derive(Debug, Default)]
struct SlotState {
    desc: Option<BufferDesc>,
    data: Vec<u8>,
    timestamp_us: u64,
}

/// One pooled pixel buffer. Storage is allocated lazily on the first
/// `set_frame_data` and reused for every subsequent frame with identical
/// geometry; a geometry change on a live slot is rejected.
#[derive(Debug)]
pub struct PixelSlot {
    buffer_id: i32,
    stream_id: i32,
    usage: u32,
    state: Mutex<SlotState>,
}

impl PixelSlot {
    pub fn new(buffer_id: i32, stream_id: i32, usage: u32) -> Self {
        Self {
            buffer_id,
            stream_id,
            usage: USAGE_CPU_WRITE | usage,
            state: Mutex::new(SlotState::default()),
        }
    }

    pub fn buffer_id(&self) -> i32 {
        self.buffer_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Commits one frame into the slot, allocating on first use.
    ///
    /// The allocated stride is in pixels while the input stride is in
    /// bytes, so rows are copied individually whenever the two disagree.
    pub fn set_frame_data(&self, timestamp_us: u64, frame: &InputFrame<'_>) -> Result {
        let info = frame.info();
        let mut state = self.state.lock().map_err(|_| Error::Internal)?;

        if state.desc.is_none() {
            let desc = BufferDesc {
                width: info.width,
                height: info.height,
                stride: info.width,
                format: info.format,
                usage: self.usage,
            };
            state.data = vec![0u8; desc.byte_len()];
            state.desc = Some(desc);
        }

        let desc = state.desc.expect("descriptor set above");
        if info.width != desc.width || info.height != desc.height || info.format != desc.format {
            tracing::error!(
                target: "stream.pixel",
                buffer_id = self.buffer_id,
                "frame_geometry_changed_on_live_slot"
            );
            return Err(Error::InvalidArgument);
        }

        let row_bytes = desc.row_bytes();
        if info.stride as usize == row_bytes {
            let len = desc.byte_len();
            state.data[..len].copy_from_slice(&frame.data()[..len]);
        } else {
            let copy = row_bytes.min(info.stride as usize);
            for y in 0..info.height {
                let dst = y as usize * row_bytes;
                let src = y as usize * info.stride as usize;
                state.data[dst..dst + copy].copy_from_slice(&frame.data()[src..src + copy]);
            }
        }
        state.timestamp_us = timestamp_us;
        Ok(())
    }

    pub fn timestamp_us(&self) -> u64 {
        self.state.lock().map(|s| s.timestamp_us).unwrap_or(0)
    }

    /// Snapshot of the committed contents, if any frame has been set.
    pub fn contents(&self) -> Option<(BufferDesc, Vec<u8>)> {
        let state = self.state.lock().ok()?;
        state.desc.map(|desc| (desc, state.data.clone()))
    }
}

/// Uniform view over one produced packet.
#[derive(Debug, Clone)]
pub enum MemHandle {
    Semantic(Arc<SemanticHandle>),
    Pixel(Arc<PixelSlot>),
}

impl MemHandle {
    pub fn stream_id(&self) -> i32 {
        match self {
            MemHandle::Semantic(h) => h.stream_id(),
            MemHandle::Pixel(s) => s.stream_id(),
        }
    }

    /// Meaningful only for pixel packets; semantic packets report
    /// [`INVALID_BUFFER_ID`] because they need no release call.
    pub fn buffer_id(&self) -> i32 {
        match self {
            MemHandle::Semantic(_) => INVALID_BUFFER_ID,
            MemHandle::Pixel(s) => s.buffer_id(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            MemHandle::Semantic(_) => PacketType::Semantic,
            MemHandle::Pixel(_) => PacketType::Pixel,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            MemHandle::Semantic(h) => h.timestamp_us(),
            MemHandle::Pixel(s) => s.timestamp_us(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            MemHandle::Semantic(h) => h.data().len(),
            MemHandle::Pixel(_) => 0,
        }
    }

    pub fn semantic_data(&self) -> Option<&[u8]> {
        match self {
            MemHandle::Semantic(h) => Some(h.data()),
            MemHandle::Pixel(_) => None,
        }
    }

    pub fn pixel_contents(&self) -> Option<(BufferDesc, Vec<u8>)> {
        match self {
            MemHandle::Semantic(_) => None,
            MemHandle::Pixel(s) => s.contents(),
        }
    }
}
