//! Single-slot, last-write-wins holder for the newest captured frame.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::Mutex;

/// A decoded frame as published by the capture loop.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Decoded pixels, shared between all readers.
    pub image: Arc<RgbImage>,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Publish order, strictly increasing for the life of the buffer.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<CapturedFrame>,
    next_sequence: u64,
}

/// The newest frame, or nothing.
///
/// The lock is held only to swap or clone an `Arc`, so readers never block
/// each other or the writer for longer than that.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Returns the sequence number assigned to it.
    pub fn publish(&self, image: RgbImage, captured_at: DateTime<Utc>) -> u64 {
        let image = Arc::new(image);
        let mut slot = self.slot.lock();
        slot.next_sequence += 1;
        let sequence = slot.next_sequence;
        slot.frame = Some(CapturedFrame {
            image,
            captured_at,
            sequence,
        });
        sequence
    }

    /// The newest frame, if any has been published since the last clear.
    pub fn latest(&self) -> Option<CapturedFrame> {
        self.slot.lock().frame.clone()
    }

    /// Whether a frame is currently held.
    pub fn has_frame(&self) -> bool {
        self.slot.lock().frame.is_some()
    }

    /// Drop the held frame. Sequence numbers keep counting up.
    pub fn clear(&self) {
        self.slot.lock().frame = None;
    }
}
