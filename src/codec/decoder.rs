//! Encoded still -> RGB8 frame

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CodecError;
use crate::frame::Frame;

/// Turns an encoded image payload into a pixel buffer.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Frame, CodecError>;
}

/// Decoder backed by the `image` crate; format is sniffed from the payload.
#[derive(Default)]
pub struct ImageDecoder {
    frames_decoded: AtomicU64,
    frames_failed: AtomicU64,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
        }
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Frame, CodecError> {
        if payload.is_empty() {
            self.frames_failed.fetch_add(1, Ordering::Relaxed);
            return Err(CodecError::InvalidFrameSize(0));
        }

        match image::load_from_memory(payload) {
            Ok(img) => {
                self.frames_decoded.fetch_add(1, Ordering::Relaxed);
                Ok(Frame::new(img.to_rgb8()))
            }
            Err(e) => {
                self.frames_failed.fetch_add(1, Ordering::Relaxed);
                Err(CodecError::DecodingFailed(e.to_string()))
            }
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}
