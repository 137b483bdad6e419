//! Image codec boundary
//!
//! Frames arrive as encoded stills (JPEG from the phone). Decoding to RGB8
//! and snapshot encoding both go through the `image` crate.

pub mod decoder;
pub mod encoder;

pub use decoder::{FrameDecoder, ImageDecoder};
pub use encoder::save_snapshot;
