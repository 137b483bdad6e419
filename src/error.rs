//! Error types for the camera client

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Audio source closed")]
    Closed,

    #[error("Capture file error: {0}")]
    CaptureFile(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Image codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("No frame available")]
    NoFrame,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Could not resolve {0}")]
    AddressResolution(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Channel is already connected")]
    AlreadyConnected,

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Command too long: {0} bytes")]
    CommandTooLong(usize),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Recording session errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("No decoded frame available to size the recording")]
    NoFrameAvailable,

    #[error("A recording session is already active")]
    AlreadyRecording,

    #[error("No recording session is active")]
    NotRecording,

    #[error("Video sink error: {0}")]
    VideoSink(String),

    #[error("Mux failed, temporary files kept at {video:?} and {audio:?}: {reason}")]
    Mux {
        reason: String,
        video: PathBuf,
        audio: PathBuf,
    },

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
