//! # AirLens
//!
//! Desktop client for a phone used as a remote camera and microphone.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │   PHONE                                                                  │
//! │   :6677 video + control     :6678 mic PCM          :6679 speaker PCM     │
//! └──────────────────────────────────────────────────────────────────────────┘
//!      BE EF | u32 len | jpeg  ->      raw s16le mono ->      <- raw s16le mono
//!      <- u16 len | utf8 cmd
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │   DESKTOP                                                                │
//! │   VideoChannel            InboundAudioChannel     OutboundAudioChannel   │
//! │   (network::video)        (network::receiver)     (network::sender)      │
//! │   recv thread             recv thread             send thread            │
//! │   decode -> FrameSlot     play + WAV tee          mic -> socket          │
//! │                                                                          │
//! │   DeviceLink (client): poll latest frame, commands, talk session         │
//! │     RecordingCoordinator: temp_video.mp4 + temp_audio.wav                │
//! │       -> ffmpeg mux -> video_save/VID_*.mp4                              │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod network;
pub mod recording;

pub use client::DeviceLink;
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Video frames and control commands
    pub const VIDEO_PORT: u16 = 6677;

    /// Phone microphone -> desktop speaker
    pub const AUDIO_PORT: u16 = 6678;

    /// Desktop microphone -> phone speaker
    pub const TALK_PORT: u16 = 6679;

    /// PCM sample rate on both audio channels
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Mono
    pub const CHANNELS: u16 = 1;

    /// 16-bit signed samples
    pub const BITS_PER_SAMPLE: u16 = 16;

    /// Samples per audio chunk
    pub const CHUNK_SAMPLES: usize = 1024;

    /// Bytes per audio chunk (1024 samples of s16)
    pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;

    /// Frame sync preamble
    pub const FRAME_MARKER: [u8; 2] = [0xBE, 0xEF];

    /// Declared payload lengths above this are discarded unread
    pub const MAX_FRAME_BYTES: u32 = 2_000_000;

    /// Recording frame rate
    pub const RECORDING_FPS: u32 = 20;

    /// Bounded timeout for the initial TCP connect
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Front-end polling cadence for the latest frame
    pub const POLL_INTERVAL: Duration = Duration::from_millis(15);

    /// Capacity of the PCM sample rings bridging cpal callbacks (about 0.75 s)
    pub const SAMPLE_RING_CAPACITY: usize = CHUNK_SAMPLES * 32;
}
