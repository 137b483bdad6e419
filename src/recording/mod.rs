//! Recording: synchronized video file + audio capture, muxed on stop

pub mod coordinator;
pub mod ffmpeg;

pub use coordinator::{format_elapsed, RecordingCoordinator, SessionInfo};
pub use ffmpeg::{
    FfmpegMuxer, FfmpegVideoFactory, FfmpegVideoWriter, Muxer, VideoSink, VideoSinkFactory,
};
