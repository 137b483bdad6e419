//! Recording coordinator
//!
//! A recording is a video sink fed by the caller's frames plus the inbound
//! audio channel's WAV tee, started and stopped together. On stop both
//! files are closed and handed to the muxer.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ffmpeg::{output_file_name, Muxer, VideoSink, VideoSinkFactory};
use crate::config::StorageConfig;
use crate::error::RecordingError;
use crate::frame::Frame;
use crate::network::InboundAudioChannel;

const TEMP_VIDEO: &str = "temp_video.mp4";
const TEMP_AUDIO: &str = "temp_audio.wav";

/// Describes a session that has just started
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub temp_video: PathBuf,
    pub temp_audio: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub started_at: DateTime<Local>,
}

/// An active recording. Exists only between start and stop.
struct RecordingSession {
    info: SessionInfo,
    sink: Box<dyn VideoSink>,
    started: Instant,
    frames_written: u64,
}

/// Starts and stops synchronized video + audio capture
pub struct RecordingCoordinator {
    audio: Arc<InboundAudioChannel>,
    sinks: Arc<dyn VideoSinkFactory>,
    muxer: Arc<dyn Muxer>,
    storage: StorageConfig,
    fps: u32,
    session: Mutex<Option<RecordingSession>>,
}

impl RecordingCoordinator {
    pub fn new(
        audio: Arc<InboundAudioChannel>,
        sinks: Arc<dyn VideoSinkFactory>,
        muxer: Arc<dyn Muxer>,
        storage: StorageConfig,
        fps: u32,
    ) -> Self {
        Self {
            audio,
            sinks,
            muxer,
            storage,
            fps,
            session: Mutex::new(None),
        }
    }

    /// Start a session sized to `frame`.
    ///
    /// Without a frame nothing is touched: no directory, sink or file is
    /// created.
    pub fn start_recording(&self, frame: Option<&Frame>) -> Result<SessionInfo, RecordingError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        let frame = frame.ok_or(RecordingError::NoFrameAvailable)?;
        let (width, height) = frame.dimensions();

        let temp_dir = self.storage.temp_path();
        let video_dir = self.storage.video_path();
        std::fs::create_dir_all(&temp_dir)?;
        std::fs::create_dir_all(&video_dir)?;

        let started_at = Local::now();
        let info = SessionInfo {
            temp_video: temp_dir.join(TEMP_VIDEO),
            temp_audio: temp_dir.join(TEMP_AUDIO),
            output: video_dir.join(output_file_name(started_at)),
            width,
            height,
            started_at,
        };

        let sink = self.sinks.open(&info.temp_video, width, height, self.fps)?;

        // Audio tee goes in before any frame reaches the sink
        if let Err(e) = self.audio.start_capture(&info.temp_audio) {
            if let Err(finish_error) = sink.finish() {
                tracing::debug!("Closing video sink after failed start: {}", finish_error);
            }
            remove_best_effort(&info.temp_video);
            return Err(e.into());
        }

        tracing::info!(
            "Recording started: {}x{} @ {} fps -> {}",
            width,
            height,
            self.fps,
            info.output.display()
        );

        *session = Some(RecordingSession {
            info: info.clone(),
            sink,
            started: Instant::now(),
            frames_written: 0,
        });
        Ok(info)
    }

    /// Write `frame` to the active session. Returns `false` when no session
    /// is active.
    pub fn write_frame(&self, frame: &Frame) -> Result<bool, RecordingError> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Ok(false);
        };
        session.sink.write_frame(frame)?;
        session.frames_written += 1;
        Ok(true)
    }

    /// Close both files and mux them into the final output.
    ///
    /// On success the temporaries are removed (best effort). If the mux fails
    /// they stay on disk and the error names them.
    pub fn stop_recording(&self) -> Result<PathBuf, RecordingError> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(RecordingError::NotRecording)?;
        let RecordingSession {
            info,
            sink,
            started,
            frames_written,
        } = session;

        // Close the audio tee first, then the video file
        let audio_result = self.audio.stop_capture();
        let video_result = sink.finish();
        let audio_path = audio_result?.unwrap_or_else(|| info.temp_audio.clone());
        video_result?;

        tracing::info!(
            "Recording stopped after {} ({} frames), muxing",
            format_elapsed(started.elapsed()),
            frames_written
        );

        self.muxer.mux(&info.temp_video, &audio_path, &info.output)?;

        remove_best_effort(&info.temp_video);
        remove_best_effort(&audio_path);
        tracing::info!("Recording saved: {}", info.output.display());
        Ok(info.output)
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Wall-clock start of the active session
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.session.lock().as_ref().map(|s| s.info.started_at)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.session.lock().as_ref().map(|s| s.started.elapsed())
    }

    pub fn frames_written(&self) -> Option<u64> {
        self.session.lock().as_ref().map(|s| s.frames_written)
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop_recording() {
                tracing::warn!("Recording lost on shutdown: {}", e);
            }
        }
    }
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Could not remove {}: {}", path.display(), e);
    }
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
pub(crate) mod fake {
    //! Sinks and muxers that only touch the filesystem

    use super::*;

    /// Creates the target file and records frame sizes
    #[derive(Clone, Default)]
    pub struct FakeSinkFactory {
        pub opened: Arc<Mutex<Vec<(PathBuf, u32, u32, u32)>>>,
        pub frames: Arc<Mutex<Vec<(u32, u32)>>>,
        pub finished: Arc<Mutex<u32>>,
    }

    struct FakeSink {
        frames: Arc<Mutex<Vec<(u32, u32)>>>,
        finished: Arc<Mutex<u32>>,
    }

    impl VideoSink for FakeSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError> {
            self.frames.lock().push(frame.dimensions());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), RecordingError> {
            *self.finished.lock() += 1;
            Ok(())
        }
    }

    impl VideoSinkFactory for FakeSinkFactory {
        fn open(
            &self,
            path: &Path,
            width: u32,
            height: u32,
            fps: u32,
        ) -> Result<Box<dyn VideoSink>, RecordingError> {
            std::fs::write(path, b"video")?;
            self.opened.lock().push((path.to_path_buf(), width, height, fps));
            Ok(Box::new(FakeSink {
                frames: self.frames.clone(),
                finished: self.finished.clone(),
            }))
        }
    }

    /// Concatenates its inputs into the output, or fails on request
    #[derive(Default)]
    pub struct FakeMuxer {
        pub fail: bool,
        pub calls: Mutex<Vec<(PathBuf, PathBuf, PathBuf)>>,
    }

    impl Muxer for FakeMuxer {
        fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), RecordingError> {
            self.calls
                .lock()
                .push((video.to_path_buf(), audio.to_path_buf(), output.to_path_buf()));
            if self.fail {
                return Err(RecordingError::Mux {
                    reason: "exit status: 1".to_string(),
                    video: video.to_path_buf(),
                    audio: audio.to_path_buf(),
                });
            }
            let mut joined = std::fs::read(video)?;
            joined.extend(std::fs::read(audio)?);
            std::fs::write(output, joined)?;
            Ok(())
        }
    }
}
