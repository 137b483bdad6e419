//! ffmpeg-backed video sink and muxer
//!
//! Both run ffmpeg as a child process. The video sink streams raw `rgb24`
//! frames on stdin; the muxer joins the temporary video and WAV files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::config::RecordingConfig;
use crate::error::RecordingError;
use crate::frame::Frame;

/// Destination for recorded frames
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError>;

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

/// Opens a `VideoSink` for a new session
pub trait VideoSinkFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError>;
}

/// Joins a video file and an audio file into `output`
pub trait Muxer: Send + Sync {
    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), RecordingError>;
}

/// Raw RGB frames piped into an ffmpeg encoder
pub struct FfmpegVideoWriter {
    process: Child,
    stdin: ChildStdin,
    width: u32,
    height: u32,
    frames_written: u64,
    frames_dropped: u64,
}

impl FfmpegVideoWriter {
    pub fn spawn(
        ffmpeg: &str,
        codec: &str,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, RecordingError> {
        let args = encoder_args(codec, path, width, height, fps);
        tracing::info!("Starting video writer: {} {}", ffmpeg, args.join(" "));

        let mut process = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecordingError::VideoSink(format!("Failed to start ffmpeg: {}", e)))?;

        let stdin = match process.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = process.kill();
                return Err(RecordingError::VideoSink(
                    "Failed to capture ffmpeg stdin".to_string(),
                ));
            }
        };

        Ok(Self {
            process,
            stdin,
            width,
            height,
            frames_written: 0,
            frames_dropped: 0,
        })
    }
}

impl VideoSink for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        if frame.dimensions() != (self.width, self.height) {
            self.frames_dropped += 1;
            tracing::warn!(
                "Dropping {}x{} frame from {}x{} recording",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
            return Ok(());
        }

        self.stdin
            .write_all(frame.pixels())
            .map_err(|e| RecordingError::VideoSink(format!("Failed to write frame: {}", e)))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecordingError> {
        let Self {
            mut process,
            stdin,
            frames_written,
            frames_dropped,
            ..
        } = *self;

        // EOF on stdin ends the encode
        drop(stdin);
        let status = process
            .wait()
            .map_err(|e| RecordingError::VideoSink(format!("Failed to wait for ffmpeg: {}", e)))?;
        if !status.success() {
            return Err(RecordingError::VideoSink(format!(
                "ffmpeg encoder exited with {}",
                status
            )));
        }

        tracing::info!(
            "Video writer finished: {} frames written, {} dropped",
            frames_written,
            frames_dropped
        );
        Ok(())
    }
}

/// Spawns `FfmpegVideoWriter`s with the configured binary and codec
#[derive(Debug, Clone)]
pub struct FfmpegVideoFactory {
    pub ffmpeg_path: String,
    pub codec: String,
}

impl FfmpegVideoFactory {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            codec: config.video_codec.clone(),
        }
    }
}

impl VideoSinkFactory for FfmpegVideoFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        let writer =
            FfmpegVideoWriter::spawn(&self.ffmpeg_path, &self.codec, path, width, height, fps)?;
        Ok(Box::new(writer))
    }
}

/// `ffmpeg -y -i <video> -i <audio> -c:v copy -c:a <codec> -shortest <out>`
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    pub ffmpeg_path: String,
    pub audio_codec: String,
}

impl FfmpegMuxer {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }
}

impl Muxer for FfmpegMuxer {
    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), RecordingError> {
        let args = mux_args(&self.audio_codec, video, audio, output);
        tracing::info!("Muxing: {} {}", self.ffmpeg_path, args.join(" "));

        let mux_error = |reason: String| RecordingError::Mux {
            reason,
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
        };

        let output_result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| mux_error(format!("Failed to run ffmpeg: {}", e)))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            let tail = stderr.lines().last().unwrap_or_default().to_string();
            return Err(mux_error(format!(
                "ffmpeg exited with {}: {}",
                output_result.status, tail
            )));
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Encoder arguments: raw RGB on stdin, `codec` into `path`
pub fn encoder_args(codec: &str, path: &Path, width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        codec.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        path_arg(path),
    ]
}

/// Mux arguments; the shorter input bounds the output
pub fn mux_args(audio_codec: &str, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(audio),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        audio_codec.to_string(),
        "-shortest".to_string(),
        path_arg(output),
    ]
}

/// Final output name for a recording started at `at`
pub fn output_file_name(at: chrono::DateTime<chrono::Local>) -> PathBuf {
    PathBuf::from(format!("VID_{}.mp4", at.format("%Y%m%d_%H%M%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mux_args() {
        let args = mux_args(
            "aac",
            Path::new("temp/temp_video.mp4"),
            Path::new("temp/temp_audio.wav"),
            Path::new("video_save/VID_1.mp4"),
        );
        assert_eq!(
            args.join(" "),
            concat!(
                "-y -i temp/temp_video.mp4 -i temp/temp_audio.wav ",
                "-c:v copy -c:a aac -shortest video_save/VID_1.mp4"
            )
        );
    }

    #[test]
    fn test_encoder_args_carry_geometry() {
        let args = encoder_args("mpeg4", Path::new("out.mp4"), 640, 480, 20);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 20 -i -"));
        assert!(joined.contains("-c:v mpeg4"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_output_file_name() {
        let at = chrono::Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(output_file_name(at), PathBuf::from("VID_20240309_070501.mp4"));
    }

    #[test]
    fn test_missing_ffmpeg_is_a_mux_error() {
        let muxer = FfmpegMuxer {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            audio_codec: "aac".to_string(),
        };
        let err = muxer
            .mux(Path::new("v.mp4"), Path::new("a.wav"), Path::new("o.mp4"))
            .unwrap_err();
        match err {
            RecordingError::Mux { video, audio, .. } => {
                assert_eq!(video, PathBuf::from("v.mp4"));
                assert_eq!(audio, PathBuf::from("a.wav"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_ffmpeg_fails_sink_open() {
        let factory = FfmpegVideoFactory {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            codec: "mpeg4".to_string(),
        };
        let result = factory.open(Path::new("out.mp4"), 2, 2, 20);
        assert!(matches!(result, Err(RecordingError::VideoSink(_))));
    }
}
