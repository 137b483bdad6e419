//! `DeviceLink`: the surface a front end drives
//!
//! Owns the video and inbound audio channels, the optional talk session and
//! the recording coordinator, and keeps the view state (rotation, zoom) that
//! commands and polled frames depend on.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioBackend, CpalBackend, PcmFormat};
use crate::codec::{save_snapshot, FrameDecoder, ImageDecoder};
use crate::config::AppConfig;
use crate::error::{CodecError, Error, NetworkError, RecordingError, Result};
use crate::frame::{Frame, Rotation};
use crate::network::{
    ConnectionState, InboundAudioChannel, OutboundAudioChannel, VideoChannel, VideoStats,
};
use crate::recording::{
    FfmpegMuxer, FfmpegVideoFactory, Muxer, RecordingCoordinator, SessionInfo, VideoSinkFactory,
};

/// Commands understood by the device
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Zoom level in `[0, 1]`
    Zoom(f32),
    SwitchCamera,
    ToggleFlash,
    /// Passed through verbatim
    Raw(String),
}

impl ControlCommand {
    /// Zoom command with the level clamped to `[0, 1]` and rounded to hundredths
    pub fn zoom(level: f32) -> Self {
        ControlCommand::Zoom(quantize_zoom(level))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Zoom(level) => write!(f, "ZOOM:{:?}", quantize_zoom(*level)),
            ControlCommand::SwitchCamera => f.write_str("SWITCH_CAMERA"),
            ControlCommand::ToggleFlash => f.write_str("TOGGLE_FLASH"),
            ControlCommand::Raw(text) => f.write_str(text),
        }
    }
}

fn quantize_zoom(level: f32) -> f32 {
    if level.is_nan() {
        return 0.0;
    }
    (level.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy)]
struct ViewState {
    rotation: Rotation,
    zoom: f32,
}

/// Point-in-time view of the link for status displays
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub host: Option<String>,
    pub video: ConnectionState,
    pub audio: ConnectionState,
    pub talking: bool,
    pub recording: Option<Duration>,
    pub rotation: Rotation,
    pub zoom: f32,
    pub video_stats: VideoStats,
}

/// Connection to one device
pub struct DeviceLink {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    video: VideoChannel,
    audio: Arc<InboundAudioChannel>,
    recorder: RecordingCoordinator,
    host: RwLock<Option<String>>,
    talk: Mutex<Option<OutboundAudioChannel>>,
    view: Mutex<ViewState>,
    last_recorded: AtomicU64,
}

impl DeviceLink {
    /// Link backed by the default audio devices, the `image` decoder and ffmpeg
    pub fn new(config: AppConfig) -> Self {
        let sinks = Arc::new(FfmpegVideoFactory::from_config(&config.recording));
        let muxer = Arc::new(FfmpegMuxer::from_config(&config.recording));
        Self::with_parts(
            config,
            Arc::new(CpalBackend::default()),
            Arc::new(ImageDecoder::new()),
            sinks,
            muxer,
        )
    }

    pub fn with_parts(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        decoder: Arc<dyn FrameDecoder>,
        sinks: Arc<dyn VideoSinkFactory>,
        muxer: Arc<dyn Muxer>,
    ) -> Self {
        let video = VideoChannel::new(decoder).with_max_frame_bytes(config.network.max_frame_bytes);
        let audio = Arc::new(InboundAudioChannel::with_format(
            backend.clone(),
            PcmFormat::default(),
        ));
        let recorder = RecordingCoordinator::new(
            audio.clone(),
            sinks,
            muxer,
            config.storage.clone(),
            config.recording.fps,
        );
        let view = ViewState {
            rotation: config.view.rotation,
            zoom: 0.0,
        };

        Self {
            config,
            backend,
            video,
            audio,
            recorder,
            host: RwLock::new(None),
            talk: Mutex::new(None),
            view: Mutex::new(view),
            last_recorded: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Connect video and inbound audio. Both must come up; if either fails
    /// both are stopped and the error is returned.
    ///
    /// A fully connected link is left alone and reports `AlreadyConnected`.
    /// Otherwise whatever is left of the previous link is stopped first, so
    /// both channels start afresh.
    pub fn connect(&self, host: &str) -> Result<()> {
        if self.is_connected() {
            return Err(NetworkError::AlreadyConnected.into());
        }
        self.video.stop();
        self.audio.stop();

        let net = &self.config.network;
        let timeout = net.connect_timeout();

        let result = self
            .video
            .connect(host, net.video_port, timeout)
            .map_err(Error::from)
            .and_then(|_| self.audio.connect(host, net.audio_port, timeout));

        match result {
            Ok(()) => {
                *self.host.write() = Some(host.to_string());
                tracing::info!("Linked to {}", host);
                Ok(())
            }
            Err(e) => {
                self.video.stop();
                self.audio.stop();
                tracing::warn!("Link to {} failed: {}", host, e);
                Err(e)
            }
        }
    }

    /// Both receive channels are up
    pub fn is_connected(&self) -> bool {
        self.video.is_running() && self.audio.is_running()
    }

    /// Latest decoded frame with the view rotation applied
    pub fn latest_frame(&self) -> Option<Frame> {
        let rotation = self.view.lock().rotation;
        self.video.latest_frame().map(|frame| frame.rotated(rotation))
    }

    /// One front-end tick: the latest rotated frame, which is also written to
    /// the active recording if it has not been recorded yet.
    pub fn poll_frame(&self) -> Option<Frame> {
        let (number, frame) = self.video.frame_slot().latest_numbered()?;
        let frame = frame.rotated(self.view.lock().rotation);
        if self.recorder.is_recording() {
            let previous = self.last_recorded.swap(number, Ordering::Relaxed);
            if previous != number {
                if let Err(e) = self.recorder.write_frame(&frame) {
                    tracing::warn!("Frame not recorded: {}", e);
                }
            }
        }
        Some(frame)
    }

    pub fn send(&self, command: &ControlCommand) -> std::result::Result<(), NetworkError> {
        self.video.send_command(&command.to_string())
    }

    /// Set the zoom level; returns the level actually sent.
    pub fn set_zoom(&self, level: f32) -> std::result::Result<f32, NetworkError> {
        let level = quantize_zoom(level);
        self.send(&ControlCommand::Zoom(level))?;
        self.view.lock().zoom = level;
        Ok(level)
    }

    /// Move the zoom by `steps` increments of the configured step.
    pub fn zoom_by(&self, steps: i32) -> std::result::Result<f32, NetworkError> {
        let current = self.view.lock().zoom;
        self.set_zoom(current + steps as f32 * self.config.view.zoom_step)
    }

    pub fn zoom(&self) -> f32 {
        self.view.lock().zoom
    }

    /// Switch cameras. The other camera needs the opposite quarter turn and
    /// starts unzoomed.
    pub fn switch_camera(&self) -> std::result::Result<(), NetworkError> {
        self.send(&ControlCommand::SwitchCamera)?;
        {
            let mut view = self.view.lock();
            view.rotation = view.rotation.after_camera_switch();
        }
        self.set_zoom(0.0)?;
        Ok(())
    }

    pub fn toggle_flash(&self) -> std::result::Result<(), NetworkError> {
        self.send(&ControlCommand::ToggleFlash)
    }

    /// Advance the display rotation by 90°
    pub fn rotate(&self) -> Rotation {
        let mut view = self.view.lock();
        view.rotation = view.rotation.next();
        view.rotation
    }

    pub fn rotation(&self) -> Rotation {
        self.view.lock().rotation
    }

    /// Start relaying the local microphone to the device. A running talk
    /// session is left as is.
    pub fn start_talk(&self) -> Result<()> {
        let host = self.host.read().clone().ok_or(NetworkError::NotConnected)?;
        let mut talk = self.talk.lock();
        if talk.as_ref().is_some_and(|t| t.is_running()) {
            return Ok(());
        }
        *talk = Some(OutboundAudioChannel::connect_and_start(
            &host,
            self.config.network.talk_port,
            self.config.network.connect_timeout(),
            self.backend.clone(),
            PcmFormat::default(),
        ));
        tracing::info!("Talk started");
        Ok(())
    }

    pub fn stop_talk(&self) {
        if let Some(mut talk) = self.talk.lock().take() {
            talk.stop();
            tracing::info!("Talk stopped ({} bytes sent)", talk.bytes_sent());
        }
    }

    pub fn is_talking(&self) -> bool {
        self.talk.lock().as_ref().is_some_and(|t| t.is_running())
    }

    /// Save the current rotated frame as a JPEG in the photo directory.
    pub fn take_photo(&self) -> Result<PathBuf> {
        let frame = self.latest_frame().ok_or(CodecError::NoFrame)?;
        let dir = self.config.storage.photo_path();
        std::fs::create_dir_all(&dir)?;
        Ok(save_snapshot(&frame, &dir)?)
    }

    /// Start recording at the size of the current rotated frame.
    pub fn start_recording(&self) -> std::result::Result<SessionInfo, RecordingError> {
        let frame = self.latest_frame();
        let info = self.recorder.start_recording(frame.as_ref())?;
        self.last_recorded.store(0, Ordering::Relaxed);
        Ok(info)
    }

    pub fn stop_recording(&self) -> std::result::Result<PathBuf, RecordingError> {
        self.recorder.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recording_elapsed(&self) -> Option<Duration> {
        self.recorder.elapsed()
    }

    pub fn status(&self) -> LinkStatus {
        let view = *self.view.lock();
        LinkStatus {
            host: self.host.read().clone(),
            video: self.video.state(),
            audio: self.audio.state(),
            talking: self.is_talking(),
            recording: self.recorder.elapsed(),
            rotation: view.rotation,
            zoom: view.zoom,
            video_stats: self.video.stats(),
        }
    }

    /// Finish any recording, end the talk session and close both receive
    /// channels. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.recorder.is_recording() {
            match self.recorder.stop_recording() {
                Ok(path) => tracing::info!("Recording saved on shutdown: {}", path.display()),
                Err(e) => tracing::warn!("Recording not saved on shutdown: {}", e),
            }
        }
        self.stop_talk();
        self.video.stop();
        self.audio.stop();
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeBackend;
    use crate::error::AudioError;
    use crate::network::framing::{encode_frame, read_command};
    use crate::recording::coordinator::fake::{FakeMuxer, FakeSinkFactory};
    use crate::test_util::wait_for;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);
    const GRAY_2X1: &[u8] = b"P5 2 1 255\n\x10\x20";

    struct Device {
        video: TcpListener,
        audio: TcpListener,
        talk: TcpListener,
    }

    impl Device {
        fn new() -> Self {
            Self {
                video: TcpListener::bind("127.0.0.1:0").unwrap(),
                audio: TcpListener::bind("127.0.0.1:0").unwrap(),
                talk: TcpListener::bind("127.0.0.1:0").unwrap(),
            }
        }

        fn config(&self, base: &std::path::Path) -> AppConfig {
            let mut config = AppConfig::default();
            config.network.video_port = self.video.local_addr().unwrap().port();
            config.network.audio_port = self.audio.local_addr().unwrap().port();
            config.network.talk_port = self.talk.local_addr().unwrap().port();
            config.network.connect_timeout_ms = 2000;
            config.storage = crate::config::StorageConfig::with_base(base);
            config
        }
    }

    fn link(config: AppConfig, backend: FakeBackend) -> DeviceLink {
        link_with_sinks(config, backend, FakeSinkFactory::default())
    }

    fn link_with_sinks(
        config: AppConfig,
        backend: FakeBackend,
        sinks: FakeSinkFactory,
    ) -> DeviceLink {
        DeviceLink::with_parts(
            config,
            Arc::new(backend),
            Arc::new(ImageDecoder::new()),
            Arc::new(sinks),
            Arc::new(FakeMuxer::default()),
        )
    }

    /// Connect and return the device ends of the video and audio sockets
    fn connected(device: &Device, link: &DeviceLink) -> (TcpStream, TcpStream) {
        link.connect("127.0.0.1").unwrap();
        let (video, _) = device.video.accept().unwrap();
        let (audio, _) = device.audio.accept().unwrap();
        (video, audio)
    }

    fn send_frame(video: &mut TcpStream, link: &DeviceLink, payload: &[u8]) {
        let before = link.video.frame_slot().frames_stored();
        video.write_all(&encode_frame(payload)).unwrap();
        assert!(wait_for(WAIT, || link.video.frame_slot().frames_stored() > before));
    }

    #[test]
    fn test_command_tokens() {
        assert_eq!(ControlCommand::zoom(0.5).to_string(), "ZOOM:0.5");
        assert_eq!(ControlCommand::zoom(0.0).to_string(), "ZOOM:0.0");
        assert_eq!(ControlCommand::zoom(1.7).to_string(), "ZOOM:1.0");
        assert_eq!(ControlCommand::zoom(-3.0).to_string(), "ZOOM:0.0");
        assert_eq!(ControlCommand::zoom(0.333).to_string(), "ZOOM:0.33");
        assert_eq!(ControlCommand::SwitchCamera.to_string(), "SWITCH_CAMERA");
        assert_eq!(ControlCommand::ToggleFlash.to_string(), "TOGGLE_FLASH");
        assert_eq!(ControlCommand::Raw("PING".into()).to_string(), "PING");
    }

    #[test]
    fn test_connect_needs_both_channels() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let mut config = device.config(dir.path());
        // Nobody listens on the audio port
        config.network.audio_port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let link = link(config, FakeBackend::default());

        assert!(link.connect("127.0.0.1").is_err());
        assert!(!link.is_connected());
        assert_ne!(link.status().video, ConnectionState::Connected);
        assert!(link.status().host.is_none());
    }

    #[test]
    fn test_reconnect_after_video_drop() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        let (video, _old_audio) = connected(&device, &link);

        drop(video);
        assert!(wait_for(WAIT, || link.status().video == ConnectionState::Closed));
        assert_eq!(link.status().audio, ConnectionState::Connected);
        assert!(!link.is_connected());

        link.connect("127.0.0.1").unwrap();
        let (mut video, _) = device.video.accept().unwrap();
        let (mut audio, _) = device.audio.accept().unwrap();
        assert!(link.is_connected());

        send_frame(&mut video, &link, GRAY_2X1);
        audio.write_all(&[1u8; 512]).unwrap();
        assert!(wait_for(WAIT, || link.audio.bytes_received() >= 512));
        assert!(link.is_connected());
    }

    #[test]
    fn test_connect_twice_keeps_the_live_link() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        let (mut video, mut audio) = connected(&device, &link);

        assert!(matches!(
            link.connect("127.0.0.1"),
            Err(Error::Network(NetworkError::AlreadyConnected))
        ));
        assert!(link.is_connected());

        send_frame(&mut video, &link, GRAY_2X1);
        audio.write_all(&[1u8; 256]).unwrap();
        assert!(wait_for(WAIT, || link.audio.bytes_received() >= 256));
    }

    #[test]
    fn test_frames_are_rotated_for_display() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        let (mut video, _audio) = connected(&device, &link);
        assert!(link.is_connected());

        send_frame(&mut video, &link, GRAY_2X1);
        // Default view is a quarter turn clockwise
        assert_eq!(link.latest_frame().unwrap().dimensions(), (1, 2));

        link.rotate();
        assert_eq!(link.rotation(), Rotation::Cw180);
        assert_eq!(link.latest_frame().unwrap().dimensions(), (2, 1));
    }

    #[test]
    fn test_zoom_and_camera_commands_reach_the_device() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        let (mut video, _audio) = connected(&device, &link);

        assert_eq!(link.set_zoom(0.5).unwrap(), 0.5);
        assert_eq!(link.zoom_by(2).unwrap(), 0.6);
        assert_eq!(link.zoom_by(-20).unwrap(), 0.0);
        link.toggle_flash().unwrap();
        link.set_zoom(0.4).unwrap();
        link.switch_camera().unwrap();

        let sent: Vec<String> = (0..7).map(|_| read_command(&mut video).unwrap()).collect();
        assert_eq!(
            sent,
            vec![
                "ZOOM:0.5",
                "ZOOM:0.6",
                "ZOOM:0.0",
                "TOGGLE_FLASH",
                "ZOOM:0.4",
                "SWITCH_CAMERA",
                "ZOOM:0.0"
            ]
        );
        assert_eq!(link.rotation(), Rotation::Ccw90);
        assert_eq!(link.zoom(), 0.0);
    }

    #[test]
    fn test_commands_need_a_connection() {
        let dir = TempDir::new().unwrap();
        let device = Device::new();
        let link = link(device.config(dir.path()), FakeBackend::default());
        assert!(matches!(link.set_zoom(0.5), Err(NetworkError::NotConnected)));
        assert_eq!(link.zoom(), 0.0);
        assert!(matches!(
            link.start_talk(),
            Err(Error::Network(NetworkError::NotConnected))
        ));
    }

    #[test]
    fn test_photo() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        assert!(matches!(link.take_photo(), Err(Error::Codec(CodecError::NoFrame))));

        let (mut video, _audio) = connected(&device, &link);
        send_frame(&mut video, &link, GRAY_2X1);
        let path = link.take_photo().unwrap();
        assert!(path.starts_with(dir.path().join("photo_save")));
        assert_eq!(image::open(&path).unwrap().to_rgb8().dimensions(), (1, 2));
    }

    #[test]
    fn test_recording_through_the_link() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let sinks = FakeSinkFactory::default();
        let config = device.config(dir.path());
        let link = link_with_sinks(config, FakeBackend::default(), sinks.clone());
        assert!(matches!(link.start_recording(), Err(RecordingError::NoFrameAvailable)));

        let (mut video, mut audio) = connected(&device, &link);
        send_frame(&mut video, &link, GRAY_2X1);

        let info = link.start_recording().unwrap();
        assert_eq!((info.width, info.height), (1, 2));
        assert!(link.is_recording());
        assert!(link.poll_frame().is_some());
        // Same frame polled again is not written twice
        assert!(link.poll_frame().is_some());
        assert_eq!(sinks.frames.lock().len(), 1);
        send_frame(&mut video, &link, GRAY_2X1);
        assert!(link.poll_frame().is_some());
        assert_eq!(sinks.frames.lock().as_slice(), &[(1, 2), (1, 2)]);

        audio.write_all(&[0u8; 2048]).unwrap();
        assert!(wait_for(WAIT, || link.audio.bytes_received() >= 2048));

        let output = link.stop_recording().unwrap();
        assert!(output.exists());
        assert!(!info.temp_video.exists());
        assert!(!info.temp_audio.exists());
        assert!(link.recording_elapsed().is_none());
    }

    #[test]
    fn test_talk_session() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::default();
        *backend.source_script.lock() = Some(VecDeque::from(vec![
            Ok(vec![7u8; 2048]),
            Err(AudioError::BufferOverflow),
            Ok(vec![7u8; 2048]),
        ]));
        let link = link(device.config(dir.path()), backend);
        let (_video, _audio) = connected(&device, &link);

        link.start_talk().unwrap();
        let (mut speaker, _) = device.talk.accept().unwrap();
        let mut received = Vec::new();
        speaker.read_to_end(&mut received).unwrap();
        assert_eq!(received, vec![7u8; 4096]);

        assert!(wait_for(WAIT, || !link.is_talking()));
        link.stop_talk();
        link.stop_talk();
        assert!(!link.is_talking());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let device = Device::new();
        let dir = TempDir::new().unwrap();
        let link = link(device.config(dir.path()), FakeBackend::default());
        let (mut video, _audio) = connected(&device, &link);
        send_frame(&mut video, &link, GRAY_2X1);
        link.start_recording().unwrap();

        link.shutdown();
        assert!(!link.is_recording());
        assert!(!link.is_connected());
        assert_eq!(entries(&dir.path().join("video_save")), 1);

        link.shutdown();
        assert_eq!(link.status().video, ConnectionState::Closed);
        assert_eq!(link.status().audio, ConnectionState::Closed);
    }

    fn entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|rd| rd.count()).unwrap_or(0)
    }
}
