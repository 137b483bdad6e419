//! Inbound audio channel (device microphone -> local speaker)
//!
//! Unframed PCM: whatever a read returns is played at once and, when a
//! capture is active, appended to the capture file under the same lock that
//! starts and stops the capture.

use parking_lot::{Mutex, RwLock};
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioBackend, AudioSink, PcmCapture, PcmFormat};
use crate::error::{AudioError, NetworkError, Result};
use crate::network::tcp::{connect_stream, ConnectionState, ShutdownHandle};

/// PCM receive loop with an optional WAV tee
pub struct InboundAudioChannel {
    backend: Arc<dyn AudioBackend>,
    format: PcmFormat,
    /// `Some` while a capture is active; the worker appends under this lock
    capture: Arc<Mutex<Option<PcmCapture>>>,
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<ShutdownHandle>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    bytes_received: Arc<AtomicU64>,
}

impl InboundAudioChannel {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_format(backend, PcmFormat::default())
    }

    pub fn with_format(backend: Arc<dyn AudioBackend>, format: PcmFormat) -> Self {
        Self {
            backend,
            format,
            capture: Arc::new(Mutex::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(ShutdownHandle::new()),
            thread_handle: Mutex::new(None),
            bytes_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect, open the local sink and start the receive worker.
    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Connected) {
                return Err(NetworkError::AlreadyConnected.into());
            }
            *state = ConnectionState::Connecting;
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }

        match self.start_worker(host, port, timeout) {
            Ok(()) => {
                tracing::info!("Audio connected to {}:{}", host, port);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Audio connection to {}:{} failed: {}", host, port, e);
                self.running.store(false, Ordering::SeqCst);
                self.shutdown.shutdown();
                *self.state.write() = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn start_worker(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let stream = connect_stream(host, port, timeout)?;
        self.shutdown.arm(&stream)?;
        let sink = self.backend.open_sink(self.format)?;

        self.running.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let worker = ReceiveWorker {
            stream,
            sink,
            chunk_bytes: self.format.chunk_bytes(),
            capture: self.capture.clone(),
            running: self.running.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            bytes_received: self.bytes_received.clone(),
        };
        let handle = thread::Builder::new()
            .name("audio-recv".to_string())
            .spawn(move || worker.run())?;
        *self.thread_handle.lock() = Some(handle);
        Ok(())
    }

    /// Begin teeing received PCM into a WAV file at `path`.
    ///
    /// An already active capture is finished first.
    pub fn start_capture(&self, path: &Path) -> std::result::Result<(), AudioError> {
        let capture = PcmCapture::create(path, self.format)?;
        let previous = self.capture.lock().replace(capture);
        if let Some(previous) = previous {
            tracing::warn!("Capture restarted; closing {}", previous.path().display());
            previous.finish()?;
        }
        tracing::info!("Audio capture started: {}", path.display());
        Ok(())
    }

    /// End the tee and close the file. Returns its path, or `None` if no
    /// capture was active.
    pub fn stop_capture(&self) -> std::result::Result<Option<PathBuf>, AudioError> {
        let Some(capture) = self.capture.lock().take() else {
            return Ok(None);
        };
        let samples = capture.samples_written();
        let path = capture.finish()?;
        tracing::info!("Audio capture stopped: {} ({} samples)", path.display(), samples);
        Ok(Some(path))
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Stop the worker and release socket and sink. A capture in progress
    /// is left open for the caller to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.shutdown();

        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        *self.state.write() = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl Drop for InboundAudioChannel {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.stop_capture() {
            tracing::warn!("Closing capture on drop failed: {}", e);
        }
    }
}

struct ReceiveWorker {
    stream: TcpStream,
    sink: Box<dyn AudioSink>,
    chunk_bytes: usize,
    capture: Arc<Mutex<Option<PcmCapture>>>,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: Arc<ShutdownHandle>,
    bytes_received: Arc<AtomicU64>,
}

impl ReceiveWorker {
    fn run(mut self) {
        let mut buf = vec![0u8; self.chunk_bytes];

        while self.running.load(Ordering::Relaxed) {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    tracing::info!("Audio stream closed by peer");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        tracing::info!("Audio stream ended: {}", e);
                    }
                    break;
                }
            };

            if let Err(e) = self.sink.write(&buf[..n]) {
                tracing::warn!("Audio sink failed: {}", e);
                break;
            }

            {
                let mut capture = self.capture.lock();
                if let Some(file) = capture.as_mut() {
                    if let Err(e) = file.append(&buf[..n]) {
                        tracing::warn!("Capture append failed: {}", e);
                    }
                }
            }
            self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        }

        let ReceiveWorker {
            stream,
            sink,
            running,
            state,
            shutdown,
            ..
        } = self;
        running.store(false, Ordering::SeqCst);
        drop(sink);
        drop(stream);
        shutdown.shutdown();
        *state.write() = ConnectionState::Closed;
        tracing::debug!("Audio receive worker exited");
    }
}
