//! Video + control channel
//!
//! One TCP connection carries frames from the device and commands back to
//! it. The receive side is owned by a dedicated worker thread; commands go
//! out through a cloned handle of the same socket, so both directions run
//! independently.

use parking_lot::{Mutex, RwLock};
use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::codec::FrameDecoder;
use crate::constants::MAX_FRAME_BYTES;
use crate::error::NetworkError;
use crate::frame::{Frame, FrameSlot};
use crate::network::framing::{encode_command, read_frame, FrameRead};
use crate::network::tcp::{connect_stream, ConnectionState, ShutdownHandle};

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Receive-side counters
#[derive(Default)]
struct VideoCounters {
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    frames_oversized: AtomicU64,
    bytes_skipped: AtomicU64,
    commands_sent: AtomicU64,
}

/// Snapshot of the channel counters
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoStats {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_oversized: u64,
    pub bytes_skipped: u64,
    pub commands_sent: u64,
}

/// Framed video stream with an upstream command path
pub struct VideoChannel {
    decoder: Arc<dyn FrameDecoder>,
    slot: Arc<FrameSlot>,
    max_frame_bytes: u32,
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    writer: Arc<Mutex<Option<TcpStream>>>,
    shutdown: Arc<ShutdownHandle>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<VideoCounters>,
}

impl VideoChannel {
    pub fn new(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            decoder,
            slot: Arc::new(FrameSlot::new()),
            max_frame_bytes: MAX_FRAME_BYTES,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            writer: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(ShutdownHandle::new()),
            thread_handle: Mutex::new(None),
            counters: Arc::new(VideoCounters::default()),
        }
    }

    /// Override the payload ceiling
    pub fn with_max_frame_bytes(mut self, max: u32) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Connect and start the receive worker.
    ///
    /// On failure the channel stays `Disconnected`; nothing is retried. A
    /// `stop` that lands while the socket is still connecting wins: the new
    /// socket is closed and the channel stays `Closed`.
    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<(), NetworkError> {
        self.begin_connect()?;

        let stream = match connect_stream(host, port, timeout) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Video connection to {}:{} failed: {}", host, port, e);
                self.abandon_connect();
                return Err(e);
            }
        };
        self.attach(stream, host, port)
    }

    /// Claim the `Connecting` state and reap any previous worker
    fn begin_connect(&self) -> Result<(), NetworkError> {
        {
            let mut state = self.state.write();
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Connected) {
                return Err(NetworkError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Back to `Disconnected`, unless a `stop` already closed the channel
    fn abandon_connect(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Hand a connected socket to a new worker
    fn attach(&self, stream: TcpStream, host: &str, port: u16) -> Result<(), NetworkError> {
        let mut state = self.state.write();
        if *state != ConnectionState::Connecting {
            drop(state);
            let _ = stream.shutdown(std::net::Shutdown::Both);
            tracing::debug!("Video connection to {}:{} stopped while connecting", host, port);
            return Err(NetworkError::ConnectionFailed("stopped while connecting".to_string()));
        }

        let setup = stream
            .try_clone()
            .and_then(|reader| self.shutdown.arm(&stream).map(|_| reader));
        let reader = match setup {
            Ok(reader) => reader,
            Err(e) => {
                *state = ConnectionState::Disconnected;
                return Err(NetworkError::ConnectionFailed(e.to_string()));
            }
        };
        *self.writer.lock() = Some(stream);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);
        *state = ConnectionState::Connected;
        drop(state);

        let worker = VideoWorker {
            reader,
            generation,
            decoder: self.decoder.clone(),
            slot: self.slot.clone(),
            max_frame_bytes: self.max_frame_bytes,
            running: self.running.clone(),
            state: self.state.clone(),
            current_generation: self.generation.clone(),
            writer: self.writer.clone(),
            shutdown: self.shutdown.clone(),
            counters: self.counters.clone(),
        };
        let handle = thread::Builder::new()
            .name("video-recv".to_string())
            .spawn(move || worker.run());

        match handle {
            Ok(handle) => {
                *self.thread_handle.lock() = Some(handle);
                tracing::info!("Video connected to {}:{}", host, port);
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.write();
                self.running.store(false, Ordering::SeqCst);
                self.shutdown.shutdown();
                self.writer.lock().take();
                *state = ConnectionState::Disconnected;
                Err(NetworkError::ConnectionFailed(e.to_string()))
            }
        }
    }

    /// Most recent successfully decoded frame, without touching the network
    pub fn latest_frame(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// Length-prefixed UTF-8 command on the video socket. No acknowledgment.
    pub fn send_command(&self, text: &str) -> Result<(), NetworkError> {
        let wire = encode_command(text)?;
        let mut writer = self.writer.lock();
        let stream = writer.as_mut().ok_or(NetworkError::NotConnected)?;
        stream.write_all(&wire).map_err(|e| {
            tracing::warn!("Command {:?} not sent: {}", text, e);
            NetworkError::SendFailed(e.to_string())
        })?;
        self.counters.commands_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Sent command {:?}", text);
        Ok(())
    }

    /// Stop the worker and close the socket. Idempotent, callable from any thread.
    pub fn stop(&self) {
        {
            // A connect still in flight sees `Closed` and backs out
            let mut state = self.state.write();
            self.running.store(false, Ordering::SeqCst);
            *state = ConnectionState::Closed;
        }
        self.shutdown.shutdown();
        self.writer.lock().take();

        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Shared handle to the latest-frame slot
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn stats(&self) -> VideoStats {
        let c = &self.counters;
        VideoStats {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            frames_oversized: c.frames_oversized.load(Ordering::Relaxed),
            bytes_skipped: c.bytes_skipped.load(Ordering::Relaxed),
            commands_sent: c.commands_sent.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VideoChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

struct VideoWorker {
    reader: TcpStream,
    /// Connection this worker serves; a newer one leaves shared state alone
    generation: u64,
    decoder: Arc<dyn FrameDecoder>,
    slot: Arc<FrameSlot>,
    max_frame_bytes: u32,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<ConnectionState>>,
    current_generation: Arc<AtomicU64>,
    writer: Arc<Mutex<Option<TcpStream>>>,
    shutdown: Arc<ShutdownHandle>,
    counters: Arc<VideoCounters>,
}

impl VideoWorker {
    fn run(self) {
        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, &self.reader);

        while self.running.load(Ordering::Relaxed) {
            match read_frame(&mut reader, self.max_frame_bytes) {
                Ok((skipped, frame)) => {
                    if skipped > 0 {
                        tracing::debug!("Resynchronized after {} bytes", skipped);
                        self.counters.bytes_skipped.fetch_add(skipped, Ordering::Relaxed);
                    }
                    self.handle_frame(frame);
                }
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        tracing::info!("Video stream ended: {}", e);
                    }
                    break;
                }
            }
        }

        let mut state = self.state.write();
        if self.current_generation.load(Ordering::SeqCst) == self.generation {
            self.running.store(false, Ordering::SeqCst);
            self.shutdown.shutdown();
            self.writer.lock().take();
            *state = ConnectionState::Closed;
        }
        drop(state);
        tracing::debug!("Video worker exited");
    }

    fn handle_frame(&self, frame: FrameRead) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        match frame {
            FrameRead::Payload(payload) => match self.decoder.decode(&payload) {
                Ok(frame) => {
                    self.slot.store(frame);
                    self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::debug!("Dropping undecodable frame ({} bytes): {}", payload.len(), e);
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            FrameRead::Oversized(len) => {
                tracing::warn!(
                    "Discarded frame declaring {} bytes (ceiling {})",
                    len,
                    self.max_frame_bytes
                );
                self.counters.frames_oversized.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
