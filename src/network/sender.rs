//! Outbound audio channel (local microphone -> device speaker)
//!
//! The worker opens the audio source, connects, then pushes one chunk at a
//! time until stopped. The channel's existence is the talk session: create
//! it to start talking, stop and drop it to end.

use parking_lot::RwLock;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioBackend, AudioSource, PcmFormat};
use crate::error::AudioError;
use crate::network::tcp::{connect_stream, ConnectionState, ShutdownHandle};

/// Microphone relay to the device
pub struct OutboundAudioChannel {
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<ShutdownHandle>,
    thread_handle: Option<JoinHandle<()>>,
    bytes_sent: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
}

impl OutboundAudioChannel {
    /// Spawn the send worker. Setup failures are logged by the worker and
    /// leave the channel `Closed`.
    pub fn connect_and_start(
        host: &str,
        port: u16,
        timeout: Duration,
        backend: Arc<dyn AudioBackend>,
        format: PcmFormat,
    ) -> Self {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(ShutdownHandle::new());
        let bytes_sent = Arc::new(AtomicU64::new(0));
        let overflows = Arc::new(AtomicU64::new(0));

        let worker = SendWorker {
            host: host.to_string(),
            port,
            timeout,
            backend,
            format,
            state: state.clone(),
            running: running.clone(),
            shutdown: shutdown.clone(),
            bytes_sent: bytes_sent.clone(),
            overflows: overflows.clone(),
        };

        let thread_handle = match thread::Builder::new()
            .name("audio-send".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn audio sender: {}", e);
                running.store(false, Ordering::SeqCst);
                *state.write() = ConnectionState::Closed;
                None
            }
        };

        Self {
            state,
            running,
            shutdown,
            thread_handle,
            bytes_sent,
            overflows,
        }
    }

    /// Stop sending and release the source and socket. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.shutdown();
        if let Some(handle) = self.thread_handle.take() {
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
        self.running.load(Ordering::Relaxed) && self.state() != ConnectionState::Closed
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Source overruns skipped so far
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl Drop for OutboundAudioChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SendWorker {
    host: String,
    port: u16,
    timeout: Duration,
    backend: Arc<dyn AudioBackend>,
    format: PcmFormat,
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<ShutdownHandle>,
    bytes_sent: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
}

impl SendWorker {
    fn run(self) {
        let (source, stream) = match self.open() {
            Some(opened) => opened,
            None => {
                self.finish();
                return;
            }
        };
        self.pump(source, stream);
        self.finish();
    }

    fn open(&self) -> Option<(Box<dyn AudioSource>, TcpStream)> {
        let source = match self.backend.open_source(self.format) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Talk: audio source unavailable: {}", e);
                return None;
            }
        };

        let stream = match connect_stream(&self.host, self.port, self.timeout) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Talk: connection to {}:{} failed: {}", self.host, self.port, e);
                return None;
            }
        };
        if let Err(e) = self.shutdown.arm(&stream) {
            tracing::warn!("Talk: socket setup failed: {}", e);
            return None;
        }
        // stop() may have run while we were connecting
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }

        *self.state.write() = ConnectionState::Connected;
        tracing::info!("Talk connected to {}:{}", self.host, self.port);
        Some((source, stream))
    }

    fn pump(&self, mut source: Box<dyn AudioSource>, mut stream: TcpStream) {
        let mut buf = vec![0u8; self.format.chunk_bytes()];

        while self.running.load(Ordering::Relaxed) {
            let n = match source.read_chunk(&mut buf) {
                Ok(n) => n,
                Err(AudioError::BufferOverflow) => {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(e) => {
                    tracing::info!("Talk: audio source ended: {}", e);
                    break;
                }
            };

            if let Err(e) = stream.write_all(&buf[..n]) {
                if self.running.load(Ordering::Relaxed) {
                    tracing::info!("Talk: send failed: {}", e);
                }
                break;
            }
            self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        }

        // Audio stream first, then the socket
        drop(source);
        drop(stream);
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.shutdown();
        *self.state.write() = ConnectionState::Closed;
        tracing::debug!("Talk worker exited");
    }
}
