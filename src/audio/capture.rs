//! Audio capture from an input device
//!
//! Same threading model as playback: the cpal stream runs on a dedicated
//! thread and pushes mono samples into a ring that `read_chunk` drains.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_ring, f32_to_i16, SharedSampleRing};
use crate::audio::device::{find_device, PcmFormat};
use crate::constants::SAMPLE_RING_CAPACITY;
use crate::error::AudioError;

/// Source of raw PCM bytes
pub trait AudioSource: Send {
    /// Block until `buf` is filled with s16le samples, returning the byte count.
    ///
    /// `Err(AudioError::BufferOverflow)` reports lost input and is not fatal;
    /// callers simply read again.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;
}

/// Input stream on a cpal device
pub struct CpalCapture {
    running: Arc<AtomicBool>,
    ring: SharedSampleRing,
    scratch: Vec<i16>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    samples_captured: Arc<AtomicU64>,
    reported_overflows: usize,
}

impl CpalCapture {
    /// Open `device_name` (or the default input) and start capturing.
    pub fn open(device_name: Option<&str>, format: PcmFormat) -> Result<Self, AudioError> {
        let device = find_device(device_name, true)?;
        let in_channels = device.default_channels()?;
        let config = StreamConfig {
            channels: in_channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let ring = create_shared_ring(SAMPLE_RING_CAPACITY);
        let samples_captured = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let thread_running = running.clone();
        let callback_running = running.clone();
        let callback_ring = ring.clone();
        let callback_count = samples_captured.clone();
        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let channels = in_channels as usize;
                let mut mono: Vec<i16> = Vec::with_capacity(format.chunk_samples);

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_running.load(Ordering::Relaxed) {
                            return;
                        }
                        mono.clear();
                        mono.extend(data.chunks(channels).map(|frame| f32_to_i16(frame[0])));
                        callback_count.fetch_add(mono.len() as u64, Ordering::Relaxed);
                        // Overflow is counted by the ring and otherwise ignored
                        callback_ring.push_slice(&mono);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("capture thread exited".to_string()))?;
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        tracing::debug!("Capture stream open, {} input channel(s)", in_channels);
        Ok(Self {
            running,
            ring,
            scratch: vec![0; format.chunk_samples],
            thread_handle: Some(handle),
            error_rx,
            samples_captured,
            reported_overflows: 0,
        })
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> usize {
        self.ring.overflow_count()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                "Capture stopped: {} samples, {} overflows",
                self.samples_captured(),
                self.overflow_count()
            );
        }
    }
}

impl AudioSource for CpalCapture {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        let overflows = self.ring.overflow_count();
        if overflows != self.reported_overflows {
            self.reported_overflows = overflows;
            return Err(AudioError::BufferOverflow);
        }

        let wanted = buf.len() / 2;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0);
        }

        let mut filled = 0;
        while filled < wanted {
            if !self.running.load(Ordering::Relaxed) {
                return Err(AudioError::Closed);
            }
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }
            let n = self.ring.pop_into(&mut self.scratch[filled..wanted]);
            if n == 0 {
                thread::sleep(Duration::from_millis(2));
            }
            filled += n;
        }

        for (dst, sample) in buf.chunks_exact_mut(2).zip(&self.scratch[..wanted]) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(wanted * 2)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
