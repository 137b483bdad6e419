//! Audio playback to an output device
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host); the network loop hands it samples through a lock-free ring.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_ring, i16_to_f32, SampleAssembler, SharedSampleRing};
use crate::audio::device::{find_device, PcmFormat};
use crate::constants::SAMPLE_RING_CAPACITY;
use crate::error::AudioError;

/// Destination for raw PCM bytes
pub trait AudioSink: Send {
    /// Play `pcm` (s16le). Partial samples are carried to the next call.
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

/// Output stream on a cpal device
pub struct CpalPlayback {
    running: Arc<AtomicBool>,
    ring: SharedSampleRing,
    assembler: SampleAssembler,
    scratch: Vec<i16>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl CpalPlayback {
    /// Open `device_name` (or the default output) and start playing silence.
    pub fn open(device_name: Option<&str>, format: PcmFormat) -> Result<Self, AudioError> {
        let device = find_device(device_name, false)?;
        let out_channels = device.default_channels()?;
        let config = StreamConfig {
            channels: out_channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let ring = create_shared_ring(SAMPLE_RING_CAPACITY);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let thread_running = running.clone();
        let thread_ring = ring.clone();
        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let channels = out_channels as usize;
                let callback_ring = thread_ring.clone();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        // Mono source fanned out to every device channel
                        for frame in data.chunks_mut(channels) {
                            let sample = i16_to_f32(callback_ring.pop_or_silence());
                            frame.fill(sample);
                        }
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
                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("playback thread exited".to_string()))?;
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        tracing::debug!("Playback stream open, {} output channel(s)", out_channels);
        Ok(Self {
            running,
            ring,
            assembler: SampleAssembler::new(),
            scratch: Vec::with_capacity(format.chunk_samples),
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Samples dropped because the device fell behind
    pub fn overflow_count(&self) -> usize {
        self.ring.overflow_count()
    }

    pub fn underrun_count(&self) -> usize {
        self.ring.underrun_count()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                "Playback stopped: {} overflows, {} underruns",
                self.overflow_count(),
                self.underrun_count()
            );
        }
    }
}

impl AudioSink for CpalPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }
        self.scratch.clear();
        self.assembler.feed(pcm, &mut self.scratch);
        // A full ring means the device is behind; late audio is dropped
        self.ring.push_slice(&self.scratch);
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
