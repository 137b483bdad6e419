//! Audio device lookup and the fixed PCM format

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::constants::{BITS_PER_SAMPLE, CHANNELS, CHUNK_SAMPLES, SAMPLE_RATE};
use crate::error::AudioError;

/// PCM layout shared by every audio path: mono, s16le, 44.1 kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub chunk_samples: usize,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
            chunk_samples: CHUNK_SAMPLES,
        }
    }
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize * self.channels as usize
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * self.bytes_per_sample()
    }

    /// WAV header description of this format
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Channel count the device runs at by default
    pub fn default_channels(&self) -> Result<u16, AudioError> {
        let config = if self.is_input {
            self.inner.default_input_config()
        } else {
            self.inner.default_output_config()
        };
        config
            .map(|c| c.channels())
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }
}

/// Device summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: true,
                    is_default,
                });
            }
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_default,
                });
            }
        }
    }

    devices
}

/// Find a device by name, or the host default when `name` is `None`
pub fn find_device(name: Option<&str>, is_input: bool) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = if is_input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device
            .map(|d| AudioDevice::from_cpal(d, is_input))
            .ok_or_else(|| {
                AudioError::DeviceNotFound(format!(
                    "No default {} device",
                    if is_input { "input" } else { "output" }
                ))
            });
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input));
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}
