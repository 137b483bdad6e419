//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod wav;

pub use buffer::SampleRing;
pub use capture::{AudioSource, CpalCapture};
pub use device::{list_devices, AudioDeviceInfo, PcmFormat};
pub use playback::{AudioSink, CpalPlayback};
pub use wav::PcmCapture;

use crate::error::AudioError;

/// Opens local audio endpoints for the network channels.
pub trait AudioBackend: Send + Sync {
    fn open_sink(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>, AudioError>;
    fn open_source(&self, format: PcmFormat) -> Result<Box<dyn AudioSource>, AudioError>;
}

/// cpal devices, by name or the host defaults
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl AudioBackend for CpalBackend {
    fn open_sink(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>, AudioError> {
        Ok(Box::new(CpalPlayback::open(self.output_device.as_deref(), format)?))
    }

    fn open_source(&self, format: PcmFormat) -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(Box::new(CpalCapture::open(self.input_device.as_deref(), format)?))
    }
}
