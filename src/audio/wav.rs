//! WAV capture file for the inbound audio tee

use hound::WavWriter;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::audio::buffer::SampleAssembler;
use crate::audio::device::PcmFormat;
use crate::error::AudioError;

/// An open WAV file receiving raw s16le PCM as it arrives
pub struct PcmCapture {
    writer: WavWriter<BufWriter<File>>,
    assembler: SampleAssembler,
    scratch: Vec<i16>,
    path: PathBuf,
    samples_written: u64,
}

impl PcmCapture {
    /// Create (or truncate) `path` and write the header for `format`.
    pub fn create(path: &Path, format: PcmFormat) -> Result<Self, AudioError> {
        let writer = WavWriter::create(path, format.wav_spec())
            .map_err(|e| AudioError::CaptureFile(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            writer,
            assembler: SampleAssembler::new(),
            scratch: Vec::with_capacity(format.chunk_samples),
            path: path.to_path_buf(),
            samples_written: 0,
        })
    }

    /// Append raw bytes; an odd trailing byte waits for the next call.
    pub fn append(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.scratch.clear();
        self.assembler.feed(pcm, &mut self.scratch);
        for &sample in &self.scratch {
            self.writer
                .write_sample(sample)
                .map_err(|e| AudioError::CaptureFile(e.to_string()))?;
        }
        self.samples_written += self.scratch.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Patch the header sizes and close the file.
    pub fn finish(self) -> Result<PathBuf, AudioError> {
        if self.assembler.has_carry() {
            tracing::debug!("Dropping half sample at end of {}", self.path.display());
        }
        self.writer
            .finalize()
            .map_err(|e| AudioError::CaptureFile(e.to_string()))?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_data_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.wav");
        let mut capture = PcmCapture::create(&path, PcmFormat::default()).unwrap();

        capture.append(&[0u8; 2048]).unwrap();
        capture.append(&[0u8; 1000]).unwrap();
        assert_eq!(capture.samples_written(), 1524);
        capture.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 1524);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 3048);
    }

    #[test]
    fn test_odd_split_keeps_samples_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.wav");
        let mut capture = PcmCapture::create(&path, PcmFormat::default()).unwrap();

        let bytes: Vec<u8> = [-12345i16, 42, 7].iter().flat_map(|s| s.to_le_bytes()).collect();
        capture.append(&bytes[..1]).unwrap();
        capture.append(&bytes[1..4]).unwrap();
        capture.append(&bytes[4..]).unwrap();
        capture.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![-12345, 42, 7]);
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("cap.wav");
        assert!(matches!(
            PcmCapture::create(&path, PcmFormat::default()),
            Err(AudioError::CaptureFile(_))
        ));
    }
}
