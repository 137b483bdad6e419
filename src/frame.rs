//! Decoded video frames and the latest-frame hand-off

use image::{imageops, RgbImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A decoded RGB8 frame, row-major, `width * height * 3` bytes.
///
/// Cloning shares the pixel buffer; a clone stays valid and unchanged after
/// the slot it came from has been overwritten.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Wrap raw RGB8 pixels; `None` if the buffer size does not match.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Raw interleaved RGB bytes
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// A new frame rotated by `rotation`; `Rotation::None` shares the buffer.
    pub fn rotated(&self, rotation: Rotation) -> Frame {
        match rotation {
            Rotation::None => self.clone(),
            Rotation::Cw90 => Frame::new(imageops::rotate90(self.image.as_ref())),
            Rotation::Cw180 => Frame::new(imageops::rotate180(self.image.as_ref())),
            Rotation::Ccw90 => Frame::new(imageops::rotate270(self.image.as_ref())),
        }
    }
}

/// Single-slot overwrite cell holding the most recent decoded frame.
///
/// Writers replace the slot unconditionally, readers get the current value
/// without waiting on the producer. Nothing is queued. Each stored frame is
/// numbered, and the number is kept under the same lock as the frame.
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<(u64, Frame)>>,
    frames_stored: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        let mut latest = self.latest.lock();
        let number = self.frames_stored.fetch_add(1, Ordering::Relaxed) + 1;
        *latest = Some((number, frame));
    }

    pub fn latest(&self) -> Option<Frame> {
        self.latest.lock().as_ref().map(|(_, frame)| frame.clone())
    }

    /// The latest frame with its sequence number (1 for the first frame stored)
    pub fn latest_numbered(&self) -> Option<(u64, Frame)> {
        self.latest.lock().clone()
    }

    /// Number of frames stored since creation
    pub fn frames_stored(&self) -> u64 {
        self.frames_stored.load(Ordering::Relaxed)
    }
}

/// Display rotation applied to polled frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Ccw90,
}

impl Rotation {
    /// Next mode in the 0 -> 90 -> 180 -> 270 cycle
    pub fn next(self) -> Self {
        match self {
            Rotation::None => Rotation::Cw90,
            Rotation::Cw90 => Rotation::Cw180,
            Rotation::Cw180 => Rotation::Ccw90,
            Rotation::Ccw90 => Rotation::None,
        }
    }

    /// Front and back cameras are mounted mirrored: flip between 90° CW and CCW.
    pub fn after_camera_switch(self) -> Self {
        match self {
            Rotation::Cw90 => Rotation::Ccw90,
            _ => Rotation::Cw90,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Ccw90 => 270,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_rgb(width, height, vec![value; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn test_from_rgb_rejects_wrong_size() {
        assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_none());
        assert!(Frame::from_rgb(2, 2, vec![0; 12]).is_some());
    }

    #[test]
    fn test_slot_starts_empty_and_overwrites() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.store(solid(1, 1, 10));
        slot.store(solid(2, 1, 20));

        let latest = slot.latest().unwrap();
        assert_eq!(latest.dimensions(), (2, 1));
        assert_eq!(latest.pixels()[0], 20);
        assert_eq!(slot.frames_stored(), 2);
    }

    #[test]
    fn test_reader_copy_survives_overwrite() {
        let slot = FrameSlot::new();
        slot.store(solid(1, 1, 1));
        let held = slot.latest().unwrap();
        slot.store(solid(1, 1, 2));
        assert_eq!(held.pixels(), &[1, 1, 1]);
    }

    #[test]
    fn test_concurrent_reads_never_see_torn_frames() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    let value = (i % 250) as u8;
                    slot.store(solid(8, 8, value));
                }
            })
        };

        for _ in 0..500 {
            if let Some(frame) = slot.latest() {
                let first = frame.pixels()[0];
                assert!(frame.pixels().iter().all(|&b| b == first));
                assert_eq!(frame.pixels().len(), 8 * 8 * 3);
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_numbered_frame_matches_its_number() {
        let slot = Arc::new(FrameSlot::new());
        assert!(slot.latest_numbered().is_none());

        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 1..=200u32 {
                    slot.store(solid(2, 2, i as u8));
                }
            })
        };

        let mut last = 0;
        while last < 200 {
            if let Some((number, frame)) = slot.latest_numbered() {
                assert_eq!(frame.pixels()[0], number as u8);
                assert!(number >= last);
                last = number;
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.frames_stored(), 200);
    }

    #[test]
    fn test_rotation_dimensions() {
        let frame = solid(4, 2, 0);
        assert_eq!(frame.rotated(Rotation::None).dimensions(), (4, 2));
        assert_eq!(frame.rotated(Rotation::Cw90).dimensions(), (2, 4));
        assert_eq!(frame.rotated(Rotation::Cw180).dimensions(), (4, 2));
        assert_eq!(frame.rotated(Rotation::Ccw90).dimensions(), (2, 4));
    }

    #[test]
    fn test_rotate_cw90_moves_pixels() {
        // 2x1: left red, right blue -> 1x2: top red, bottom blue
        let frame = Frame::from_rgb(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        let rotated = frame.rotated(Rotation::Cw90);
        assert_eq!(rotated.pixels(), &[255, 0, 0, 0, 0, 255]);
        assert_eq!(rotated.dimensions(), (1, 2));
    }

    #[test]
    fn test_rotation_cycle() {
        let mut r = Rotation::None;
        let mut seen = vec![];
        for _ in 0..4 {
            seen.push(r.degrees());
            r = r.next();
        }
        assert_eq!(seen, vec![0, 90, 180, 270]);
        assert_eq!(r, Rotation::None);
        assert_eq!(Rotation::Cw90.after_camera_switch(), Rotation::Ccw90);
        assert_eq!(Rotation::Ccw90.after_camera_switch(), Rotation::Cw90);
        assert_eq!(Rotation::Cw180.after_camera_switch(), Rotation::Cw90);
    }
}
