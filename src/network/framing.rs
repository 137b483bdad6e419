//! Video stream framing and control command encoding
//!
//! Device -> client:
//!
//! ```text
//! ┌────────┬─────────────────┬──────────────────────┐
//! │ BE EF  │ length: u32 BE  │ payload (length B)   │
//! └────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! Client -> device, on the same socket:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┐
//! │ length: u16 BE  │ UTF-8 command text   │
//! └─────────────────┴──────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};

use crate::constants::FRAME_MARKER;
use crate::error::NetworkError;

/// One step of the receive loop
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete payload, not yet decoded
    Payload(Bytes),
    /// Declared length exceeded the ceiling; that many bytes were discarded
    Oversized(u32),
}

/// Consume bytes until the two-byte marker has been read.
///
/// Returns how many bytes were skipped ahead of it. A stray `0xBE` followed by
/// the real marker still syncs, since a repeated `0xBE` keeps the match armed.
pub fn scan_marker<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut skipped = 0u64;
    let mut armed = false;
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        if armed && byte[0] == FRAME_MARKER[1] {
            return Ok(skipped);
        }
        if armed {
            skipped += 1;
        }
        armed = byte[0] == FRAME_MARKER[0];
        if !armed {
            skipped += 1;
        }
    }
}

/// Read the length and payload that follow a marker.
///
/// Payloads longer than `max_len` are streamed into a sink through a small
/// stack buffer and reported as `Oversized`.
pub fn read_payload<R: Read>(reader: &mut R, max_len: u32) -> io::Result<FrameRead> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);

    if len > max_len {
        let skipped = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        if skipped < len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside oversized frame",
            ));
        }
        return Ok(FrameRead::Oversized(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(FrameRead::Payload(Bytes::from(payload)))
}

/// Scan for the next marker and read one frame.
pub fn read_frame<R: Read>(reader: &mut R, max_len: u32) -> io::Result<(u64, FrameRead)> {
    let skipped = scan_marker(reader)?;
    let frame = read_payload(reader, max_len)?;
    Ok((skipped, frame))
}

/// Wire form of a frame, as the device sends it
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + 4 + payload.len());
    buf.put_slice(&FRAME_MARKER);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Wire form of a control command
pub fn encode_command(text: &str) -> Result<Bytes, NetworkError> {
    let bytes = text.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| NetworkError::CommandTooLong(bytes.len()))?;
    let mut buf = BytesMut::with_capacity(2 + bytes.len());
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(buf.freeze())
}

/// Read one command as the device would; used by simulators and tests.
pub fn read_command<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let mut text = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    reader.read_exact(&mut text)?;
    String::from_utf8(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_read_clean_frame() {
        let wire = encode_frame(b"hello");
        let (skipped, frame) = read_frame(&mut Cursor::new(wire), 100).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(frame, FrameRead::Payload(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_marker_after_stray_be() {
        let mut wire = vec![0x00, 0xBE, 0x01, 0xBE];
        wire.extend_from_slice(&encode_frame(b"x"));
        let mut cursor = Cursor::new(wire);
        let (skipped, frame) = read_frame(&mut cursor, 100).unwrap();
        assert_eq!(skipped, 4);
        assert_eq!(frame, FrameRead::Payload(Bytes::from_static(b"x")));
    }

    #[test]
    fn test_oversized_is_skipped_and_stream_stays_aligned() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&FRAME_MARKER);
        wire.extend_from_slice(&300u32.to_be_bytes());
        // Payload full of markers that must not be mistaken for frames
        wire.extend(std::iter::repeat([0xBE, 0xEF]).take(150).flatten());
        wire.extend_from_slice(&encode_frame(b"ok"));

        let mut cursor = Cursor::new(wire);
        let (_, first) = read_frame(&mut cursor, 100).unwrap();
        assert_eq!(first, FrameRead::Oversized(300));
        let (skipped, second) = read_frame(&mut cursor, 100).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(second, FrameRead::Payload(Bytes::from_static(b"ok")));
    }

    #[test]
    fn test_short_payload_is_an_error() {
        let mut wire = encode_frame(b"abcdef").to_vec();
        wire.truncate(wire.len() - 2);
        let err = read_frame(&mut Cursor::new(wire), 100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_truncated_oversized_is_an_error() {
        let mut wire = FRAME_MARKER.to_vec();
        wire.extend_from_slice(&1000u32.to_be_bytes());
        wire.extend_from_slice(&[0u8; 10]);
        assert!(read_frame(&mut Cursor::new(wire), 100).is_err());
    }

    #[test]
    fn test_command_framing() {
        let wire = encode_command("ZOOM:0.5").unwrap();
        assert_eq!(&wire[..2], &[0, 8]);
        assert_eq!(&wire[2..], b"ZOOM:0.5");
        assert_eq!(read_command(&mut Cursor::new(wire)).unwrap(), "ZOOM:0.5");
    }

    #[test]
    fn test_command_utf8_length_is_bytes() {
        let wire = encode_command("变焦").unwrap();
        assert_eq!(u16::from_be_bytes([wire[0], wire[1]]), 6);
    }

    #[test]
    fn test_command_too_long() {
        let long = "x".repeat(70_000);
        assert!(matches!(encode_command(&long), Err(NetworkError::CommandTooLong(70_000))));
    }

    proptest! {
        #[test]
        fn prop_resyncs_after_garbage(
            garbage in proptest::collection::vec(any::<u8>(), 0..512),
            payload in proptest::collection::vec(any::<u8>(), 1..64),
        ) {
            // Keep the garbage free of complete markers so the first frame
            // after it is the one we wrote
            let mut garbage = garbage;
            for i in 1..garbage.len() {
                if garbage[i - 1] == 0xBE && garbage[i] == 0xEF {
                    garbage[i] = 0x00;
                }
            }
            let mut wire = garbage.clone();
            wire.extend_from_slice(&encode_frame(&payload));

            let (skipped, frame) = read_frame(&mut Cursor::new(wire), 1024).unwrap();
            prop_assert_eq!(frame, FrameRead::Payload(Bytes::from(payload)));
            prop_assert!(skipped <= garbage.len() as u64);
        }

        #[test]
        fn prop_oversized_never_yields_payload(
            extra in 1u32..4096,
            filler in any::<u8>(),
        ) {
            let max = 64u32;
            let len = max + extra;
            let mut wire = FRAME_MARKER.to_vec();
            wire.extend_from_slice(&len.to_be_bytes());
            wire.extend(std::iter::repeat(filler).take(len as usize));
            wire.extend_from_slice(&encode_frame(b"next"));

            let mut cursor = Cursor::new(wire);
            let (_, first) = read_frame(&mut cursor, max).unwrap();
            prop_assert_eq!(first, FrameRead::Oversized(len));
            let (_, second) = read_frame(&mut cursor, max).unwrap();
            prop_assert_eq!(second, FrameRead::Payload(Bytes::from_static(b"next")));
        }
    }
}
