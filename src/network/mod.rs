//! Network subsystem: one TCP connection per channel
//!
//! - `video`: framed JPEG stream in, control commands out, same socket
//! - `receiver`: raw PCM from the device microphone
//! - `sender`: raw PCM to the device speaker

pub mod framing;
pub mod receiver;
pub mod sender;
pub mod tcp;
pub mod video;

pub use receiver::InboundAudioChannel;
pub use sender::OutboundAudioChannel;
pub use tcp::{connect_stream, ConnectionState, ShutdownHandle};
pub use video::{VideoChannel, VideoStats};
