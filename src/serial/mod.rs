//! Headset serial link
//!
//! 1. Open the paired RFCOMM port at 57600 baud
//! 2. Hunt for the 0xAA 0xAA sync marker
//! 3. Validate length and checksum
//! 4. Hand the payload to the packet decoder

mod frame;
mod transport;

pub use frame::{DropReason, Frame, FrameError, FrameReader, DEFAULT_SYNC_RETRIES};
pub use transport::{list_ports, ByteStream, SerialTransport, Transport, BAUD_RATE, DEFAULT_DEVICE};
