//! ThinkGear packet protocol: checksum, data rows and sample types

mod checksum;
pub mod codec;
mod types;

pub use checksum::{check_checksum, compute_checksum};
pub use codec::{decode_frame, FrameTruncated, EXCODE};
pub use types::{Code, EegBands, Sample, SampleKind};

/// Frame sync byte; two in a row start a packet
pub const SYNC: u8 = 0xAA;

/// Largest payload length a frame can declare (`0xAA` itself is a sync byte)
pub const MAX_PAYLOAD_LEN: usize = 169;

/// Build a complete wire frame around a payload
#[cfg(test)]
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload of {} bytes cannot be framed",
        payload.len()
    );
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(SYNC);
    frame.push(SYNC);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(compute_checksum(payload));
    frame
}
