//! ThinkGear payload decoder
//!
//! A payload is a sequence of data rows:
//! `(0x55)* CODE [LEN if CODE >= 0x80] VALUE[len]`
//!
//! Single-byte codes (< 0x80) carry exactly one value byte. Multi-byte codes
//! carry an explicit length byte.

use thiserror::Error;
use tracing::debug;

use super::types::{Code, EegBands, Sample};

/// Extended code prefix byte
pub const EXCODE: u8 = 0x55;

/// First code that carries an explicit length byte
const MULTI_BYTE_CODE: u8 = 0x80;

/// Payload ended before a data row was complete
///
/// Carries every sample decoded before the short row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data row 0x{code:02X} declares {declared} bytes but only {remaining} remain")]
pub struct FrameTruncated {
    pub samples: Vec<Sample>,
    pub code: u8,
    pub declared: usize,
    pub remaining: usize,
}

/// Decode a validated payload into samples, in wire order
pub fn decode_frame(payload: &[u8]) -> Result<Vec<Sample>, FrameTruncated> {
    let mut samples = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        // Extended code level is counted but not used by any known code
        let mut excode = 0usize;
        while pos < payload.len() && payload[pos] == EXCODE {
            excode += 1;
            pos += 1;
        }

        let Some(&code) = payload.get(pos) else {
            return Err(FrameTruncated {
                samples,
                code: EXCODE,
                declared: 1,
                remaining: 0,
            });
        };
        pos += 1;

        let vlen = if code >= MULTI_BYTE_CODE {
            match payload.get(pos) {
                Some(&len) => {
                    pos += 1;
                    len as usize
                }
                None => {
                    return Err(FrameTruncated {
                        samples,
                        code,
                        declared: 1,
                        remaining: 0,
                    });
                }
            }
        } else {
            1
        };

        let remaining = payload.len() - pos;
        if vlen > remaining {
            return Err(FrameTruncated {
                samples,
                code,
                declared: vlen,
                remaining,
            });
        }

        let value = &payload[pos..pos + vlen];
        pos += vlen;

        if let Some(sample) = decode_row(excode, code, value) {
            samples.push(sample);
        }
    }

    Ok(samples)
}

/// Decode one data row; `None` for unknown or malformed rows
fn decode_row(excode: usize, code: u8, value: &[u8]) -> Option<Sample> {
    let known = Code::from(code);

    match known.value_len() {
        None => {
            debug!("Unrecognized code: {:02X} (excode level {})", code, excode);
            return None;
        }
        Some(expected) if expected != value.len() => {
            debug!(
                "Code {:02X} carries {} bytes, expected {}",
                code,
                value.len(),
                expected
            );
            return None;
        }
        Some(_) => {}
    }

    let sample = match known {
        Code::SignalQuality => Sample::SignalQuality(value[0]),
        Code::Attention => Sample::Attention(value[0]),
        Code::Meditation => Sample::Meditation(value[0]),
        Code::Blink => Sample::Blink(value[0]),
        Code::RawWave => Sample::RawWave(i16::from_be_bytes([value[0], value[1]])),
        Code::AsicEeg => Sample::EegBands(decode_asic_eeg(value)),
        Code::Unknown => return None,
    };

    Some(sample)
}

/// Unsigned 3-byte big-endian magnitude, zero-extended
fn be_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

fn decode_asic_eeg(value: &[u8]) -> EegBands {
    EegBands {
        delta: be_u24(&value[0..3]),
        theta: be_u24(&value[3..6]),
        lo_alpha: be_u24(&value[6..9]),
        hi_alpha: be_u24(&value[9..12]),
        lo_beta: be_u24(&value[12..15]),
        hi_beta: be_u24(&value[15..18]),
        lo_gamma: be_u24(&value[18..21]),
        mid_gamma: be_u24(&value[21..24]),
    }
}
