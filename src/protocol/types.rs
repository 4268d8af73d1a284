//! ThinkGear data types

use serde::{Deserialize, Serialize};

/// Data row codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    SignalQuality = 0x02,
    Attention = 0x04,
    Meditation = 0x05,
    Blink = 0x16,
    RawWave = 0x80,
    AsicEeg = 0x83,
    Unknown = 0xFF,
}

impl From<u8> for Code {
    fn from(code: u8) -> Self {
        match code {
            0x02 => Self::SignalQuality,
            0x04 => Self::Attention,
            0x05 => Self::Meditation,
            0x16 => Self::Blink,
            0x80 => Self::RawWave,
            0x83 => Self::AsicEeg,
            _ => Self::Unknown,
        }
    }
}

impl Code {
    /// Value length the code carries on the wire
    pub fn value_len(self) -> Option<usize> {
        match self {
            Self::SignalQuality | Self::Attention | Self::Meditation | Self::Blink => Some(1),
            Self::RawWave => Some(2),
            Self::AsicEeg => Some(24),
            Self::Unknown => None,
        }
    }
}

/// ASIC EEG power bands, one reading per second
///
/// Each field is an unsigned 24-bit magnitude, zero-extended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EegBands {
    pub delta: u32,
    pub theta: u32,
    pub lo_alpha: u32,
    pub hi_alpha: u32,
    pub lo_beta: u32,
    pub hi_beta: u32,
    pub lo_gamma: u32,
    pub mid_gamma: u32,
}

/// Decoded headset sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sample {
    /// POOR_SIGNAL quality, 0 is best
    SignalQuality(u8),
    /// ATTENTION eSense (vendor range 0-100, not enforced)
    Attention(u8),
    /// MEDITATION eSense (vendor range 0-100, not enforced)
    Meditation(u8),
    /// Blink strength
    Blink(u8),
    /// Raw wave value, 512 per second
    RawWave(i16),
    EegBands(EegBands),
}

impl Sample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::SignalQuality(_) => SampleKind::SignalQuality,
            Self::Attention(_) => SampleKind::Attention,
            Self::Meditation(_) => SampleKind::Meditation,
            Self::Blink(_) => SampleKind::Blink,
            Self::RawWave(_) => SampleKind::RawWave,
            Self::EegBands(_) => SampleKind::EegBands,
        }
    }
}

/// Fieldless mirror of [`Sample`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    SignalQuality,
    Attention,
    Meditation,
    Blink,
    RawWave,
    EegBands,
}

impl SampleKind {
    pub const ALL: [SampleKind; 6] = [
        SampleKind::SignalQuality,
        SampleKind::Attention,
        SampleKind::Meditation,
        SampleKind::Blink,
        SampleKind::RawWave,
        SampleKind::EegBands,
    ];
}
