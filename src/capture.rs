//! Capture store - per-kind sample series collected over one capture run

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{EegBands, Sample, SampleKind};

/// Samples collected during one capture, grouped by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSession {
    start_ts: DateTime<Utc>,
    end_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    signal_quality: Vec<u8>,
    #[serde(default)]
    attention: Vec<u8>,
    #[serde(default)]
    meditation: Vec<u8>,
    #[serde(default)]
    blink: Vec<u8>,
    #[serde(default)]
    raw_wave: Vec<i16>,
    #[serde(default)]
    eeg_bands: Vec<EegBands>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    /// Empty capture starting now
    pub fn new() -> Self {
        Self {
            start_ts: Utc::now(),
            end_ts: None,
            signal_quality: Vec::new(),
            attention: Vec::new(),
            meditation: Vec::new(),
            blink: Vec::new(),
            raw_wave: Vec::new(),
            eeg_bands: Vec::new(),
        }
    }

    /// Route each sample to its series, in order
    ///
    /// Ignored once the capture has been finalized.
    pub fn append<'a>(&mut self, samples: impl IntoIterator<Item = &'a Sample>) {
        if self.is_finalized() {
            warn!("Capture already finalized, dropping appended samples");
            return;
        }

        for sample in samples {
            match *sample {
                Sample::SignalQuality(v) => self.signal_quality.push(v),
                Sample::Attention(v) => self.attention.push(v),
                Sample::Meditation(v) => self.meditation.push(v),
                Sample::Blink(v) => self.blink.push(v),
                Sample::RawWave(v) => self.raw_wave.push(v),
                Sample::EegBands(bands) => self.eeg_bands.push(bands),
            }
        }
    }

    /// Stamp the end time; only the first call has an effect
    pub fn finalize(&mut self) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.end_ts = Some(Utc::now().max(self.start_ts));
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.end_ts.is_some()
    }

    pub fn start_ts(&self) -> DateTime<Utc> {
        self.start_ts
    }

    pub fn end_ts(&self) -> Option<DateTime<Utc>> {
        self.end_ts
    }

    /// Number of samples stored for one kind
    pub fn len(&self, kind: SampleKind) -> usize {
        match kind {
            SampleKind::SignalQuality => self.signal_quality.len(),
            SampleKind::Attention => self.attention.len(),
            SampleKind::Meditation => self.meditation.len(),
            SampleKind::Blink => self.blink.len(),
            SampleKind::RawWave => self.raw_wave.len(),
            SampleKind::EegBands => self.eeg_bands.len(),
        }
    }

    pub fn total_len(&self) -> usize {
        SampleKind::ALL.iter().map(|&kind| self.len(kind)).sum()
    }

    pub fn signal_quality(&self) -> &[u8] {
        &self.signal_quality
    }

    pub fn attention(&self) -> &[u8] {
        &self.attention
    }

    pub fn meditation(&self) -> &[u8] {
        &self.meditation
    }

    pub fn blink(&self) -> &[u8] {
        &self.blink
    }

    pub fn raw_wave(&self) -> &[i16] {
        &self.raw_wave
    }

    pub fn eeg_bands(&self) -> &[EegBands] {
        &self.eeg_bands
    }

    /// Read a capture previously written with [`CaptureSession::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let capture: Self = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded capture {:?}: {} raw, {} bands",
            path,
            capture.raw_wave.len(),
            capture.eeg_bands.len()
        );
        Ok(capture)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Which sample kinds a capture keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFilter {
    kinds: HashSet<SampleKind>,
}

impl CaptureFilter {
    pub fn all() -> Self {
        Self {
            kinds: SampleKind::ALL.into_iter().collect(),
        }
    }

    pub fn accepts(&self, sample: &Sample) -> bool {
        self.kinds.contains(&sample.kind())
    }

    pub fn kinds(&self) -> impl Iterator<Item = SampleKind> + '_ {
        self.kinds.iter().copied()
    }
}

/// EEG band powers only, as the capture tool selects with no selectors given
impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            kinds: HashSet::from([SampleKind::EegBands]),
        }
    }
}

impl FromStr for CaptureFilter {
    type Err = Error;

    /// Comma list of `wave`, `raw`, `esense`, `quality`, `all`
    fn from_str(s: &str) -> Result<Self> {
        let mut kinds = HashSet::new();
        for selector in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match selector.to_ascii_lowercase().as_str() {
                "wave" => {
                    kinds.insert(SampleKind::EegBands);
                }
                "raw" => {
                    kinds.insert(SampleKind::RawWave);
                }
                "esense" => {
                    kinds.extend([SampleKind::Attention, SampleKind::Meditation, SampleKind::Blink]);
                }
                "quality" => {
                    kinds.insert(SampleKind::SignalQuality);
                }
                "all" => kinds.extend(SampleKind::ALL),
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown capture selector '{}' (expected wave, raw, esense, quality or all)",
                        other
                    )))
                }
            }
        }

        if kinds.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands(n: u32) -> EegBands {
        EegBands {
            delta: n,
            theta: n + 1,
            lo_alpha: n + 2,
            hi_alpha: n + 3,
            lo_beta: n + 4,
            hi_beta: n + 5,
            lo_gamma: n + 6,
            mid_gamma: n + 7,
        }
    }

    #[test]
    fn test_append_routes_by_kind() {
        let mut capture = CaptureSession::new();
        capture.append(&[
            Sample::SignalQuality(200),
            Sample::RawWave(-2),
            Sample::Attention(40),
            Sample::RawWave(7),
            Sample::EegBands(bands(1)),
            Sample::Meditation(60),
            Sample::Blink(90),
        ]);

        assert_eq!(capture.raw_wave(), &[-2, 7]);
        assert_eq!(capture.signal_quality(), &[200]);
        assert_eq!(capture.attention(), &[40]);
        assert_eq!(capture.meditation(), &[60]);
        assert_eq!(capture.blink(), &[90]);
        assert_eq!(capture.eeg_bands(), &[bands(1)]);
        assert_eq!(capture.len(SampleKind::RawWave), 2);
        assert_eq!(capture.total_len(), 7);
    }

    #[test]
    fn test_finalize_freezes_capture() {
        let mut capture = CaptureSession::new();
        capture.append(&[Sample::RawWave(1)]);
        assert!(!capture.is_finalized());

        assert!(capture.finalize());
        let end = capture.end_ts();
        assert!(end.is_some());
        assert!(end.unwrap() >= capture.start_ts());

        assert!(!capture.finalize());
        assert_eq!(capture.end_ts(), end);

        capture.append(&[Sample::RawWave(2)]);
        assert_eq!(capture.raw_wave(), &[1]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");

        let mut capture = CaptureSession::new();
        capture.append(&[Sample::RawWave(-300), Sample::EegBands(bands(10)), Sample::Attention(55)]);
        capture.finalize();
        capture.save(&path).unwrap();

        let loaded = CaptureSession::load(&path).unwrap();
        assert_eq!(loaded, capture);
    }

    #[test]
    fn test_load_tolerates_missing_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(
            &path,
            r#"{"start_ts":"2014-03-01T12:00:00Z","end_ts":null,"raw_wave":[1,2,3]}"#,
        )
        .unwrap();

        let loaded = CaptureSession::load(&path).unwrap();
        assert_eq!(loaded.raw_wave(), &[1, 2, 3]);
        assert!(loaded.eeg_bands().is_empty());
        assert!(!loaded.is_finalized());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = CaptureSession::load("/nonexistent/mindset/capture.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_filter_selectors() {
        let filter: CaptureFilter = "raw,quality".parse().unwrap();
        assert!(filter.accepts(&Sample::RawWave(0)));
        assert!(filter.accepts(&Sample::SignalQuality(0)));
        assert!(!filter.accepts(&Sample::Attention(0)));
        assert!(!filter.accepts(&Sample::EegBands(bands(0))));

        let esense: CaptureFilter = "esense".parse().unwrap();
        assert!(esense.accepts(&Sample::Attention(1)));
        assert!(esense.accepts(&Sample::Meditation(1)));
        assert!(esense.accepts(&Sample::Blink(1)));

        assert_eq!("all".parse::<CaptureFilter>().unwrap(), CaptureFilter::all());
        assert_eq!("".parse::<CaptureFilter>().unwrap(), CaptureFilter::default());
        assert!("alpha".parse::<CaptureFilter>().is_err());
    }
}
