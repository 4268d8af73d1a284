//! Replay of a recorded capture through the session contract

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, info_span, Span};

use crate::capture::CaptureSession;
use crate::error::{Error, Result};
use crate::protocol::Sample;

use super::state::{FrameStats, SessionState, StatsSnapshot};
use super::Session;

/// Raw wave samples emitted per tick
pub const WAVE_BATCH: usize = 64;

/// Aggregate values (band powers, eSense, quality) are emitted once per this many ticks
pub const AGGREGATE_EVERY: usize = 8;

#[derive(Debug, Default)]
struct Cursors {
    state: SessionState,
    wave: usize,
    aggregate: usize,
    tick: usize,
}

/// Session that plays back a [`CaptureSession`] at the headset's cadence
///
/// Every read is one tick: the next [`WAVE_BATCH`] raw samples, plus one
/// value from each aggregate series on every [`AGGREGATE_EVERY`]th tick.
/// Both cursors wrap, so playback loops forever.
pub struct ReplaySession {
    capture: CaptureSession,
    aggregate_len: usize,
    span: Span,
    cursors: Mutex<Cursors>,
    stats: FrameStats,
}

impl ReplaySession {
    pub fn new(capture: CaptureSession) -> Self {
        let aggregate_len = [
            capture.eeg_bands().len(),
            capture.signal_quality().len(),
            capture.attention().len(),
            capture.meditation().len(),
            capture.blink().len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        Self {
            span: info_span!("replay_session", start = %capture.start_ts()),
            capture,
            aggregate_len,
            cursors: Mutex::new(Cursors::default()),
            stats: FrameStats::new(),
        }
    }

    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    /// Index of the next raw wave sample
    pub fn wave_cursor(&self) -> usize {
        self.lock().wave
    }

    /// Index of the next aggregate entry
    pub fn aggregate_cursor(&self) -> usize {
        self.lock().aggregate
    }

    fn lock(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self, cursors: &mut Cursors) -> Vec<Sample> {
        let capture = &self.capture;
        let mut samples = Vec::with_capacity(WAVE_BATCH + 5);

        let wave = capture.raw_wave();
        if !wave.is_empty() {
            let end = (cursors.wave + WAVE_BATCH).min(wave.len());
            samples.extend(wave[cursors.wave..end].iter().map(|&v| Sample::RawWave(v)));
            cursors.wave += WAVE_BATCH;
            if cursors.wave >= wave.len() {
                cursors.wave = 0;
            }
        }

        if cursors.tick == AGGREGATE_EVERY - 1 && self.aggregate_len > 0 {
            let i = cursors.aggregate;
            samples.extend(capture.eeg_bands().get(i).map(|&b| Sample::EegBands(b)));
            samples.extend(capture.signal_quality().get(i).map(|&v| Sample::SignalQuality(v)));
            samples.extend(capture.attention().get(i).map(|&v| Sample::Attention(v)));
            samples.extend(capture.meditation().get(i).map(|&v| Sample::Meditation(v)));
            samples.extend(capture.blink().get(i).map(|&v| Sample::Blink(v)));

            cursors.aggregate += 1;
            if cursors.aggregate >= self.aggregate_len {
                cursors.aggregate = 0;
            }
        }
        cursors.tick = (cursors.tick + 1) % AGGREGATE_EVERY;

        self.stats.record_frame();
        self.stats.record_samples(samples.len());
        samples
    }
}

impl Session for ReplaySession {
    fn state(&self) -> Result<SessionState> {
        Ok(self.lock().state)
    }

    fn connect(&self, address: Option<&str>) -> Result<()> {
        let mut cursors = self.lock();
        if cursors.state != SessionState::Disconnected {
            return Err(Error::InvalidState {
                op: "connect",
                state: cursors.state,
            });
        }

        let _enter = self.span.enter();
        // The address names a device; a replay has only its capture
        if let Some(address) = address {
            debug!("Ignoring address {} for replay", address);
        }
        cursors.state = SessionState::Connected;
        info!(
            "Replaying capture: {} raw samples, {} aggregate entries",
            self.capture.raw_wave().len(),
            self.aggregate_len
        );
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut cursors = self.lock();
        match cursors.state {
            SessionState::Connected | SessionState::Stopped => {
                cursors.state = SessionState::Running;
                Ok(())
            }
            state => Err(Error::InvalidState { op: "start", state }),
        }
    }

    fn stop(&self) -> Result<()> {
        let mut cursors = self.lock();
        if cursors.state == SessionState::Running {
            cursors.state = SessionState::Stopped;
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut cursors = self.lock();
        if cursors.state != SessionState::Disconnected {
            let _enter = self.span.enter();
            info!("Replay disconnected");
        }
        *cursors = Cursors::default();
        Ok(())
    }

    fn read_batch(&self) -> Result<Vec<Sample>> {
        let mut cursors = self.lock();
        match cursors.state {
            SessionState::Connected | SessionState::Running => Ok(self.tick(&mut cursors)),
            _ => Ok(Vec::new()),
        }
    }

    fn read_frame(&self) -> Result<Vec<Sample>> {
        let mut cursors = self.lock();
        match cursors.state {
            SessionState::Connected => Ok(self.tick(&mut cursors)),
            SessionState::Stopped => Ok(Vec::new()),
            state => Err(Error::InvalidState { op: "read a frame", state }),
        }
    }

    fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.stats.snapshot())
    }
}
