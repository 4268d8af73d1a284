//! ThinkGear frame synchronization and validation
//!
//! Frame structure:
//! - Sync: two consecutive 0xAA bytes
//! - Length: one byte, payload length (must be below 0xAA)
//! - Payload: `length` data-row bytes
//! - Checksum: inverted low byte of the payload sum
//!
//! The serial link drops and corrupts bytes freely, so every failure short of
//! the stream closing is recovered here by resuming the sync search.

use std::io::{self, BufReader, ErrorKind, Read};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::device::FrameStats;
use crate::protocol::{check_checksum, decode_frame, FrameTruncated, Sample, SYNC};

/// Default number of bytes discarded while hunting for sync before giving up
pub const DEFAULT_SYNC_RETRIES: usize = 500;

/// Validated frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub checksum: u8,
    pub checksum_ok: bool,
}

impl Frame {
    /// Decode the payload into samples
    pub fn decode(&self) -> Result<Vec<Sample>, FrameTruncated> {
        decode_frame(&self.payload)
    }
}

/// Reasons a frame is read off the wire and thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InvalidLength(u8),
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Frame read failures surfaced to the caller
#[derive(Debug, Error)]
pub enum FrameError {
    /// Read timed out before a frame completed; retry
    #[error("no data available yet")]
    NoData,

    /// Sync search budget exhausted; transient
    #[error("no frame found after skipping {skipped} bytes")]
    SyncTimeout { skipped: usize },

    /// Byte source reached EOF or failed; fatal
    #[error("byte stream closed: {0}")]
    StreamClosed(#[source] io::Error),
}

impl FrameError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StreamClosed(_))
    }
}

/// Frame in progress, kept across `NoData` so a timeout never splits a frame
#[derive(Debug, Default)]
struct Progress {
    /// Bytes discarded since the last frame or sync timeout
    skipped: usize,
    /// Sync bytes seen in the current run
    synced: usize,
    /// Declared payload length, once sync completed
    len: Option<u8>,
    payload: Vec<u8>,
}

impl Progress {
    /// Bytes of the current frame already consumed
    fn in_hand(&self) -> usize {
        self.synced.min(2) + usize::from(self.len.is_some()) + self.payload.len()
    }
}

/// Reads validated frames from an unreliable byte source
pub struct FrameReader<R> {
    source: BufReader<R>,
    sync_retries: usize,
    stats: Arc<FrameStats>,
    progress: Progress,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R, sync_retries: usize) -> Self {
        Self::with_stats(source, sync_retries, Arc::new(FrameStats::new()))
    }

    pub fn with_stats(source: R, sync_retries: usize, stats: Arc<FrameStats>) -> Self {
        Self {
            source: BufReader::new(source),
            sync_retries,
            stats,
            progress: Progress::default(),
        }
    }

    pub fn stats(&self) -> &Arc<FrameStats> {
        &self.stats
    }

    /// Read the next frame that passes length and checksum validation
    ///
    /// `NoData` leaves a partly read frame in place; the next call resumes it.
    pub fn read_frame(&mut self) -> Result<Frame, FrameError> {
        let result = self.advance();
        if let Err(FrameError::StreamClosed(_)) = &result {
            let progress = std::mem::take(&mut self.progress);
            let lost = progress.skipped + progress.in_hand();
            if lost > 0 {
                self.stats.record_skipped(lost);
            }
        }
        result
    }

    fn advance(&mut self) -> Result<Frame, FrameError> {
        loop {
            let len = match self.progress.len {
                Some(len) => len,
                None => {
                    let len = self.find_sync()?;
                    // 0xAB..=0xFF can never be a length; 0xAA was consumed as sync
                    if len > SYNC {
                        self.drop_frame(DropReason::InvalidLength(len), &[]);
                        self.progress.skipped += self.progress.synced + 1;
                        self.progress.synced = 0;
                        self.check_budget()?;
                        continue;
                    }
                    self.progress.len = Some(len);
                    len
                }
            };

            while self.progress.payload.len() < len as usize {
                let byte = self.next_byte()?;
                self.progress.payload.push(byte);
            }
            let checksum = self.next_byte()?;

            let Progress {
                skipped, payload, ..
            } = std::mem::take(&mut self.progress);

            match check_checksum(&payload, checksum) {
                Ok(()) => {
                    self.stats.record_frame();
                    if skipped > 0 {
                        self.stats.record_skipped(skipped);
                    }
                    trace!("Frame: {} bytes | {}", len, hex::encode(&payload));
                    return Ok(Frame {
                        payload,
                        checksum,
                        checksum_ok: true,
                    });
                }
                Err(expected) => {
                    let reason = DropReason::ChecksumMismatch {
                        expected,
                        actual: checksum,
                    };
                    self.drop_frame(reason, &payload);
                    self.progress.skipped = skipped + 4 + payload.len();
                    self.check_budget()?;
                }
            }
        }
    }

    /// Consume bytes up to and including the length byte that follows a sync run
    fn find_sync(&mut self) -> Result<u8, FrameError> {
        loop {
            let byte = self.next_byte()?;
            if byte == SYNC {
                self.progress.synced += 1;
                if self.progress.synced > 2 {
                    self.progress.skipped += 1;
                    self.check_budget()?;
                }
                continue;
            }
            if self.progress.synced >= 2 {
                self.progress.synced = 2;
                return Ok(byte);
            }
            self.progress.skipped += self.progress.synced + 1;
            self.progress.synced = 0;
            self.check_budget()?;
        }
    }

    fn check_budget(&mut self) -> Result<(), FrameError> {
        let skipped = self.progress.skipped;
        if skipped >= self.sync_retries {
            self.progress = Progress::default();
            self.stats.record_sync_timeout();
            self.stats.record_skipped(skipped);
            return Err(FrameError::SyncTimeout { skipped });
        }
        Ok(())
    }

    fn drop_frame(&self, reason: DropReason, payload: &[u8]) {
        match reason {
            DropReason::InvalidLength(len) => {
                self.stats.record_invalid_length();
                debug!("Invalid packet size: {} bytes", len);
            }
            DropReason::ChecksumMismatch { expected, actual } => {
                self.stats.record_checksum_error();
                debug!(
                    "Packet checksum {:02X} != {:02X} | {}",
                    expected,
                    actual,
                    hex::encode(payload)
                );
            }
        }
    }

    fn next_byte(&mut self) -> Result<u8, FrameError> {
        let mut byte = [0u8; 1];
        loop {
            match self.source.read(&mut byte) {
                Ok(0) => {
                    return Err(FrameError::StreamClosed(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "end of stream",
                    )))
                }
                Ok(_) => return Ok(byte[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(FrameError::NoData)
                }
                Err(e) => return Err(FrameError::StreamClosed(e)),
            }
        }
    }
}
