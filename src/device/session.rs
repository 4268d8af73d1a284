//! Live headset session - owns the byte stream and the background read loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn, Span};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::Sample;
use crate::serial::{ByteStream, Frame, FrameError, FrameReader, SerialTransport, Transport};

use super::buffer::SampleBuffer;
use super::state::{FrameStats, SessionState, StatsSnapshot};
use super::Session;

/// Interval between read loop statistics lines in verbose mode
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

type SharedReader = Arc<Mutex<Option<FrameReader<ByteStream>>>>;

struct Lifecycle {
    state: SessionState,
    address: Option<String>,
    read_loop: Option<JoinHandle<()>>,
}

/// Session against a live headset
pub struct DeviceSession {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    span: Span,
    lifecycle: Mutex<Lifecycle>,
    reader: SharedReader,
    buffer: Arc<SampleBuffer>,
    running: Arc<AtomicBool>,
    stats: Arc<FrameStats>,
}

impl DeviceSession {
    /// Session over the serial port transport
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(SerialTransport))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let span = info_span!("device_session", device = %config.device);
        Self::with_span(config, transport, span)
    }

    /// Session whose log output is recorded under the given span
    pub fn with_span(config: SessionConfig, transport: Arc<dyn Transport>, span: Span) -> Self {
        Self {
            config,
            transport,
            span,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                address: None,
                read_loop: None,
            }),
            reader: Arc::new(Mutex::new(None)),
            buffer: Arc::new(SampleBuffer::new()),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(FrameStats::new()),
        }
    }

    /// Address of the open stream, if connected
    pub fn address(&self) -> Option<String> {
        self.lock_lifecycle().address.clone()
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.reap_read_loop(&mut lifecycle);
        lifecycle
    }

    /// Observe a read loop that ended on its own (stream closed)
    fn reap_read_loop(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.state == SessionState::Running && !self.running.load(Ordering::SeqCst) {
            if let Some(handle) = lifecycle.read_loop.take() {
                let _ = handle.join();
            }
            lifecycle.state = SessionState::Stopped;
        }
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.state != SessionState::Running {
            return;
        }

        let _enter = self.span.enter();
        info!("Stopping read loop...");
        self.running.store(false, Ordering::SeqCst);

        // The loop never takes the lifecycle lock, so joining under it is safe
        if let Some(handle) = lifecycle.read_loop.take() {
            if handle.join().is_err() {
                error!("Read loop panicked");
            }
        }
        lifecycle.state = SessionState::Stopped;
    }
}

impl Session for DeviceSession {
    fn state(&self) -> Result<SessionState> {
        Ok(self.lock_lifecycle().state)
    }

    fn connect(&self, address: Option<&str>) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != SessionState::Disconnected {
            return Err(Error::InvalidState {
                op: "connect",
                state: lifecycle.state,
            });
        }

        let _enter = self.span.enter();
        let address = address.unwrap_or(&self.config.device).to_string();
        lifecycle.state = SessionState::Connecting;

        match self.transport.open(&address, self.config.read_timeout) {
            Ok(stream) => {
                let reader =
                    FrameReader::with_stats(stream, self.config.sync_retries, self.stats.clone());
                *lock(&self.reader) = Some(reader);
                lifecycle.state = SessionState::Connected;
                info!("Connected to {}", address);
                lifecycle.address = Some(address);
                Ok(())
            }
            Err(e) => {
                lifecycle.state = SessionState::Disconnected;
                error!("Could not connect to {}: {}", address, e);
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        let stream_open = lock(&self.reader).is_some();
        match lifecycle.state {
            SessionState::Connected | SessionState::Stopped if stream_open => {}
            state => return Err(Error::InvalidState { op: "start", state }),
        }

        self.running.store(true, Ordering::SeqCst);

        let reader = self.reader.clone();
        let buffer = self.buffer.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        let span = self.span.clone();
        let verbose = self.config.verbose;

        let spawned = thread::Builder::new()
            .name("mindset-reader".to_string())
            .spawn(move || {
                let _enter = span.enter();
                run_read_loop(reader, buffer, running, stats, verbose);
            });

        match spawned {
            Ok(handle) => {
                lifecycle.read_loop = Some(handle);
                lifecycle.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        self.stop_locked(&mut lifecycle);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        self.stop_locked(&mut lifecycle);

        if lock(&self.reader).take().is_some() {
            let _enter = self.span.enter();
            info!("Disconnected from {}", lifecycle.address.as_deref().unwrap_or("device"));
        }
        lifecycle.address = None;
        lifecycle.state = SessionState::Disconnected;
        Ok(())
    }

    fn read_batch(&self) -> Result<Vec<Sample>> {
        Ok(self.buffer.drain())
    }

    fn read_frame(&self) -> Result<Vec<Sample>> {
        {
            let lifecycle = self.lock_lifecycle();
            match lifecycle.state {
                SessionState::Connected | SessionState::Stopped => {}
                state => return Err(Error::InvalidState { op: "read a frame", state }),
            }
        }

        let result = {
            let mut reader = lock(&self.reader);
            let Some(reader) = reader.as_mut() else {
                return Err(Error::InvalidState {
                    op: "read a frame",
                    state: SessionState::Stopped,
                });
            };
            reader.read_frame()
        };

        match result {
            Ok(frame) => Ok(decode_samples(&frame, &self.stats)),
            Err(FrameError::NoData) | Err(FrameError::SyncTimeout { .. }) => Ok(Vec::new()),
            Err(FrameError::StreamClosed(e)) => {
                lock(&self.reader).take();
                let mut lifecycle = self.lock_lifecycle();
                if lifecycle.state == SessionState::Connected {
                    lifecycle.state = SessionState::Stopped;
                }
                Err(Error::StreamClosed(e))
            }
        }
    }

    fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.stats.snapshot())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Continuous read loop (runs in dedicated thread)
fn run_read_loop(
    reader: SharedReader,
    buffer: Arc<SampleBuffer>,
    running: Arc<AtomicBool>,
    stats: Arc<FrameStats>,
    verbose: bool,
) {
    info!("Read loop started");
    let mut last_stats_time = Instant::now();
    let mut first_frame = true;

    while running.load(Ordering::SeqCst) {
        let result = {
            let mut guard = lock(&reader);
            match guard.as_mut() {
                Some(reader) => reader.read_frame(),
                None => break,
            }
        };

        match result {
            Ok(frame) => {
                if first_frame {
                    info!("First frame received ({} bytes)", frame.payload.len());
                    first_frame = false;
                }
                buffer.append(decode_samples(&frame, &stats));
            }
            Err(FrameError::NoData) => {}
            Err(FrameError::SyncTimeout { skipped }) => {
                debug!("No sync after {} bytes", skipped);
            }
            Err(FrameError::StreamClosed(e)) => {
                error!("Headset stream closed: {}", e);
                lock(&reader).take();
                break;
            }
        }

        if verbose && last_stats_time.elapsed() >= STATS_LOG_INTERVAL {
            info!("[Stats] {} | Buffered: {}", stats.snapshot(), buffer.len());
            last_stats_time = Instant::now();
        }

        thread::yield_now();
    }

    running.store(false, Ordering::SeqCst);
    info!("Read loop stopped. {}", stats.snapshot());
}

fn decode_samples(frame: &Frame, stats: &FrameStats) -> Vec<Sample> {
    let samples = match frame.decode() {
        Ok(samples) => samples,
        Err(truncated) => {
            stats.record_truncated();
            warn!("Truncated frame: {}", truncated);
            truncated.samples
        }
    };
    stats.record_samples(samples.len());
    samples
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
