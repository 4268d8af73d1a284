//! Launch a session service in a child process and wait until it answers

use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::protocol::Handoff;
use super::proxy::SessionProxy;

/// How to launch and wait for a hosted session service
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Executable that serves a session and writes the handoff line
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,

    /// Bound on handoff plus readiness polling
    pub ready_timeout: Duration,

    /// Delay between readiness probes
    pub poll_interval: Duration,

    /// Per-call timeout on the proxy connection
    pub io_timeout: Duration,
}

impl HostConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            io_timeout: Duration::from_secs(10),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Starts session services in child processes
pub struct ServiceHost;

impl ServiceHost {
    /// Spawn the service, read its address, and poll until it answers a ping
    ///
    /// On any failure the child is killed and reaped before the error is
    /// returned, so nothing outlives a failed start.
    pub fn start(config: &HostConfig) -> Result<HostedSession> {
        let target = config.program.display().to_string();
        info!("Starting Mindset session service: {}", target);

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Connect {
                target: target.clone(),
                reason: format!("failed to spawn: {}", e),
            })?;

        let deadline = Instant::now() + config.ready_timeout;

        let handoff = match read_handoff(&mut child, deadline) {
            Ok(handoff) => handoff,
            Err(reason) => return Err(abort(child, &target, reason)),
        };
        debug!("Service handed off {} (PID {})", handoff.address, handoff.pid);

        let proxy = match wait_until_ready(&mut child, &handoff.address, config, deadline) {
            Ok(proxy) => proxy,
            Err(reason) => return Err(abort(child, &handoff.address, reason)),
        };

        info!("Mindset session service on {} PID {}", handoff.address, child.id());
        Ok(HostedSession {
            address: handoff.address,
            proxy,
            child: Some(child),
            poll_interval: config.poll_interval,
            ready_timeout: config.ready_timeout,
        })
    }
}

/// Read the single handoff line from the child's stdout, bounded by `deadline`
fn read_handoff(child: &mut Child, deadline: Instant) -> std::result::Result<Handoff, String> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "child stdout not captured".to_string())?;

    // A blocking read cannot be timed out; the reader thread ends once the child dies
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("service-handoff".to_string())
        .spawn(move || {
            let mut line = String::new();
            let result = BufReader::new(stdout).read_line(&mut line).map(|n| (n, line));
            let _ = tx.send(result);
        })
        .map_err(|e| format!("failed to spawn handoff reader: {}", e))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(Ok((0, _))) => Err("service exited before handing off an address".to_string()),
        Ok(Ok((_, line))) => serde_json::from_str(line.trim())
            .map_err(|e| format!("malformed handoff {:?}: {}", line.trim(), e)),
        Ok(Err(e)) => Err(format!("reading handoff failed: {}", e)),
        Err(RecvTimeoutError::Timeout) => Err("no address handed off in time".to_string()),
        Err(RecvTimeoutError::Disconnected) => Err("handoff reader ended unexpectedly".to_string()),
    }
}

/// Probe the handed-off address until a ping succeeds
fn wait_until_ready(
    child: &mut Child,
    address: &str,
    config: &HostConfig,
    deadline: Instant,
) -> std::result::Result<SessionProxy, String> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match SessionProxy::connect(address, config.io_timeout).and_then(|proxy| proxy.ping().map(|_| proxy)) {
            Ok(proxy) => {
                debug!("Service ready after {} probe(s)", attempts);
                return Ok(proxy);
            }
            Err(e) => debug!("Service not ready ({}): {}", attempts, e),
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(format!("service exited during startup ({})", status));
        }
        if Instant::now() + config.poll_interval > deadline {
            return Err(format!(
                "service not ready after {} probe(s) within {:?}",
                attempts, config.ready_timeout
            ));
        }
        thread::sleep(config.poll_interval);
    }
}

fn abort(mut child: Child, target: &str, reason: String) -> Error {
    warn!("Service start failed: {}", reason);
    terminate(&mut child);
    Error::Connect {
        target: target.to_string(),
        reason,
    }
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Kill of PID {} failed: {}", child.id(), e);
    }
    let _ = child.wait();
}

/// A running service child and its proxy
///
/// The child is killed when this is dropped without [`HostedSession::shutdown`].
pub struct HostedSession {
    address: String,
    proxy: SessionProxy,
    child: Option<Child>,
    poll_interval: Duration,
    ready_timeout: Duration,
}

impl HostedSession {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn proxy(&self) -> &SessionProxy {
        &self.proxy
    }

    /// Restart the service's listener in place and wait for it to answer again
    pub fn reload(&self) -> Result<()> {
        self.proxy.reload()?;

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            thread::sleep(self.poll_interval);
            match self.proxy.ping() {
                Ok(()) => return Ok(()),
                Err(e) if Instant::now() < deadline => debug!("Waiting for reload: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop the service and reap the child
    ///
    /// A service that already stopped on its own (Ctrl-C) and exited cleanly
    /// counts as shut down even though the request could not be delivered.
    pub fn shutdown(mut self, timeout: Duration) -> Result<()> {
        let requested = self.proxy.shutdown();
        let Some(mut child) = self.child.take() else {
            return requested;
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Mindset session service exited ({})", status);
                    return match requested {
                        Err(e) if status.success() => {
                            debug!("Shutdown request not delivered ({}), service already stopped", e);
                            Ok(())
                        }
                        requested => requested,
                    };
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => {
                    warn!("Service did not exit within {:?}, killing", timeout);
                    terminate(&mut child);
                    return requested;
                }
                Err(e) => {
                    terminate(&mut child);
                    return Err(e.into());
                }
            }
        }
    }
}

impl Drop for HostedSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> HostConfig {
        HostConfig::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .ready_timeout(Duration::from_millis(600))
            .poll_interval(Duration::from_millis(50))
    }

    #[test]
    fn test_child_exiting_without_handoff() {
        let started = Instant::now();
        let err = ServiceHost::start(&sh("exit 0")).err().expect("start must fail");
        assert!(err.is_connect());
        assert!(err.to_string().contains("exited before handing off"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_handoff() {
        let err = ServiceHost::start(&sh("echo hello; exec sleep 30"))
            .err()
            .expect("start must fail");
        assert!(err.is_connect());
        assert!(err.to_string().contains("malformed handoff"));
    }

    #[test]
    fn test_missing_program() {
        let err = ServiceHost::start(&HostConfig::new("/nonexistent/mindset-service"))
            .err()
            .expect("start must fail");
        assert!(err.is_connect());
    }
}
