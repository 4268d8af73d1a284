//! Hosted session service - serves one session over TCP

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::device::Session;
use crate::error::Result;

use super::protocol::{ErrorKind, Handoff, Request, Response};

/// Loopback, ephemeral port
pub const DEFAULT_LISTEN: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

const REBIND_ATTEMPTS: u32 = 20;
const REBIND_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reload,
    Shutdown,
}

/// Serve `session` until shutdown
///
/// The bound address is written to `handoff` as one JSON line, after which
/// the writer is dropped. Dropping only closes what the writer owns: handed
/// process stdout, the descriptor stays open, so nothing may write to stdout
/// afterwards (the parent stops reading after the first line). Ends on a
/// `Shutdown` request or Ctrl-C; the session is disconnected before returning.
pub async fn serve<W: Write + Send>(
    session: Arc<dyn Session>,
    config: &ServiceConfig,
    mut handoff: W,
) -> Result<()> {
    let mut listener = TcpListener::bind(config.listen).await?;
    let address = listener.local_addr()?;

    let message = Handoff {
        address: address.to_string(),
        pid: std::process::id(),
    };
    serde_json::to_writer(&mut handoff, &message)?;
    handoff.write_all(b"\n")?;
    handoff.flush()?;
    drop(handoff);

    info!("Mindset session service on {} PID {}", address, message.pid);

    let (control_tx, mut control_rx) = mpsc::channel::<Control>(4);
    let mut connections = JoinSet::new();
    let mut reload_signal = ReloadSignal::new()?;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Client connected from {}", peer);
                    connections.spawn(handle_connection(stream, session.clone(), control_tx.clone()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            Some(control) = control_rx.recv() => match control {
                Control::Reload => {
                    listener = rebind(listener, address, &mut connections).await?;
                }
                Control::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            },
            _ = reload_signal.recv() => {
                info!("SIGHUP received");
                listener = rebind(listener, address, &mut connections).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection handler panicked: {}", e);
                    }
                }
            }
        }
    }

    drop(listener);
    connections.shutdown().await;

    info!("Stopping session service...");
    let disconnected = tokio::task::spawn_blocking(move || session.disconnect()).await;
    match disconnected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Session disconnect failed: {}", e),
        Err(e) => error!("Session disconnect panicked: {}", e),
    }
    info!("Mindset session service stopped");
    Ok(())
}

/// Drop the listener and every connection, then listen on the same address again
async fn rebind(
    listener: TcpListener,
    address: SocketAddr,
    connections: &mut JoinSet<()>,
) -> Result<TcpListener> {
    info!("Stopping Mindset service on {}", address);
    drop(listener);
    connections.shutdown().await;

    let mut attempt = 0;
    loop {
        match TcpListener::bind(address).await {
            Ok(listener) => {
                info!("Starting Mindset service on {}", address);
                return Ok(listener);
            }
            Err(e) if attempt + 1 < REBIND_ATTEMPTS => {
                attempt += 1;
                debug!("Rebind attempt {} failed: {}", attempt, e);
                tokio::time::sleep(REBIND_DELAY).await;
            }
            Err(e) => {
                error!("Could not rebind {}: {}", address, e);
                return Err(e.into());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, session: Arc<dyn Session>, control: mpsc::Sender<Control>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let _ = stream.set_nodelay(true);

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, follow_up) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, &session).await,
            Err(e) => {
                warn!("Malformed request from {}: {}", peer, e);
                (Response::error(ErrorKind::Protocol, e.to_string()), None)
            }
        };

        let mut reply = match serde_json::to_vec(&response) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Could not encode response: {}", e);
                break;
            }
        };
        reply.push(b'\n');
        if let Err(e) = write_half.write_all(&reply).await {
            debug!("Write to {} failed: {}", peer, e);
            break;
        }

        // Acknowledged first; the control action may tear this connection down
        if let Some(follow_up) = follow_up {
            let _ = control.send(follow_up).await;
        }
    }

    debug!("Client {} disconnected", peer);
}

async fn dispatch(request: Request, session: &Arc<dyn Session>) -> (Response, Option<Control>) {
    match request {
        Request::Ping => (Response::Pong, None),
        Request::Reload => (Response::Ok, Some(Control::Reload)),
        Request::Shutdown => (Response::Ok, Some(Control::Shutdown)),
        request => {
            // Session calls may block on the serial stream
            let session = session.clone();
            match tokio::task::spawn_blocking(move || call_session(session.as_ref(), request)).await {
                Ok(response) => (response, None),
                Err(e) => (Response::error(ErrorKind::Other, e.to_string()), None),
            }
        }
    }
}

fn call_session(session: &dyn Session, request: Request) -> Response {
    let result = match request {
        Request::State => session.state().map(|state| Response::State { state }),
        Request::Connect { address } => session.connect(address.as_deref()).map(|_| Response::Ok),
        Request::Start => session.start().map(|_| Response::Ok),
        Request::Stop => session.stop().map(|_| Response::Ok),
        Request::Disconnect => session.disconnect().map(|_| Response::Ok),
        Request::ReadBatch => session.read_batch().map(|samples| Response::Samples { samples }),
        Request::ReadFrame => session.read_frame().map(|samples| Response::Samples { samples }),
        Request::Stats => session.stats().map(|stats| Response::Stats { stats }),
        Request::Ping | Request::Reload | Request::Shutdown => Ok(Response::Ok),
    };
    result.unwrap_or_else(Response::from)
}

/// SIGHUP listener; never fires off unix
struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
