//! Client side of the hosted session service

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::device::{Session, SessionState, StatsSnapshot};
use crate::error::{Error, Result};
use crate::protocol::Sample;

use super::protocol::{self, Request, Response};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn open(address: &str, io_timeout: Duration) -> Result<Self> {
        let connect_error = |reason: String| Error::Connect {
            target: address.to_string(),
            reason,
        };

        let mut addrs = address
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| connect_error("address resolved to nothing".to_string()))?;

        let stream =
            TcpStream::connect_timeout(&addr, io_timeout).map_err(|e| connect_error(e.to_string()))?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    /// Send one request and read its reply
    ///
    /// A failure reports whether the service cannot have acted on the request.
    fn round_trip(&mut self, request: &Request) -> std::result::Result<Response, Failure> {
        let mut line = serde_json::to_vec(request).map_err(|e| Failure::seen(e.into()))?;
        line.push(b'\n');
        if let Err(e) = self.writer.write_all(&line).and_then(|_| self.writer.flush()) {
            // An incomplete line is never parsed as a request
            return Err(Failure {
                unseen: !is_timeout(&e),
                error: e.into(),
            });
        }

        let mut reply = String::new();
        match self.reader.read_line(&mut reply) {
            Ok(0) => Err(Failure {
                error: std::io::Error::new(ErrorKind::UnexpectedEof, "service closed the connection").into(),
                unseen: true,
            }),
            Ok(_) => serde_json::from_str(&reply)
                .map_err(|e| Failure::seen(Error::Protocol(format!("bad response: {}", e)))),
            Err(e) => Err(Failure {
                unseen: reply.is_empty() && is_closed(&e),
                error: e.into(),
            }),
        }
    }
}

/// A failed round trip
struct Failure {
    error: Error,
    /// The connection was gone before the service could run the request
    unseen: bool,
}

impl Failure {
    fn seen(error: Error) -> Self {
        Self {
            error,
            unseen: false,
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

fn is_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

/// Session living in another process, reached over the service connection
///
/// Every call is one synchronous request/response. A kept connection found
/// closed before any reply is reopened once, which hides a service reload from
/// the caller. A timed-out call is never resent: the service may already have
/// run it, and a second `read_batch` would lose the first batch.
pub struct SessionProxy {
    address: String,
    io_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SessionProxy {
    /// Connect to the service at `address` (`host:port`)
    pub fn connect(address: &str, io_timeout: Duration) -> Result<Self> {
        let connection = Connection::open(address, io_timeout)?;
        Ok(Self {
            address: address.to_string(),
            io_timeout,
            connection: Mutex::new(Some(connection)),
        })
    }

    pub fn ping(&self) -> Result<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the service to drop its connections and rebind
    pub fn reload(&self) -> Result<()> {
        self.expect_ok(&Request::Reload)?;
        // The service closes this connection; start fresh on the next call
        self.lock().take();
        Ok(())
    }

    /// Ask the service to stop; it disconnects its session first
    pub fn shutdown(&self) -> Result<()> {
        self.expect_ok(&Request::Shutdown)?;
        self.lock().take();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call(&self, request: &Request) -> Result<Response> {
        let mut guard = self.lock();

        if let Some(mut connection) = guard.take() {
            // A connection that failed mid-call is dropped here
            match connection.round_trip(request) {
                Ok(response) => {
                    *guard = Some(connection);
                    return Ok(response);
                }
                Err(Failure { error, unseen: true }) => {
                    debug!("Service connection to {} lost ({}), reconnecting", self.address, error);
                }
                Err(failure) => return Err(failure.error),
            }
        }

        let mut connection = Connection::open(&self.address, self.io_timeout)?;
        let response = connection.round_trip(request).map_err(|failure| failure.error)?;
        *guard = Some(connection);
        Ok(response)
    }

    fn expect_ok(&self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn samples(&self, request: &Request) -> Result<Vec<Sample>> {
        match self.call(request)? {
            Response::Samples { samples } => Ok(samples),
            other => Err(unexpected(other)),
        }
    }
}

/// Map an error or mismatched response to a crate error
fn unexpected(response: Response) -> Error {
    match response {
        Response::Error {
            kind: protocol::ErrorKind::Connect,
            message,
        } => Error::Connect {
            target: "hosted session".to_string(),
            reason: message,
        },
        Response::Error { message, .. } => Error::Remote(message),
        other => Error::Protocol(format!("unexpected response {:?}", other)),
    }
}

impl Session for SessionProxy {
    fn state(&self) -> Result<SessionState> {
        match self.call(&Request::State)? {
            Response::State { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    fn connect(&self, address: Option<&str>) -> Result<()> {
        self.expect_ok(&Request::Connect {
            address: address.map(str::to_string),
        })
    }

    fn start(&self) -> Result<()> {
        self.expect_ok(&Request::Start)
    }

    fn stop(&self) -> Result<()> {
        self.expect_ok(&Request::Stop)
    }

    fn disconnect(&self) -> Result<()> {
        self.expect_ok(&Request::Disconnect)
    }

    fn read_batch(&self) -> Result<Vec<Sample>> {
        self.samples(&Request::ReadBatch)
    }

    fn read_frame(&self) -> Result<Vec<Sample>> {
        self.samples(&Request::ReadFrame)
    }

    fn stats(&self) -> Result<StatsSnapshot> {
        match self.call(&Request::Stats)? {
            Response::Stats { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// One-connection-at-a-time fake service answering from a script
    fn fake_service(
        replies: Vec<Vec<&'static str>>,
    ) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for script in replies {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = stream;
                for reply in script {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 {
                        break;
                    }
                    seen.push(line.trim().to_string());
                    writer.write_all(reply.as_bytes()).unwrap();
                    writer.write_all(b"\n").unwrap();
                }
            }
            seen
        });
        (address, handle)
    }

    #[test]
    fn test_calls_map_responses() {
        let (address, service) = fake_service(vec![vec![
            r#"{"status":"pong"}"#,
            r#"{"status":"state","state":"running"}"#,
            r#"{"status":"samples","samples":[{"raw_wave":-2},{"blink":80}]}"#,
            r#"{"status":"error","kind":"invalid_state","message":"cannot start while running"}"#,
        ]]);
        let proxy = SessionProxy::connect(&address, Duration::from_secs(2)).unwrap();

        proxy.ping().unwrap();
        assert_eq!(proxy.state().unwrap(), SessionState::Running);
        assert_eq!(
            proxy.read_batch().unwrap(),
            vec![Sample::RawWave(-2), Sample::Blink(80)]
        );
        match proxy.start().unwrap_err() {
            Error::Remote(message) => assert_eq!(message, "cannot start while running"),
            other => panic!("unexpected error {}", other),
        }
        drop(proxy);

        let seen = service.join().unwrap();
        assert_eq!(
            seen,
            vec![
                r#"{"op":"ping"}"#,
                r#"{"op":"state"}"#,
                r#"{"op":"read_batch"}"#,
                r#"{"op":"start"}"#,
            ]
        );
    }

    #[test]
    fn test_reconnects_once_after_connection_drop() {
        // First connection answers once then closes; the second serves the retry
        let (address, service) = fake_service(vec![
            vec![r#"{"status":"pong"}"#],
            vec![r#"{"status":"ok"}"#],
        ]);
        let proxy = SessionProxy::connect(&address, Duration::from_secs(2)).unwrap();

        proxy.ping().unwrap();
        proxy.stop().unwrap();
        drop(proxy);

        let seen = service.join().unwrap();
        assert_eq!(seen, vec![r#"{"op":"ping"}"#, r#"{"op":"stop"}"#]);
    }

    #[test]
    fn test_timed_out_call_is_not_resent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let service = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();

            // Reply well after the caller gave up
            thread::sleep(Duration::from_millis(400));
            let _ = writer.write_all(b"{\"status\":\"samples\",\"samples\":[{\"raw_wave\":0}]}\n");

            listener.set_nonblocking(true).unwrap();
            let resent = listener.accept().is_ok();
            (line.trim().to_string(), resent)
        });

        let proxy = SessionProxy::connect(&address, Duration::from_millis(150)).unwrap();
        match proxy.read_batch().unwrap_err() {
            Error::Io(e) => assert!(is_timeout(&e), "unexpected error {}", e),
            other => panic!("unexpected error {}", other),
        }

        let (seen, resent) = service.join().unwrap();
        assert_eq!(seen, r#"{"op":"read_batch"}"#);
        assert!(!resent, "request was sent a second time");
    }

    #[test]
    fn test_remote_connect_error_stays_connect_error() {
        let (address, service) = fake_service(vec![vec![
            r#"{"status":"error","kind":"connect","message":"cannot connect to /dev/rfcomm0: busy"}"#,
        ]]);
        let proxy = SessionProxy::connect(&address, Duration::from_secs(2)).unwrap();

        assert!(proxy.connect(None).unwrap_err().is_connect());
        drop(proxy);
        service.join().unwrap();
    }

    #[test]
    fn test_connect_refused_is_connect_error() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = SessionProxy::connect(&address, Duration::from_millis(200))
            .err()
            .expect("nothing listens there");
        assert!(err.is_connect());
    }
}
