//! Hosted session service
//!
//! A session can live in its own process: the child serves it over TCP with
//! newline-delimited JSON, hands its address to the parent on stdout, and
//! the parent talks to it through a [`SessionProxy`].

mod host;
mod protocol;
mod proxy;
mod server;

pub use host::{HostConfig, HostedSession, ServiceHost};
pub use protocol::{ErrorKind, Handoff, Request, Response};
pub use proxy::SessionProxy;
pub use server::{serve, ServiceConfig, DEFAULT_LISTEN};
