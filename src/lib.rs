//! HTTP/1.x CONNECT tunneling proxy, built as an end-to-end test fixture:
//! handshake failures drop the client connection without a response, and the
//! origin is always dialed on port 80 through a pluggable resolver.

mod buffer_pool;
mod config;
mod connection;
mod handshake;
mod proxy;
mod relay;

pub use config::{Cli, ProxyConfig};
pub use handshake::{
    DnsResolver, HandshakeError, Resolve, ResolveFuture, TUNNEL_ESTABLISHED_RESPONSE,
};
pub use proxy::{ConnectProxy, ProxyBuilder};
pub use relay::{decide_shutdowns, Failure, RelayFlags, RelayOutcome, ShutdownPlan, Termination};
