use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default deadline for dialing the origin after a CONNECT request.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default budget for draining live tunnels on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "HTTP CONNECT tunneling proxy",
    long_about = "Accepts HTTP/1.x CONNECT requests, optionally checks a \
Proxy-Authorization Basic credential, dials the requested origin and relays \
bytes in both directions until either side closes.\n\nIntended as a test \
fixture: handshake failures drop the client connection without an HTTP error \
response."
)]
pub struct Cli {
    /// Port to listen on (0 picks an unused port)
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// IP address to bind the listener
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_ip: Ipv4Addr,

    /// Require this Basic credential (format: "user:pass") on CONNECT requests
    #[arg(long, value_name = "USER:PASS")]
    pub proxy_auth: Option<String>,

    /// Origin dial deadline in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Seconds to wait for live tunnels to finish during shutdown
    #[arg(long, default_value_t = DEFAULT_DRAIN_TIMEOUT_SECS)]
    pub drain_timeout: u64,
}

/// Proxy configuration derived from CLI arguments or built directly by an
/// embedding test harness.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// Expected credential for `Proxy-Authorization: Basic <base64>`.
    /// When set, a CONNECT request without a matching header is dropped.
    pub proxy_auth: Option<String>,
    pub connect_timeout: Duration,
    pub drain_timeout: Duration,
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments
    pub fn from_cli(args: Cli) -> color_eyre::Result<Self> {
        if let Some(cred) = &args.proxy_auth {
            if cred.is_empty() {
                return Err(color_eyre::eyre::eyre!(
                    "Invalid --proxy-auth, expected non-empty user:pass"
                ));
            }
        }

        Ok(Self {
            listen_addr: SocketAddr::from((args.listen_ip, args.port)),
            proxy_auth: args.proxy_auth,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            drain_timeout: Duration::from_secs(args.drain_timeout),
        })
    }

    /// Configuration for an ephemeral loopback listener, the usual shape for
    /// an embedding test.
    pub fn ephemeral() -> Self {
        Self {
            listen_addr: SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)),
            proxy_auth: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }

    /// Require the given Basic credential on CONNECT requests.
    pub fn with_proxy_auth(mut self, credential: impl Into<String>) -> Self {
        self.proxy_auth = Some(credential.into());
        self
    }

    /// Override the origin dial deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
