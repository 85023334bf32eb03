use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port shared by both peers.
pub const DEFAULT_PORT: u16 = 4999;

/// Default chunk size in bytes for both reads and writes.
pub const DEFAULT_CHUNK_SIZE: usize = 40;

/// Default pause after every chunk the sender writes (40 bytes/sec at the
/// default chunk size).
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Default pending-connection backlog for the receiver's listener.
pub const DEFAULT_BACKLOG: i32 = 3;

/// Which end of the stream this instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Connects out and pushes the byte source
    Sender,
    /// Listens, accepts one connection and drains it
    Receiver,
}

/// Kernel transmission optimizations, applied once per socket before any
/// data moves.
///
/// Both flags default to `true`, which leaves the platform behavior alone.
/// Setting a flag to `false` switches the optimization off:
///
/// - `nagle: false` sets `TCP_NODELAY`, so every write is pushed out
///   immediately instead of being coalesced. On the receiver this only
///   affects segments the receiver itself sends; it has no influence on the
///   sender's outbound pacing.
/// - `delayed_ack: false` sets `TCP_QUICKACK` on the receiver, so incoming
///   segments are acknowledged right away. The sender ignores this flag.
///
/// # Examples
///
/// ```
/// use trickle::SocketOptions;
///
/// let opts = SocketOptions::default();
/// assert!(opts.nagle);
/// assert!(opts.delayed_ack);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    /// Nagle's algorithm (send-side coalescing)
    pub nagle: bool,
    /// Delayed acknowledgments (receive side)
    pub delayed_ack: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nagle: true,
            delayed_ack: true,
        }
    }
}

/// Configuration for one trickle peer.
///
/// Holds the settings for both sender and receiver mode. Use
/// [`Config::sender`] or [`Config::receiver`] and the builder methods to
/// customize it.
///
/// # Examples
///
/// ## Sender with Nagle disabled
///
/// ```
/// use trickle::Config;
/// use std::time::Duration;
///
/// let config = Config::sender("192.168.1.10".to_string(), 4999)
///     .with_source("file.txt")
///     .with_chunk_size(40)
///     .with_delay(Duration::from_millis(500))
///     .with_nagle(false);
///
/// assert!(!config.socket_options().nagle);
/// ```
///
/// ## Receiver acknowledging immediately
///
/// ```
/// use trickle::Config;
///
/// let config = Config::receiver(4999).with_delayed_ack(false);
/// assert!(!config.socket_options().delayed_ack);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sender mode or receiver mode
    pub mode: Mode,

    /// Port to connect to (sender) or listen on (receiver)
    pub port: u16,

    /// Destination host (sender mode)
    pub server_addr: Option<String>,

    /// Bind address (receiver mode); wildcard when unset
    pub bind_addr: Option<IpAddr>,

    /// File streamed by the sender
    pub source: Option<PathBuf>,

    /// Bytes per read/write call
    pub chunk_size: usize,

    /// Pause after every chunk written by the sender
    pub delay: Duration,

    /// Nagle's algorithm; `false` sets `TCP_NODELAY`
    pub nagle: bool,

    /// Delayed ACKs on the receiver; `false` sets `TCP_QUICKACK`
    pub delayed_ack: bool,

    /// Pending-connection backlog for the receiver
    pub backlog: i32,

    /// Echo received bytes to stdout (receiver mode, ignored with `json`)
    pub echo: bool,

    /// Output the final report as JSON
    pub json: bool,

    /// Width of the throughput buckets in the final report
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Sender,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            source: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delay: DEFAULT_DELAY,
            nagle: true,
            delayed_ack: true,
            backlog: DEFAULT_BACKLOG,
            echo: true,
            json: false,
            interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sender configuration targeting `server_addr:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use trickle::{Config, Mode};
    ///
    /// let config = Config::sender("127.0.0.1".to_string(), 4999);
    /// assert_eq!(config.mode, Mode::Sender);
    /// ```
    pub fn sender(server_addr: String, port: u16) -> Self {
        Self {
            mode: Mode::Sender,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    /// Creates a receiver configuration listening on `port` on all
    /// interfaces.
    ///
    /// # Examples
    ///
    /// ```
    /// use trickle::{Config, Mode};
    ///
    /// let config = Config::receiver(4999);
    /// assert_eq!(config.mode, Mode::Receiver);
    /// assert!(config.bind_addr.is_none());
    /// ```
    pub fn receiver(port: u16) -> Self {
        Self {
            mode: Mode::Receiver,
            port,
            ..Default::default()
        }
    }

    /// Sets the file the sender streams.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// Sets the number of bytes moved per read/write call.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the fixed pause after every chunk the sender writes.
    ///
    /// The pause is unconditional, so throughput is roughly
    /// `chunk_size / delay` regardless of what the network could carry.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enables or disables Nagle's algorithm (`false` sets `TCP_NODELAY`).
    pub fn with_nagle(mut self, nagle: bool) -> Self {
        self.nagle = nagle;
        self
    }

    /// Enables or disables delayed ACKs on the receiver (`false` sets
    /// `TCP_QUICKACK`).
    pub fn with_delayed_ack(mut self, delayed_ack: bool) -> Self {
        self.delayed_ack = delayed_ack;
        self
    }

    /// Binds the receiver to a specific local address.
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Sets the receiver's listen backlog.
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Enables or disables echoing received bytes to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Enables or disables JSON output for the final report.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Sets the width of the throughput buckets in the final report.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether the receiver echoes payload bytes to stdout. JSON output
    /// turns echo off so stdout carries only the report.
    pub fn echo_enabled(&self) -> bool {
        self.echo && !self.json
    }

    /// The socket toggles this configuration applies.
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            nagle: self.nagle,
            delayed_ack: self.delayed_ack,
        }
    }

    /// The address the receiver listens on, wildcard unless overridden.
    pub fn listen_addr(&self) -> std::net::SocketAddr {
        let ip = self
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        std::net::SocketAddr::new(ip, self.port)
    }

    /// Checks the settings that would otherwise fail deep inside a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero chunk size, backlog or interval.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("Chunk size must be at least 1 byte".to_string()));
        }
        if self.backlog <= 0 {
            return Err(Error::Config("Listen backlog must be positive".to_string()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("Report interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_kernel_behavior() {
        let config = Config::new();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.chunk_size, 40);
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.socket_options(), SocketOptions::default());
        assert!(config.echo);
    }

    #[test]
    fn test_listen_addr_defaults_to_wildcard() {
        let config = Config::receiver(4999);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:4999");

        let config = config.with_bind_addr("127.0.0.1".parse().unwrap());
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:4999");
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let config = Config::sender("127.0.0.1".to_string(), 4999).with_chunk_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_disables_echo() {
        let config = Config::receiver(4999);
        assert!(config.echo_enabled());
        assert!(!config.clone().with_json(true).echo_enabled());
        assert!(!config.with_echo(false).echo_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_backlog_and_interval() {
        assert!(Config::receiver(4999).with_backlog(0).validate().is_err());
        assert!(Config::receiver(4999)
            .with_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Config::receiver(4999).validate().is_ok());
    }
}
