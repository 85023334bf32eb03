//! trickle - paced raw TCP streaming with explicit control over Nagle's
//! algorithm and delayed acknowledgments
//!
//! Two peers share one TCP connection. The [`Sender`] pushes a byte source
//! in fixed-size chunks with a fixed pause after each write; the
//! [`Receiver`] accepts exactly one connection and drains it until the
//! sender half-closes. Toggling [`SocketOptions`] on either end changes the
//! packet cadence on the wire, never the bytes delivered.
//!
//! # Features
//!
//! - `TCP_NODELAY` on the sender and on the receiver's sockets
//! - `TCP_QUICKACK` on the receiver (Linux)
//! - Per-interval throughput buckets, goodput and socket state read-back
//! - Kernel segment counters from `TCP_INFO` (Linux)
//! - JSON output format
//! - Asynchronous I/O using tokio, one sequential stream per peer

pub mod config;
pub mod error;
pub mod measurements;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod socket;

pub use config::{Config, Mode, SocketOptions, DEFAULT_PORT};
pub use error::{Error, Result};
pub use measurements::{Measurements, SocketState, TransferState};
pub use progress::{ProgressCallback, ProgressEvent};
pub use receiver::Receiver;
pub use sender::Sender;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
