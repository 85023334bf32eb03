use crate::measurements::TransferState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Progress event types reported during a transfer.
///
/// Both peers emit these through an attached [`ProgressCallback`].
///
/// # Examples
///
/// ```no_run
/// use trickle::{Config, ProgressEvent, Sender};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::sender("127.0.0.1".to_string(), 4999).with_source("file.txt");
///
/// let sender = Sender::new(config)?.with_callback(|event: ProgressEvent| match event {
///     ProgressEvent::ChunkSent { bytes, total_bytes, .. } => {
///         println!("{} bytes out, {} so far", bytes, total_bytes);
///     }
///     ProgressEvent::Completed { total_bytes, .. } => println!("done: {}", total_bytes),
///     _ => {}
/// });
///
/// sender.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The peer moved to a new lifecycle state.
    StateChanged(TransferState),
    /// A connection was established (connect or accept).
    Connected { local: SocketAddr, peer: SocketAddr },
    /// The sender wrote one chunk. `index` starts at zero.
    ChunkSent {
        index: u64,
        bytes: usize,
        total_bytes: u64,
    },
    /// The receiver read one chunk. Boundaries need not match the sender's.
    ChunkReceived {
        index: u64,
        bytes: usize,
        total_bytes: u64,
    },
    /// The stream finished.
    Completed {
        total_bytes: u64,
        chunks: u64,
        duration: Duration,
        bits_per_second: f64,
    },
    /// A fatal error, or a receive error that ended the read loop.
    Error(String),
}

/// Callback trait for receiving progress updates during a transfer.
///
/// Implemented automatically for any `Fn(ProgressEvent) + Send + Sync`.
///
/// ```
/// use trickle::{ProgressCallback, ProgressEvent};
///
/// struct Quiet;
///
/// impl ProgressCallback for Quiet {
///     fn on_progress(&self, _event: ProgressEvent) {}
/// }
/// ```
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub(crate) type CallbackRef = Arc<dyn ProgressCallback>;
