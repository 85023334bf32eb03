use crate::config::{Config, Mode};
use crate::measurements::{print_results, Measurements, MeasurementsCollector, TransferState};
use crate::progress::{CallbackRef, ProgressCallback, ProgressEvent};
use crate::socket::{connection_info, disable_nagle, socket_state, tcp_stats};
use crate::{Error, Result};
use log::{debug, info};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

/// Pushes a finite byte source over one TCP connection in paced chunks.
///
/// The sender connects, optionally disables Nagle's algorithm, then reads
/// the source `chunk_size` bytes at a time, writes each chunk in full and
/// sleeps for `delay` before reading the next one. When the source is
/// exhausted it half-closes the connection so the receiver sees EOF.
///
/// Every failure is fatal for the run: there is no retry and no reconnect.
/// The connection and the source are owned by the running future, so they
/// are released on every exit path. Connect, write and the pacing sleep
/// have no timeout; an unresponsive peer blocks the sender indefinitely.
///
/// # Examples
///
/// ```no_run
/// use trickle::{Config, Sender};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::sender("127.0.0.1".to_string(), 4999)
///     .with_source("file.txt")
///     .with_chunk_size(40)
///     .with_delay(Duration::from_secs(1))
///     .with_nagle(false);
///
/// let sender = Sender::new(config)?;
/// let measurements = sender.run().await?;
/// println!("sent {} bytes in {} chunks", measurements.total_bytes, measurements.chunks);
/// # Ok(())
/// # }
/// ```
pub struct Sender {
    config: Config,
    measurements: MeasurementsCollector,
    callback: Option<CallbackRef>,
}

impl Sender {
    /// Creates a sender with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no destination is set or the settings
    /// fail [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        if config.server_addr.is_none() {
            return Err(Error::Config(
                "Destination address is required for sender mode".to_string(),
            ));
        }
        config.validate()?;

        let measurements = MeasurementsCollector::new(Mode::Sender);
        measurements.set_interval(config.interval);

        Ok(Self {
            config,
            measurements,
            callback: None,
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    fn transition(&self, state: TransferState) {
        debug!("Sender state: {:?}", state);
        self.measurements.set_state(state);
        self.notify(ProgressEvent::StateChanged(state));
    }

    /// Streams the configured source file.
    ///
    /// The file is opened only after the connection is up, so an unreachable
    /// destination never touches the source.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no source file is configured
    /// - [`Error::Connection`] if the destination cannot be reached
    /// - [`Error::SocketOption`] if `TCP_NODELAY` cannot be applied
    /// - [`Error::SourceUnavailable`] if the file cannot be opened or read
    /// - [`Error::Transmission`] if a chunk or the half-close cannot be written
    pub async fn run(&self) -> Result<Measurements> {
        let path = self
            .config
            .source
            .clone()
            .ok_or_else(|| Error::Config("Source file is required for sender mode".to_string()))?;
        let source_name = path.display().to_string();

        self.drive(|| async move {
            File::open(&path)
                .await
                .map_err(|source| Error::SourceUnavailable {
                    source_name,
                    source,
                })
        })
        .await
    }

    /// Streams an already-open byte source.
    ///
    /// Useful for in-memory data; any `AsyncRead` works, e.g. `&[u8]`.
    pub async fn send_from<R>(&self, source: R) -> Result<Measurements>
    where
        R: AsyncRead + Unpin,
    {
        self.drive(|| async move { Ok(source) }).await
    }

    /// Counters accumulated so far; still readable after a failed run.
    pub fn get_measurements(&self) -> Measurements {
        self.measurements.get()
    }

    async fn drive<R, F, Fut>(&self, open: F) -> Result<Measurements>
    where
        R: AsyncRead + Unpin,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let result = self.transfer(open).await;
        self.transition(TransferState::Closed);

        match result {
            Ok(()) => {
                let measurements = self.measurements.get();
                self.notify(ProgressEvent::Completed {
                    total_bytes: measurements.total_bytes,
                    chunks: measurements.chunks,
                    duration: measurements.total_duration,
                    bits_per_second: measurements.total_bits_per_second(),
                });

                if self.config.json {
                    println!("{}", serde_json::to_string_pretty(&measurements)?);
                } else {
                    println!(
                        "File sent successfully. Total bytes sent: {}",
                        measurements.total_bytes
                    );
                    print_results(&measurements);
                }
                Ok(measurements)
            }
            Err(e) => {
                self.notify(ProgressEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn transfer<R, F, Fut>(&self, open: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let server_addr = self
            .config
            .server_addr
            .as_ref()
            .ok_or_else(|| Error::Config("Destination address not set".to_string()))?;
        let full_addr = match server_addr.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.config.port).to_string(),
            Err(_) => format!("{}:{}", server_addr, self.config.port),
        };

        self.transition(TransferState::Connecting);
        info!("Connecting to {}", full_addr);

        let mut stream = TcpStream::connect((server_addr.as_str(), self.config.port))
            .await
            .map_err(|source| Error::Connection {
                addr: full_addr.clone(),
                source,
            })?;

        if !self.config.socket_options().nagle {
            disable_nagle(&stream)?;
        }

        if let (Ok(local), Ok(peer)) = (stream.local_addr(), stream.peer_addr()) {
            info!("Connected {} -> {}", local, peer);
            if !self.config.json {
                println!("Connected to server successfully!");
            }
            self.notify(ProgressEvent::Connected { local, peer });
        }
        if let Ok(info) = connection_info(&stream) {
            self.measurements.set_connection(info);
        }
        if let Ok(state) = socket_state(&stream) {
            self.measurements.set_socket_state(state);
        }

        let mut reader = open().await?;

        self.transition(TransferState::Streaming);
        self.measurements.set_start_time(Instant::now());

        let source_name = self
            .config
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stream>".to_string());
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut index = 0u64;

        loop {
            let n = fill_chunk(&mut reader, &mut buffer)
                .await
                .map_err(|source| Error::SourceUnavailable {
                    source_name: source_name.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }

            // write_all retries partial writes; a zero-length write surfaces
            // as WriteZero.
            stream
                .write_all(&buffer[..n])
                .await
                .map_err(Error::Transmission)?;

            self.measurements.record_chunk(n as u64);
            let total_bytes = self.measurements.total_bytes();
            debug!("Chunk {}: {} bytes", index, n);
            if !self.config.json {
                println!("Sent {} bytes. Total: {} bytes", n, total_bytes);
            }
            self.notify(ProgressEvent::ChunkSent {
                index,
                bytes: n,
                total_bytes,
            });
            index += 1;

            if !self.config.delay.is_zero() {
                time::sleep(self.config.delay).await;
            }
        }

        self.transition(TransferState::Draining);
        self.measurements.finish();
        if let Ok(stats) = tcp_stats(&stream) {
            self.measurements.set_tcp_stats(stats);
        }

        stream.shutdown().await.map_err(Error::Transmission)?;
        info!(
            "Transfer complete: {} bytes in {} chunks",
            self.measurements.total_bytes(),
            index
        );

        Ok(())
    }
}

/// Reads until `buffer` is full or the source is exhausted, so a source
/// that returns short reads still yields full-size chunks. Returns the
/// number of bytes buffered; less than `buffer.len()` only at end of data.
async fn fill_chunk<R>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_destination() {
        let config = Config::receiver(4999);
        assert!(matches!(Sender::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_rejects_zero_chunk_size() {
        let config = Config::sender("127.0.0.1".to_string(), 4999).with_chunk_size(0);
        assert!(Sender::new(config).is_err());
    }

    #[tokio::test]
    async fn test_fill_chunk_joins_short_reads() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = (&data[..10])
            .chain(&data[10..13])
            .chain(&data[13..70])
            .chain(&data[70..]);
        let mut buffer = [0u8; 40];

        let mut sizes = Vec::new();
        let mut out = Vec::new();
        loop {
            let n = fill_chunk(&mut reader, &mut buffer).await.unwrap();
            if n == 0 {
                break;
            }
            sizes.push(n);
            out.extend_from_slice(&buffer[..n]);
        }

        assert_eq!(sizes, vec![40, 40, 20]);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_run_requires_source() {
        let sender = Sender::new(Config::sender("127.0.0.1".to_string(), 4999)).unwrap();
        assert!(matches!(sender.run().await, Err(Error::Config(_))));
        assert_eq!(sender.get_measurements().state, TransferState::Idle);
    }
}
