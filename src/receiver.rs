use crate::config::{Config, Mode};
use crate::measurements::{print_results, Measurements, MeasurementsCollector, TransferState};
use crate::progress::{CallbackRef, ProgressCallback, ProgressEvent};
use crate::socket::{
    bind_listener, connection_info, disable_delayed_ack, disable_nagle, socket_state, tcp_stats,
};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Accepts exactly one connection and drains it to EOF.
///
/// The listening socket is created in [`Receiver::bind`] with address reuse
/// and, depending on [`SocketOptions`](crate::SocketOptions), with
/// `TCP_QUICKACK` and `TCP_NODELAY`. [`Receiver::run`] consumes the
/// receiver, so the listener and the accepted connection are both released
/// when the run ends, whatever the outcome.
///
/// Disabling Nagle here only changes how the receiver sends its own
/// segments. It does not change how the sender paces or coalesces its data;
/// that is controlled on the sender's socket.
///
/// `accept` and `read` have no timeout: with no peer the receiver waits
/// indefinitely.
///
/// # Examples
///
/// ```no_run
/// use trickle::{Config, Receiver};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::receiver(4999).with_delayed_ack(false);
/// let receiver = Receiver::bind(config)?;
///
/// let measurements = receiver.run().await?;
/// println!("Received {} bytes", measurements.total_bytes);
/// # Ok(())
/// # }
/// ```
pub struct Receiver {
    config: Config,
    listener: TcpListener,
    measurements: MeasurementsCollector,
    callback: Option<CallbackRef>,
}

impl Receiver {
    /// Creates the listening endpoint. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the settings fail [`Config::validate`]
    /// - [`Error::Bind`] if the address cannot be bound (e.g. port in use)
    /// - [`Error::SocketOption`] if a requested toggle is rejected or
    ///   unsupported on this platform
    pub fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let measurements = MeasurementsCollector::new(Mode::Receiver);
        measurements.set_interval(config.interval);
        let addr = config.listen_addr();
        let listener = bind_listener(addr, config.socket_options(), config.backlog)?;

        measurements.set_state(TransferState::Listening);
        info!(
            "Listening on {} (nagle={}, delayed_ack={})",
            listener.local_addr().unwrap_or(addr),
            config.nagle,
            config.delayed_ack
        );

        Ok(Self {
            config,
            listener,
            measurements,
            callback: None,
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// The bound address; useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    fn transition(&self, state: TransferState) {
        debug!("Receiver state: {:?}", state);
        self.measurements.set_state(state);
        self.notify(ProgressEvent::StateChanged(state));
    }

    /// Accepts one connection and drains it, echoing to stdout when
    /// [`Config::echo_enabled`] holds.
    pub async fn run(self) -> Result<Measurements> {
        if self.config.echo_enabled() {
            let mut stdout = tokio::io::stdout();
            self.run_into(&mut stdout).await
        } else {
            let mut sink = tokio::io::sink();
            self.run_into(&mut sink).await
        }
    }

    /// Accepts one connection and writes every received byte to `sink`.
    ///
    /// A read error ends the loop without failing the call: it is recorded
    /// in [`Measurements::receive_error`] and totals are still reported.
    ///
    /// # Errors
    ///
    /// - [`Error::Accept`] if accepting the connection fails
    /// - [`Error::SocketOption`] if a toggle cannot be applied to the
    ///   accepted connection
    pub async fn run_into<W>(self, sink: &mut W) -> Result<Measurements>
    where
        W: AsyncWrite + Unpin,
    {
        self.notify(ProgressEvent::StateChanged(TransferState::Listening));

        let result = self.drain(sink).await;
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
                    println!("Received file of size: {} bytes", measurements.total_bytes);
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

    async fn drain<W>(&self, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let opts = self.config.socket_options();

        let (mut stream, addr) = self.listener.accept().await.map_err(Error::Accept)?;
        info!("Client connected from {}", addr);
        if let Ok(local) = stream.local_addr() {
            self.notify(ProgressEvent::Connected { local, peer: addr });
        }
        if let Ok(info) = connection_info(&stream) {
            self.measurements.set_connection(info);
        }

        if !opts.nagle {
            disable_nagle(&stream)?;
        }
        if !opts.delayed_ack {
            disable_delayed_ack(&stream)?;
        }
        if let Ok(state) = socket_state(&stream) {
            self.measurements.set_socket_state(state);
        }

        self.transition(TransferState::Streaming);
        self.measurements.set_start_time(Instant::now());

        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut index = 0u64;
        let mut echo = true;

        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => {
                    debug!("Peer closed the stream");
                    break;
                }
                Ok(n) => {
                    self.measurements.record_chunk(n as u64);
                    let total_bytes = self.measurements.total_bytes();
                    debug!("Chunk {}: {} bytes", index, n);

                    if echo {
                        if let Err(e) = sink.write_all(&buffer[..n]).await {
                            warn!("Echo disabled after write failure: {}", e);
                            echo = false;
                        }
                    }

                    self.notify(ProgressEvent::ChunkReceived {
                        index,
                        bytes: n,
                        total_bytes,
                    });
                    index += 1;

                    if !opts.delayed_ack {
                        rearm_quickack(&stream);
                    }
                }
                Err(e) => {
                    let err = Error::Receive(e);
                    error!("{}", err);
                    self.measurements.set_receive_error(err.to_string());
                    self.notify(ProgressEvent::Error(err.to_string()));
                    break;
                }
            }
        }

        self.transition(TransferState::Draining);
        if echo {
            if let Err(e) = sink.flush().await {
                warn!("Failed to flush echoed data: {}", e);
            }
        }

        self.measurements.finish();
        if let Ok(stats) = tcp_stats(&stream) {
            self.measurements.set_tcp_stats(stats);
        }
        info!(
            "Transfer complete: {} bytes in {} chunks",
            self.measurements.total_bytes(),
            index
        );

        Ok(())
    }
}

// The flag was applied successfully once already; a failure to re-arm only
// means the kernel falls back to delayed ACKs for the next segment.
fn rearm_quickack(stream: &TcpStream) {
    if let Err(e) = disable_delayed_ack(stream) {
        debug!("Could not re-arm TCP_QUICKACK: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let receiver = Receiver::bind(Config::receiver(0).with_bind_addr(LOCALHOST)).unwrap();
        let addr = receiver.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(receiver.measurements.state(), TransferState::Listening);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = Config::receiver(0).with_bind_addr(LOCALHOST).with_chunk_size(0);
        assert!(matches!(Receiver::bind(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_drains_until_peer_closes() {
        let receiver = Receiver::bind(
            Config::receiver(0)
                .with_bind_addr(LOCALHOST)
                .with_echo(false),
        )
        .unwrap();
        let addr = receiver.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            let m = receiver.run_into(&mut out).await.unwrap();
            (m, out)
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello, trickle").await.unwrap();
        client.shutdown().await.unwrap();

        let (m, out) = handle.await.unwrap();
        assert_eq!(out, b"hello, trickle");
        assert_eq!(m.total_bytes, 14);
        assert_eq!(m.state, TransferState::Closed);
        assert!(m.receive_error.is_none());
    }

    async fn drain_one(config: Config, payload: &'static [u8]) -> Measurements {
        let receiver = Receiver::bind(config.with_bind_addr(LOCALHOST).with_echo(false)).unwrap();
        let addr = receiver.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            receiver.run_into(&mut out).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(payload).await.unwrap();
        client.shutdown().await.unwrap();
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn test_accepted_stream_gets_nodelay() {
        let m = drain_one(Config::receiver(0).with_nagle(false), b"abc").await;
        assert_eq!(m.socket.map(|s| s.nodelay), Some(true));

        let m = drain_one(Config::receiver(0), b"abc").await;
        assert_eq!(m.socket.map(|s| s.nodelay), Some(false));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_accepted_stream_gets_quickack() {
        let m = drain_one(Config::receiver(0).with_delayed_ack(false), b"abc").await;
        assert_eq!(m.socket.and_then(|s| s.quickack), Some(true));
        assert_eq!(m.total_bytes, 3);
    }
}
