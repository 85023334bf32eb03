use crate::config::Mode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub system_info: String,
    pub timestamp: i64,
    pub timestamp_str: String,
}

/// Kernel TCP statistics captured at the end of a transfer.
///
/// The segment counters are what make Nagle and delayed ACK visible: with
/// coalescing on, `data_segs_out` on the sender drops below the number of
/// chunks written; with quick ACKs on, `segs_out` on the receiver grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpStats {
    pub retransmits: u64,
    pub snd_cwnd: Option<u64>,
    pub rtt: Option<u64>,
    pub rttvar: Option<u64>,
    pub pmtu: Option<u64>,
    pub segs_out: Option<u64>,
    pub segs_in: Option<u64>,
    pub data_segs_out: Option<u64>,
    pub data_segs_in: Option<u64>,
}

/// Lifecycle of one peer.
///
/// `Idle → Connecting | Listening → Streaming → Draining → Closed`. Errors
/// jump straight to `Closed`; there are no retry transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Idle,
    Connecting,
    Listening,
    Streaming,
    Draining,
    Closed,
}

/// Socket options read back from the kernel once the connection is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketState {
    /// `TCP_NODELAY` (Nagle disabled)
    pub nodelay: bool,
    /// `TCP_QUICKACK`; `None` where the platform has no such option
    pub quickack: Option<bool>,
}

/// Interval measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub start: Duration,
    pub end: Duration,
    pub bytes: u64,
    pub chunks: u64,
    pub bits_per_second: f64,
}

/// Complete transfer measurements for one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurements {
    pub mode: Mode,
    pub state: TransferState,
    pub total_bytes: u64,
    pub chunks: u64,
    pub total_duration: Duration,
    pub intervals: Vec<IntervalStats>,
    pub connection: Option<ConnectionInfo>,
    pub socket: Option<SocketState>,
    pub tcp_stats: Option<TcpStats>,
    pub system: Option<SystemInfo>,
    /// Set when the receiver's read loop ended on an error instead of EOF
    pub receive_error: Option<String>,
    #[serde(skip)]
    pub start_time: Option<Instant>,
    #[serde(skip)]
    interval_width: Duration,
}

impl Measurements {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: TransferState::Idle,
            total_bytes: 0,
            chunks: 0,
            total_duration: Duration::ZERO,
            intervals: Vec::new(),
            connection: None,
            socket: None,
            tcp_stats: None,
            system: None,
            receive_error: None,
            start_time: None,
            interval_width: Duration::from_secs(1),
        }
    }

    /// Goodput over the whole transfer.
    pub fn total_bits_per_second(&self) -> f64 {
        if self.total_duration.as_secs_f64() > 0.0 {
            (self.total_bytes as f64 * 8.0) / self.total_duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Width of the throughput buckets; zero disables bucketing.
    pub fn set_interval(&mut self, width: Duration) {
        self.interval_width = width;
    }

    pub fn record_chunk(&mut self, bytes: u64) {
        let offset = self
            .start_time
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO);
        self.record_chunk_at(offset, bytes);
    }

    /// Counts a chunk that moved `offset` after streaming started.
    ///
    /// Only the running totals and the bucket it falls into are updated;
    /// memory grows with the transfer's duration, not its size.
    pub fn record_chunk_at(&mut self, offset: Duration, bytes: u64) {
        self.total_bytes += bytes;
        self.chunks += 1;

        if let Some(idx) = self.bucket_index(offset) {
            self.extend_intervals(idx);
            let bucket = &mut self.intervals[idx];
            bucket.bytes += bytes;
            bucket.chunks += 1;
        }
    }

    /// Stamps the duration, pads trailing empty buckets up to it and
    /// computes the per-bucket rates.
    pub fn close_intervals(&mut self, duration: Duration) {
        self.total_duration = duration;

        if self.intervals.is_empty() && duration.is_zero() {
            return;
        }
        if let Some(idx) = self.bucket_index(duration) {
            self.extend_intervals(idx);
        }

        let width_secs = self.interval_width.as_secs_f64();
        for interval in &mut self.intervals {
            interval.bits_per_second = (interval.bytes as f64 * 8.0) / width_secs;
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.total_duration = duration;
    }

    pub fn set_start_time(&mut self, time: Instant) {
        self.start_time = Some(time);
    }

    fn bucket_index(&self, offset: Duration) -> Option<usize> {
        if self.interval_width.is_zero() {
            return None;
        }
        Some((offset.as_secs_f64() / self.interval_width.as_secs_f64()).floor() as usize)
    }

    // Gaps in the stream show up as zero-byte buckets.
    fn extend_intervals(&mut self, idx: usize) {
        let width = self.interval_width;
        while self.intervals.len() <= idx {
            let i = self.intervals.len() as u32;
            self.intervals.push(IntervalStats {
                start: width * i,
                end: width * (i + 1),
                bytes: 0,
                chunks: 0,
                bits_per_second: 0.0,
            });
        }
    }
}

/// Thread-safe measurements collector
#[derive(Debug, Clone)]
pub struct MeasurementsCollector {
    inner: Arc<Mutex<Measurements>>,
}

impl MeasurementsCollector {
    pub fn new(mode: Mode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Measurements::new(mode))),
        }
    }

    pub fn set_interval(&self, width: Duration) {
        self.inner.lock().set_interval(width);
    }

    pub fn record_chunk(&self, bytes: u64) {
        self.inner.lock().record_chunk(bytes);
    }

    pub fn set_state(&self, state: TransferState) {
        self.inner.lock().state = state;
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().state
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    pub fn set_connection(&self, info: ConnectionInfo) {
        self.inner.lock().connection = Some(info);
    }

    pub fn set_socket_state(&self, state: SocketState) {
        self.inner.lock().socket = Some(state);
    }

    pub fn set_tcp_stats(&self, stats: TcpStats) {
        self.inner.lock().tcp_stats = Some(stats);
    }

    pub fn set_receive_error(&self, message: String) {
        self.inner.lock().receive_error = Some(message);
    }

    pub fn set_duration(&self, duration: Duration) {
        self.inner.lock().set_duration(duration);
    }

    pub fn set_start_time(&self, time: Instant) {
        self.inner.lock().set_start_time(time);
    }

    /// Closes the interval buckets at the time elapsed since streaming
    /// started and attaches system info.
    pub fn finish(&self) {
        let mut m = self.inner.lock();
        let duration = m
            .start_time
            .map(|start| start.elapsed())
            .unwrap_or(m.total_duration);
        m.close_intervals(duration);
        m.system = Some(get_system_info());
    }

    pub fn get(&self) -> Measurements {
        self.inner.lock().clone()
    }
}

/// Get system information
pub fn get_system_info() -> SystemInfo {
    let now = chrono::Utc::now();
    SystemInfo {
        version: format!("trickle {}", env!("CARGO_PKG_VERSION")),
        system_info: format!(
            "{} {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        timestamp_str: now.to_rfc2822(),
        timestamp: now.timestamp(),
    }
}

fn format_transfer(bytes: u64) -> (f64, &'static str) {
    if bytes >= 1_000_000_000 {
        (bytes as f64 / 1_000_000_000.0, "GBytes")
    } else if bytes >= 1_000_000 {
        (bytes as f64 / 1_000_000.0, "MBytes")
    } else if bytes >= 1_000 {
        (bytes as f64 / 1_000.0, "KBytes")
    } else {
        (bytes as f64, "Bytes")
    }
}

fn format_bitrate(bps: f64) -> (f64, &'static str) {
    if bps >= 1_000_000_000.0 {
        (bps / 1_000_000_000.0, "Gbits/sec")
    } else if bps >= 1_000_000.0 {
        (bps / 1_000_000.0, "Mbits/sec")
    } else if bps >= 1_000.0 {
        (bps / 1_000.0, "Kbits/sec")
    } else {
        (bps, "bits/sec")
    }
}

/// Prints the human-readable end-of-run block.
pub fn print_results(m: &Measurements) {
    let role = match m.mode {
        Mode::Sender => "sender",
        Mode::Receiver => "receiver",
    };

    println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
    println!("Interval           Transfer        Bitrate            Chunks");

    for interval in &m.intervals {
        let (val, unit) = format_transfer(interval.bytes);
        let (rate, rate_unit) = format_bitrate(interval.bits_per_second);
        println!(
            "{:5.2}-{:<5.2} sec  {:6.2} {:>6}  {:7.2} {:>9}  {:5}",
            interval.start.as_secs_f64(),
            interval.end.as_secs_f64(),
            val,
            unit,
            rate,
            rate_unit,
            interval.chunks
        );
    }

    let duration = m.total_duration.as_secs_f64();
    let (val, unit) = format_transfer(m.total_bytes);
    let (rate, rate_unit) = format_bitrate(m.total_bits_per_second());
    println!(
        "{:5.2}-{:<5.2} sec  {:6.2} {:>6}  {:7.2} {:>9}  {:5}  {}",
        0.0, duration, val, unit, rate, rate_unit, m.chunks, role
    );

    if let Some(stats) = &m.tcp_stats {
        if let (Some(out), Some(seg_in)) = (stats.segs_out, stats.segs_in) {
            println!(
                "TCP segments out/in: {}/{} (data {}/{}), retransmits {}, rtt {} us",
                out,
                seg_in,
                stats.data_segs_out.unwrap_or(0),
                stats.data_segs_in.unwrap_or(0),
                stats.retransmits,
                stats.rtt.unwrap_or(0)
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_goodput() {
        let mut m = Measurements::new(Mode::Sender);
        m.total_bytes = 100;
        m.set_duration(Duration::from_secs(2));
        assert_eq!(m.total_bits_per_second(), 400.0);

        m.set_duration(Duration::ZERO);
        assert_eq!(m.total_bits_per_second(), 0.0);
    }

    #[test]
    fn test_record_chunk_accumulates() {
        let collector = MeasurementsCollector::new(Mode::Receiver);
        collector.set_start_time(Instant::now());
        collector.record_chunk(40);
        collector.record_chunk(40);
        collector.record_chunk(20);

        let m = collector.get();
        assert_eq!(m.total_bytes, 100);
        assert_eq!(m.chunks, 3);
        assert_eq!(m.intervals.iter().map(|i| i.bytes).sum::<u64>(), 100);
    }

    #[test]
    fn test_intervals_one_second() {
        let mut m = Measurements::new(Mode::Sender);
        m.record_chunk_at(ms(100), 40);
        m.record_chunk_at(ms(500), 40);
        m.record_chunk_at(ms(1200), 20);
        m.close_intervals(ms(1300));

        assert_eq!(m.intervals.len(), 2);
        assert_eq!(m.intervals[0].bytes, 80);
        assert_eq!(m.intervals[0].chunks, 2);
        assert_eq!(m.intervals[0].bits_per_second, 640.0);
        assert_eq!(m.intervals[1].bytes, 20);
        assert_eq!(m.intervals[1].start, Duration::from_secs(1));
    }

    #[test]
    fn test_intervals_keep_gaps() {
        let mut m = Measurements::new(Mode::Receiver);
        m.record_chunk_at(ms(0), 10);
        m.record_chunk_at(ms(2500), 10);
        m.close_intervals(Duration::from_secs(3));

        assert_eq!(
            m.intervals.iter().map(|i| i.bytes).collect::<Vec<_>>(),
            vec![10, 0, 10, 0]
        );
    }

    #[test]
    fn test_intervals_bounded_by_duration_not_chunk_count() {
        let mut m = Measurements::new(Mode::Sender);
        for i in 0..100_000u64 {
            m.record_chunk_at(ms(i % 2000), 40);
        }
        m.close_intervals(ms(2000));

        assert_eq!(m.chunks, 100_000);
        assert_eq!(m.total_bytes, 4_000_000);
        assert_eq!(m.intervals.len(), 3);
        assert_eq!(m.intervals.iter().map(|i| i.chunks).sum::<u64>(), 100_000);
    }

    #[test]
    fn test_intervals_empty() {
        let mut m = Measurements::new(Mode::Sender);
        m.close_intervals(Duration::ZERO);
        assert!(m.intervals.is_empty());

        let mut m = Measurements::new(Mode::Sender);
        m.set_interval(Duration::ZERO);
        m.record_chunk_at(ms(0), 1);
        m.close_intervals(ms(10));
        assert!(m.intervals.is_empty());
        assert_eq!(m.total_bytes, 1);
    }

    #[test]
    fn test_finish_sets_duration_and_system() {
        let collector = MeasurementsCollector::new(Mode::Sender);
        collector.set_start_time(Instant::now());
        collector.record_chunk(5);
        collector.finish();

        let m = collector.get();
        assert!(m.system.is_some());
        assert_eq!(m.intervals.iter().map(|i| i.bytes).sum::<u64>(), 5);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_transfer(100), (100.0, "Bytes"));
        assert_eq!(format_transfer(2_000_000).1, "MBytes");
        assert_eq!(format_bitrate(320.0), (320.0, "bits/sec"));
        assert_eq!(format_bitrate(8_000.0).1, "Kbits/sec");
    }
}
