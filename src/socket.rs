//! Socket-level plumbing: listener construction, the Nagle and delayed-ACK
//! toggles, and kernel statistics for an established stream.
//!
//! Tokio covers `TCP_NODELAY` on a connected stream, but `SO_REUSEADDR` and
//! `TCP_QUICKACK` have to be set on the raw socket before `bind`, so the
//! listener is built with `socket2` and handed to Tokio afterwards.

use crate::config::SocketOptions;
use crate::measurements::{ConnectionInfo, SocketState, TcpStats};
use crate::{Error, Result};
use log::debug;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Creates the receiver's listening socket.
///
/// Address reuse is always enabled. When `opts.delayed_ack` is `false`,
/// `TCP_QUICKACK` is set before binding; when `opts.nagle` is `false`,
/// `TCP_NODELAY` is set on the listener too (accepted sockets get it again,
/// see [`disable_nagle`]).
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// - [`Error::Bind`] if the socket cannot be created, reused, bound or put
///   into listening state (for example when the port is taken)
/// - [`Error::SocketOption`] if one of the optional toggles is rejected
pub fn bind_listener(addr: SocketAddr, opts: SocketOptions, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source: io::Error| Error::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;

    if !opts.delayed_ack {
        set_quickack(SockRef::from(&socket))?;
    }
    if !opts.nagle {
        socket.set_nodelay(true).map_err(|source| Error::SocketOption {
            option: "TCP_NODELAY",
            source,
        })?;
    }

    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(listener).map_err(bind_err)
}

/// Sets `TCP_NODELAY` so each write leaves immediately instead of waiting
/// to be coalesced with later ones.
pub fn disable_nagle(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true).map_err(|source| Error::SocketOption {
        option: "TCP_NODELAY",
        source,
    })?;
    debug!("TCP_NODELAY set on {:?}", stream.local_addr().ok());
    Ok(())
}

/// Sets `TCP_QUICKACK` so incoming segments are acknowledged immediately.
///
/// Linux clears the flag again once the connection leaves quick-ACK mode,
/// so the receiver re-arms it after every read.
pub fn disable_delayed_ack(stream: &TcpStream) -> Result<()> {
    set_quickack(SockRef::from(stream))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_quickack(sock: SockRef<'_>) -> Result<()> {
    sock.set_quickack(true).map_err(|source| Error::SocketOption {
        option: "TCP_QUICKACK",
        source,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_quickack(_sock: SockRef<'_>) -> Result<()> {
    Err(Error::SocketOption {
        option: "TCP_QUICKACK",
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "delayed ACKs cannot be disabled on this platform",
        ),
    })
}

/// Reads the Nagle and quick-ACK flags back from the kernel.
///
/// Linux reports `TCP_QUICKACK` as set on a fresh connection until it
/// enters delayed-ACK mode, so `quickack` reflects the kernel's view at the
/// time of the call rather than only what was requested.
pub fn socket_state(stream: &TcpStream) -> io::Result<SocketState> {
    Ok(SocketState {
        nodelay: stream.nodelay()?,
        quickack: quickack(SockRef::from(stream))?,
    })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn quickack(sock: SockRef<'_>) -> io::Result<Option<bool>> {
    sock.quickack().map(Some)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn quickack(_sock: SockRef<'_>) -> io::Result<Option<bool>> {
    Ok(None)
}

/// Local and remote endpoints of a connected stream.
pub fn connection_info(stream: &TcpStream) -> io::Result<ConnectionInfo> {
    let local_addr = stream.local_addr()?;
    let remote_addr = stream.peer_addr()?;

    Ok(ConnectionInfo {
        local_host: local_addr.ip().to_string(),
        local_port: local_addr.port(),
        remote_host: remote_addr.ip().to_string(),
        remote_port: remote_addr.port(),
    })
}

/// Kernel TCP statistics for a stream (Linux only).
#[cfg(target_os = "linux")]
pub fn tcp_stats(stream: &TcpStream) -> io::Result<TcpStats> {
    use std::mem;
    use std::os::unix::io::AsRawFd;

    // Prefix of `struct tcp_info` up to tcpi_data_segs_out. Older kernels
    // fill less of it; the remainder stays zeroed.
    #[allow(dead_code)]
    #[repr(C)]
    struct TcpInfo {
        state: u8,
        ca_state: u8,
        retransmits: u8,
        probes: u8,
        backoff: u8,
        options: u8,
        wscale: u8,
        flags: u8,

        rto: u32,
        ato: u32,
        snd_mss: u32,
        rcv_mss: u32,

        unacked: u32,
        sacked: u32,
        lost: u32,
        retrans: u32,
        fackets: u32,

        last_data_sent: u32,
        last_ack_sent: u32,
        last_data_recv: u32,
        last_ack_recv: u32,

        pmtu: u32,
        rcv_ssthresh: u32,
        rtt: u32,
        rttvar: u32,
        snd_ssthresh: u32,
        snd_cwnd: u32,
        advmss: u32,
        reordering: u32,

        rcv_rtt: u32,
        rcv_space: u32,

        total_retrans: u32,

        pacing_rate: u64,
        max_pacing_rate: u64,
        bytes_acked: u64,
        bytes_received: u64,
        segs_out: u32,
        segs_in: u32,

        notsent_bytes: u32,
        min_rtt: u32,
        data_segs_in: u32,
        data_segs_out: u32,
    }

    let fd = stream.as_raw_fd();
    let mut info: TcpInfo = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<TcpInfo>() as libc::socklen_t;

    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_TCP,
            libc::TCP_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(TcpStats {
        retransmits: info.total_retrans as u64,
        snd_cwnd: Some(info.snd_cwnd as u64),
        rtt: Some(info.rtt as u64),
        rttvar: Some(info.rttvar as u64),
        pmtu: Some(info.pmtu as u64),
        segs_out: Some(info.segs_out as u64),
        segs_in: Some(info.segs_in as u64),
        data_segs_out: Some(info.data_segs_out as u64),
        data_segs_in: Some(info.data_segs_in as u64),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn tcp_stats(_stream: &TcpStream) -> io::Result<TcpStats> {
    Ok(TcpStats::default())
}
