//! UDP endpoints for the drone link
//!
//! - [`UdpEndpoint`]: passive listener bound to a fixed local port
//!   (telemetry and video broadcasts)
//! - [`CommandSocket`]: ephemeral local port dialing the drone's command port
//!
//! Neither type retries. Receives are cut into short slices so that a
//! cancellation or [`UdpEndpoint::close`] from another thread is observed
//! promptly even though `std::net::UdpSocket` cannot be woken directly.

use super::CommandLink;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single blocking read before re-checking cancellation and close
const RECV_SLICE: Duration = Duration::from_millis(50);

/// Why a receive wait ends if no datagram arrives
#[derive(Clone, Copy)]
enum Limit {
    Timeout,
    Deadline,
}

/// Bound UDP socket with timeout/cancellation-aware receive
pub struct UdpEndpoint {
    socket: UdpSocket,
    label: &'static str,
    timeout: Duration,
    closed: AtomicBool,
}

impl UdpEndpoint {
    /// Bind a socket to `addr`
    ///
    /// # Arguments
    /// - `addr`: local address (port 0 picks an ephemeral port)
    /// - `label`: name used in log lines ("state", "video", "command")
    /// - `timeout`: fixed per-call receive timeout
    pub fn bind(addr: SocketAddr, label: &'static str, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        log::info!("UDP {} endpoint bound to {}", label, socket.local_addr()?);
        Ok(Self {
            socket,
            label,
            timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Receive one datagram
    ///
    /// Waits until the earlier of the per-call timeout and the token's
    /// deadline:
    /// - per-call timeout elapsed → [`Error::Timeout`]
    /// - token cancelled, its deadline reached, or endpoint closed → [`Error::Cancelled`]
    /// - any other socket failure → [`Error::Io`]
    pub fn receive(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<(usize, SocketAddr)> {
        self.receive_filtered(buf, cancel, None)
    }

    /// Receive one datagram from `peer`, discarding any other sender
    ///
    /// Foreign datagrams do not extend the wait; outcomes match [`Self::receive`].
    pub fn receive_from(
        &self,
        buf: &mut [u8],
        cancel: &CancelToken,
        peer: SocketAddr,
    ) -> Result<(usize, SocketAddr)> {
        self.receive_filtered(buf, cancel, Some(peer))
    }

    fn receive_filtered(
        &self,
        buf: &mut [u8],
        cancel: &CancelToken,
        expected: Option<SocketAddr>,
    ) -> Result<(usize, SocketAddr)> {
        let timeout_at = Instant::now() + self.timeout;
        let (limit_at, limit) = match cancel.deadline() {
            Some(deadline) if deadline < timeout_at => (deadline, Limit::Deadline),
            _ => (timeout_at, Limit::Timeout),
        };

        loop {
            if self.is_closed() || cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if now >= limit_at {
                return Err(match limit {
                    Limit::Timeout => Error::Timeout,
                    Limit::Deadline => Error::Cancelled,
                });
            }

            // A zero read timeout is rejected by the OS, keep at least 1ms
            let slice = (limit_at - now).min(RECV_SLICE).max(Duration::from_millis(1));
            self.socket.set_read_timeout(Some(slice))?;

            match self.socket.recv_from(buf) {
                Ok((n, peer)) => {
                    if self.is_closed() {
                        return Err(Error::Cancelled);
                    }
                    if let Some(expected) = expected
                        && peer != expected
                    {
                        log::debug!(
                            "UDP {} ignored {} bytes from unexpected peer {}",
                            self.label,
                            n,
                            peer
                        );
                        continue;
                    }
                    log::trace!("UDP {} received {} bytes from {}", self.label, n, peer);
                    return Ok((n, peer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => {
                    if self.is_closed() || cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Send one datagram to `target`
    pub fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Cancelled);
        }
        self.socket.send_to(data, target)?;
        Ok(())
    }

    /// Discard every datagram already queued on the socket without blocking
    ///
    /// Returns the number of datagrams dropped.
    pub fn drain(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Cancelled);
        }
        let mut buf = [0u8; 1024];
        let mut dropped = 0;

        self.socket.set_nonblocking(true)?;
        let result = loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    dropped += 1;
                    log::warn!(
                        "UDP {} discarded stale datagram from {}: '{}'",
                        self.label,
                        peer,
                        String::from_utf8_lossy(&buf[..n]).trim()
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(dropped),
                Err(e) => break Err(Error::Io(e)),
            }
        };
        self.socket.set_nonblocking(false)?;
        result
    }

    /// Mark the endpoint closed; idempotent
    ///
    /// In-flight receives return [`Error::Cancelled`] within one slice. The
    /// socket itself is released when the endpoint is dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::info!("UDP {} endpoint closed", self.label);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Active socket for the command/response exchange
pub struct CommandSocket {
    endpoint: UdpEndpoint,
    remote: SocketAddr,
}

impl CommandSocket {
    /// Open an ephemeral-port socket aimed at the drone's command address
    pub fn open(local: SocketAddr, remote: SocketAddr, timeout: Duration) -> Result<Self> {
        let endpoint = UdpEndpoint::bind(local, "command", timeout)?;
        log::info!("Command socket targeting {}", remote);
        Ok(Self { endpoint, remote })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }
}

impl CommandLink for CommandSocket {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.endpoint.send_to(data, self.remote)
    }

    fn receive(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<(usize, SocketAddr)> {
        self.endpoint.receive_from(buf, cancel, self.remote)
    }

    fn drain(&self) -> Result<usize> {
        self.endpoint.drain()
    }

    fn close(&self) {
        self.endpoint.close();
    }
}
