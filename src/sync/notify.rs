//! Cross-domain notification endpoint
//!
//! The raw primitive is edge-triggered: the peer "rings" us and nothing
//! says why. Each side owns a non-blocking Unix datagram socket bound in
//! the connection directory; a signal is a one-byte datagram sent to the
//! peer's socket. The local socket is the pollable descriptor handed to
//! callers. Signals coalesce: a full socket buffer means the peer is
//! already signalled, and one acknowledgment drains every pending signal.

use std::{
    io::{self, ErrorKind},
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
        unix::net::UnixDatagram,
    },
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
};

use crate::error::{Result, VchanError};

use crate::memory::namespace::remove_if_present;

/// One-shot acknowledgment state of an endpoint
///
/// `Armed` waits for a signal, `Fired` has observed one that has not been
/// consumed, `Acknowledged` consumed it. The next readiness check re-arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Armed,
    Fired,
    Acknowledged,
}

/// Local end of the signal pair
#[derive(Debug)]
pub struct EventChannel {
    socket: UnixDatagram,
    local_path: PathBuf,
    peer_path: PathBuf,
    state: AckState,
    /// Socket is connected to the peer endpoint
    attached: bool,
    /// The peer endpoint has been seen live; failures from here on are fatal
    established: bool,
    peer_gone: bool,
    notify_count: AtomicU64,
    wait_count: AtomicU64,
}

impl EventChannel {
    /// Bind the local endpoint, reclaiming a stale one left by a dead owner
    ///
    /// Fails with `AddrInUse` when a live endpoint already holds the name.
    pub fn claim(local_path: &Path, peer_path: &Path) -> io::Result<Self> {
        let socket = match UnixDatagram::bind(local_path) {
            Ok(socket) => socket,
            Err(e) if e.kind() == ErrorKind::AddrInUse => Self::reclaim(local_path)?,
            Err(e) => return Err(e),
        };
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            local_path: local_path.to_path_buf(),
            peer_path: peer_path.to_path_buf(),
            state: AckState::Armed,
            attached: false,
            established: false,
            peer_gone: false,
            notify_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        })
    }

    fn reclaim(path: &Path) -> io::Result<UnixDatagram> {
        let probe = UnixDatagram::unbound()?;
        match probe.connect(path) {
            Ok(()) => Err(io::Error::from(ErrorKind::AddrInUse)),
            // Live, and already paired with its own peer
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(io::Error::from(ErrorKind::AddrInUse))
            }
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                tracing::debug!(path = %path.display(), "reclaiming stale endpoint");
                std::fs::remove_file(path)?;
                UnixDatagram::bind(path)
            }
            Err(e) => Err(e),
        }
    }

    /// Descriptor that becomes readable when a signal is pending
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn ack_state(&self) -> AckState {
        self.state
    }

    /// Whether the peer endpoint is known to be dead
    pub fn peer_gone(&self) -> bool {
        self.peer_gone
    }

    /// Treat endpoint failures as peer death from now on
    pub fn mark_established(&mut self) {
        self.established = true;
        if let Err(e) = self.attach_peer() {
            tracing::warn!(error = %e, "failed to attach to peer endpoint");
        }
    }

    /// Connect to the peer endpoint if it exists; returns whether attached
    pub fn attach_peer(&mut self) -> Result<bool> {
        if self.attached {
            return Ok(true);
        }
        if self.peer_gone {
            return Ok(false);
        }
        match self.socket.connect(&self.peer_path) {
            Ok(()) => {
                self.attached = true;
                Ok(true)
            }
            Err(e) if is_peer_absent(&e) => {
                if self.established {
                    self.mark_peer_gone();
                }
                Ok(false)
            }
            Err(e) => Err(VchanError::from_io(e, "Failed to attach to peer endpoint")),
        }
    }

    /// Signal the peer; a no-op while its endpoint does not exist yet
    pub fn notify(&mut self) -> Result<()> {
        if !self.attach_peer()? {
            return Ok(());
        }

        match self.socket.send(&[1u8]) {
            Ok(_) => {
                self.notify_count.fetch_add(1, Ordering::Relaxed);
            }
            // Peer buffer full: it is already signalled
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) if is_peer_absent(&e) => {
                self.attached = false;
                if self.established {
                    self.mark_peer_gone();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "peer signal failed");
                return Err(VchanError::notification(format!("signal failed: {}", e)));
            }
        }
        Ok(())
    }

    /// Check that the peer endpoint is still bound, without signalling it
    pub fn probe_peer(&mut self) -> bool {
        if !self.established || self.peer_gone {
            return !self.peer_gone;
        }
        match self.socket.connect(&self.peer_path) {
            Ok(()) => {
                self.attached = true;
                true
            }
            Err(e) if is_peer_absent(&e) => {
                self.mark_peer_gone();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "peer probe failed");
                true
            }
        }
    }

    /// Wait up to `timeout` (forever if `None`) for a pending signal
    ///
    /// Re-arms an acknowledged endpoint first. Returns whether the
    /// endpoint is now `Fired`; the signal is not consumed.
    pub fn poll_fired(&mut self, timeout: Option<Duration>) -> Result<bool> {
        match self.state {
            AckState::Fired => return Ok(true),
            AckState::Acknowledged => self.state = AckState::Armed,
            AckState::Armed => {}
        }

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let readable = {
            let mut fds = [PollFd::new(&self.socket, PollFlags::POLLIN)];
            loop {
                match poll(&mut fds, timeout_ms) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            fds[0]
                .revents()
                .map(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLERR))
                .unwrap_or(false)
        };

        if readable {
            self.state = AckState::Fired;
        }
        Ok(readable)
    }

    /// One-shot acknowledgment
    ///
    /// Consumes every pending signal. Blocks until a signal arrives when
    /// none is pending, so calling it twice for one readiness report can
    /// hang forever.
    pub fn wait(&mut self) -> Result<()> {
        while !self.poll_fired(None)? {}
        self.drain()?;
        self.state = AckState::Acknowledged;
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn drain(&mut self) -> Result<usize> {
        let mut buf = [0u8; 64];
        let mut drained = 0;
        loop {
            match self.socket.recv(&mut buf) {
                Ok(_) => drained += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // Pending asynchronous error from a vanished peer
                Err(e) if is_peer_absent(&e) => {
                    if self.established {
                        self.mark_peer_gone();
                    }
                    break;
                }
                Err(e) => return Err(VchanError::from_io(e, "Failed to drain signals")),
            }
        }
        Ok(drained)
    }

    fn mark_peer_gone(&mut self) {
        if !self.peer_gone {
            tracing::debug!(peer = %self.peer_path.display(), "peer endpoint gone");
        }
        self.peer_gone = true;
        self.attached = false;
    }

    /// Get notification statistics
    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            notify_count: self.notify_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
        }
    }
}

impl AsRawFd for EventChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl AsFd for EventChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        remove_if_present(&self.local_path);
    }
}

fn is_peer_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::NotConnected
    )
}

/// Statistics for event notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationStats {
    /// Number of signals sent
    pub notify_count: u64,
    /// Number of acknowledgments performed
    pub wait_count: u64,
}
