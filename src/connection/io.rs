//! Transfer operations
//!
//! All four transfers and the readiness queries run through
//! [`Vchan::await_progress`], which re-validates the peer's index on every
//! pass. Blocking and non-blocking modes differ only in the [`Suspend`]
//! policy used when the ring cannot satisfy the request.

use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
};

use mio::{event::Source, Interest, Registry, Token};

use crate::{
    error::{Result, VchanError},
    ringbuf::notify_bits,
    sync::AckState,
};

use super::{ConnectionState, Link, Vchan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Outgoing ring, level is free space
    Tx,
    /// Incoming ring, level is unread bytes
    Rx,
}

/// What to do when the ring cannot satisfy a request yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suspend {
    /// Report the current level and return
    Never,
    /// Sleep on the endpoint and re-check after every wake
    UntilReady,
}

impl Vchan {
    /// Write as many bytes of `data` as fit
    ///
    /// Blocking mode waits for at least one byte of space. Returns `Ok(0)`
    /// only in non-blocking mode (or for empty `data`).
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.await_progress(Direction::Tx, 1)? == 0 {
            return Ok(0);
        }
        let written = self.with_link(|link| link.tx.write(data))?;
        self.finish_transfer(Direction::Tx, written);
        Ok(written)
    }

    /// Write all of `data` or nothing
    ///
    /// `data` larger than the outgoing ring can never be sent and is
    /// rejected.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.check_atomic_size(Direction::Tx, data.len())?;
        if self.await_progress(Direction::Tx, data.len())? < data.len() {
            return Ok(0);
        }
        if !self.with_link(|link| link.tx.try_write_all(data))? {
            return Ok(0);
        }
        self.finish_transfer(Direction::Tx, data.len());
        Ok(data.len())
    }

    /// Read up to `buf.len()` bytes
    ///
    /// Data still in the ring is delivered even after the peer closed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.await_progress(Direction::Rx, 1)? == 0 {
            return Ok(0);
        }
        let read = self.with_link(|link| link.rx.read(buf))?;
        self.finish_transfer(Direction::Rx, read);
        Ok(read)
    }

    /// Fill all of `buf` or read nothing
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_atomic_size(Direction::Rx, buf.len())?;
        if self.await_progress(Direction::Rx, buf.len())? < buf.len() {
            return Ok(0);
        }
        if !self.with_link(|link| link.rx.try_read_exact(buf))? {
            return Ok(0);
        }
        self.finish_transfer(Direction::Rx, buf.len());
        Ok(buf.len())
    }

    /// Bytes that can be read right now
    ///
    /// Also asks the peer to signal on its next write, so a caller that
    /// polls the descriptor after seeing 0 is woken. A peer index out of
    /// range reads as 0 and disconnects the handle.
    pub fn data_ready(&mut self) -> usize {
        self.query_level(Direction::Rx)
    }

    /// Bytes that can be written right now
    ///
    /// Also asks the peer to signal on its next read.
    pub fn buffer_space(&mut self) -> usize {
        self.query_level(Direction::Tx)
    }

    /// Switch between blocking and non-blocking transfers
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Acknowledge a readiness report from the descriptor
    ///
    /// Must be called exactly once after the descriptor was seen readable
    /// and before the next transfer. Without a pending signal this blocks
    /// until one arrives.
    pub fn wait(&mut self) -> Result<()> {
        self.channel.wait()
    }

    /// Descriptor that becomes readable when the peer signals
    pub fn fd(&self) -> RawFd {
        self.channel.fd()
    }

    /// Where the endpoint is in its acknowledgment cycle
    pub fn ack_state(&self) -> AckState {
        self.channel.ack_state()
    }

    /// Wait until the ring in `dir` reaches `want`, or the policy gives up
    ///
    /// Returns the level last observed.
    fn await_progress(&mut self, dir: Direction, want: usize) -> Result<usize> {
        let suspend = if self.blocking {
            Suspend::UntilReady
        } else {
            Suspend::Never
        };

        loop {
            if dir == Direction::Tx && self.status() == ConnectionState::Disconnected {
                return Err(VchanError::Disconnected);
            }

            let level = self.ring_level(dir)?;
            if level >= want {
                return Ok(level);
            }

            // Ask for a wakeup, then look again in case the peer moved in between
            self.request_wakeup(dir)?;
            let level = self.ring_level(dir)?;
            if level >= want {
                return Ok(level);
            }

            if self.status() == ConnectionState::Disconnected {
                return Err(VchanError::Disconnected);
            }

            match suspend {
                Suspend::Never => return Ok(level),
                Suspend::UntilReady => self.suspend()?,
            }
        }
    }

    /// Sleep until signalled or the liveness interval lapses
    fn suspend(&mut self) -> Result<()> {
        self.stats.record_suspension();
        if self.channel.poll_fired(Some(self.config.liveness_interval()))? {
            self.channel.wait()?;
        } else {
            // A peer that died without signalling is only noticed here
            self.channel.probe_peer();
        }
        Ok(())
    }

    /// Current level of the ring in `dir`, disconnecting on a bad peer index
    fn ring_level(&mut self, dir: Direction) -> Result<usize> {
        let level = self.with_link(|link| match dir {
            Direction::Tx => link.tx.space(),
            Direction::Rx => link.rx.available(),
        });

        if let Err(VchanError::Protocol { message }) = &level {
            if !self.state.is_terminal() {
                tracing::warn!(
                    domain = self.peer_domain,
                    port = self.port,
                    %message,
                    "peer violated ring protocol, disconnecting"
                );
            }
            self.state.advance(ConnectionState::Disconnected);
        }
        level
    }

    fn request_wakeup(&self, dir: Direction) -> Result<()> {
        let link = self.link()?;
        link.control().request_notify(self.side, wakeup_bit(dir));
        Ok(())
    }

    fn query_level(&mut self, dir: Direction) -> usize {
        if self.request_wakeup(dir).is_err() {
            return 0;
        }
        self.ring_level(dir).unwrap_or(0)
    }

    /// Account for a transfer and signal the peer if it asked for it
    fn finish_transfer(&mut self, dir: Direction, bytes: usize) {
        if bytes == 0 {
            return;
        }
        // Our push satisfies a peer waiting for data, our pull one waiting for space
        let wanted = match dir {
            Direction::Tx => {
                self.stats.record_write(bytes);
                notify_bits::WRITE
            }
            Direction::Rx => {
                self.stats.record_read(bytes);
                notify_bits::READ
            }
        };

        let requested = self
            .link
            .as_ref()
            .map(|link| link.control().take_notify_request(self.side.peer(), wanted))
            .unwrap_or(false);
        if requested {
            if let Err(e) = self.channel.notify() {
                tracing::warn!(error = %e, domain = self.peer_domain, port = self.port, "failed to signal peer");
            }
        }
    }

    fn check_atomic_size(&self, dir: Direction, len: usize) -> Result<()> {
        let link = self.link()?;
        let capacity = match dir {
            Direction::Tx => link.tx.capacity(),
            Direction::Rx => link.rx.capacity(),
        };
        if len > capacity {
            return Err(VchanError::invalid_parameter(
                "size",
                format!("{} bytes can never fit a ring of {}", len, capacity),
            ));
        }
        Ok(())
    }

    fn link(&self) -> Result<&Link> {
        self.link
            .as_ref()
            .ok_or_else(|| VchanError::invalid_parameter("vchan", "handshake not finished"))
    }

    fn with_link<T>(&mut self, f: impl FnOnce(&mut Link) -> Result<T>) -> Result<T> {
        match self.link.as_mut() {
            Some(link) => f(link),
            None => Err(VchanError::invalid_parameter("vchan", "handshake not finished")),
        }
    }
}

/// Request bit set while waiting in `dir`
fn wakeup_bit(dir: Direction) -> u8 {
    match dir {
        // waiting for space: the peer must signal when it reads
        Direction::Tx => notify_bits::READ,
        Direction::Rx => notify_bits::WRITE,
    }
}

impl io::Read for Vchan {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match Vchan::read(self, buf) {
            Ok(0) => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            // end of stream
            Err(VchanError::Disconnected) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl io::Write for Vchan {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match Vchan::write(self, buf) {
            Ok(0) => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for Vchan {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl AsFd for Vchan {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.channel.as_fd()
    }
}

impl Source for Vchan {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.channel.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.channel.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.channel.deregister(registry)
    }
}
