//! Mio integration for notification endpoints
//!
//! Lets a caller multiplex many channels on one `mio::Poll`. Readiness
//! only says a signal is pending; the owner still has to acknowledge it
//! with `wait` before polling again.

use std::{io, time::Duration};

use mio::{
    event::Source, unix::SourceFd, Events, Interest, Poll, Registry, Token,
};

use super::notify::EventChannel;

impl Source for EventChannel {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        SourceFd(&self.fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.fd()).deregister(registry)
    }
}

/// Waits for signals on a set of registered channels
pub struct ChannelWatcher {
    poll: Poll,
    events: Events,
}

impl ChannelWatcher {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(16)
    }

    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
        })
    }

    /// Watch `source` for pending signals under `token`
    pub fn register<S: Source + ?Sized>(&self, source: &mut S, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, token, Interest::READABLE)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Tokens of channels with a pending signal
    ///
    /// Returns an empty list on timeout. Interrupted polls count as a
    /// timeout so callers can re-check their own state.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Token>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut ready: Vec<Token> = self
            .events
            .iter()
            .filter(|event| event.is_readable() || event.is_error())
            .map(|event| event.token())
            .collect();
        ready.dedup();
        Ok(ready)
    }
}
