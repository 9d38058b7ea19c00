//! Connection status and teardown

use crate::ringbuf::{live, Side};

use super::{ConnectionState, Vchan};

impl Vchan {
    /// Current state, combining the local view with the peer's liveness flag
    ///
    /// The first call resolves the peer endpoint; later calls only read
    /// shared memory.
    pub fn status(&mut self) -> ConnectionState {
        if self.state.is_terminal() {
            return self.state;
        }
        let Some(link) = self.link.as_ref() else {
            return self.state;
        };

        let peer = self.side.peer();
        let observed = match link.control().live(peer) {
            live::GONE => ConnectionState::Disconnected,
            live::LIVE => ConnectionState::Connected,
            live::PENDING if self.side == Side::Server => ConnectionState::Waiting,
            other => {
                tracing::warn!(
                    domain = self.peer_domain,
                    port = self.port,
                    value = other,
                    "peer {} published invalid liveness flag",
                    peer.name()
                );
                ConnectionState::Disconnected
            }
        };

        if !self.probed {
            self.probed = true;
            if let Err(e) = self.channel.attach_peer() {
                tracing::warn!(error = %e, "failed to resolve peer endpoint");
            }
        }

        let before = self.state;
        let mut next = observed;
        if self.channel.peer_gone() {
            next = ConnectionState::Disconnected;
        }
        let after = self.state.advance(next);

        if before == ConnectionState::Waiting && after == ConnectionState::Connected {
            self.channel.mark_established();
            tracing::info!(domain = self.peer_domain, port = self.port, "vchan client connected");
        } else if after == ConnectionState::Disconnected && before != after {
            tracing::info!(domain = self.peer_domain, port = self.port, "vchan peer disconnected");
        }
        after
    }

    /// Whether the channel is usable (connected, or still waiting for the peer)
    pub fn is_open(&mut self) -> bool {
        self.status() != ConnectionState::Disconnected
    }

    /// Tear the channel down
    ///
    /// Clears the local liveness flag and signals the peer, which observes
    /// the disconnect on its next status check. Dropping the handle does
    /// the same.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(link) = self.link.as_ref() {
            link.control().set_live(self.side, live::GONE);
            if let Err(e) = self.channel.notify() {
                tracing::warn!(error = %e, "failed to signal peer on close");
            }
        }
        if self.side == Side::Server {
            self.paths.unpublish();
        }

        self.state.advance(ConnectionState::Disconnected);
        tracing::info!(
            domain = self.peer_domain,
            port = self.port,
            side = self.side.name(),
            "vchan closed"
        );
    }
}

impl Drop for Vchan {
    fn drop(&mut self) {
        self.shutdown();
    }
}
