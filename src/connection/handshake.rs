//! Server publication and client binding
//!
//! The server claims its endpoint first, then builds the region under a
//! staging name and renames it into place, so a client that can open
//! `ring` always sees a fully initialized control block. The client side
//! is a single step ([`Vchan::finish`]) that is either driven by the
//! caller's event loop or looped internally by [`Vchan::client`].

use std::{io::ErrorKind, os::fd::RawFd, time::Duration};

use crate::{
    error::{Result, VchanError},
    memory::{ConnectionPaths, RegionConfig, SharedMemoryRegion},
    ringbuf::{live, ControlBlock, RingLayout, Side},
    sync::EventChannel,
};

use super::{ConnectProgress, ConnectionState, Link, Vchan, VchanConfig};

impl Vchan {
    /// Publish a channel for a client in `domain` on `port`
    ///
    /// `read_min` sizes the ring this end reads (client to server) and
    /// `write_min` the ring it writes; both are rounded up to a power of
    /// two of at least 1 KiB. The handle starts out `Waiting`.
    pub fn server(
        config: &VchanConfig,
        domain: u32,
        port: i32,
        read_min: usize,
        write_min: usize,
    ) -> Result<Self> {
        config.validate()?;
        let layout = RingLayout::new(
            RingLayout::order_for(read_min)?,
            RingLayout::order_for(write_min)?,
        )?;

        let paths = config.namespace().server_paths(domain, port)?;
        paths.ensure_dir(config.permissions)?;

        let channel = claim_endpoint(&paths, Side::Server, domain, port)?;
        // Owning the endpoint means any region still published is stale
        paths.unpublish();
        let region = publish_region(&paths, layout, config.permissions)?;
        let link = Link::new(region, layout, Side::Server)?;

        let mut vchan = Self::assemble(Side::Server, domain, port, config, paths, Some(link), channel);
        // A client that started connecting before us is parked on its endpoint
        vchan.channel.notify()?;

        tracing::info!(
            domain,
            port,
            read_size = layout.left_capacity(),
            write_size = layout.right_capacity(),
            "vchan server waiting for client"
        );
        Ok(vchan)
    }

    /// Connect to the server in `domain` on `port`, blocking until bound
    ///
    /// Fails with [`VchanError::NoPeer`] when no server shows up within
    /// the configured retry budget.
    pub fn client(config: &VchanConfig, domain: u32, port: i32) -> Result<Self> {
        let (mut vchan, _) = Self::client_async(config, domain, port)?;
        vchan.finish(true)?;
        Ok(vchan)
    }

    /// Begin connecting without blocking
    ///
    /// Returns a `Waiting` handle and the descriptor to watch. Call
    /// [`finish`](Self::finish) each time it becomes readable until it
    /// reports [`ConnectProgress::Connected`].
    pub fn client_async(config: &VchanConfig, domain: u32, port: i32) -> Result<(Self, RawFd)> {
        config.validate()?;
        let paths = config.namespace().client_paths(domain, port)?;
        paths.ensure_dir(config.permissions)?;

        let channel = claim_endpoint(&paths, Side::Client, domain, port)?;
        let fd = channel.fd();

        tracing::debug!(domain, port, "vchan client waiting for server");
        Ok((
            Self::assemble(Side::Client, domain, port, config, paths, None, channel),
            fd,
        ))
    }

    /// Advance the client handshake
    ///
    /// `blocking` becomes the transfer mode of the handle. When it is set
    /// this call also keeps retrying until the server appears, giving up
    /// with [`VchanError::NoPeer`] once the retry budget is spent. Any
    /// error is fatal; the handle must be dropped.
    pub fn finish(&mut self, blocking: bool) -> Result<ConnectProgress> {
        // nothing leaves Disconnected
        if self.state.is_terminal() {
            return Err(VchanError::Disconnected);
        }
        self.blocking = blocking;

        if self.link.is_some() {
            return Ok(ConnectProgress::Connected);
        }

        let attempts = if blocking { self.config.connect_retries } else { 1 };
        for attempt in 0..attempts {
            if attempt > 0 {
                self.channel
                    .poll_fired(Some(self.config.connect_retry_interval()))?;
            }
            // Consume the signal that made us readable, if any
            if self.channel.poll_fired(Some(Duration::ZERO))? {
                self.channel.wait()?;
            }

            match self.try_bind() {
                Ok(ConnectProgress::Connected) => return Ok(ConnectProgress::Connected),
                Ok(ConnectProgress::Pending) => {}
                Err(e) => {
                    self.state.advance(ConnectionState::Disconnected);
                    return Err(e);
                }
            }
        }

        if blocking {
            self.state.advance(ConnectionState::Disconnected);
            tracing::debug!(domain = self.peer_domain, port = self.port, "no server appeared");
            return Err(VchanError::no_peer(self.peer_domain, self.port));
        }
        Ok(ConnectProgress::Pending)
    }

    /// One attempt at mapping the published region
    fn try_bind(&mut self) -> Result<ConnectProgress> {
        let region = match SharedMemoryRegion::open(&self.paths.ring, RingLayout::max_total_size()) {
            Ok(region) => region,
            Err(e) if e.is_not_found() => return Ok(ConnectProgress::Pending),
            Err(e) => return Err(e),
        };

        let control = region
            .ptr_at(0, std::mem::size_of::<ControlBlock>())?
            .cast::<ControlBlock>();
        // SAFETY: in bounds of the live mapping; only atomics are accessed
        let block = unsafe { control.as_ref() };

        let layout = block.validate()?;
        if region.size() < layout.total_size() {
            return Err(VchanError::protocol(format!(
                "region of {} bytes too small for layout needing {}",
                region.size(),
                layout.total_size()
            )));
        }

        match block.live(Side::Server) {
            live::LIVE => {}
            live::GONE => return Err(VchanError::Disconnected),
            other => {
                tracing::warn!(value = other, "server published invalid liveness flag");
                return Err(VchanError::protocol(format!(
                    "server liveness flag {}",
                    other
                )));
            }
        }

        // A region without a live server endpoint is left over from a dead one
        if !self.channel.attach_peer()? {
            tracing::debug!(path = %self.paths.ring.display(), "ignoring region without live server");
            return Ok(ConnectProgress::Pending);
        }

        if block.live(Side::Client) != live::PENDING {
            return Err(VchanError::protocol("server already has a client"));
        }

        let link = Link::new(region, layout, Side::Client)?;
        link.control().set_live(Side::Client, live::LIVE);
        self.link = Some(link);
        self.state.advance(ConnectionState::Connected);
        self.probed = true;
        self.channel.mark_established();
        self.channel.notify()?;

        tracing::info!(
            domain = self.peer_domain,
            port = self.port,
            read_size = layout.right_capacity(),
            write_size = layout.left_capacity(),
            "vchan client connected"
        );
        Ok(ConnectProgress::Connected)
    }
}

fn claim_endpoint(paths: &ConnectionPaths, side: Side, domain: u32, port: i32) -> Result<EventChannel> {
    let server = side == Side::Server;
    EventChannel::claim(paths.endpoint(server), paths.endpoint(!server)).map_err(|e| {
        if e.kind() == ErrorKind::AddrInUse {
            VchanError::port_in_use(domain, port)
        } else {
            VchanError::from_io(e, "Failed to bind notification endpoint")
        }
    })
}

/// Build the region under the staging name, then publish it atomically
fn publish_region(
    paths: &ConnectionPaths,
    layout: RingLayout,
    permissions: u32,
) -> Result<SharedMemoryRegion> {
    let config = RegionConfig::new(&paths.ring_staging, layout.total_size())
        .with_permissions(permissions);
    let region = SharedMemoryRegion::create(&config)?;

    let control = region
        .ptr_at(0, std::mem::size_of::<ControlBlock>())?
        .cast::<ControlBlock>();
    // SAFETY: freshly created zeroed mapping, nobody else has it yet
    unsafe { control.as_ref() }.initialize(layout);

    if let Err(e) = std::fs::rename(&paths.ring_staging, &paths.ring) {
        paths.unpublish();
        return Err(VchanError::from_io(e, "Failed to publish region"));
    }
    Ok(region)
}
