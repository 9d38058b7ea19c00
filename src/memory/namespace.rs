//! (domain, port) namespace on the local filesystem
//!
//! A connection between a server in domain S and a client in domain C on
//! port P lives in `<root>/S/C/P/`. The server owns that directory: it
//! publishes the region there and binds its signal endpoint there. The
//! client binds its own endpoint next to it.

use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use crate::error::{Result, VchanError};

const RING_FILE: &str = "ring";
const RING_STAGING_FILE: &str = "ring.staging";
const SERVER_ENDPOINT: &str = "server.sock";
const CLIENT_ENDPOINT: &str = "client.sock";

/// Resolves connection names for one local domain
#[derive(Debug, Clone)]
pub struct Namespace {
    root: PathBuf,
    local_domain: u32,
}

impl Namespace {
    pub fn new(root: impl Into<PathBuf>, local_domain: u32) -> Self {
        Self {
            root: root.into(),
            local_domain,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_domain(&self) -> u32 {
        self.local_domain
    }

    /// Paths for serving `peer_domain` on `port`
    pub fn server_paths(&self, peer_domain: u32, port: i32) -> Result<ConnectionPaths> {
        ConnectionPaths::new(&self.root, self.local_domain, peer_domain, port)
    }

    /// Paths for connecting to a server in `peer_domain` on `port`
    pub fn client_paths(&self, peer_domain: u32, port: i32) -> Result<ConnectionPaths> {
        ConnectionPaths::new(&self.root, peer_domain, self.local_domain, port)
    }
}

/// Every filesystem name belonging to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPaths {
    pub dir: PathBuf,
    pub ring: PathBuf,
    pub ring_staging: PathBuf,
    pub server_endpoint: PathBuf,
    pub client_endpoint: PathBuf,
}

impl ConnectionPaths {
    fn new(root: &Path, server_domain: u32, client_domain: u32, port: i32) -> Result<Self> {
        if port < 0 {
            return Err(VchanError::invalid_parameter("port", "Port must not be negative"));
        }

        let dir = root
            .join(server_domain.to_string())
            .join(client_domain.to_string())
            .join(port.to_string());

        Ok(Self {
            ring: dir.join(RING_FILE),
            ring_staging: dir.join(RING_STAGING_FILE),
            server_endpoint: dir.join(SERVER_ENDPOINT),
            client_endpoint: dir.join(CLIENT_ENDPOINT),
            dir,
        })
    }

    /// Create the connection directory (and parents) if missing
    ///
    /// Directories get an execute bit wherever `permissions` grants read.
    pub fn ensure_dir(&self, permissions: u32) -> Result<()> {
        let mode = permissions | ((permissions & 0o444) >> 2);
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(&self.dir)
            .map_err(|e| VchanError::from_io(e, "Failed to create connection directory"))
    }

    /// Endpoint owned by `server` or by the client
    pub fn endpoint(&self, server: bool) -> &Path {
        if server {
            &self.server_endpoint
        } else {
            &self.client_endpoint
        }
    }

    /// Remove the published region name, leaving existing mappings intact
    pub fn unpublish(&self) {
        remove_if_present(&self.ring);
        remove_if_present(&self.ring_staging);
    }
}

pub(crate) fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to remove file"),
    }
}
