//! Error types and handling for vchan

/// Result type alias for vchan operations
pub type Result<T> = std::result::Result<T, VchanError>;

/// Error types for channel setup and transfer
#[derive(Debug, thiserror::Error)]
pub enum VchanError {
    /// I/O related errors (namespace files, sockets, mmap)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Memory mapping failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A live endpoint already owns this (domain, port)
    #[error("Port in use: domain {domain}, port {port}")]
    PortInUse { domain: u32, port: i32 },

    /// No server published the requested (domain, port)
    #[error("No peer: domain {domain}, port {port}")]
    NoPeer { domain: u32, port: i32 },

    /// The peer violated the shared-memory protocol
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// The connection is gone
    #[error("Disconnected")]
    Disconnected,

    /// Notification endpoint failure
    #[error("Notification error: {message}")]
    Notification { message: String },
}

impl VchanError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a port-in-use error
    pub fn port_in_use(domain: u32, port: i32) -> Self {
        Self::PortInUse { domain, port }
    }

    /// Create a no-peer error
    pub fn no_peer(domain: u32, port: i32) -> Self {
        Self::NoPeer { domain, port }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a notification error
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Whether this error leaves the connection permanently closed
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Protocol { .. })
    }

    /// Whether this error is a missing file or endpoint
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Io { source: Some(source), .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl From<std::io::Error> for VchanError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<nix::errno::Errno> for VchanError {
    fn from(err: nix::errno::Errno) -> Self {
        Self::from_io(std::io::Error::from(err), "System call failed")
    }
}

impl From<VchanError> for std::io::Error {
    fn from(err: VchanError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            VchanError::Disconnected | VchanError::Protocol { .. } => ErrorKind::BrokenPipe,
            VchanError::InvalidParameter { .. } => ErrorKind::InvalidInput,
            VchanError::PortInUse { .. } => ErrorKind::AddrInUse,
            VchanError::NoPeer { .. } => ErrorKind::NotFound,
            VchanError::Io { source: Some(source), .. } => source.kind(),
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
