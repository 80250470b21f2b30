use std::path::PathBuf;

/// Errors that can occur in endpoint transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the endpoint at the specified path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the endpoint stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Another process holds the endpoint name.
    #[error("endpoint {path} is in use by another process (lock {lock_path})")]
    InUse { path: PathBuf, lock_path: PathBuf },
}

impl TransportError {
    /// Whether the error comes from how the endpoint is configured rather
    /// than from a transient condition.
    ///
    /// Retrying these never helps: the path is unusable until an operator
    /// changes something.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            TransportError::PathTooLong { .. } | TransportError::InUse { .. } => true,
            TransportError::Bind { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::AlreadyExists
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_use_is_configuration_error() {
        let err = TransportError::InUse {
            path: PathBuf::from("/tmp/relay.sock"),
            lock_path: PathBuf::from("/tmp/relay.sock.lock"),
        };
        assert!(err.is_configuration_error());
    }

    #[test]
    fn accept_failure_is_transient() {
        let err = TransportError::Accept(std::io::Error::other("emfile"));
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn bind_on_foreign_file_is_configuration_error() {
        let err = TransportError::Bind {
            path: PathBuf::from("/tmp/relay.sock"),
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "not a socket"),
        };
        assert!(err.is_configuration_error());
    }
}
