use std::fmt;
use std::io;

use streamrelay_server::RelayError;
use streamrelay_transport::TransportError;

// Process exit codes: 0 success, 1 generic failure, 64 usage (sysexits),
// 124 timeout (as timeout(1)), 125 internal; the rest name a failure class.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_exit_code(&err), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(transport_exit_code(&err), format!("{context}: {err}"))
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    let code = match (&err, err.transport()) {
        (_, Some(source)) => transport_exit_code(source),
        (RelayError::InvalidConfig(_), None) => USAGE,
        (RelayError::ConfigLoad { source, .. }, None) => io_exit_code(source),
        (RelayError::Json(_), None) => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn io_exit_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    }
}

fn transport_exit_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_exit_code(source),
        TransportError::PathTooLong { .. } => USAGE,
        TransportError::InUse { .. } => TRANSPORT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn endpoint_in_use_maps_to_transport_error() {
        let err = RelayError::EndpointCreation(TransportError::InUse {
            path: PathBuf::from("/tmp/a.sock"),
            lock_path: PathBuf::from("/tmp/a.sock.lock"),
        });
        assert_eq!(relay_error("serve failed", err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn invalid_config_maps_to_usage() {
        let err = RelayError::InvalidConfig("capacity must be greater than zero".to_string());
        let cli = relay_error("invalid config", err);
        assert_eq!(cli.code, USAGE);
        assert!(cli.message.contains("capacity"));
    }

    #[test]
    fn permission_denied_bind_maps_to_permission_code() {
        let err = RelayError::EndpointCreation(TransportError::Bind {
            path: PathBuf::from("/root/x.sock"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(relay_error("serve failed", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn exhausted_retries_keep_transport_code_and_attempts() {
        let err = RelayError::RetriesExhausted {
            attempts: 4,
            source: TransportError::Accept(io::Error::from(io::ErrorKind::TimedOut)),
        };
        let cli = relay_error("serve failed", err);
        assert_eq!(cli.code, TIMEOUT);
        assert!(cli.message.contains("after 4 attempts"), "{}", cli.message);
    }

    #[test]
    fn config_load_uses_io_code() {
        let err = RelayError::ConfigLoad {
            path: PathBuf::from("/etc/relay.json"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(relay_error("config load failed", err).code, PERMISSION_DENIED);
    }
}
