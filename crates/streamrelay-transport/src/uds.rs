use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::EndpointStream;

/// Unix domain socket endpoint.
///
/// Binds a filesystem-path socket and accepts clients one at a time. The
/// endpoint name is claimed through an exclusive `flock` on `<path>.lock`,
/// held for as long as this value lives, so a second relay process fails
/// fast with [`TransportError::InUse`] instead of stealing the socket path.
pub struct UnixEndpoint {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    // Dropping the file releases the lock.
    _lock: File,
}

impl UnixEndpoint {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(target_os = "macos")]
    const MAX_PATH_LEN: usize = 104;
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    const MAX_PATH_LEN: usize = 104;

    /// Claim the endpoint name and listen on `path`.
    ///
    /// A stale socket left behind by a dead process is removed first; any
    /// other kind of file at `path` is left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Claim the endpoint name and listen on `path` with explicit mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let lock = acquire_lock(&path)?;

        // We hold the lock, so an existing socket can only be stale.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
            } else {
                return Err(TransportError::Bind {
                    path: path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TransportError::Bind {
                path: path.clone(),
                source: e,
            }
        })?;
        let created_metadata =
            std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "endpoint listening");

        Ok(Self {
            listener,
            path,
            created_inode,
            _lock: lock,
        })
    }

    /// Accept the next client (blocking).
    pub fn accept(&self) -> Result<EndpointStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(EndpointStream::from_unix(stream))
    }

    /// Connect to a listening endpoint (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<EndpointStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to endpoint");
        Ok(EndpointStream::from_unix(stream))
    }

    /// The path this endpoint is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock file guarding the endpoint name.
    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }
}

/// Lock file path used to claim `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = lock_path_for(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .mode(0o600)
        .open(&lock_path)
        .map_err(|e| TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;

    // SAFETY: `file` is an open descriptor owned by this function for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(TransportError::InUse {
                path: path.to_path_buf(),
                lock_path,
            });
        }
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: err,
        });
    }

    Ok(file)
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for UnixEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixEndpoint")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn make_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/srt-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn test_bind_accept_connect() {
        let dir = make_dir("bind");
        let sock_path = dir.join("relay.sock");

        let endpoint = UnixEndpoint::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixEndpoint::connect(&path_clone).unwrap();
            let mut buf = [0u8; 5];
            client.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
        });

        let mut server = endpoint.accept().unwrap();
        server.write_all(b"hello").unwrap();
        server.flush().unwrap();

        handle.join().unwrap();

        drop(endpoint);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixEndpoint::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn test_second_bind_reports_in_use() {
        let dir = make_dir("inuse");
        let sock_path = dir.join("relay.sock");

        let first = UnixEndpoint::bind(&sock_path).expect("first bind should succeed");
        assert!(first.lock_path().exists(), "lock file should be created");
        match UnixEndpoint::bind(&sock_path) {
            Err(TransportError::InUse { lock_path, .. }) => assert_eq!(lock_path, first.lock_path()),
            other => panic!("expected in-use error, got {other:?}"),
        }
        assert!(sock_path.exists(), "live socket must not be removed");

        drop(first);
        let third = UnixEndpoint::bind(&sock_path);
        assert!(third.is_ok(), "name should be reusable after release");

        drop(third);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_removes_stale_socket() {
        let dir = make_dir("stale");
        let sock_path = dir.join("relay.sock");

        // A bare listener leaves a socket file behind without holding the lock.
        let stale = UnixListener::bind(&sock_path).expect("raw bind should succeed");
        drop(stale);
        assert!(sock_path.exists());

        let endpoint = UnixEndpoint::bind(&sock_path).expect("stale socket should be replaced");
        assert_eq!(endpoint.path(), sock_path.as_path());

        drop(endpoint);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_default_permissions_hardened() {
        let dir = make_dir("perms");
        let sock_path = dir.join("perm.sock");

        let endpoint = UnixEndpoint::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(endpoint);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_rejects_existing_non_socket_file() {
        let dir = make_dir("file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixEndpoint::bind(&sock_path);
        match result {
            Err(err @ TransportError::Bind { .. }) => assert!(err.is_configuration_error()),
            other => panic!("expected bind error, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_drop_does_not_remove_replaced_path() {
        let dir = make_dir("drop");
        let sock_path = dir.join("drop.sock");

        let endpoint = UnixEndpoint::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(endpoint);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/relay.sock")),
            PathBuf::from("/tmp/relay.sock.lock")
        );
    }
}
