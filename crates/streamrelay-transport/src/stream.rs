use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A connected endpoint stream. Implements Read + Write.
///
/// The serve loop owns exactly one of these while a client is attached.
/// On Unix this wraps a Unix domain socket stream.
pub struct EndpointStream {
    inner: EndpointStreamInner,
}

enum EndpointStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for EndpointStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for EndpointStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(target_os = "linux")]
            EndpointStreamInner::Unix(stream) => send_without_sigpipe(stream, buf),
            #[cfg(all(unix, not(target_os = "linux")))]
            EndpointStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl EndpointStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        #[cfg(target_os = "macos")]
        suppress_sigpipe(&stream);
        Self {
            inner: EndpointStreamInner::Unix(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The clone refers to the same connection, so shutting it down from
    /// another thread aborts I/O blocked on this handle.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Shut down both directions of the connection.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(stream) => stream
                .shutdown(std::net::Shutdown::Both)
                .map_err(Into::into),
        }
    }

    /// Hint the kernel send buffer size for this connection (`SO_SNDBUF`).
    ///
    /// The kernel may clamp the value; callers treat this as best effort.
    #[cfg(unix)]
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            EndpointStreamInner::Unix(stream) => stream.as_raw_fd(),
        };
        let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

        // SAFETY: `value` lives for the duration of the call and its size is passed
        // alongside; `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                (&value as *const libc::c_int).cast::<libc::c_void>(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };

        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            EndpointStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

// Writing to a client that already hung up must surface as EPIPE, not kill
// a host process that never ignored SIGPIPE.
#[cfg(target_os = "linux")]
fn send_without_sigpipe(
    stream: &std::os::unix::net::UnixStream,
    buf: &[u8],
) -> std::io::Result<usize> {
    use std::os::fd::AsRawFd;

    // SAFETY: `buf` is readable for `buf.len()` bytes and `stream` owns an open descriptor.
    let rc = unsafe {
        libc::send(
            stream.as_raw_fd(),
            buf.as_ptr().cast::<libc::c_void>(),
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

#[cfg(target_os = "macos")]
fn suppress_sigpipe(stream: &std::os::unix::net::UnixStream) {
    use std::os::fd::AsRawFd;

    let on: libc::c_int = 1;
    // SAFETY: `on` outlives the call and its size is passed alongside.
    let _ = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            (&on as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
}

impl std::fmt::Debug for EndpointStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            EndpointStreamInner::Unix(_) => f
                .debug_struct("EndpointStream")
                .field("type", &"unix")
                .finish(),
        }
    }
}
