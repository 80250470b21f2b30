use streamrelay_server::{RelayConfig, StreamRelay};

use crate::args;
use crate::error;
use crate::types::{RelayHandle, RelayHandleInner, RelayResult, RelayStatsC};

fn with_relay<T>(handle: RelayHandle, on_error: T, f: impl FnOnce(&RelayHandleInner) -> T) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("relay handle cannot be null");
        return on_error;
    }

    let inner = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *const RelayHandleInner) }
    };

    f(inner)
}

/// Start a relay serving on `path` in a background thread.
///
/// `capacity` of 0 selects the default (10 MiB). Returns null on failure;
/// see `relay_last_error`.
///
/// # Safety
/// `path` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn relay_start(
    path: *const std::os::raw::c_char,
    capacity: usize,
) -> RelayHandle {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();

        let path = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { args::required_str_arg(path, "path") } {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            }
        };

        let mut config = RelayConfig::new(path);
        if capacity > 0 {
            config = config.with_capacity(capacity);
        }

        let started = StreamRelay::new(config).and_then(|relay| relay.spawn());
        match started {
            Ok(thread) => {
                let handle = RelayHandleInner { thread };
                Box::into_raw(Box::new(handle)) as RelayHandle
            }
            Err(err) => {
                let _ = error::map_relay_error(&err);
                std::ptr::null_mut()
            }
        }
    })
}

/// Queue `len` bytes from `data` for the connected (or next) client.
///
/// Never blocks on the client and reports nothing: data that does not fit
/// is dropped by the relay.
///
/// # Safety
/// `handle` must be a live handle from `relay_start`. If `len > 0`, `data`
/// must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn relay_offer(handle: RelayHandle, data: *const u8, len: usize) {
    crate::ffi_boundary((), || {
        with_relay(handle, (), |inner| {
            // SAFETY: Pointer/len validity is guaranteed by the caller.
            if let Some(payload) = unsafe { args::bytes_arg(data, len, "data") } {
                inner.thread.relay().offer(payload);
            }
        })
    })
}

/// Copy the relay counters into `out`.
///
/// # Safety
/// `handle` must be a live handle from `relay_start`; `out` must be a valid
/// writable pointer.
#[no_mangle]
pub unsafe extern "C" fn relay_stats(handle: RelayHandle, out: *mut RelayStatsC) -> RelayResult {
    crate::ffi_boundary(RelayResult::Internal, || {
        error::clear_error_state();

        if out.is_null() {
            return error::set_invalid_argument("out cannot be null");
        }

        with_relay(handle, RelayResult::InvalidArgument, |inner| {
            let stats = inner.thread.relay().stats();
            // SAFETY: Pointer validity is guaranteed by the caller.
            unsafe {
                *out = RelayStatsC::from(&stats);
            }
            RelayResult::Ok
        })
    })
}

/// Shut the relay down, wait for its thread and free the handle.
///
/// The handle is consumed even when an error is returned.
///
/// # Safety
/// `handle` must be null or a handle from `relay_start` not yet passed to
/// `relay_stop`.
#[no_mangle]
pub unsafe extern "C" fn relay_stop(handle: RelayHandle) -> RelayResult {
    crate::ffi_boundary(RelayResult::Internal, || {
        error::clear_error_state();

        if handle.is_null() {
            return error::set_invalid_argument("relay handle cannot be null");
        }

        let inner = {
            // SAFETY: Handle ownership is transferred back from the caller.
            unsafe { Box::from_raw(handle as *mut RelayHandleInner) }
        };

        match inner.thread.stop() {
            Ok(()) => RelayResult::Ok,
            Err(err) => error::map_relay_error(&err),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};
    use std::io::Read;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use streamrelay_server::RelayClient;

    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/srf-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("relay.sock")
    }

    fn last_error() -> String {
        let ptr = crate::relay_last_error();
        // SAFETY: relay_last_error returns a pointer to a thread-local CString.
        unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
    }

    #[test]
    fn start_offer_stats_stop() {
        let sock_path = make_sock_path("cycle");
        let c_path = CString::new(sock_path.to_str().expect("path should be utf-8"))
            .expect("path should not contain NUL");

        // SAFETY: c_path is a valid C string for the duration of the call.
        let handle = unsafe { relay_start(c_path.as_ptr(), 16) };
        assert!(!handle.is_null(), "start failed: {}", last_error());

        let payload = b"0123456789";
        // SAFETY: handle is live and payload is readable for its length.
        unsafe {
            relay_offer(handle, payload.as_ptr(), payload.len());
            relay_offer(handle, payload.as_ptr(), payload.len());
            relay_offer(handle, std::ptr::null(), 0);
        }

        let mut client = RelayClient::new(&sock_path)
            .with_retry_interval(Duration::from_millis(10))
            .connect_with_timeout(Duration::from_secs(3))
            .expect("client should connect");
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).expect("client should read");
        assert_eq!(&buf, payload);

        let mut stats = RelayStatsC::default();
        let start = Instant::now();
        loop {
            // SAFETY: handle is live and stats is writable.
            let rc = unsafe { relay_stats(handle, &mut stats) };
            assert_eq!(rc, RelayResult::Ok);
            if stats.delivered_bytes == 10 {
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "delivery stalled");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stats.capacity, 16);
        assert_eq!(stats.evicted_bytes, 10);
        assert_eq!(stats.connections, 1);

        // SAFETY: handle came from relay_start and is stopped once.
        let rc = unsafe { relay_stop(handle) };
        assert_eq!(rc, RelayResult::Ok);
        assert!(!sock_path.exists());

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn start_rejects_null_path() {
        // SAFETY: null is explicitly handled.
        let handle = unsafe { relay_start(std::ptr::null(), 0) };
        assert!(handle.is_null());
        assert!(last_error().contains("path cannot be null"));
    }

    #[test]
    fn null_handles_are_invalid_arguments() {
        let mut stats = RelayStatsC::default();
        // SAFETY: null handles are explicitly handled.
        unsafe {
            relay_offer(std::ptr::null_mut(), b"x".as_ptr(), 1);
            assert_eq!(
                relay_stats(std::ptr::null_mut(), &mut stats),
                RelayResult::InvalidArgument
            );
            assert_eq!(relay_stop(std::ptr::null_mut()), RelayResult::InvalidArgument);
        }
    }

    #[test]
    fn stats_rejects_null_out() {
        let sock_path = make_sock_path("nullout");
        let c_path = CString::new(sock_path.to_str().expect("path should be utf-8"))
            .expect("path should not contain NUL");

        // SAFETY: c_path is a valid C string.
        let handle = unsafe { relay_start(c_path.as_ptr(), 0) };
        assert!(!handle.is_null(), "start failed: {}", last_error());

        // SAFETY: handle is live; null out is explicitly handled.
        unsafe {
            assert_eq!(
                relay_stats(handle, std::ptr::null_mut()),
                RelayResult::InvalidArgument
            );
            assert_eq!(relay_stop(handle), RelayResult::Ok);
        }

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
