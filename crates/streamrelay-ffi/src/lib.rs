//! streamrelay-ffi: C-ABI exports for the streamrelay producer side.
//!
//! A host process starts a relay with `relay_start`, pushes bytes with the
//! fire-and-forget `relay_offer` from any thread and tears it down with
//! `relay_stop`.

mod args;
mod error;
mod relay;
mod types;

use std::panic::AssertUnwindSafe;

pub use relay::{relay_offer, relay_start, relay_stats, relay_stop};
pub use types::{
    RelayHandle, RelayResult, RelayStatsC, RELAY_ERR_INTERNAL, RELAY_ERR_INVALID_ARGUMENT,
    RELAY_ERR_INVALID_CONFIG, RELAY_ERR_THREAD, RELAY_ERR_TRANSPORT, RELAY_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

#[no_mangle]
pub extern "C" fn relay_init() -> RelayResult {
    ffi_boundary(RelayResult::Internal, || {
        error::clear_error_state();
        RelayResult::Ok
    })
}

#[no_mangle]
pub extern "C" fn relay_cleanup() {
    ffi_boundary((), || {
        error::clear_error_state();
    });
}

#[no_mangle]
pub extern "C" fn relay_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
