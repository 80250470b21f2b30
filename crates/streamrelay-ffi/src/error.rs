use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use streamrelay_server::RelayError;

use crate::types::RelayResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = message.into();
    let sanitized = message.replace('\0', "?");
    LAST_ERROR.with(|state| {
        // Interior NULs were replaced above.
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> RelayResult {
    set_error_message(message);
    RelayResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_relay_error(err: &RelayError) -> RelayResult {
    set_error_message(err.to_string());
    match err {
        RelayError::EndpointCreation(_)
        | RelayError::Accept(_)
        | RelayError::RetriesExhausted { .. } => RelayResult::TransportError,
        RelayError::InvalidConfig(_) | RelayError::ConfigLoad { .. } | RelayError::Json(_) => {
            RelayResult::InvalidConfig
        }
        RelayError::Thread(_) => RelayResult::ThreadError,
        RelayError::AlreadyServing => RelayResult::Internal,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
