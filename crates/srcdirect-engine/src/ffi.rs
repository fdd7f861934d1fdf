//! C-ABI handle lifecycle
//!
//! Engine handles cross the boundary as `Box<SrcState>` raw pointers. The
//! host owns the pointer between `src_new` and `src_delete`.

use std::os::raw::{c_char, c_double, c_int};

use srcdirect_types::{is_valid_ratio, strerror_nul, SrcError, SRC_OK};

use crate::state::SrcState;

/// Create an engine handle.
///
/// Returns null on failure and stores the status in `error` when it is
/// not null.
///
/// # Safety
///
/// `error` must be null or point to a writable `int`.
#[no_mangle]
pub unsafe extern "C" fn src_new(
    converter_type: c_int,
    channels: c_int,
    error: *mut c_int,
) -> *mut SrcState {
    let (state, status) = match SrcState::from_code(converter_type, channels) {
        Ok(state) => (Box::into_raw(Box::new(state)), SRC_OK),
        Err(e) => {
            tracing::warn!(
                "src_new(converter={}, channels={}) failed: {}",
                converter_type,
                channels,
                e
            );
            (std::ptr::null_mut(), e.code())
        }
    };

    if let Some(error) = error.as_mut() {
        *error = status;
    }
    state
}

/// Destroy an engine handle. Always returns null.
///
/// # Safety
///
/// `state` must be null or a live handle from [`src_new`]; it is invalid
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn src_delete(state: *mut SrcState) -> *mut SrcState {
    if !state.is_null() {
        drop(Box::from_raw(state));
    }
    std::ptr::null_mut()
}

/// Drop buffered input, pending output and filter history.
///
/// # Safety
///
/// `state` must be null or a live handle from [`src_new`].
#[no_mangle]
pub unsafe extern "C" fn src_reset(state: *mut SrcState) -> c_int {
    match state.as_mut() {
        Some(state) => {
            state.reset();
            SRC_OK
        }
        None => SrcError::BadState.code(),
    }
}

/// Set the ratio for subsequent calls.
///
/// # Safety
///
/// `state` must be null or a live handle from [`src_new`].
#[no_mangle]
pub unsafe extern "C" fn src_set_ratio(state: *mut SrcState, new_ratio: c_double) -> c_int {
    match state.as_mut() {
        Some(state) => match state.set_ratio(new_ratio) {
            Ok(()) => SRC_OK,
            Err(e) => e.code(),
        },
        None => SrcError::BadState.code(),
    }
}

/// Channel count of a handle, or the negated `BadState` code for null.
///
/// # Safety
///
/// `state` must be null or a live handle from [`src_new`].
#[no_mangle]
pub unsafe extern "C" fn src_get_channels(state: *const SrcState) -> c_int {
    match state.as_ref() {
        Some(state) => state.channels() as c_int,
        None => -SrcError::BadState.code(),
    }
}

/// 1 if `ratio` is accepted by the engine, 0 otherwise
#[no_mangle]
pub extern "C" fn src_is_valid_ratio(ratio: c_double) -> c_int {
    is_valid_ratio(ratio) as c_int
}

/// Static, NUL-terminated description of a status code
#[no_mangle]
pub extern "C" fn src_strerror(error: c_int) -> *const c_char {
    strerror_nul(error).as_ptr() as *const c_char
}
