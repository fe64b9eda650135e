//! FFI bindings for attention-flux
//!
//! C-compatible entry points for hosts that embed the state machine in a
//! page runtime. The host owns timers and transport; it feeds signals in and
//! gets emissions back as JSON arrays. Strings returned here are allocated
//! by the library and must be freed with `attn_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::DEFAULT_NAV_WINDOW_MS;
use crate::machine::{AttentionMachine, FocusSample, TrackerConfig};
use crate::navigation::NavigationContext;
use crate::replay::{replay, ReplayScript};
use crate::types::{EpochMillis, TrackerEvent};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free with `attn_free_string`
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn parse_event(name: &str) -> Result<TrackerEvent, String> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|_| format!("Unknown event: {}", name))
}

// ============================================================================
// Machine API
// ============================================================================

/// Opaque handle to one page's machine and its navigation flag
pub struct AttnMachineHandle {
    machine: AttentionMachine,
    nav: NavigationContext,
}

/// Create a machine for a page load.
///
/// `config_json` is a tracker configuration object, e.g.
/// `{"bucket":"reading_task1","context":{"passage_id":"bees","page_name":"p1"},"warn_threshold_ms":5000}`.
/// A non-positive `nav_window_ms` selects the default window.
///
/// # Safety
/// - `config_json` and `session_id` must be valid null-terminated C strings.
/// - Must be freed with `attn_machine_free`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_machine_new(
    config_json: *const c_char,
    session_id: *const c_char,
    focused: i32,
    now_ms: i64,
    nav_window_ms: i64,
) -> *mut AttnMachineHandle {
    clear_last_error();

    let config_str = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        }
    };

    let session = match cstr_to_string(session_id) {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            set_last_error("Missing session id");
            return ptr::null_mut();
        }
    };

    let config: TrackerConfig = match serde_json::from_str(&config_str) {
        Ok(c) => c,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let window = if nav_window_ms <= 0 {
        DEFAULT_NAV_WINDOW_MS
    } else {
        nav_window_ms as u64
    };

    let sample = if focused != 0 {
        FocusSample::focused()
    } else {
        FocusSample::blurred()
    };

    let handle = Box::new(AttnMachineHandle {
        machine: AttentionMachine::new(session, config, sample, now_ms as EpochMillis),
        nav: NavigationContext::new(window),
    });
    Box::into_raw(handle)
}

/// Free a machine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `attn_machine_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn attn_machine_free(handle: *mut AttnMachineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Feed one event and return the emissions as a JSON array.
///
/// `event` is one of `focus_gained`, `focus_lost` or `teardown`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `attn_machine_new`.
/// - `event` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_machine_step(
    handle: *mut AttnMachineHandle,
    event: *const c_char,
    now_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null machine pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;

    let event = match cstr_to_string(event).map(|name| parse_event(&name)) {
        Some(Ok(event)) => event,
        Some(Err(msg)) => {
            set_last_error(&msg);
            return ptr::null_mut();
        }
        None => {
            set_last_error("Invalid event string pointer");
            return ptr::null_mut();
        }
    };

    let nav_marked = handle.nav.is_marked(now_ms);
    let emissions = handle.machine.step(event, now_ms, nav_marked);

    match serde_json::to_string(&emissions) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Mark an in-app navigation at `now_ms`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `attn_machine_new`.
/// - Returns 0 on success, -1 on a NULL handle.
#[no_mangle]
pub unsafe extern "C" fn attn_nav_mark(handle: *mut AttnMachineHandle, now_ms: i64) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null machine pointer");
        return -1;
    }

    (*handle).nav.mark(now_ms);
    0
}

/// Current phase as JSON, e.g. `{"phase":"active","since":1700000000000}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `attn_machine_new`.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
#[no_mangle]
pub unsafe extern "C" fn attn_machine_phase(handle: *const AttnMachineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null machine pointer");
        return ptr::null_mut();
    }

    match serde_json::to_string(&(*handle).machine.phase()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay a script and return the outcome JSON.
///
/// # Safety
/// - `script_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `attn_free_string`.
/// - Returns NULL on error; call `attn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn attn_replay(script_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(script_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let outcome = ReplayScript::from_json(&json_str).and_then(|script| replay(&script));
    match outcome.and_then(|o| serde_json::to_string(&o).map_err(Into::into)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an `attn_*` function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn attn_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next `attn_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn attn_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn attn_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
