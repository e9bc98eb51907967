//! C-FFI layer for neofn, used by Go (cgo) and other FFI consumers.
//!
//! All calls delegate to `neofn-core`.
//!
//! # Memory Contract
//!
//! All functions that return `*mut c_char` allocate via `CString`.
//! The caller MUST free the returned string by calling `neofn_free_string()`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use neofn_core::{Context, ExecutionEngine, ExecutionResult, TracingSink};

/// Result from a neofn FFI call.
/// If `error` is null, the call succeeded and `result` contains the output.
/// If `error` is non-null, the call failed and `error` contains the message.
/// The caller MUST free both `result` and `error` with `neofn_free_string()`.
#[repr(C)]
pub struct NeofnResult {
    pub result: *mut c_char,
    pub error: *mut c_char,
}

/// Interior NULs cannot cross the C boundary
fn to_c_string(value: String) -> CString {
    CString::new(value.replace('\0', "\\0")).unwrap_or_default()
}

impl NeofnResult {
    fn ok(value: String) -> Self {
        NeofnResult {
            result: to_c_string(value).into_raw(),
            error: std::ptr::null_mut(),
        }
    }

    fn err(msg: String) -> Self {
        NeofnResult {
            result: std::ptr::null_mut(),
            error: to_c_string(msg).into_raw(),
        }
    }
}

/// Convert a C string pointer to a Rust &str.
/// Returns None if the pointer is null or not valid UTF-8.
unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Run a serialized execution request.
///
/// On success `result` holds the JSON execution report, including guest
/// failures (`"status": "failure"`). `error` is set only when the request
/// itself is malformed.
///
/// # Safety
/// `request_json` must be a valid null-terminated UTF-8 C string.
/// The caller must free the returned strings with `neofn_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn neofn_execute_json(request_json: *const c_char) -> NeofnResult {
    let request_json = match cstr_to_str(request_json) {
        Some(s) => s,
        None => return NeofnResult::err("null or invalid UTF-8 input".into()),
    };

    match neofn_core::try_execute_json(request_json) {
        Ok(report) => NeofnResult::ok(report),
        Err(e) => NeofnResult::err(e.to_string()),
    }
}

/// Run one guest function and return its result as JSON.
///
/// On failure `error` holds `<Kind>: <message>`.
///
/// # Safety
/// `source`, `entry_point` and `params_json` must be valid null-terminated
/// UTF-8 C strings. `context_json` may be null (empty context).
/// The caller must free the returned strings with `neofn_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn neofn_execute(
    source: *const c_char,
    entry_point: *const c_char,
    params_json: *const c_char,
    context_json: *const c_char,
) -> NeofnResult {
    let (source, entry_point, params_json) =
        match (cstr_to_str(source), cstr_to_str(entry_point), cstr_to_str(params_json)) {
            (Some(s), Some(e), Some(p)) => (s, e, p),
            _ => return NeofnResult::err("null or invalid UTF-8 input".into()),
        };

    let params: serde_json::Value = match serde_json::from_str(params_json) {
        Ok(params) => params,
        Err(e) => return NeofnResult::err(format!("params_json is not valid JSON: {}", e)),
    };

    let mut context = if context_json.is_null() {
        Context::default()
    } else {
        let parsed = match cstr_to_str(context_json) {
            Some(text) => Context::from_json(text),
            None => return NeofnResult::err("invalid UTF-8 context".into()),
        };
        match parsed {
            Ok(context) => context,
            Err(e) => return NeofnResult::err(e.to_string()),
        }
    };

    match ExecutionEngine::new().execute(source, entry_point, &params, &mut context, &TracingSink) {
        ExecutionResult::Success { result } => NeofnResult::ok(result.to_string()),
        ExecutionResult::Failure(failure) => NeofnResult::err(failure.to_string()),
    }
}

/// Free a string previously returned by a neofn FFI function.
///
/// # Safety
/// `ptr` must be a pointer previously returned by a neofn FFI function,
/// or null (in which case this is a no-op).
#[no_mangle]
pub unsafe extern "C" fn neofn_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
