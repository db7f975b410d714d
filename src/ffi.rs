//! FFI bindings for Healthtrack
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. Requests and results are NUL-terminated UTF-8 JSON strings; every
//! returned string is allocated here and must be released with `ht_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::pipeline::ReportEngine;

// Thread-local storage for the last error message
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

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Read a required string argument, recording an error when it is unusable
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {name} string pointer"));
    }
    value
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn result_to_cstr<E: std::fmt::Display>(result: Result<String, E>) -> *mut c_char {
    match result {
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

/// Generate a report with default configuration.
///
/// `request_json` holds `start`, `end` (`YYYY-MM-DD`), `readings`
/// (health.reading.v1 rows) and optionally `subject_id`, `adherence` and
/// `metrics`.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ht_free_string`.
/// - Returns NULL on error; call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_generate_report(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(request) = required_arg(request_json, "request") else {
        return ptr::null_mut();
    };
    result_to_cstr(ReportEngine::new().generate_report_json(&request))
}

/// Build the series of one metric with default configuration.
///
/// `request_json` holds `metric_type`, `start`, `end` and `readings`.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ht_free_string`.
/// - Returns NULL on error; call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_build_series(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(request) = required_arg(request_json, "request") else {
        return ptr::null_mut();
    };
    result_to_cstr(ReportEngine::new().build_series_json(&request))
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a ReportEngine
pub struct ReportEngineHandle {
    engine: ReportEngine,
}

/// Create an engine from a configuration document, or defaults when NULL.
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `ht_engine_free`.
/// - Returns NULL on error; call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_engine_new(config_json: *const c_char) -> *mut ReportEngineHandle {
    clear_last_error();

    let engine = if config_json.is_null() {
        ReportEngine::new()
    } else {
        let Some(json) = required_arg(config_json, "config") else {
            return ptr::null_mut();
        };
        match EngineConfig::from_json(&json).and_then(ReportEngine::with_config) {
            Ok(engine) => engine,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(ReportEngineHandle { engine }))
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ht_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ht_engine_free(engine: *mut ReportEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Generate a report with an engine's configuration.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ht_engine_new`.
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ht_free_string`.
/// - Returns NULL on error; call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_engine_generate_report(
    engine: *const ReportEngineHandle,
    request_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(request) = required_arg(request_json, "request") else {
        return ptr::null_mut();
    };
    result_to_cstr(handle.engine.generate_report_json(&request))
}

/// Replace an engine's reference table.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ht_engine_new`.
/// - `references_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error; the engine is unchanged on error.
/// - On error, call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_engine_load_references(
    engine: *mut ReportEngineHandle,
    references_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(json) = required_arg(references_json, "references") else {
        return -1;
    };
    match handle.engine.load_references(&json) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Save an engine's reference table to JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ht_engine_new`.
/// - Returns a newly allocated string that must be freed with `ht_free_string`.
/// - Returns NULL on error; call `ht_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ht_engine_save_references(
    engine: *const ReportEngineHandle,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;
    result_to_cstr(handle.engine.save_references())
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Healthtrack functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Healthtrack function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ht_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Healthtrack call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ht_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ht_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CString {
        CString::new(
            r#"{
            "subject_id": "alice",
            "start": "2024-03-01",
            "end": "2024-03-07",
            "readings": [
                {"metric_type": "glucose", "value": 95.0, "taken_at": "2024-03-01T08:00:00Z", "source_id": "g-1"},
                {"metric_type": "glucose", "value": 210.0, "taken_at": "2024-03-03T08:00:00Z", "source_id": "g-2"},
                {"metric_type": "weight", "value": 70.0, "taken_at": "2024-03-01T07:00:00Z", "source_id": "w-1"}
            ]
        }"#,
        )
        .unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let value = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        ht_free_string(ptr);
        value
    }

    #[test]
    fn test_ffi_generate_report() {
        let request = sample_request();

        unsafe {
            let json = take_string(ht_generate_report(request.as_ptr()));
            let report: serde_json::Value = serde_json::from_str(&json).unwrap();

            assert_eq!(report["subject_id"], "alice");
            assert_eq!(report["metrics"]["total_readings"], 3);
            assert_eq!(report["metrics"]["status_counts"]["glucose"]["critical"], 1);
        }
    }

    #[test]
    fn test_ffi_build_series() {
        let request = CString::new(
            r#"{"metric_type": "weight", "start": "2024-03-01", "end": "2024-03-03", "readings": [
                {"metric_type": "weight", "value": 70.0, "taken_at": "2024-03-01T07:00:00Z", "source_id": "w-1"},
                {"metric_type": "weight", "value": 72.0, "taken_at": "2024-03-03T07:00:00Z", "source_id": "w-2"}
            ]}"#,
        )
        .unwrap();

        unsafe {
            let json = take_string(ht_build_series(request.as_ptr()));
            let series: serde_json::Value = serde_json::from_str(&json).unwrap();

            assert_eq!(series["granularity"], "day");
            assert_eq!(series["buckets"][1]["fill"], "interpolated");
            assert_eq!(series["buckets"][1]["aggregate"]["mean"], 71.0);
        }
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let engine = ht_engine_new(ptr::null());
            assert!(!engine.is_null());

            let saved = ht_engine_save_references(engine);
            assert!(!saved.is_null());

            let config =
                CString::new(r#"{"thresholds": {"regimen_adherence_floor": 0.5}}"#).unwrap();
            let configured = ht_engine_new(config.as_ptr());
            assert!(!configured.is_null());
            assert_eq!(ht_engine_load_references(configured, saved), 0);
            ht_free_string(saved);

            let request = sample_request();
            let json = take_string(ht_engine_generate_report(configured, request.as_ptr()));
            assert!(json.contains("\"subject_id\":\"alice\""));

            ht_engine_free(engine);
            ht_engine_free(configured);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let result = ht_generate_report(invalid.as_ptr());
            assert!(result.is_null());

            let error = ht_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.starts_with("Invalid JSON"));

            let engine = ht_engine_new(ptr::null());
            let bad_table =
                CString::new(r#"{"glucose": {"default_sub_type": "x", "sub_types": {}}}"#)
                    .unwrap();
            assert_eq!(ht_engine_load_references(engine, bad_table.as_ptr()), -1);
            assert!(!ht_last_error().is_null());
            ht_engine_free(engine);

            assert!(ht_generate_report(ptr::null()).is_null());
            let error_str = CStr::from_ptr(ht_last_error()).to_str().unwrap();
            assert_eq!(error_str, "Invalid request string pointer");
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = ht_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, crate::ENGINE_VERSION);
        }
    }
}
