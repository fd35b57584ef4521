//! C ABI for hosting the frpc client inside a mobile app.
//!
//! The host calls `StartFrp` with the path of the client config, polls
//! `FrpLogs` for output at whatever cadence suits its UI and calls `StopFrp`
//! when done. Every string returned here must be released with
//! `FrpFreeString`.
#![allow(non_snake_case)]

use std::ffi::{c_char, c_int};

use frpc_mobile_core::full_version;

pub mod runtime;
pub mod service;
pub mod strings;

use service::service;
use strings::{free_c_string, from_c_str, into_c_string};

/// Start the client unless it is already running.
///
/// # Safety
/// `cfg_path` must be NULL or a valid NUL terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn StartFrp(cfg_path: *const c_char) {
    let Ok(service) = service() else {
        return;
    };

    let controller = service.controller();
    match unsafe { from_c_str(cfg_path) } {
        Some(cfg_path) => controller.start(&cfg_path),
        None => controller.context().in_scope(|| {
            tracing::warn!("StartFrp called without a config path");
        }),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn StopFrp() {
    if let Ok(service) = service() {
        service.controller().stop();
    }
}

/// Everything logged since the previous call
#[unsafe(no_mangle)]
pub extern "C" fn FrpLogs() -> *mut c_char {
    let logs = match service() {
        Ok(service) => service.controller().drain_logs(),
        Err(error) => format!("frpc-mobile unavailable: {}\n", error),
    };

    into_c_string(logs)
}

#[unsafe(no_mangle)]
pub extern "C" fn FrpVersion() -> *mut c_char {
    into_c_string(full_version().to_string())
}

#[unsafe(no_mangle)]
pub extern "C" fn FrpIsRunning() -> c_int {
    match service() {
        Ok(service) if service.controller().is_running() => 1,
        _ => 0,
    }
}

/// # Safety
/// `ptr` must be NULL or a string returned by this library that has not been
/// freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FrpFreeString(ptr: *mut c_char) {
    unsafe { free_c_string(ptr) };
}
