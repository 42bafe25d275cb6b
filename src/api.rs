// C-calling-convention bridge
//
// Exposes MixPlayer to non-Rust hosts. Instances are addressed by opaque
// u64 handles drawn from a counter that never repeats, so a stale handle can
// never reach a newer instance. Callbacks are stored per instance and
// invoked on the instance's control worker thread.

#![allow(clippy::not_unsafe_ptr_arg_deref)] // FFI functions receive raw pointers from the host

use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::{Lazy, OnceCell};

use crate::engine::{MixPlayer, PlayerOptions};
use crate::error::{ErrorCode, PlayerError};
use crate::managers::PlayerEvent;
use crate::model::DeviceDirection;

// Re-export error code constants for FFI exposure
pub use crate::error::{PlayerErrorCodes, RecorderErrorCodes};

/// Maximum accepted string length from the host (1 MB)
const MAX_FFI_STRING_LEN: usize = 1024 * 1024;

pub type StateCallback = extern "C" fn(handle: u64, state: *const c_char);
pub type ProgressCallback = extern "C" fn(handle: u64, value: f64);
pub type ErrorCallback = extern "C" fn(handle: u64, code: i32, message: *const c_char);
pub type LevelCallback = extern "C" fn(handle: u64, level: f32);
pub type DeviceListCallback = extern "C" fn(handle: u64, devices_json: *const c_char);
pub type ExportCallback = extern "C" fn(handle: u64, path: *const c_char, error: *const c_char);

#[derive(Default, Clone, Copy)]
struct BridgeCallbacks {
    state: Option<StateCallback>,
    progress: Option<ProgressCallback>,
    error: Option<ErrorCallback>,
    recorder_state: Option<StateCallback>,
    recorder_progress: Option<ProgressCallback>,
    recorder_level: Option<LevelCallback>,
    device_list: Option<DeviceListCallback>,
    export: Option<ExportCallback>,
}

struct BridgeEntry {
    player: Arc<MixPlayer>,
    callbacks: Arc<Mutex<BridgeCallbacks>>,
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static PLAYERS: Lazy<Mutex<HashMap<u64, BridgeEntry>>> = Lazy::new(|| Mutex::new(HashMap::new()));
/// Receives errors that cannot be tied to a live instance
static BRIDGE_ERROR: Lazy<Mutex<Option<ErrorCallback>>> = Lazy::new(|| Mutex::new(None));
static LOGGING: OnceCell<()> = OnceCell::new();

macro_rules! ffi_panic_guard {
    ($default:expr, $body:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $body)) {
            Ok(result) => result,
            Err(e) => {
                if let Some(s) = e.downcast_ref::<&str>() {
                    log::error!("FFI panic caught: {}", s);
                } else if let Some(s) = e.downcast_ref::<String>() {
                    log::error!("FFI panic caught: {}", s);
                } else {
                    log::error!("FFI panic caught (unknown type)");
                }
                $default
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Convert a host C string to an owned String.
///
/// # Safety
/// `ptr` must be null or point to a null-terminated string.
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while len < MAX_FFI_STRING_LEN {
        if *ptr.add(len) == 0 {
            break;
        }
        len += 1;
    }
    if len >= MAX_FFI_STRING_LEN {
        log::warn!("FFI string exceeds maximum length of {}", MAX_FFI_STRING_LEN);
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Convert to a host-owned C string (free with `mixplayer_free_string`).
fn string_to_cstr(s: &str) -> *mut c_char {
    CString::new(s)
        .map(|cs| cs.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn with_cstring<F: FnOnce(*const c_char)>(s: &str, f: F) {
    let owned = CString::new(s.replace('\0', " ")).unwrap_or_default();
    f(owned.as_ptr());
}

fn bridge_error(handle: u64, err: &PlayerError) {
    log::warn!("[Bridge] {}", err);
    let callback = BRIDGE_ERROR.lock().ok().and_then(|cb| *cb);
    if let Some(callback) = callback {
        with_cstring(&err.message(), |msg| callback(handle, err.code(), msg));
    }
}

fn lookup(handle: u64) -> Option<(Arc<MixPlayer>, Arc<Mutex<BridgeCallbacks>>)> {
    let found = PLAYERS
        .lock()
        .ok()
        .and_then(|players| {
            players
                .get(&handle)
                .map(|e| (Arc::clone(&e.player), Arc::clone(&e.callbacks)))
        });
    if found.is_none() {
        bridge_error(handle, &PlayerError::InvalidHandle { handle });
    }
    found
}

fn player(handle: u64) -> Option<Arc<MixPlayer>> {
    lookup(handle).map(|(p, _)| p)
}

/// 0 on success, otherwise the error's code.
fn status<E: ErrorCode>(result: Result<(), E>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

fn set_callback<F: FnOnce(&mut BridgeCallbacks)>(handle: u64, f: F) -> i32 {
    match lookup(handle) {
        Some((_, callbacks)) => match callbacks.lock() {
            Ok(mut guard) => {
                f(&mut guard);
                0
            }
            Err(_) => PlayerErrorCodes::ENGINE_SHUT_DOWN,
        },
        None => PlayerErrorCodes::INVALID_HANDLE,
    }
}

fn dispatch(handle: u64, callbacks: &Mutex<BridgeCallbacks>, event: &PlayerEvent) {
    // Copy the pointers out; the host may re-register from inside a callback
    let Some(cb) = callbacks.lock().ok().map(|c| *c) else {
        return;
    };
    match event {
        PlayerEvent::State(state) => {
            if let Some(f) = cb.state {
                with_cstring(state.as_str(), |s| f(handle, s));
            }
        }
        PlayerEvent::Progress(value) => {
            if let Some(f) = cb.progress {
                f(handle, *value);
            }
        }
        PlayerEvent::Error { code, message } => {
            if let Some(f) = cb.error {
                with_cstring(message, |m| f(handle, *code, m));
            }
        }
        PlayerEvent::RecorderState(state) => {
            if let Some(f) = cb.recorder_state {
                with_cstring(state.as_str(), |s| f(handle, s));
            }
        }
        PlayerEvent::RecorderProgress(value) => {
            if let Some(f) = cb.recorder_progress {
                f(handle, *value);
            }
        }
        PlayerEvent::RecorderLevel(level) => {
            if let Some(f) = cb.recorder_level {
                f(handle, *level);
            }
        }
        PlayerEvent::DeviceList(list) => {
            if let Some(f) = cb.device_list {
                with_cstring(&list.to_json(), |j| f(handle, j));
            }
        }
        PlayerEvent::Export { path, error } => {
            if let Some(f) = cb.export {
                with_cstring(path, |p| match error {
                    Some(error) => with_cstring(error, |e| f(handle, p, e)),
                    None => f(handle, p, ptr::null()),
                });
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Create an engine instance. Returns its handle, or 0 on failure.
#[no_mangle]
pub extern "C" fn mixplayer_init(record: i32, play: i32) -> u64 {
    ffi_panic_guard!(0, {
        let options = PlayerOptions::new(record != 0, play != 0)
            .with_config(crate::config::AppConfig::load());
        let player = match MixPlayer::new(options) {
            Ok(player) => Arc::new(player),
            Err(err) => {
                bridge_error(0, &err);
                return 0;
            }
        };

        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        let callbacks = Arc::new(Mutex::new(BridgeCallbacks::default()));
        let sink = Arc::clone(&callbacks);
        player.add_listener(
            None,
            Arc::new(move |event: &PlayerEvent| dispatch(handle, &sink, event)),
        );

        match PLAYERS.lock() {
            Ok(mut players) => {
                players.insert(handle, BridgeEntry { player, callbacks });
                log::info!("[Bridge] Created instance {}", handle);
                handle
            }
            Err(_) => 0,
        }
    })
}

/// Destroy an instance. Hardware callbacks stop before this returns.
#[no_mangle]
pub extern "C" fn mixplayer_deinit(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let entry = PLAYERS.lock().ok().and_then(|mut p| p.remove(&handle));
        match entry {
            Some(entry) => {
                entry.player.shutdown();
                log::info!("[Bridge] Destroyed instance {}", handle);
                0
            }
            None => {
                bridge_error(handle, &PlayerError::InvalidHandle { handle });
                PlayerErrorCodes::INVALID_HANDLE
            }
        }
    })
}

/// Install a log subscriber at `level` (0 error … 4 trace). Only the first
/// call has an effect.
#[no_mangle]
pub extern "C" fn mixplayer_enable_logs(level: i32) {
    LOGGING.get_or_init(|| {
        let level = match level {
            i32::MIN..=0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };
        let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    });
}

/// Free a string returned by this library.
#[no_mangle]
pub extern "C" fn mixplayer_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSION & TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════

#[no_mangle]
pub extern "C" fn mixplayer_set(handle: u64, session_json: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let json = unsafe { cstr_to_string(session_json) }.unwrap_or_default();
        status(player.set_session_json(&json))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_set_settings(handle: u64, settings_json: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let json = unsafe { cstr_to_string(settings_json) }.unwrap_or_default();
        status(player.set_settings_json(&json))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_play(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| status(p.play()))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_pause(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| status(p.pause()))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_stop(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| status(p.stop()))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_toggle_play_pause(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| {
            status(p.toggle_play_pause())
        })
    })
}

/// Seek to `fraction` of the duration (clamped to 0..1).
#[no_mangle]
pub extern "C" fn mixplayer_seek(handle: u64, fraction: f64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| status(p.seek(fraction)))
    })
}

/// 1 while playing, 0 otherwise (including invalid handles).
#[no_mangle]
pub extern "C" fn mixplayer_is_playing(handle: u64) -> i32 {
    ffi_panic_guard!(0, { player(handle).map_or(0, |p| p.is_playing() as i32) })
}

/// Duration in seconds; 0 without a session or for invalid handles.
#[no_mangle]
pub extern "C" fn mixplayer_get_duration(handle: u64) -> f64 {
    ffi_panic_guard!(0.0, { player(handle).map_or(0.0, |p| p.duration()) })
}

#[no_mangle]
pub extern "C" fn mixplayer_get_current_time(handle: u64) -> f64 {
    ffi_panic_guard!(0.0, { player(handle).map_or(0.0, |p| p.current_time()) })
}

#[no_mangle]
pub extern "C" fn mixplayer_set_track_enabled(handle: u64, track_id: *const c_char, enabled: i32) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let id = unsafe { cstr_to_string(track_id) }.unwrap_or_default();
        status(player.set_track_enabled(&id, enabled != 0))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_set_track_volume(handle: u64, track_id: *const c_char, volume: f32) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let id = unsafe { cstr_to_string(track_id) }.unwrap_or_default();
        status(player.set_track_volume(&id, volume))
    })
}

/// Render the session to a WAV file; null `path` uses the session's output.
#[no_mangle]
pub extern "C" fn mixplayer_export(handle: u64, path: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let path = unsafe { cstr_to_string(path) };
        status(player.export(path.as_deref().map(Path::new)))
    })
}

/// Latency info as JSON (free with `mixplayer_free_string`).
#[no_mangle]
pub extern "C" fn mixplayer_get_latency_info(handle: u64) -> *mut c_char {
    ffi_panic_guard!(ptr::null_mut(), {
        match player(handle) {
            Some(p) => serde_json::to_string(&p.latency_info())
                .map(|json| string_to_cstr(&json))
                .unwrap_or(ptr::null_mut()),
            None => ptr::null_mut(),
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDER
// ═══════════════════════════════════════════════════════════════════════════

#[no_mangle]
pub extern "C" fn mixplayer_prepare_recorder(handle: u64, path: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let path = unsafe { cstr_to_string(path) }.unwrap_or_default();
        status(player.prepare_recorder(path))
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_start_recorder(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| {
            status(p.start_recorder())
        })
    })
}

#[no_mangle]
pub extern "C" fn mixplayer_stop_recorder(handle: u64) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        player(handle).map_or(PlayerErrorCodes::INVALID_HANDLE, |p| {
            status(p.stop_recorder())
        })
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICES
// ═══════════════════════════════════════════════════════════════════════════

/// Current device list as JSON (free with `mixplayer_free_string`).
#[no_mangle]
pub extern "C" fn mixplayer_get_device_list(handle: u64) -> *mut c_char {
    ffi_panic_guard!(ptr::null_mut(), {
        player(handle).map_or(ptr::null_mut(), |p| string_to_cstr(&p.devices().to_json()))
    })
}

/// Submit a whole device list; only selection flags are applied.
#[no_mangle]
pub extern "C" fn mixplayer_set_device_list(handle: u64, devices_json: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let json = unsafe { cstr_to_string(devices_json) }.unwrap_or_default();
        status(player.set_devices_json(&json))
    })
}

/// Select a device; `is_input` picks the direction.
#[no_mangle]
pub extern "C" fn mixplayer_select_device(handle: u64, is_input: i32, name: *const c_char) -> i32 {
    ffi_panic_guard!(PlayerErrorCodes::ENGINE_SHUT_DOWN, {
        let Some(player) = player(handle) else {
            return PlayerErrorCodes::INVALID_HANDLE;
        };
        let direction = if is_input != 0 {
            DeviceDirection::Input
        } else {
            DeviceDirection::Output
        };
        let name = unsafe { cstr_to_string(name) }.unwrap_or_default();
        status(player.select_device(direction, &name))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// CALLBACKS
// ═══════════════════════════════════════════════════════════════════════════

#[no_mangle]
pub extern "C" fn mixplayer_on_state(handle: u64, callback: Option<StateCallback>) -> i32 {
    set_callback(handle, |c| c.state = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_progress(handle: u64, callback: Option<ProgressCallback>) -> i32 {
    set_callback(handle, |c| c.progress = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_error(handle: u64, callback: Option<ErrorCallback>) -> i32 {
    set_callback(handle, |c| c.error = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_recorder_state(handle: u64, callback: Option<StateCallback>) -> i32 {
    set_callback(handle, |c| c.recorder_state = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_recorder_progress(handle: u64, callback: Option<ProgressCallback>) -> i32 {
    set_callback(handle, |c| c.recorder_progress = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_recorder_level(handle: u64, callback: Option<LevelCallback>) -> i32 {
    set_callback(handle, |c| c.recorder_level = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_device_list(handle: u64, callback: Option<DeviceListCallback>) -> i32 {
    set_callback(handle, |c| c.device_list = callback)
}

#[no_mangle]
pub extern "C" fn mixplayer_on_export(handle: u64, callback: Option<ExportCallback>) -> i32 {
    set_callback(handle, |c| c.export = callback)
}

/// Error callback for calls that cannot reach an instance (bad handles).
#[no_mangle]
pub extern "C" fn mixplayer_set_bridge_error_callback(callback: Option<ErrorCallback>) {
    if let Ok(mut slot) = BRIDGE_ERROR.lock() {
        *slot = callback;
    }
}
