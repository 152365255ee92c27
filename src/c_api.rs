#![allow(clippy::missing_safety_doc)]
//! How to use from C
//!
//! ```c
//! gifplayer *p = gifplayer_new(&(GifplayerSettings){
//!     .autoplay = true,
//! });
//! gifplayer_set_frame_callback(p, on_frame, window);
//!
//! if (gifplayer_load(p, "anim.gif") != GIFPLAYER_OK) return;
//!
//! uint32_t wait_ms = 0;
//! while (!quit) {
//!     sleep_ms(wait_ms);
//!     gifplayer_advance(p, wait_ms, &wait_ms);
//! }
//! gifplayer_finish(p);
//! ```
//!
//! The player doesn't have a thread of its own. Everything, including the callbacks, happens inside
//! the `gifplayer_*` call that caused it. `gifplayer_advance` runs the playback and index timers.
//!
//! Callbacks must not call any `gifplayer_*` function.
//!
//! To build as a library:
//!
//! ```bash
//! cargo build --release --lib
//! ```
//!
//! it will create `target/release/libgifplayer.a` (static library)
//! and `target/release/libgifplayer.so`/`dylib` or `gifplayer.dll` (dynamic library)

use super::*;
use crate::events::{EventSink, FrameUpdate};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::panic::catch_unwind;
use std::ptr;
use std::sync::{Arc, Mutex};
mod c_api_error;
pub use self::c_api_error::GifplayerError;

/// Settings for creating a new player instance. See `gifplayer_new`
#[repr(C)]
#[derive(Copy, Clone)]
pub struct GifplayerSettings {
    /// Shortest time between frames. 0 for the default (16ms).
    pub min_frame_interval_ms: u32,
    /// How often to check the decoder's index. 0 for the default (500ms).
    pub index_poll_interval_ms: u32,
    /// Start playing as soon as a file is loaded.
    pub autoplay: bool,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
pub enum GifplayerState {
    UNLOADED = 0,
    READY,
    PLAYING,
    PAUSED,
    CLOSED,
}

impl From<PlaybackState> for GifplayerState {
    fn from(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Unloaded => Self::UNLOADED,
            PlaybackState::Ready => Self::READY,
            PlaybackState::Playing => Self::PLAYING,
            PlaybackState::Paused => Self::PAUSED,
            PlaybackState::Closed => Self::CLOSED,
        }
    }
}

/// Passed to the frame callback
#[repr(C)]
pub struct GifplayerFrame {
    /// BGRA, 4 bytes per pixel, `width * 4` bytes per row.
    /// Only valid for the duration of the callback.
    pub pixels: *const u8,
    pub width: u32,
    pub height: u32,
    pub delay_ms: u32,
    pub current_index: u32,
    /// Only meaningful if `total_frames_known` is true
    pub total_frames: u32,
    pub total_frames_known: bool,
}

pub type GifplayerFrameCallback = unsafe extern "C" fn(frame: *const GifplayerFrame, user_data: *mut c_void);
pub type GifplayerStatusCallback = unsafe extern "C" fn(status: *const c_char, user_data: *mut c_void);
pub type GifplayerIndexCallback = unsafe extern "C" fn(ready: bool, building: bool, progress: u32, user_data: *mut c_void);

/// Opaque handle used in methods. Note that the handle pointer is actually `Arc<GifplayerHandleInternal>`,
/// but `Arc::into_raw` is nice enough to point past the counter.
#[repr(C)]
pub struct GifplayerHandle {
    _opaque: usize,
}

pub struct GifplayerHandleInternal {
    player: Mutex<Player<GifDecoder>>,
    callbacks: Arc<Mutex<Callbacks>>,
}

#[derive(Default)]
struct Callbacks {
    frame: Option<(GifplayerFrameCallback, SendableUserData)>,
    status: Option<(GifplayerStatusCallback, SendableUserData)>,
    index: Option<(GifplayerIndexCallback, SendableUserData)>,
}

#[derive(Copy, Clone)]
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

/// Forwards the player's events to the C callbacks
struct CallbackEvents {
    callbacks: Arc<Mutex<Callbacks>>,
}

impl EventSink for CallbackEvents {
    fn frame_updated(&mut self, frame: &FrameUpdate<'_>) {
        let Ok(callbacks) = self.callbacks.lock() else { return };
        let Some((cb, user_data)) = callbacks.frame else { return };
        let c_frame = GifplayerFrame {
            pixels: frame.surface.buf().as_ptr().cast(),
            width: frame.width,
            height: frame.height,
            delay_ms: frame.delay_ms,
            current_index: frame.current_index,
            total_frames: frame.total_frames.unwrap_or(0),
            total_frames_known: frame.total_frames.is_some(),
        };
        unsafe { cb(&c_frame, user_data.0) }
    }

    fn status_updated(&mut self, status: &str) {
        let Ok(callbacks) = self.callbacks.lock() else { return };
        let Some((cb, user_data)) = callbacks.status else { return };
        let cstring = CString::new(status).unwrap_or_default();
        unsafe { cb(cstring.as_ptr(), user_data.0) }
    }

    fn index_status_changed(&mut self, status: IndexStatus) {
        let Ok(callbacks) = self.callbacks.lock() else { return };
        let Some((cb, user_data)) = callbacks.index else { return };
        unsafe { cb(status.ready, status.building, status.progress, user_data.0) }
    }
}

/// Creates a player that uses the built-in GIF decoder.
///
/// Returns a handle for the other functions, or `NULL` on error (if the settings are invalid).
/// The handle must be freed with `gifplayer_finish`.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_new(settings: *const GifplayerSettings) -> *const GifplayerHandle {
    let Some(settings) = settings.as_ref() else {
        return ptr::null_mut();
    };
    let defaults = Settings::default();
    let ms = |ms: u32, default| if ms > 0 { Duration::from_millis(ms.into()) } else { default };
    let s = Settings {
        min_frame_interval: ms(settings.min_frame_interval_ms, defaults.min_frame_interval),
        index_poll_interval: ms(settings.index_poll_interval_ms, defaults.index_poll_interval),
        autoplay: settings.autoplay,
    };

    let callbacks = Arc::new(Mutex::new(Callbacks::default()));
    let events = CallbackEvents { callbacks: callbacks.clone() };
    Arc::into_raw(Arc::new(GifplayerHandleInternal {
        player: Mutex::new(Player::new(GifDecoder::new(), s, Box::new(events))),
        callbacks,
    })).cast::<GifplayerHandle>()
}

/// Get a callback whenever a new frame is displayed.
///
/// The callback gets a pointer to `GifplayerFrame` and the `user_data` pointer (which can be `NULL`).
/// The frame and its pixels are only valid for the duration of the call. Make a copy if you need to keep it.
///
/// Pass `NULL` as `cb` to remove the callback.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_set_frame_callback(handle: *const GifplayerHandle, cb: Option<GifplayerFrameCallback>, user_data: *mut c_void) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    match g.callbacks.lock() {
        Ok(mut callbacks) => {
            callbacks.frame = cb.map(|cb| (cb, SendableUserData(user_data)));
            GifplayerError::OK
        },
        Err(_) => GifplayerError::THREAD_LOST,
    }
}

/// Get a callback with human-readable status messages, such as "Paused".
///
/// The callback function has the following arguments:
/// * A `\0`-terminated C string in UTF-8 encoding. The string is only valid for the duration of the call. Make a copy if you need to keep it.
/// * An arbitrary pointer (`user_data`). `user_data` can be `NULL`.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_set_status_callback(handle: *const GifplayerHandle, cb: Option<GifplayerStatusCallback>, user_data: *mut c_void) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    match g.callbacks.lock() {
        Ok(mut callbacks) => {
            callbacks.status = cb.map(|cb| (cb, SendableUserData(user_data)));
            GifplayerError::OK
        },
        Err(_) => GifplayerError::THREAD_LOST,
    }
}

/// Get a callback when the decoder's index becomes ready, or starts/stops being built.
/// Progress is 0-100.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_set_index_callback(handle: *const GifplayerHandle, cb: Option<GifplayerIndexCallback>, user_data: *mut c_void) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    match g.callbacks.lock() {
        Ok(mut callbacks) => {
            callbacks.index = cb.map(|cb| (cb, SendableUserData(user_data)));
            GifplayerError::OK
        },
        Err(_) => GifplayerError::THREAD_LOST,
    }
}

/// Opens a file. The path must be UTF-8. Whatever was open before is closed first.
///
/// Returns 0 (`GIFPLAYER_OK`) on success, and non-0 `GIFPLAYER_*` constant on error.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_load(handle: *const GifplayerHandle, path: *const c_char) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    if path.is_null() {
        return GifplayerError::NULL_ARG;
    }
    let Ok(path) = CStr::from_ptr(path).to_str() else {
        return GifplayerError::INVALID_INPUT;
    };
    g.with_player(|p| p.load(path).into())
}

#[no_mangle]
pub unsafe extern "C" fn gifplayer_play(handle: *const GifplayerHandle) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        p.play();
        GifplayerError::OK
    })
}

#[no_mangle]
pub unsafe extern "C" fn gifplayer_pause(handle: *const GifplayerHandle) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        p.pause();
        GifplayerError::OK
    })
}

/// Pauses and shows the next frame
#[no_mangle]
pub unsafe extern "C" fn gifplayer_next_frame(handle: *const GifplayerHandle) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        p.next_frame();
        GifplayerError::OK
    })
}

/// Pauses and shows the previous frame
#[no_mangle]
pub unsafe extern "C" fn gifplayer_previous_frame(handle: *const GifplayerHandle) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        p.previous_frame();
        GifplayerError::OK
    })
}

/// Pauses and shows the given frame (0-based).
///
/// Returns `GIFPLAYER_INVALID_STATE` if the index isn't ready yet, or the frame doesn't exist.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_seek_to_frame(handle: *const GifplayerHandle, index: u32) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        let can_seek = p.index_status().ready && p.cursor().total_frames.is_some_and(|total| index < total);
        if !can_seek {
            return GifplayerError::INVALID_STATE;
        }
        p.seek_to_frame(index);
        GifplayerError::OK
    })
}

/// Pauses and shows frame 0
#[no_mangle]
pub unsafe extern "C" fn gifplayer_reset(handle: *const GifplayerHandle) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    g.with_player(|p| {
        p.reset_to_first_frame();
        GifplayerError::OK
    })
}

/// Tells the player that `elapsed_ms` have passed, and runs whatever was due in that time.
///
/// If `next_deadline_ms` isn't `NULL`, it's set to the time until something needs to run again,
/// or `UINT32_MAX` if nothing will (e.g. when paused with the index ready).
#[no_mangle]
pub unsafe extern "C" fn gifplayer_advance(handle: *const GifplayerHandle, elapsed_ms: u32, next_deadline_ms: *mut u32) -> GifplayerError {
    let Some(g) = borrow(handle) else { return GifplayerError::NULL_ARG };
    let next_deadline_ms = next_deadline_ms.as_mut();
    g.with_player(move |p| {
        p.advance(Duration::from_millis(elapsed_ms.into()));
        if let Some(out) = next_deadline_ms {
            *out = p.next_deadline().map_or(u32::MAX, |d| d.as_millis().min(u32::MAX.into()) as u32);
        }
        GifplayerError::OK
    })
}

/// `GIFPLAYER_CLOSED` if the handle is `NULL`
#[no_mangle]
pub unsafe extern "C" fn gifplayer_state(handle: *const GifplayerHandle) -> GifplayerState {
    let Some(g) = borrow(handle) else { return GifplayerState::CLOSED };
    match g.player.lock() {
        Ok(p) => p.state().into(),
        Err(_) => GifplayerState::CLOSED,
    }
}

unsafe fn borrow<'a>(handle: *const GifplayerHandle) -> Option<&'a GifplayerHandleInternal> {
    let g = handle.cast::<GifplayerHandleInternal>();
    g.as_ref()
}

/// The last step: stops playback, closes the file, and frees the handle.
///
/// Must always be called, otherwise it will leak memory.
/// After this call, the handle is freed and can't be used any more.
#[no_mangle]
pub unsafe extern "C" fn gifplayer_finish(g: *const GifplayerHandle) -> GifplayerError {
    if g.is_null() {
        return GifplayerError::NULL_ARG;
    }
    let g = Arc::from_raw(g.cast::<GifplayerHandleInternal>());
    g.with_player(|p| {
        p.dispose();
        GifplayerError::OK
    })
}

impl GifplayerHandleInternal {
    fn with_player(&self, f: impl FnOnce(&mut Player<GifDecoder>) -> GifplayerError) -> GifplayerError {
        catch_unwind(std::panic::AssertUnwindSafe(|| match self.player.lock() {
            Ok(mut player) => f(&mut player),
            Err(_) => GifplayerError::THREAD_LOST,
        }))
        .map_err(|e| self.print_panic(e)).unwrap_or(GifplayerError::THREAD_LOST)
    }

    fn print_panic(&self, e: Box<dyn std::any::Any + Send>) {
        let msg = e.downcast_ref::<String>().map(|s| s.as_str())
            .or_else(|| e.downcast_ref::<&str>().copied()).unwrap_or("unknown panic");
        log::error!("player crashed (this is a bug): {msg}");
    }
}

#[cfg(test)]
fn test_settings() -> GifplayerSettings {
    GifplayerSettings {
        min_frame_interval_ms: 0,
        index_poll_interval_ms: 10,
        autoplay: true,
    }
}

#[test]
fn c_cb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    crate::gifdecoder::write_test_gif(&path, 3);
    let c_path = CString::new(path.to_str().unwrap()).unwrap();

    let g = unsafe { gifplayer_new(&test_settings()) };
    assert!(!g.is_null());

    let mut frames = Vec::<(u32, u32, u8)>::new();
    unsafe extern "C" fn fcb(frame: *const GifplayerFrame, user_data: *mut c_void) {
        let frames = &mut *user_data.cast::<Vec<(u32, u32, u8)>>();
        let frame = &*frame;
        assert_eq!((2, 2), (frame.width, frame.height));
        frames.push((frame.current_index, frame.delay_ms, *frame.pixels.add(1)));
    }
    let mut statuses = Vec::<String>::new();
    unsafe extern "C" fn scb(status: *const c_char, user_data: *mut c_void) {
        let statuses = &mut *user_data.cast::<Vec<String>>();
        statuses.push(CStr::from_ptr(status).to_str().unwrap().to_owned());
    }
    let mut ready = false;
    unsafe extern "C" fn icb(is_ready: bool, _building: bool, _progress: u32, user_data: *mut c_void) {
        *user_data.cast::<bool>() |= is_ready;
    }
    unsafe {
        assert_eq!(GifplayerError::OK, gifplayer_set_frame_callback(g, Some(fcb), ptr::addr_of_mut!(frames).cast()));
        assert_eq!(GifplayerError::OK, gifplayer_set_status_callback(g, Some(scb), ptr::addr_of_mut!(statuses).cast()));
        assert_eq!(GifplayerError::OK, gifplayer_set_index_callback(g, Some(icb), ptr::addr_of_mut!(ready).cast()));
        assert_eq!(GifplayerError::OK, gifplayer_load(g, c_path.as_ptr()));
        assert_eq!(GifplayerState::PLAYING, gifplayer_state(g));

        let mut wait = 0;
        for _ in 0..500 {
            assert_eq!(GifplayerError::OK, gifplayer_advance(g, wait, &mut wait));
            if ready {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ready);
        assert_eq!(GifplayerError::OK, gifplayer_seek_to_frame(g, 2));
        assert_eq!(GifplayerState::PAUSED, gifplayer_state(g));
        assert_eq!(GifplayerError::INVALID_STATE, gifplayer_seek_to_frame(g, 3));
        assert_eq!(GifplayerError::OK, gifplayer_finish(g));
    }
    assert_eq!(statuses[..2], ["Loaded: anim.gif", "Playing..."]);
    // frame 2 is green
    assert_eq!(Some(&(2, 150, 255)), frames.last());
}

#[test]
fn load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = CString::new(dir.path().join("missing.gif").to_str().unwrap()).unwrap();
    let not_gif_path = dir.path().join("not.gif");
    std::fs::write(&not_gif_path, b"hello").unwrap();
    let not_gif = CString::new(not_gif_path.to_str().unwrap()).unwrap();

    unsafe {
        let g = gifplayer_new(&test_settings());
        assert_eq!(GifplayerError::NULL_ARG, gifplayer_load(g, ptr::null()));
        assert_eq!(GifplayerError::NOT_FOUND, gifplayer_load(g, missing.as_ptr()));
        assert_eq!(GifplayerError::OPEN_FAILED, gifplayer_load(g, not_gif.as_ptr()));
        assert_eq!(GifplayerState::UNLOADED, gifplayer_state(g));
        assert_eq!(GifplayerError::OK, gifplayer_play(g));
        assert_eq!(GifplayerState::UNLOADED, gifplayer_state(g));
        assert_eq!(GifplayerError::OK, gifplayer_finish(g));
    }
}

#[test]
fn null_handles() {
    unsafe {
        assert!(gifplayer_new(ptr::null()).is_null());
        assert_eq!(GifplayerError::NULL_ARG, gifplayer_play(ptr::null()));
        assert_eq!(GifplayerError::NULL_ARG, gifplayer_advance(ptr::null(), 0, ptr::null_mut()));
        assert_eq!(GifplayerError::NULL_ARG, gifplayer_set_frame_callback(ptr::null(), None, ptr::null_mut()));
        assert_eq!(GifplayerError::NULL_ARG, gifplayer_finish(ptr::null()));
        assert_eq!(GifplayerState::CLOSED, gifplayer_state(ptr::null()));
    }
}
