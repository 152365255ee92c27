//! Decoder backend that calls into an external decoder library, loaded at runtime.
//!
//! The library exports plain C functions taking a `u64` session handle.
//! All of them return `0` on success, except `InitPlayer*` (returns the handle, `0` on failure)
//! and `ClosePlayer` (returns nothing).

use crate::decoder::{check, DecodeError, DecodeResult, Decoder, DecoderHandle, DecoderSession, FrameSample, PathEncoding, RGBA8};
use crate::PlayResult;
use log::debug;
use std::ffi::{c_char, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

type FnInitPlayerUtf8 = unsafe extern "C" fn(*const u8, u32) -> u64;
type FnInitPlayer = unsafe extern "C" fn(*const c_char) -> u64;
type FnClosePlayer = unsafe extern "C" fn(u64);
type FnGetGifInfo = unsafe extern "C" fn(u64, *mut u32, *mut u32) -> i32;
type FnGetU32 = unsafe extern "C" fn(u64, *mut u32) -> i32;
type FnSetU32 = unsafe extern "C" fn(u64, u32) -> i32;
type FnGetFrame = unsafe extern "C" fn(u64, u32, *mut *const u8, *mut u32, *mut u32, *mut u32) -> i32;
type FnStepFrame = unsafe extern "C" fn(u64, *mut *const u8, *mut u32, *mut u32, *mut u32) -> i32;
type FnReset = unsafe extern "C" fn(u64) -> i32;

/// Resolved entry points. Keeps the library loaded for as long as any session exists.
struct NativeApi {
    _lib: libloading::Library,
    init_player_utf8: FnInitPlayerUtf8,
    init_player: FnInitPlayer,
    close_player: FnClosePlayer,
    get_gif_info: FnGetGifInfo,
    get_total_frames: FnGetU32,
    get_current_frame_index: FnGetU32,
    seek_to_frame: FnSetU32,
    get_frame: FnGetFrame,
    get_next_frame: FnStepFrame,
    get_previous_frame: FnStepFrame,
    reset: FnReset,
    is_index_ready: FnGetU32,
    get_index_progress: FnGetU32,
    is_building_index: FnGetU32,
}

// Safety: only function pointers and the library handle. Sessions are used from one thread at a time.
unsafe impl Send for NativeApi {}
unsafe impl Sync for NativeApi {}

impl NativeApi {
    fn load(path: &Path) -> PlayResult<Self> {
        unsafe {
            let lib = libloading::Library::new(path)?;
            let init_player_utf8 = *lib.get::<FnInitPlayerUtf8>(b"InitPlayerUtf8\0")?;
            let init_player = *lib.get::<FnInitPlayer>(b"InitPlayer\0")?;
            let close_player = *lib.get::<FnClosePlayer>(b"ClosePlayer\0")?;
            let get_gif_info = *lib.get::<FnGetGifInfo>(b"GetGifInfo\0")?;
            let get_total_frames = *lib.get::<FnGetU32>(b"GetTotalFrames\0")?;
            let get_current_frame_index = *lib.get::<FnGetU32>(b"GetCurrentFrameIndex\0")?;
            let seek_to_frame = *lib.get::<FnSetU32>(b"SeekToFrame\0")?;
            let get_frame = *lib.get::<FnGetFrame>(b"GetFrame\0")?;
            let get_next_frame = *lib.get::<FnStepFrame>(b"GetNextFrame\0")?;
            let get_previous_frame = *lib.get::<FnStepFrame>(b"GetPreviousFrame\0")?;
            let reset = *lib.get::<FnReset>(b"Reset\0")?;
            let is_index_ready = *lib.get::<FnGetU32>(b"IsIndexReady\0")?;
            let get_index_progress = *lib.get::<FnGetU32>(b"GetIndexProgress\0")?;
            let is_building_index = *lib.get::<FnGetU32>(b"IsBuildingIndex\0")?;
            Ok(Self {
                _lib: lib,
                init_player_utf8,
                init_player,
                close_player,
                get_gif_info,
                get_total_frames,
                get_current_frame_index,
                seek_to_frame,
                get_frame,
                get_next_frame,
                get_previous_frame,
                reset,
                is_index_ready,
                get_index_progress,
                is_building_index,
            })
        }
    }
}

/// An external decoder library
pub struct NativeDecoder {
    api: Arc<NativeApi>,
}

impl NativeDecoder {
    /// Loads the library and resolves all of its functions.
    ///
    /// Loading a library runs its initialization code, so only load libraries you trust.
    pub fn load(path: impl AsRef<Path>) -> PlayResult<Self> {
        let path = path.as_ref();
        let api = NativeApi::load(path)?;
        debug!("loaded decoder library {}", path.display());
        Ok(Self { api: Arc::new(api) })
    }
}

#[cfg(unix)]
fn native_path(path: &Path) -> Option<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).ok()
}

#[cfg(not(unix))]
fn native_path(path: &Path) -> Option<CString> {
    CString::new(path.to_string_lossy().into_owned()).ok()
}

impl Decoder for NativeDecoder {
    type Session = NativeSession;

    fn open(&mut self, path: &Path, encoding: PathEncoding) -> Option<NativeSession> {
        let raw = match encoding {
            PathEncoding::Utf8 => {
                let utf8 = path.to_str()?;
                let len = u32::try_from(utf8.len()).ok()?;
                unsafe { (self.api.init_player_utf8)(utf8.as_ptr(), len) }
            },
            PathEncoding::Native => {
                let c_path = native_path(path)?;
                unsafe { (self.api.init_player)(c_path.as_ptr()) }
            },
        };
        let handle = DecoderHandle::new(raw)?;
        Some(NativeSession {
            api: self.api.clone(),
            handle,
            closed: false,
        })
    }
}

/// A session of an external decoder library
pub struct NativeSession {
    api: Arc<NativeApi>,
    handle: DecoderHandle,
    closed: bool,
}

impl NativeSession {
    fn raw(&self) -> DecodeResult<u64> {
        if self.closed { Err(DecodeError::CLOSED) } else { Ok(self.handle.get()) }
    }

    fn get_u32(&self, f: FnGetU32) -> DecodeResult<u32> {
        let handle = self.raw()?;
        let mut out = 0;
        check(unsafe { f(handle, &mut out) })?;
        Ok(out)
    }

    /// Wraps pixels returned by the library. They stay valid until the next call with this handle,
    /// and `&mut self` borrow ensures there isn't one.
    fn sample(&self, code: i32, data: *const u8, width: u32, height: u32, delay_ms: u32) -> DecodeResult<FrameSample<'_>> {
        check(code)?;
        if data.is_null() {
            return Err(DecodeError::FAILED);
        }
        let len = (width as usize).checked_mul(height as usize).ok_or(DecodeError::FAILED)?;
        let pixels = unsafe { std::slice::from_raw_parts(data.cast::<RGBA8>(), len) };
        Ok(FrameSample { pixels, width, height, delay_ms })
    }

    fn step(&mut self, f: FnStepFrame) -> DecodeResult<FrameSample<'_>> {
        let handle = self.raw()?;
        let (mut data, mut width, mut height, mut delay) = (ptr::null(), 0, 0, 0);
        let code = unsafe { f(handle, &mut data, &mut width, &mut height, &mut delay) };
        self.sample(code, data, width, height, delay)
    }
}

impl DecoderSession for NativeSession {
    fn handle(&self) -> DecoderHandle {
        self.handle
    }

    fn dimensions(&mut self) -> DecodeResult<(u32, u32)> {
        let handle = self.raw()?;
        let (mut width, mut height) = (0, 0);
        check(unsafe { (self.api.get_gif_info)(handle, &mut width, &mut height) })?;
        Ok((width, height))
    }

    fn total_frames(&mut self) -> DecodeResult<u32> {
        self.get_u32(self.api.get_total_frames)
    }

    fn next_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.step(self.api.get_next_frame)
    }

    fn previous_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.step(self.api.get_previous_frame)
    }

    fn frame(&mut self, index: u32) -> DecodeResult<FrameSample<'_>> {
        let handle = self.raw()?;
        let (mut data, mut width, mut height, mut delay) = (ptr::null(), 0, 0, 0);
        let code = unsafe { (self.api.get_frame)(handle, index, &mut data, &mut width, &mut height, &mut delay) };
        self.sample(code, data, width, height, delay)
    }

    fn current_frame_index(&mut self) -> DecodeResult<u32> {
        self.get_u32(self.api.get_current_frame_index)
    }

    fn seek_to_frame(&mut self, index: u32) -> DecodeResult<()> {
        let handle = self.raw()?;
        check(unsafe { (self.api.seek_to_frame)(handle, index) })
    }

    fn reset(&mut self) -> DecodeResult<()> {
        let handle = self.raw()?;
        check(unsafe { (self.api.reset)(handle) })
    }

    fn is_index_ready(&mut self) -> DecodeResult<bool> {
        self.get_u32(self.api.is_index_ready).map(|ready| ready != 0)
    }

    fn index_progress(&mut self) -> DecodeResult<u32> {
        self.get_u32(self.api.get_index_progress).map(|p| p.min(100))
    }

    fn is_building_index(&mut self) -> DecodeResult<bool> {
        self.get_u32(self.api.is_building_index).map(|building| building != 0)
    }

    fn close(&mut self) {
        if let Ok(handle) = self.raw() {
            self.closed = true;
            unsafe { (self.api.close_player)(handle) };
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[test]
fn missing_library() {
    let dir = tempfile::tempdir().unwrap();
    let err = NativeDecoder::load(dir.path().join("no-such-decoder.so")).err().unwrap();
    assert!(matches!(err, crate::Error::Library(_)));
}

#[cfg(all(test, unix))]
mod fake {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

    pub static CLOSED: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn init_utf8(_: *const u8, _: u32) -> u64 { 7 }
    unsafe extern "C" fn init(_: *const c_char) -> u64 { 7 }
    unsafe extern "C" fn close(_: u64) {
        CLOSED.fetch_add(1, Relaxed);
    }
    unsafe extern "C" fn info(_: u64, w: *mut u32, h: *mut u32) -> i32 { *w = 1; *h = 1; 0 }
    unsafe extern "C" fn get(_: u64, out: *mut u32) -> i32 { *out = 0; 0 }
    unsafe extern "C" fn set(_: u64, _: u32) -> i32 { 0 }
    unsafe extern "C" fn frame(_: u64, _: u32, _: *mut *const u8, _: *mut u32, _: *mut u32, _: *mut u32) -> i32 { -1 }
    unsafe extern "C" fn step(_: u64, _: *mut *const u8, _: *mut u32, _: *mut u32, _: *mut u32) -> i32 { -1 }
    unsafe extern "C" fn reset(_: u64) -> i32 { 0 }

    pub fn decoder() -> NativeDecoder {
        NativeDecoder {
            api: Arc::new(NativeApi {
                _lib: libloading::os::unix::Library::this().into(),
                init_player_utf8: init_utf8,
                init_player: init,
                close_player: close,
                get_gif_info: info,
                get_total_frames: get,
                get_current_frame_index: get,
                seek_to_frame: set,
                get_frame: frame,
                get_next_frame: step,
                get_previous_frame: step,
                reset,
                is_index_ready: get,
                get_index_progress: get,
                is_building_index: get,
            }),
        }
    }
}

#[test]
#[cfg(unix)]
fn session_closes_once_when_dropped() {
    use std::sync::atomic::Ordering::Relaxed;

    let mut decoder = fake::decoder();
    let mut session = decoder.open(Path::new("anim.gif"), PathEncoding::Utf8).unwrap();
    assert_eq!(Ok((1, 1)), session.dimensions());
    assert_eq!(Err(DecodeError::FAILED), session.next_frame().map(|_| ()));
    drop(session);
    assert_eq!(1, fake::CLOSED.load(Relaxed));

    let mut session = decoder.open(Path::new("anim.gif"), PathEncoding::Native).unwrap();
    session.close();
    assert_eq!(Err(DecodeError::CLOSED), session.total_frames());
    drop(session);
    assert_eq!(2, fake::CLOSED.load(Relaxed));
}
