//! The boundary between the player and an animated-image decoder
//!
//! A [`Decoder`] opens files and hands out one [`DecoderSession`] per file.
//! Everything the player knows about the animation comes through these two traits.
//! Decoders may build their random-access index on threads of their own;
//! the player only ever observes that through [`DecoderSession::is_index_ready`] and friends.

pub use rgb::RGBA8;

use std::fmt;
use std::num::{NonZeroI32, NonZeroU64};
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// Non-zero status code returned by a failed decoder call.
///
/// Decoders follow the C convention where `0` means success, so a failure can never be zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DecodeError(NonZeroI32);

impl DecodeError {
    /// Generic failure, for decoders that don't have more specific codes.
    pub const FAILED: Self = Self::new(-1);
    /// The operation needs the frame index, and it hasn't been built yet.
    pub const INDEX_NOT_READY: Self = Self::new(-2);
    /// Frame number past the end of the animation.
    pub const OUT_OF_RANGE: Self = Self::new(-3);
    /// The session has been closed.
    pub const CLOSED: Self = Self::new(-4);

    const fn new(code: i32) -> Self {
        match NonZeroI32::new(code) {
            Some(code) => Self(code),
            None => panic!("zero is not an error"),
        }
    }

    /// `None` for `0` (success)
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        NonZeroI32::new(code).map(Self)
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self.0.get()
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decoder error code {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Turns a C-style status code into a `Result`
#[inline]
pub fn check(code: i32) -> DecodeResult<()> {
    match DecodeError::from_code(code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Opaque identifier of one open decode session. Never zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DecoderHandle(NonZeroU64);

impl DecoderHandle {
    /// `None` for the zero handle, which decoders use to signal failure
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DecoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the file path is passed to the decoder.
///
/// The player tries them in order: `Utf8` first, then `Native`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PathEncoding {
    /// UTF-8 bytes with an explicit length. Fails for paths that aren't valid Unicode.
    Utf8,
    /// Platform's own encoding of the path, NUL-terminated.
    Native,
}

impl PathEncoding {
    pub const ALL: [Self; 2] = [Self::Utf8, Self::Native];
}

/// One decoded frame, borrowed from the decoder.
///
/// The pixels live in the decoder's memory and are only valid until the next call on the session,
/// which the borrow checker enforces: the sample holds the `&mut` borrow of the session.
/// Copy the pixels out before doing anything else with the session.
#[derive(Debug)]
pub struct FrameSample<'a> {
    /// RGBA, `width * height` long, no padding between rows
    pub pixels: &'a [RGBA8],
    pub width: u32,
    pub height: u32,
    /// How long to display this frame, as reported by the file. May be 0.
    pub delay_ms: u32,
}

/// Creates decode sessions.
pub trait Decoder {
    type Session: DecoderSession;

    /// Returns `None` if the decoder can't open the file with the given path encoding.
    fn open(&mut self, path: &Path, encoding: PathEncoding) -> Option<Self::Session>;
}

/// Operations on one open file.
///
/// The session must not be used after `close()`. [`OwnedSession`] guarantees that.
pub trait DecoderSession {
    fn handle(&self) -> DecoderHandle;

    fn dimensions(&mut self) -> DecodeResult<(u32, u32)>;

    /// May be approximate (or 0) until [`is_index_ready`](Self::is_index_ready) returns `true`.
    fn total_frames(&mut self) -> DecodeResult<u32>;

    fn next_frame(&mut self) -> DecodeResult<FrameSample<'_>>;
    fn previous_frame(&mut self) -> DecodeResult<FrameSample<'_>>;
    fn frame(&mut self, index: u32) -> DecodeResult<FrameSample<'_>>;

    fn current_frame_index(&mut self) -> DecodeResult<u32>;
    fn seek_to_frame(&mut self, index: u32) -> DecodeResult<()>;

    /// Go back to frame 0
    fn reset(&mut self) -> DecodeResult<()>;

    fn is_index_ready(&mut self) -> DecodeResult<bool>;
    /// 0-100
    fn index_progress(&mut self) -> DecodeResult<u32>;
    fn is_building_index(&mut self) -> DecodeResult<bool>;

    /// Must be safe to call more than once.
    fn close(&mut self);
}

/// A session that is closed exactly once, when dropped.
pub struct OwnedSession<S: DecoderSession> {
    inner: S,
}

impl<S: DecoderSession> OwnedSession<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: DecoderSession> Deref for OwnedSession<S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: DecoderSession> DerefMut for OwnedSession<S> {
    #[inline]
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: DecoderSession> Drop for OwnedSession<S> {
    fn drop(&mut self) {
        log::debug!("closing decoder session {}", self.inner.handle());
        self.inner.close();
    }
}

#[test]
fn status_codes() {
    assert_eq!(Ok(()), check(0));
    assert_eq!(Err(DecodeError::FAILED), check(-1));
    assert_eq!(Some(7), check(7).err().map(DecodeError::code));
    assert!(DecoderHandle::new(0).is_none());
    assert_eq!(5, DecoderHandle::new(5).map_or(0, DecoderHandle::get));
}
