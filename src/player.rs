//! The playback engine
//!
//! [`Player`] owns one decoder session at a time, the surface frames are copied into,
//! and two timers: playback (one frame per tick) and the index monitor (polls the decoder
//! until its seek index is complete). Both timers are driven by [`Player::advance`],
//! on the caller's thread, so no two of them ever run at the same time.

use crate::decoder::{Decoder, DecoderHandle, DecoderSession, OwnedSession, PathEncoding};
use crate::events::{EventSink, FrameUpdate};
use crate::scheduler::Scheduler;
use crate::surface::DisplaySurface;
use crate::{Error, PlayResult, Settings};
use log::{debug, info, trace, warn};
use std::path::Path;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlaybackState {
    /// Nothing loaded yet, or the last load failed
    Unloaded,
    /// Loaded, not started
    Ready,
    Playing,
    Paused,
    /// Disposed. Only `load()` does anything now.
    Closed,
}

/// What the decoder has reported about its seek index
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexStatus {
    /// Once `true`, stays `true` for the rest of the session
    pub ready: bool,
    pub building: bool,
    /// 0-100
    pub progress: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameCursor {
    /// As reported by the decoder after the last fetch
    pub current_index: u32,
    /// `None` until the index is complete
    pub total_frames: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Loop {
    Playback,
    IndexMonitor,
}

#[derive(Copy, Clone, Debug)]
enum Fetch {
    Next,
    Previous,
    At(u32),
}

struct Loaded<S: DecoderSession> {
    session: OwnedSession<S>,
    surface: DisplaySurface,
}

pub struct Player<D: Decoder> {
    decoder: D,
    settings: Settings,
    events: Box<dyn EventSink>,
    timers: Scheduler<Loop>,
    loaded: Option<Loaded<D::Session>>,
    state: PlaybackState,
    cursor: FrameCursor,
    index: IndexStatus,
}

impl<D: Decoder> Player<D> {
    pub fn new(decoder: D, settings: Settings, events: Box<dyn EventSink>) -> Self {
        let mut timers = Scheduler::new();
        // playback is registered first, so it wins ties with the monitor
        timers.register(Loop::Playback, settings.min_frame_interval);
        timers.register(Loop::IndexMonitor, settings.index_poll_interval);
        Self {
            decoder,
            settings,
            events,
            timers,
            loaded: None,
            state: PlaybackState::Unloaded,
            cursor: FrameCursor::default(),
            index: IndexStatus::default(),
        }
    }

    /// Opens the file, closing whatever was open before.
    ///
    /// Starts polling the decoder's index, and starts playing if [`Settings::autoplay`] is set.
    /// On error the player is left `Unloaded`.
    pub fn load(&mut self, path: impl AsRef<Path>) -> PlayResult<()> {
        let path = path.as_ref();
        self.unload();

        if !path.exists() {
            self.status("File not found");
            return Err(Error::NotFound(path.into()));
        }
        let Some(session) = self.open(path) else {
            self.status("Failed to load file");
            return Err(Error::Open(path.into()));
        };
        // closes the session if anything below fails
        let mut session = OwnedSession::new(session);

        let (width, height) = match session.dimensions() {
            Ok(dimensions) => dimensions,
            Err(err) => {
                self.status("Failed to read image info");
                return Err(Error::Info(err));
            },
        };
        if width == 0 || height == 0 {
            self.status("Failed to read image info");
            return Err(Error::EmptyImage);
        }
        debug!("opened {} as {} ({width}x{height})", path.display(), session.handle());
        let surface = match DisplaySurface::new(width, height) {
            Ok(surface) => surface,
            Err(err) => {
                self.status("Image is too large");
                return Err(err);
            },
        };

        self.cursor = FrameCursor::default();
        self.index = IndexStatus::default();
        self.loaded = Some(Loaded { session, surface });
        self.state = PlaybackState::Ready;
        self.timers.set_interval(Loop::IndexMonitor, self.settings.index_poll_interval);
        self.timers.start(Loop::IndexMonitor);

        let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
        self.status(&format!("Loaded: {name}"));

        if self.settings.autoplay {
            self.play();
        }
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Option<D::Session> {
        for encoding in PathEncoding::ALL {
            if let Some(session) = self.decoder.open(path, encoding) {
                if encoding != PathEncoding::Utf8 {
                    warn!("{} could only be opened using {encoding:?} path encoding", path.display());
                }
                return Some(session);
            }
            debug!("decoder rejected {} with {encoding:?} path encoding", path.display());
        }
        None
    }

    /// Starts the playback timer. Does nothing if nothing is loaded or it's already playing.
    pub fn play(&mut self) {
        if self.loaded.is_none() || self.state == PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Playing;
        self.timers.set_interval(Loop::Playback, self.settings.min_frame_interval);
        self.timers.start(Loop::Playback);
        self.status("Playing...");
    }

    /// Stops the playback timer, keeping the current frame.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.stop_playback();
        self.status("Paused");
    }

    /// Manual stepping always stops playback first, otherwise the next tick would overwrite the requested frame
    fn stop_playback(&mut self) {
        self.timers.stop(Loop::Playback);
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Ready) {
            self.state = PlaybackState::Paused;
        }
    }

    /// Pauses and shows the next frame. After the last frame it goes back to frame 0,
    /// but only once the total number of frames is known.
    pub fn next_frame(&mut self) {
        if self.loaded.is_none() {
            return;
        }
        if let Some(total) = self.known_total_frames() {
            if self.cursor.current_index >= total.saturating_sub(1) {
                self.seek_to_frame(0);
                return;
            }
        }
        self.stop_playback();
        self.fetch(Fetch::Next);
    }

    /// Pauses and shows the previous frame. From frame 0 it wraps to the last frame,
    /// which does nothing until the total number of frames is known.
    pub fn previous_frame(&mut self) {
        if self.loaded.is_none() {
            return;
        }
        if self.cursor.current_index == 0 {
            match self.known_total_frames() {
                Some(total) if total > 0 => self.seek_to_frame(total - 1),
                _ => trace!("can't wrap to the last frame before the index is ready"),
            }
            return;
        }
        self.stop_playback();
        self.fetch(Fetch::Previous);
    }

    /// Pauses and shows the given frame (0-based).
    ///
    /// Ignored until the index is ready, and for frames past the end.
    pub fn seek_to_frame(&mut self, index: u32) {
        if self.loaded.is_none() {
            return;
        }
        let Some(total) = self.known_total_frames() else {
            trace!("seek to {index} ignored, index isn't ready");
            return;
        };
        if index >= total {
            trace!("seek to {index} ignored, there are {total} frames");
            return;
        }
        self.stop_playback();

        let Some(loaded) = self.loaded.as_mut() else { return };
        if let Err(err) = loaded.session.seek_to_frame(index) {
            trace!("seek to {index} failed: {err}");
            return;
        }
        self.fetch(Fetch::At(index));
    }

    /// Pauses and shows frame 0. Works before the index is ready.
    pub fn reset_to_first_frame(&mut self) {
        if self.loaded.is_none() {
            return;
        }
        self.stop_playback();

        let Some(loaded) = self.loaded.as_mut() else { return };
        if let Err(err) = loaded.session.reset() {
            trace!("reset failed: {err}");
            return;
        }
        self.cursor.current_index = 0;
        self.status("Reset to first frame");
        self.fetch(Fetch::At(0));
    }

    /// Stops both timers and closes the decoder session. Safe to call more than once.
    pub fn dispose(&mut self) {
        // the timers must be stopped before the session goes away
        self.timers.stop_all();
        if let Some(loaded) = self.loaded.take() {
            debug!("disposing player for {}", loaded.session.handle());
            drop(loaded);
        }
        self.state = PlaybackState::Closed;
    }

    /// Like `dispose()`, but leaves the player ready for another `load()`
    fn unload(&mut self) {
        self.timers.stop_all();
        self.loaded = None;
        self.state = PlaybackState::Unloaded;
    }

    /// Runs both timers for `elapsed` time. Callbacks run here, one at a time, in the order they were due.
    pub fn advance(&mut self, elapsed: Duration) {
        let deadline = self.timers.now() + elapsed;
        while let Some(timer) = self.timers.fire_next(deadline) {
            match timer {
                Loop::Playback => self.playback_tick(),
                Loop::IndexMonitor => self.index_monitor_tick(),
            }
        }
        self.timers.advance_to(deadline);
    }

    /// How long until a timer needs to run. `None` if both are stopped.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = self.timers.now();
        self.timers.next_due().map(|due| due.saturating_sub(now))
    }

    fn playback_tick(&mut self) {
        if self.state != PlaybackState::Playing {
            self.timers.stop(Loop::Playback);
            return;
        }
        if let Some(delay_ms) = self.fetch(Fetch::Next) {
            let delay = Duration::from_millis(delay_ms.into()).max(self.settings.min_frame_interval);
            self.timers.set_interval(Loop::Playback, delay);
        }
    }

    fn index_monitor_tick(&mut self) {
        let Some(loaded) = self.loaded.as_mut() else {
            self.timers.stop(Loop::IndexMonitor);
            return;
        };
        let session = &mut loaded.session;
        let reported = IndexStatus {
            // the decoder can't take readiness back
            ready: session.is_index_ready().unwrap_or(false) || self.index.ready,
            building: session.is_building_index().unwrap_or(false),
            progress: session.index_progress().unwrap_or(0).min(100),
        };
        let changed = reported.ready != self.index.ready || reported.building != self.index.building;
        self.index = reported;
        if changed {
            self.events.index_status_changed(reported);
        }

        if reported.ready && !reported.building {
            self.timers.stop(Loop::IndexMonitor);
            match loaded.session.total_frames() {
                Ok(total) => {
                    info!("index of {} is ready, {total} frames", loaded.session.handle());
                    self.cursor.total_frames = Some(total);
                },
                Err(err) => warn!("index is ready, but the frame count isn't: {err}"),
            }
            self.fetch(Fetch::At(0));
        }
    }

    /// Gets a frame from the decoder and copies it to the surface.
    ///
    /// Returns the frame's delay, or `None` if the decoder had no frame to give (it's not an error).
    fn fetch(&mut self, which: Fetch) -> Option<u32> {
        let loaded = self.loaded.as_mut()?;
        let sample = match which {
            Fetch::Next => loaded.session.next_frame(),
            Fetch::Previous => loaded.session.previous_frame(),
            Fetch::At(index) => loaded.session.frame(index),
        };
        let sample = match sample {
            Ok(sample) => sample,
            Err(err) => {
                trace!("{which:?} frame skipped: {err}");
                return None;
            },
        };
        let delay_ms = sample.delay_ms;
        // consumes the sample, so the decoder's buffer is released before the next decoder call
        if !loaded.surface.copy_from(sample) {
            trace!("{which:?} frame skipped: unusable pixels");
            return None;
        }

        let fallback = match which {
            Fetch::At(index) => index,
            Fetch::Next | Fetch::Previous => self.cursor.current_index,
        };
        self.cursor.current_index = loaded.session.current_frame_index().unwrap_or(fallback);

        let surface = &loaded.surface;
        self.events.frame_updated(&FrameUpdate {
            surface: surface.image(),
            delay_ms,
            current_index: self.cursor.current_index,
            total_frames: self.cursor.total_frames,
            width: surface.width(),
            height: surface.height(),
        });
        Some(delay_ms)
    }

    fn status(&mut self, status: &str) {
        self.events.status_updated(status);
    }

    /// Total frames, if the index is ready and the count is authoritative
    fn known_total_frames(&self) -> Option<u32> {
        if self.index.ready { self.cursor.total_frames } else { None }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    #[inline]
    #[must_use]
    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    #[inline]
    #[must_use]
    pub fn index_status(&self) -> IndexStatus {
        self.index
    }

    /// The last displayed frame. `None` when nothing is loaded.
    #[must_use]
    pub fn surface(&self) -> Option<&DisplaySurface> {
        self.loaded.as_ref().map(|l| &l.surface)
    }

    #[must_use]
    pub fn handle(&self) -> Option<DecoderHandle> {
        self.loaded.as_ref().map(|l| l.session.handle())
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether each timer is running: (playback, index monitor)
    #[must_use]
    pub fn timers_running(&self) -> (bool, bool) {
        (self.timers.is_running(Loop::Playback), self.timers.is_running(Loop::IndexMonitor))
    }

    #[must_use]
    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<D: Decoder> Drop for Player<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}
