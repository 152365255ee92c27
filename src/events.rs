//! Notifications sent by the player
//!
//! The player calls an [`EventSink`] synchronously, from inside the control call or timer tick
//! that caused the change. Sinks must not call back into the player.

use crate::player::IndexStatus;
use crate::surface::{ImgRef, BGRA8};
use crossbeam_channel::{Receiver, Sender};

/// A new frame has been copied to the display surface
#[derive(Copy, Clone)]
pub struct FrameUpdate<'a> {
    /// Only valid for the duration of the callback. Copy it if you need it later.
    pub surface: ImgRef<'a, BGRA8>,
    pub delay_ms: u32,
    pub current_index: u32,
    /// `None` until the decoder has finished indexing the file
    pub total_frames: Option<u32>,
    pub width: u32,
    pub height: u32,
}

/// Everything in [`FrameUpdate`] except the pixels
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub delay_ms: u32,
    pub current_index: u32,
    pub total_frames: Option<u32>,
    pub width: u32,
    pub height: u32,
}

impl FrameUpdate<'_> {
    #[must_use]
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            delay_ms: self.delay_ms,
            current_index: self.current_index,
            total_frames: self.total_frames,
            width: self.width,
            height: self.height,
        }
    }
}

/// Receives player notifications.
pub trait EventSink {
    /// Called after every successful frame fetch.
    fn frame_updated(&mut self, frame: &FrameUpdate<'_>);

    /// Human-readable status line, e.g. "Paused"
    fn status_updated(&mut self, _status: &str) {}

    /// Called when index readiness or building state changes
    fn index_status_changed(&mut self, _status: IndexStatus) {}
}

/// Ignores all notifications
pub struct NoEvents {}

impl EventSink for NoEvents {
    fn frame_updated(&mut self, _frame: &FrameUpdate<'_>) {}
}

/// Owned copy of a notification, for sending elsewhere
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlayerEvent {
    FrameUpdated(FrameInfo),
    StatusUpdated(String),
    IndexStatusChanged(IndexStatus),
}

/// Forwards notifications to a channel. Pixels aren't sent; read them from [`Player::surface`](crate::Player::surface).
///
/// If the receiver is gone, events are dropped.
pub struct ChannelEvents {
    sender: Sender<PlayerEvent>,
}

impl ChannelEvents {
    #[must_use]
    pub fn new() -> (Self, Receiver<PlayerEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEvents {
    fn frame_updated(&mut self, frame: &FrameUpdate<'_>) {
        let _ = self.sender.send(PlayerEvent::FrameUpdated(frame.info()));
    }

    fn status_updated(&mut self, status: &str) {
        let _ = self.sender.send(PlayerEvent::StatusUpdated(status.into()));
    }

    fn index_status_changed(&mut self, status: IndexStatus) {
        let _ = self.sender.send(PlayerEvent::IndexStatusChanged(status));
    }
}
