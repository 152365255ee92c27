/*
 gifplayer frame-accurate animated image playback
 © 2024 gifplayer contributors

 This program is free software: you can redistribute it and/or modify
 it under the terms of the GNU Affero General Public License as
 published by the Free Software Foundation, either version 3 of the
 License, or (at your option) any later version.

 This program is distributed in the hope that it will be useful,
 but WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 GNU Affero General Public License for more details.

 You should have received a copy of the GNU Affero General Public License
 along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/
//! Playback engine for animated GIF/WebP viewers.
//!
//! The [`Player`] drives a [`Decoder`](decoder::Decoder), which can be
//! the built-in [`GifDecoder`] or an external library loaded with [`NativeDecoder`].
//!
//! ```no_run
//! # fn main() -> gifplayer::PlayResult<()> {
//! use gifplayer::{GifDecoder, Player, Settings, events::NoEvents};
//! use std::time::Duration;
//!
//! let mut player = Player::new(GifDecoder::new(), Settings::default(), Box::new(NoEvents {}));
//! player.load("anim.gif")?;
//! while let Some(wait) = player.next_deadline() {
//!     std::thread::sleep(wait);
//!     player.advance(wait);
//!     let _pixels = player.surface().map(|s| s.image());
//! }
//! # Ok(()) }
//! ```

mod error;
pub use crate::error::*;
pub mod decoder;
pub mod events;
pub mod surface;
mod scheduler;
mod player;
pub use crate::player::{FrameCursor, IndexStatus, PlaybackState, Player};
mod gifdecoder;
pub use crate::gifdecoder::{GifDecoder, GifSession};
mod native;
pub use crate::native::{NativeDecoder, NativeSession};
pub mod c_api;

use std::time::Duration;

/// Playback won't go faster than this, even if the file asks for shorter delays
pub const DEFAULT_MIN_FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// How often the decoder's index status is checked
pub const DEFAULT_INDEX_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, Debug)]
pub struct Settings {
    /// Shortest time between two frames. Frame delays below this are raised to it.
    pub min_frame_interval: Duration,
    /// How often to ask the decoder whether its index is ready
    pub index_poll_interval: Duration,
    /// Start playing as soon as a file is loaded
    pub autoplay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_frame_interval: DEFAULT_MIN_FRAME_INTERVAL,
            index_poll_interval: DEFAULT_INDEX_POLL_INTERVAL,
            autoplay: true,
        }
    }
}
