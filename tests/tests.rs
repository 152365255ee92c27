use crossbeam_channel::Receiver;
use gifplayer::decoder::*;
use gifplayer::events::{ChannelEvents, PlayerEvent};
use gifplayer::{Error, GifDecoder, PlaybackState, Player, Settings};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default, Debug)]
struct CallLog {
    opened: Vec<PathEncoding>,
    seeks: Vec<u32>,
    closes: u32,
    calls_after_close: u32,
}

#[derive(Clone)]
struct Script {
    frames: u32,
    size: (u32, u32),
    delay_ms: u32,
    /// Answers to successive (is_index_ready, is_building_index) polls. The last one repeats.
    index_polls: Vec<(bool, bool)>,
    accepts: Vec<PathEncoding>,
    dimensions_fail: bool,
    total_fails_when_ready: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            frames: 10,
            size: (4, 2),
            delay_ms: 20,
            index_polls: vec![(true, false)],
            accepts: PathEncoding::ALL.to_vec(),
            dimensions_fail: false,
            total_fails_when_ready: false,
        }
    }
}

/// Behaves like a decoder that builds its index in the background, on a script
struct ScriptedDecoder {
    script: Script,
    log: Rc<RefCell<CallLog>>,
    handles: u64,
}

impl Decoder for ScriptedDecoder {
    type Session = ScriptedSession;

    fn open(&mut self, _path: &Path, encoding: PathEncoding) -> Option<ScriptedSession> {
        self.log.borrow_mut().opened.push(encoding);
        if !self.script.accepts.contains(&encoding) {
            return None;
        }
        self.handles += 1;
        Some(ScriptedSession {
            ready: self.script.index_polls.first().map_or(false, |p| p.0),
            script: self.script.clone(),
            log: self.log.clone(),
            handle: DecoderHandle::new(self.handles).unwrap(),
            position: None,
            polls: 0,
            buffer: Vec::new(),
            closed: false,
        })
    }
}

struct ScriptedSession {
    script: Script,
    log: Rc<RefCell<CallLog>>,
    handle: DecoderHandle,
    position: Option<u32>,
    polls: usize,
    /// Random access works
    ready: bool,
    /// Reused for every frame, like a real decoder's buffer
    buffer: Vec<RGBA8>,
    closed: bool,
}

impl ScriptedSession {
    fn enter(&mut self) -> DecodeResult<()> {
        if self.closed {
            self.log.borrow_mut().calls_after_close += 1;
            return Err(DecodeError::CLOSED);
        }
        // any call invalidates the last sample
        self.buffer.iter_mut().for_each(|px| *px = RGBA8::new(0xEE, 0xEE, 0xEE, 0xEE));
        Ok(())
    }

    fn poll_answer(&self) -> (bool, bool) {
        let polls = &self.script.index_polls;
        polls[self.polls.saturating_sub(1).min(polls.len() - 1)]
    }

    fn render(&mut self, index: u32) -> DecodeResult<FrameSample<'_>> {
        self.position = Some(index);
        let (width, height) = self.script.size;
        self.buffer.clear();
        self.buffer.resize((width * height) as usize, RGBA8::new(index as u8, 10, 20, 255));
        Ok(FrameSample {
            pixels: &self.buffer,
            width,
            height,
            delay_ms: self.script.delay_ms,
        })
    }
}

impl DecoderSession for ScriptedSession {
    fn handle(&self) -> DecoderHandle {
        self.handle
    }

    fn dimensions(&mut self) -> DecodeResult<(u32, u32)> {
        self.enter()?;
        if self.script.dimensions_fail {
            return Err(DecodeError::FAILED);
        }
        Ok(self.script.size)
    }

    fn total_frames(&mut self) -> DecodeResult<u32> {
        self.enter()?;
        match (self.ready, self.script.total_fails_when_ready) {
            (true, true) => Err(DecodeError::FAILED),
            (true, false) => Ok(self.script.frames),
            (false, _) => Ok(self.position.map_or(0, |p| p + 1)),
        }
    }

    fn next_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.enter()?;
        let next = match self.position {
            Some(p) if p + 1 < self.script.frames => p + 1,
            _ => 0,
        };
        self.render(next)
    }

    fn previous_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.enter()?;
        if !self.ready {
            return Err(DecodeError::INDEX_NOT_READY);
        }
        let prev = match self.position {
            None | Some(0) => self.script.frames - 1,
            Some(p) => p - 1,
        };
        self.render(prev)
    }

    fn frame(&mut self, index: u32) -> DecodeResult<FrameSample<'_>> {
        self.enter()?;
        if index >= self.script.frames {
            return Err(DecodeError::OUT_OF_RANGE);
        }
        if !self.ready && index != 0 && self.position != Some(index) {
            return Err(DecodeError::INDEX_NOT_READY);
        }
        self.render(index)
    }

    fn current_frame_index(&mut self) -> DecodeResult<u32> {
        self.enter()?;
        Ok(self.position.unwrap_or(0))
    }

    fn seek_to_frame(&mut self, index: u32) -> DecodeResult<()> {
        self.enter()?;
        self.log.borrow_mut().seeks.push(index);
        if !self.ready {
            return Err(DecodeError::INDEX_NOT_READY);
        }
        if index >= self.script.frames {
            return Err(DecodeError::OUT_OF_RANGE);
        }
        self.position = Some(index);
        Ok(())
    }

    fn reset(&mut self) -> DecodeResult<()> {
        self.enter()?;
        self.position = None;
        Ok(())
    }

    fn is_index_ready(&mut self) -> DecodeResult<bool> {
        self.enter()?;
        self.polls += 1;
        self.ready = self.poll_answer().0;
        Ok(self.ready)
    }

    fn index_progress(&mut self) -> DecodeResult<u32> {
        self.enter()?;
        Ok(if self.ready { 100 } else { (self.polls as u32 * 10).min(99) })
    }

    fn is_building_index(&mut self) -> DecodeResult<bool> {
        self.enter()?;
        Ok(self.poll_answer().1)
    }

    fn close(&mut self) {
        self.log.borrow_mut().closes += 1;
        self.closed = true;
    }
}

struct Harness {
    player: Player<ScriptedDecoder>,
    events: Receiver<PlayerEvent>,
    log: Rc<RefCell<CallLog>>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(script: Script, autoplay: bool) -> Self {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let decoder = ScriptedDecoder { script, log: log.clone(), handles: 0 };
        let (sink, events) = ChannelEvents::new();
        let settings = Settings { autoplay, ..Settings::default() };
        Self {
            player: Player::new(decoder, settings, Box::new(sink)),
            events,
            log,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn loaded(script: Script, autoplay: bool) -> Self {
        let mut h = Self::new(script, autoplay);
        let path = h.file("anim.gif");
        h.player.load(path).unwrap();
        h
    }

    /// The scripted decoder doesn't read it, but the player wants it to exist
    fn file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"GIF89a").unwrap();
        path
    }

    fn advance_ms(&mut self, ms: u64) {
        self.player.advance(Duration::from_millis(ms));
    }

    fn drain(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }

    /// Indices of frames displayed since the last drain
    fn shown(&self) -> Vec<u32> {
        self.drain().into_iter().filter_map(|e| match e {
            PlayerEvent::FrameUpdated(info) => Some(info.current_index),
            _ => None,
        }).collect()
    }

    fn current(&self) -> u32 {
        self.player.cursor().current_index
    }

    /// Red channel of the displayed frame, which the scripted decoder sets to the frame index
    fn displayed(&self) -> u8 {
        self.player.surface().unwrap().image().buf()[0].r
    }
}

fn statuses(events: &[PlayerEvent]) -> Vec<&str> {
    events.iter().filter_map(|e| match e {
        PlayerEvent::StatusUpdated(s) => Some(s.as_str()),
        _ => None,
    }).collect()
}

#[test]
fn autoplay_cycles_through_all_frames() {
    let mut h = Harness::loaded(Script::default(), true);
    assert_eq!(PlaybackState::Playing, h.player.state());
    assert_eq!(statuses(&h.drain()), ["Loaded: anim.gif", "Playing..."]);

    // first tick after 16ms, then every 20ms (the frame delay)
    h.advance_ms(16 + 10 * 20);
    assert_eq!(h.shown(), [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
    assert_eq!(0, h.displayed());
}

#[test]
fn short_delays_play_at_the_floor() {
    for delay_ms in [0, 5] {
        let script = Script { delay_ms, index_polls: vec![(false, true)], ..Script::default() };
        let mut h = Harness::loaded(script, true);
        h.drain();

        h.advance_ms(16);
        assert_eq!(h.shown(), [0]);
        assert_eq!(Some(Duration::from_millis(16)), h.player.next_deadline());
        h.advance_ms(15);
        assert!(h.shown().is_empty());
        h.advance_ms(1);
        assert_eq!(h.shown(), [1]);
        h.advance_ms(3 * 16);
        assert_eq!(h.shown(), [2, 3, 4]);
    }
}

#[test]
fn seek_waits_for_index() {
    let script = Script {
        frames: 42,
        index_polls: vec![(false, true), (false, true), (false, true), (true, false)],
        ..Script::default()
    };
    let mut h = Harness::loaded(script, false);
    assert_eq!(PlaybackState::Ready, h.player.state());
    h.drain();

    h.player.seek_to_frame(41);
    assert_eq!(PlaybackState::Ready, h.player.state());
    assert_eq!(0, h.current());
    assert!(h.drain().is_empty());

    h.advance_ms(3 * 500);
    assert!(!h.player.index_status().ready);
    assert!(h.player.index_status().building);
    h.player.seek_to_frame(41);
    assert_eq!(0, h.current());
    assert!(h.shown().is_empty());
    assert_eq!(None, h.player.cursor().total_frames);

    h.advance_ms(500);
    assert!(h.player.index_status().ready);
    assert_eq!(Some(42), h.player.cursor().total_frames);
    assert_eq!((false, false), h.player.timers_running());
    assert_eq!(h.shown(), [0]);

    h.player.seek_to_frame(41);
    assert_eq!(41, h.current());
    assert_eq!(41, h.displayed());
    assert_eq!(PlaybackState::Paused, h.player.state());
    assert_eq!(h.log.borrow().seeks, [41]);
}

#[test]
fn previous_while_playing_pauses() {
    let mut h = Harness::loaded(Script::default(), true);
    h.advance_ms(16 + 3 * 20);
    assert_eq!(3, h.current());

    h.player.previous_frame();
    assert_eq!(PlaybackState::Paused, h.player.state());
    assert_eq!(2, h.current());
    assert_eq!(2, h.displayed());
    assert!(!h.player.timers_running().0);

    // index monitor shows frame 0 once the count is known, then previous wraps
    h.advance_ms(500);
    assert_eq!(Some(10), h.player.cursor().total_frames);
    assert_eq!(0, h.current());
    h.player.previous_frame();
    assert_eq!(9, h.current());
    assert_eq!(PlaybackState::Paused, h.player.state());
}

#[test]
fn index_ready_never_reverts() {
    let script = Script {
        index_polls: vec![(false, true), (true, true), (false, true), (true, false)],
        ..Script::default()
    };
    let mut h = Harness::loaded(script, false);
    h.drain();

    h.advance_ms(2 * 500);
    assert!(h.player.index_status().ready);
    assert_eq!(None, h.player.cursor().total_frames);
    // the decoder takes it back, the player doesn't
    h.advance_ms(500);
    assert!(h.player.index_status().ready);
    h.advance_ms(500);
    assert_eq!(Some(10), h.player.cursor().total_frames);

    let ready: Vec<bool> = h.drain().into_iter().filter_map(|e| match e {
        PlayerEvent::IndexStatusChanged(s) => Some(s.ready),
        _ => None,
    }).collect();
    assert_eq!(ready, [false, true, true]);
}

#[test]
fn every_frame_seekable_once_counted() {
    let mut h = Harness::loaded(Script::default(), false);
    h.advance_ms(500);
    assert_eq!(Some(10), h.player.cursor().total_frames);

    for n in 0..10 {
        h.player.seek_to_frame(n);
        assert_eq!(n, h.current());
        assert_eq!(n as u8, h.displayed());
    }
    h.player.seek_to_frame(10);
    assert_eq!(9, h.current());
    assert_eq!(h.log.borrow().seeks, (0..10).collect::<Vec<_>>());
}

#[test]
fn no_seek_or_wrap_before_index() {
    let script = Script {
        index_polls: vec![(false, true)],
        ..Script::default()
    };
    let mut h = Harness::loaded(script, true);
    h.drain();

    // at frame 0 there's nothing to go back to yet
    h.player.previous_frame();
    assert_eq!(PlaybackState::Playing, h.player.state());
    h.player.seek_to_frame(3);
    assert_eq!(PlaybackState::Playing, h.player.state());
    assert!(h.drain().is_empty());

    h.advance_ms(16);
    assert_eq!(h.shown(), [0]);
    for _ in 0..9 {
        h.player.next_frame();
    }
    assert_eq!(9, h.current());
    assert_eq!(PlaybackState::Paused, h.player.state());

    // the decoder's own next frame, no seek from the player
    h.player.next_frame();
    assert_eq!(0, h.current());
    assert!(h.log.borrow().seeks.is_empty());
}

#[test]
fn step_wraps_at_both_ends() {
    let mut h = Harness::loaded(Script::default(), false);
    h.advance_ms(500);

    h.player.seek_to_frame(9);
    h.player.next_frame();
    assert_eq!(0, h.current());
    assert_eq!(0, h.displayed());
    h.player.previous_frame();
    assert_eq!(9, h.current());
    assert_eq!(9, h.displayed());
    assert_eq!(h.log.borrow().seeks, [9, 0, 9]);
}

#[test]
fn manual_control_pauses() {
    let mut h = Harness::loaded(Script::default(), true);
    h.advance_ms(16);

    h.player.next_frame();
    assert_eq!(PlaybackState::Paused, h.player.state());
    assert!(!h.player.timers_running().0);
    assert_eq!(1, h.current());

    h.player.play();
    assert!(h.player.is_playing());
    h.advance_ms(484);
    assert_eq!(Some(10), h.player.cursor().total_frames);
    h.player.seek_to_frame(5);
    assert_eq!(PlaybackState::Paused, h.player.state());
    assert_eq!(5, h.current());

    h.player.play();
    h.drain();
    h.player.reset_to_first_frame();
    assert_eq!(PlaybackState::Paused, h.player.state());
    assert_eq!(0, h.current());
    assert_eq!(0, h.displayed());
    assert_eq!(statuses(&h.drain()), ["Reset to first frame"]);

    assert_eq!(None, h.player.next_deadline());
    h.advance_ms(1000);
    assert!(h.shown().is_empty());
}

#[test]
fn failed_fetch_keeps_last_frame() {
    let script = Script {
        index_polls: vec![(false, true)],
        ..Script::default()
    };
    let mut h = Harness::loaded(script, false);
    h.player.next_frame();
    h.player.next_frame();
    assert_eq!(1, h.current());
    assert_eq!(1, h.displayed());

    // the decoder overwrites its buffer and then refuses
    h.player.previous_frame();
    assert_eq!(1, h.current());
    let px = h.player.surface().unwrap().image().buf()[0];
    assert_eq!((1, 10, 20, 255), (px.r, px.g, px.b, px.a));
}

#[test]
fn dispose_is_idempotent() {
    let mut h = Harness::loaded(Script::default(), true);
    h.advance_ms(16);
    h.player.dispose();
    h.player.dispose();
    assert_eq!(PlaybackState::Closed, h.player.state());
    assert_eq!((false, false), h.player.timers_running());
    assert!(h.player.surface().is_none());

    h.player.play();
    h.player.next_frame();
    h.advance_ms(1000);
    assert_eq!(PlaybackState::Closed, h.player.state());

    let log = h.log.clone();
    drop(h);
    assert_eq!(1, log.borrow().closes);
    assert_eq!(0, log.borrow().calls_after_close);
}

#[test]
fn falls_back_to_native_path() {
    let script = Script {
        accepts: vec![PathEncoding::Native],
        ..Script::default()
    };
    let h = Harness::loaded(script, false);
    assert_eq!(h.log.borrow().opened, [PathEncoding::Utf8, PathEncoding::Native]);
    assert!(h.player.is_loaded());
}

#[test]
fn missing_file() {
    // the decoder would accept it, but it's never asked
    let mut h = Harness::new(Script::default(), true);
    let path = h.dir.path().join("anim.gif");
    let res = h.player.load(&path);
    assert!(matches!(res, Err(Error::NotFound(_))));
    assert_eq!(statuses(&h.drain()), ["File not found"]);
    assert_eq!(PlaybackState::Unloaded, h.player.state());
    assert!(!h.player.is_loaded());
    assert!(h.log.borrow().opened.is_empty());
}

#[test]
fn rejected_file() {
    let script = Script { accepts: vec![], ..Script::default() };
    let mut h = Harness::new(script, true);
    let path = h.file("anim.gif");
    assert!(matches!(h.player.load(&path), Err(Error::Open(_))));
    assert_eq!(statuses(&h.drain()), ["Failed to load file"]);
    assert!(!h.player.is_loaded());
    assert_eq!(h.log.borrow().opened, PathEncoding::ALL);
}

#[test]
fn bad_info_closes_session() {
    let script = Script { dimensions_fail: true, ..Script::default() };
    let mut h = Harness::new(script, true);
    let path = h.file("anim.gif");
    assert!(matches!(h.player.load(&path), Err(Error::Info(_))));
    assert_eq!(statuses(&h.drain()), ["Failed to read image info"]);
    assert_eq!(1, h.log.borrow().closes);
    assert_eq!(PlaybackState::Unloaded, h.player.state());

    let script = Script { size: (0, 4), ..Script::default() };
    let mut h = Harness::new(script, true);
    let path = h.file("anim.gif");
    assert!(matches!(h.player.load(&path), Err(Error::EmptyImage)));
    assert_eq!(1, h.log.borrow().closes);
    assert_eq!(None, h.player.next_deadline());
}

#[test]
fn loading_again_closes_previous() {
    let mut h = Harness::loaded(Script::default(), true);
    h.advance_ms(16 + 20);
    let first = h.player.handle();
    assert_eq!(1, h.current());

    let other = h.file("other.gif");
    h.player.load(other).unwrap();
    assert_eq!(1, h.log.borrow().closes);
    assert_ne!(first, h.player.handle());
    assert_eq!(0, h.current());
    assert_eq!(None, h.player.cursor().total_frames);
    assert!(!h.player.index_status().ready);
    assert_eq!(0, h.log.borrow().calls_after_close);
}

#[test]
fn ready_without_count() {
    let script = Script { total_fails_when_ready: true, ..Script::default() };
    let mut h = Harness::loaded(script, false);
    h.drain();
    h.advance_ms(500);
    assert!(h.player.index_status().ready);
    assert_eq!(None, h.player.cursor().total_frames);
    assert_eq!(h.shown(), [0]);

    h.player.seek_to_frame(3);
    assert_eq!(0, h.current());
    assert!(h.log.borrow().seeks.is_empty());
}

fn write_gif(path: &Path, num_frames: u8) {
    let palette = [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
    let file = std::fs::File::create(path).unwrap();
    let mut enc = gif::Encoder::new(file, 3, 2, &palette).unwrap();
    for n in 0..num_frames {
        let mut frame = gif::Frame::default();
        frame.width = 3;
        frame.height = 2;
        frame.delay = 2;
        frame.buffer = vec![n % 4; 6].into();
        enc.write_frame(&frame).unwrap();
    }
}

#[test]
fn plays_gif_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    write_gif(&path, 4);

    let (sink, events) = ChannelEvents::new();
    let settings = Settings {
        index_poll_interval: Duration::from_millis(10),
        ..Settings::default()
    };
    let mut player = Player::new(GifDecoder::new(), settings, Box::new(sink));
    player.load(&path).unwrap();
    assert_eq!(Some((3, 2)), player.surface().map(|s| (s.width(), s.height())));

    for _ in 0..1000 {
        if player.cursor().total_frames.is_some() {
            break;
        }
        let wait = player.next_deadline().unwrap();
        std::thread::sleep(wait);
        player.advance(wait);
    }
    assert_eq!(Some(4), player.cursor().total_frames);
    assert!(events.try_iter().any(|e| matches!(e, PlayerEvent::FrameUpdated(_))));

    player.seek_to_frame(3);
    assert_eq!(3, player.cursor().current_index);
    let px = player.surface().unwrap().image().buf()[0];
    assert_eq!((0, 0, 255, 255), (px.r, px.g, px.b, px.a));

    player.next_frame();
    assert_eq!(0, player.cursor().current_index);
    let px = player.surface().unwrap().image().buf()[5];
    assert_eq!((0, 0, 0, 255), (px.r, px.g, px.b, px.a));
    player.dispose();
}
