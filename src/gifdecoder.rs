//! Built-in decoder for GIF files
//!
//! Opening a file is fast: frames are decoded sequentially from the start, while a background
//! thread decodes the whole file into an index of composed frames. Until that index is complete
//! only sequential playback (and going back to frame 0) works. This is the same contract that
//! external decoder libraries follow, so the player can't tell the difference.

use crate::decoder::{DecodeError, DecodeResult, Decoder, DecoderHandle, DecoderSession, FrameSample, PathEncoding};
use crate::{Error, PlayResult};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, warn};
use rgb::RGBA8;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> DecoderHandle {
    loop {
        // skips 0 if the counter ever wraps
        if let Some(handle) = DecoderHandle::new(NEXT_HANDLE.fetch_add(1, Relaxed)) {
            return handle;
        }
    }
}

/// Opens GIF files. See the [module docs](self).
#[derive(Default)]
pub struct GifDecoder {}

impl GifDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for GifDecoder {
    type Session = GifSession;

    fn open(&mut self, path: &Path, encoding: PathEncoding) -> Option<GifSession> {
        if encoding == PathEncoding::Utf8 && path.to_str().is_none() {
            return None;
        }
        match GifSession::open(path) {
            Ok(session) => Some(session),
            Err(err) => {
                debug!("can't open {} as GIF: {err}", path.display());
                None
            },
        }
    }
}

struct IndexedFrame {
    pixels: Vec<RGBA8>,
    delay_ms: u32,
}

/// Decodes frames one after another, composing them the way a browser would
struct Stream<R: Read> {
    decoder: gif::Decoder<R>,
    screen: gif_dispose::Screen,
    pixels: Vec<RGBA8>,
    delay_ms: u32,
    /// Index of the frame in `pixels`
    decoded: Option<u32>,
}

impl<R: Read> Stream<R> {
    fn new(input: R) -> PlayResult<Self> {
        let mut gif_opts = gif::DecodeOptions::new();
        // Important:
        gif_opts.set_color_output(gif::ColorOutput::Indexed);

        let decoder = gif_opts.read_info(input)?;
        let screen = gif_dispose::Screen::new_decoder(&decoder);
        Ok(Self {
            decoder,
            screen,
            pixels: Vec::new(),
            delay_ms: 0,
            decoded: None,
        })
    }

    fn width(&self) -> u32 {
        self.decoder.width().into()
    }

    fn height(&self) -> u32 {
        self.decoder.height().into()
    }

    /// `false` at the end of the file
    fn advance(&mut self) -> PlayResult<bool> {
        let Some(frame) = self.decoder.read_next_frame()? else {
            return Ok(false);
        };
        self.screen.blit_frame(frame)?;
        // GIF delays are in 1/100s
        self.delay_ms = u32::from(frame.delay) * 10;
        self.pixels.clear();
        self.pixels.extend(self.screen.pixels_rgba().pixels());
        self.decoded = Some(self.decoded.map_or(0, |n| n + 1));
        Ok(true)
    }

    fn sample(&self) -> FrameSample<'_> {
        FrameSample {
            pixels: &self.pixels,
            width: self.width(),
            height: self.height(),
            delay_ms: self.delay_ms,
        }
    }
}

/// Reads from shared file data, and reports how far it got
struct ProgressReader {
    data: Arc<[u8]>,
    pos: usize,
    progress: Arc<AtomicU32>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        // 100 is only reported once the index is complete
        let percent = (self.pos as u64 * 100 / (self.data.len() as u64).max(1)).min(99);
        self.progress.store(percent as u32, Relaxed);
        Ok(len)
    }
}

fn build_index(input: ProgressReader, cancel: &AtomicBool) -> PlayResult<Vec<IndexedFrame>> {
    let progress = input.progress.clone();
    let mut stream = Stream::new(input)?;
    let mut frames = Vec::new();
    loop {
        if cancel.load(Relaxed) {
            return Err(Error::Aborted);
        }
        match stream.advance() {
            Ok(true) => {},
            Ok(false) => break,
            // browsers play whatever could be decoded before the damage
            Err(err) if !frames.is_empty() => {
                warn!("GIF truncated after {} frames: {err}", frames.len());
                break;
            },
            Err(err) => return Err(err),
        }
        frames.try_reserve(1)?;
        frames.push(IndexedFrame {
            pixels: stream.pixels.clone(),
            delay_ms: stream.delay_ms,
        });
    }
    progress.store(100, Relaxed);
    Ok(frames)
}

/// The background thread building the index
struct Indexer {
    progress: Arc<AtomicU32>,
    cancel: Arc<AtomicBool>,
    result: Receiver<PlayResult<Vec<IndexedFrame>>>,
    thread: Option<thread::JoinHandle<()>>,
    failed: bool,
}

impl Indexer {
    fn start(data: Arc<[u8]>) -> PlayResult<Self> {
        let progress = Arc::new(AtomicU32::new(0));
        let cancel = Arc::new(AtomicBool::new(false));
        let (sender, result) = crossbeam_channel::bounded(1);

        let input = ProgressReader { data, pos: 0, progress: progress.clone() };
        let thread_cancel = cancel.clone();
        let thread = thread::Builder::new().name("gif-index".into()).spawn(move || {
            // the session may be gone already, then nobody needs the index
            let _ = sender.send(build_index(input, &thread_cancel));
        })?;

        Ok(Self {
            progress,
            cancel,
            result,
            thread: Some(thread),
            failed: false,
        })
    }

    /// `Some` once, when the thread has finished successfully
    fn poll(&mut self) -> Option<Vec<IndexedFrame>> {
        if self.thread.is_none() {
            return None;
        }
        let res = match self.result.try_recv() {
            Ok(res) => res,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(Error::ThreadSend),
        };
        self.join();
        match res {
            Ok(frames) => Some(frames),
            Err(err) => {
                warn!("can't index GIF: {err}");
                self.failed = true;
                None
            },
        }
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    fn stop(&mut self) {
        self.cancel.store(true, Relaxed);
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                self.failed = true;
            }
        }
    }
}

/// One open GIF file
pub struct GifSession {
    handle: DecoderHandle,
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    /// Sequential decoding, used until the index is ready
    stream: Option<Stream<Cursor<Arc<[u8]>>>>,
    /// Most frames the stream has seen, as a guess of the total before the index is ready
    streamed: u32,
    frames: Option<Vec<IndexedFrame>>,
    indexer: Indexer,
    /// Frame last returned
    position: Option<u32>,
    closed: bool,
}

impl GifSession {
    fn open(path: &Path) -> PlayResult<Self> {
        let data: Arc<[u8]> = std::fs::read(path)?.into();
        let stream = Stream::new(Cursor::new(data.clone()))?;
        let handle = next_handle();
        Ok(Self {
            handle,
            width: stream.width(),
            height: stream.height(),
            indexer: Indexer::start(data.clone())?,
            data,
            stream: Some(stream),
            streamed: 0,
            frames: None,
            position: None,
            closed: false,
        })
    }

    fn check_open(&self) -> DecodeResult<()> {
        if self.closed { Err(DecodeError::CLOSED) } else { Ok(()) }
    }

    /// Switches to the index as soon as it's available
    fn poll_index(&mut self) {
        if self.frames.is_none() {
            if let Some(frames) = self.indexer.poll() {
                debug!("GIF {} indexed, {} frames", self.handle, frames.len());
                self.frames = Some(frames);
                self.stream = None;
            }
        }
    }

    fn rewind_stream(&mut self) -> DecodeResult<&mut Stream<Cursor<Arc<[u8]>>>> {
        let stream = Stream::new(Cursor::new(self.data.clone())).map_err(|err| {
            warn!("can't restart GIF {}: {err}", self.handle);
            DecodeError::FAILED
        })?;
        self.position = None;
        Ok(self.stream.insert(stream))
    }

    fn stream_next(&mut self) -> DecodeResult<()> {
        let streamed = &mut self.streamed;
        let stream = self.stream.as_mut().ok_or(DecodeError::FAILED)?;
        if stream.advance().unwrap_or(false) {
            let n = stream.decoded.unwrap_or(0);
            *streamed = (*streamed).max(n + 1);
            self.position = Some(n);
            return Ok(());
        }
        // loop back to the start
        let stream = self.rewind_stream()?;
        if !stream.advance().unwrap_or(false) {
            return Err(DecodeError::FAILED);
        }
        self.position = Some(0);
        Ok(())
    }

    fn indexed(&self, index: u32) -> DecodeResult<FrameSample<'_>> {
        let frames = self.frames.as_ref().ok_or(DecodeError::INDEX_NOT_READY)?;
        let frame = frames.get(index as usize).ok_or(DecodeError::OUT_OF_RANGE)?;
        Ok(FrameSample {
            pixels: &frame.pixels,
            width: self.width,
            height: self.height,
            delay_ms: frame.delay_ms,
        })
    }

    fn streamed_sample(&self) -> DecodeResult<FrameSample<'_>> {
        self.stream.as_ref().map(Stream::sample).ok_or(DecodeError::FAILED)
    }

    fn indexed_len(&self) -> Option<u32> {
        self.frames.as_ref().map(|f| f.len() as u32)
    }
}

impl DecoderSession for GifSession {
    fn handle(&self) -> DecoderHandle {
        self.handle
    }

    fn dimensions(&mut self) -> DecodeResult<(u32, u32)> {
        self.check_open()?;
        Ok((self.width, self.height))
    }

    fn total_frames(&mut self) -> DecodeResult<u32> {
        self.check_open()?;
        self.poll_index();
        Ok(self.indexed_len().unwrap_or(self.streamed))
    }

    fn next_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.check_open()?;
        self.poll_index();
        match self.indexed_len() {
            Some(0) => Err(DecodeError::FAILED),
            Some(len) => {
                let next = self.position.map_or(0, |p| (p + 1) % len);
                self.position = Some(next);
                self.indexed(next)
            },
            None => {
                self.stream_next()?;
                self.streamed_sample()
            },
        }
    }

    fn previous_frame(&mut self) -> DecodeResult<FrameSample<'_>> {
        self.check_open()?;
        self.poll_index();
        let len = self.indexed_len().ok_or(DecodeError::INDEX_NOT_READY)?;
        if len == 0 {
            return Err(DecodeError::FAILED);
        }
        let prev = match self.position {
            None | Some(0) => len - 1,
            Some(p) => p - 1,
        };
        self.position = Some(prev);
        self.indexed(prev)
    }

    fn frame(&mut self, index: u32) -> DecodeResult<FrameSample<'_>> {
        self.check_open()?;
        self.poll_index();
        if self.frames.is_some() {
            self.indexed(index)?;
            self.position = Some(index);
            return self.indexed(index);
        }
        if self.position == Some(index) {
            return self.streamed_sample();
        }
        if index != 0 {
            return Err(DecodeError::INDEX_NOT_READY);
        }
        self.rewind_stream()?;
        self.stream_next()?;
        self.streamed_sample()
    }

    fn current_frame_index(&mut self) -> DecodeResult<u32> {
        self.check_open()?;
        Ok(self.position.unwrap_or(0))
    }

    fn seek_to_frame(&mut self, index: u32) -> DecodeResult<()> {
        self.check_open()?;
        self.poll_index();
        match self.indexed_len() {
            Some(len) if index < len => {
                self.position = Some(index);
                Ok(())
            },
            Some(_) => Err(DecodeError::OUT_OF_RANGE),
            None if index == 0 => self.reset(),
            None => Err(DecodeError::INDEX_NOT_READY),
        }
    }

    fn reset(&mut self) -> DecodeResult<()> {
        self.check_open()?;
        self.poll_index();
        if self.frames.is_some() {
            self.position = None;
        } else {
            self.rewind_stream()?;
        }
        Ok(())
    }

    fn is_index_ready(&mut self) -> DecodeResult<bool> {
        self.check_open()?;
        self.poll_index();
        Ok(self.frames.is_some())
    }

    fn index_progress(&mut self) -> DecodeResult<u32> {
        self.check_open()?;
        Ok(self.indexer.progress.load(Relaxed))
    }

    fn is_building_index(&mut self) -> DecodeResult<bool> {
        self.check_open()?;
        self.poll_index();
        Ok(self.indexer.is_running() && !self.indexer.failed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.indexer.stop();
        self.stream = None;
        self.frames = None;
    }
}

impl Drop for GifSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) fn write_test_gif(path: &Path, num_frames: u8) {
    use std::borrow::Cow;

    let palette = [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
    let file = std::fs::File::create(path).unwrap();
    let mut enc = gif::Encoder::new(file, 2, 2, &palette).unwrap();
    for n in 0..num_frames {
        let mut frame = gif::Frame::default();
        frame.width = 2;
        frame.height = 2;
        frame.delay = 5 * (u16::from(n) + 1);
        frame.buffer = Cow::Owned(vec![n % 4; 4]);
        enc.write_frame(&frame).unwrap();
    }
}

#[cfg(test)]
fn wait_for_index(s: &mut GifSession) {
    for _ in 0..500 {
        if s.is_index_ready().unwrap() {
            return;
        }
        thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("index never became ready");
}

#[test]
fn stream_composes_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    write_test_gif(&path, 3);

    let mut stream = Stream::new(std::fs::File::open(&path).unwrap()).unwrap();
    assert_eq!((2, 2), (stream.width(), stream.height()));
    let mut delays = vec![];
    while stream.advance().unwrap() {
        delays.push(stream.delay_ms);
        assert_eq!(4, stream.pixels.len());
    }
    assert_eq!(delays, [50, 100, 150]);
    assert_eq!(Some(2), stream.decoded);
    assert_eq!(RGBA8::new(0, 255, 0, 255), stream.pixels[0]);
}

#[test]
fn index_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    write_test_gif(&path, 5);

    let data: Arc<[u8]> = std::fs::read(&path).unwrap().into();
    let progress = Arc::new(AtomicU32::new(0));
    let input = ProgressReader { data, pos: 0, progress: progress.clone() };
    let frames = build_index(input, &AtomicBool::new(false)).unwrap();
    assert_eq!(5, frames.len());
    assert_eq!(100, progress.load(Relaxed));

    let data: Arc<[u8]> = std::fs::read(&path).unwrap().into();
    let input = ProgressReader { data, pos: 0, progress: Arc::default() };
    assert!(matches!(build_index(input, &AtomicBool::new(true)), Err(Error::Aborted)));
}

#[test]
fn random_access_after_indexing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    write_test_gif(&path, 4);

    let mut dec = GifDecoder::new();
    let mut s = dec.open(&path, PathEncoding::Utf8).unwrap();
    assert_eq!(Ok((2, 2)), s.dimensions());
    wait_for_index(&mut s);
    assert_eq!(Ok(false), s.is_building_index());
    assert_eq!(Ok(100), s.index_progress());
    assert_eq!(Ok(4), s.total_frames());

    assert_eq!(RGBA8::new(0, 0, 255, 255), s.frame(3).unwrap().pixels[0]);
    assert_eq!(Ok(3), s.current_frame_index());
    assert_eq!(0, s.next_frame().unwrap().pixels[0].r);
    assert_eq!(Ok(0), s.current_frame_index());
    assert_eq!(200, s.previous_frame().unwrap().delay_ms);
    assert_eq!(Ok(3), s.current_frame_index());
    assert_eq!(Ok(()), s.seek_to_frame(1));
    assert_eq!(Err(DecodeError::OUT_OF_RANGE), s.seek_to_frame(4));
    assert_eq!(255, s.frame(1).unwrap().pixels[0].r);
    assert!(s.frame(4).is_err());
}

#[test]
fn closed_session_refuses_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    write_test_gif(&path, 2);

    let mut dec = GifDecoder::new();
    let mut s = dec.open(&path, PathEncoding::Native).unwrap();
    s.close();
    s.close();
    assert_eq!(Err(DecodeError::CLOSED), s.dimensions());
    assert!(s.next_frame().is_err());
    assert_eq!(Err(DecodeError::CLOSED), s.is_index_ready());
}

#[test]
fn not_a_gif() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anim.gif");
    std::fs::write(&path, b"not a gif at all").unwrap();
    let mut dec = GifDecoder::new();
    assert!(dec.open(&path, PathEncoding::Utf8).is_none());
    assert!(dec.open(&dir.path().join("missing.gif"), PathEncoding::Native).is_none());
}
