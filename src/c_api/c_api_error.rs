use crate::PlayResult;
use std::fmt;
use std::io;

#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
pub enum GifplayerError {
    OK = 0,
    NULL_ARG,
    INVALID_STATE,
    NOT_FOUND,
    OPEN_FAILED,
    INVALID_INPUT,
    DECODE,
    THREAD_LOST,
    OTHER,
}

impl From<PlayResult<()>> for GifplayerError {
    #[cold]
    fn from(res: PlayResult<()>) -> Self {
        use crate::error::Error::*;
        match res {
            Ok(()) => GifplayerError::OK,
            Err(err) => match err {
                NotFound(_) => GifplayerError::NOT_FOUND,
                Open(_) | Library(_) => GifplayerError::OPEN_FAILED,
                Info(_) | EmptyImage => GifplayerError::INVALID_INPUT,
                Gif(_) | Dispose(_) => GifplayerError::DECODE,
                ThreadSend | Aborted => GifplayerError::THREAD_LOST,
                Io(ref err) => err.kind().into(),
            },
        }
    }
}

impl From<io::ErrorKind> for GifplayerError {
    #[cold]
    fn from(res: io::ErrorKind) -> Self {
        use std::io::ErrorKind as EK;
        match res {
            EK::NotFound => GifplayerError::NOT_FOUND,
            EK::InvalidInput | EK::InvalidData | EK::UnexpectedEof => GifplayerError::INVALID_INPUT,
            _ => GifplayerError::OTHER,
        }
    }
}

impl std::error::Error for GifplayerError {}

impl fmt::Display for GifplayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
