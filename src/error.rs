use crate::decoder::DecodeError;
use std::io;
use std::path::PathBuf;
use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        /// Internal error
        ThreadSend {
            display("Internal error; index thread unexpectedly aborted")
        }
        Aborted {
            display("aborted")
        }
        NotFound(path: PathBuf) {
            display("File not found: {}", path.display())
        }
        Open(path: PathBuf) {
            display("Decoder could not open {}", path.display())
        }
        Info(err: DecodeError) {
            display("Can't read image dimensions: {}", err)
        }
        EmptyImage {
            display("Image has zero width or height")
        }
        Gif(err: gif::DecodingError) {
            display("GIF decoding error: {}", err)
        }
        Dispose(err: gif_dispose::Error) {
            from()
            display("gif dispose error: {}", err)
        }
        Io(err: io::Error) {
            from()
            from(_oom: std::collections::TryReserveError) -> (io::ErrorKind::OutOfMemory.into())
            display("I/O: {}", err)
        }
        Library(err: libloading::Error) {
            from()
            display("Can't load decoder library: {}", err)
        }
    }
}

pub type PlayResult<T, E = Error> = Result<T, E>;

impl From<gif::DecodingError> for Error {
    #[cold]
    fn from(err: gif::DecodingError) -> Self {
        match err {
            gif::DecodingError::Io(err) => err.into(),
            other => Error::Gif(other),
        }
    }
}
