use std::{
    error::Error,
    fmt,
    fs::File,
    io::{self, BufReader, Cursor, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

/// Source of the saved image archive.
///
/// Every call to [`open`](Opener::open) must return an independent stream
/// positioned at the beginning of the archive, and all the streams must
/// produce the same bytes. The archive is read twice for each extraction:
/// once to locate the layer, and again to extract the file.
///
/// Any closure returning `io::Result<impl Read>` is an `Opener`.
pub trait Opener {
    type Reader: Read;

    fn open(&self) -> io::Result<Self::Reader>;
}

impl<F, R> Opener for F
where
    F: Fn() -> io::Result<R>,
    R: Read,
{
    type Reader = R;

    fn open(&self) -> io::Result<R> {
        self()
    }
}

/// [`Opener`] for an archive held in memory.
#[derive(Clone, Debug)]
pub struct BytesOpener(Arc<[u8]>);

impl BytesOpener {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        BytesOpener(data.into())
    }
}

impl Opener for BytesOpener {
    type Reader = Cursor<Arc<[u8]>>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(Cursor::new(Arc::clone(&self.0)))
    }
}

/// [`Opener`] for an archive stored in a file, like the output of
/// `docker save -o`.
///
/// The file is opened again on every call.
#[derive(Clone, Debug)]
pub struct FileOpener(PathBuf);

impl FileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileOpener(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Opener for FileOpener {
    type Reader = BufReader<File>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(BufReader::new(File::open(&self.0)?))
    }
}

/// [`Opener`] for a stream that can only be read once, like the pipe
/// from `docker save`.
///
/// The stream is copied to a temporary file, which is deleted when this
/// instance is dropped. Each call to `open` gets its own file handle.
pub struct SpooledOpener {
    file: tempfile::NamedTempFile,
}

impl SpooledOpener {
    /// Read `reader` until EOF and store its contents.
    pub fn new(mut reader: impl Read) -> io::Result<Self> {
        let mut file = tempfile::NamedTempFile::new()?;
        io::copy(&mut reader, &mut file)?;
        file.flush()?;

        Ok(SpooledOpener { file })
    }
}

impl Opener for SpooledOpener {
    type Reader = BufReader<File>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(BufReader::new(self.file.reopen()?))
    }
}

/// I/O error from the stream returned by an [`Opener`].
///
/// Errors are wrapped in this type before reaching the tar reader, so
/// they can be told apart from errors in the archive format.
#[derive(Debug)]
struct SourceError(io::Error);

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

/// Wrap errors from `reader` in a [`SourceError`].
pub(crate) struct SourceReader<R>(pub R);

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0
            .read(buf)
            .map_err(|e| io::Error::new(e.kind(), SourceError(e)))
    }
}

pub(crate) fn is_source_error(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|e| e.is::<SourceError>())
}

/// If `err` was emitted by a [`SourceReader`], return the original error.
pub(crate) fn into_source_error(err: io::Error) -> Result<io::Error, io::Error> {
    if !is_source_error(&err) {
        return Err(err);
    }

    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<SourceError>()) {
        Some(Ok(source)) => Ok(source.0),
        Some(Err(inner)) => Err(io::Error::new(kind, inner)),
        None => Err(io::Error::from(kind)),
    }
}

#[test]
fn tag_source_errors() {
    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    let err = SourceReader(Failing).read(&mut [0; 8]).unwrap_err();
    assert!(is_source_error(&err));
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

    let original = into_source_error(err).unwrap();
    assert_eq!(original.to_string(), "pipe closed");

    let other = io::Error::other("bad header");
    assert!(!is_source_error(&other));
    assert_eq!(into_source_error(other).unwrap_err().to_string(), "bad header");
}

#[test]
fn independent_streams() {
    let opener = BytesOpener::new(&b"abcdef"[..]);

    let mut first = opener.open().unwrap();
    let mut buf = [0; 3];
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"abc");

    let mut second = String::new();
    opener.open().unwrap().read_to_string(&mut second).unwrap();
    assert_eq!(second, "abcdef");
}

#[test]
fn spool_one_shot_stream() {
    let opener = SpooledOpener::new(&b"saved image"[..]).unwrap();

    for _ in 0..2 {
        let mut data = String::new();
        opener.open().unwrap().read_to_string(&mut data).unwrap();
        assert_eq!(data, "saved image");
    }
}
