#[cfg(test)]
mod tests;

use std::{
    borrow::Cow,
    cell::Cell,
    io::{self, Read},
    rc::Rc,
};

const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

const ZSTD_MAGIC: &[u8] = b"\x28\xb5\x2f\xfd";

/// Kind of an entry in a tar archive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
    Symlink,
    Hardlink,

    /// Devices, FIFOs, sparse files, and any other type.
    Other,
}

impl From<tar::EntryType> for EntryKind {
    fn from(entry_type: tar::EntryType) -> Self {
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::RegularFile,
            tar::EntryType::Directory => EntryKind::Directory,
            tar::EntryType::Symlink => EntryKind::Symlink,
            tar::EntryType::Link => EntryKind::Hardlink,
            _ => EntryKind::Other,
        }
    }
}

impl EntryKind {
    pub fn is_link(&self) -> bool {
        matches!(self, EntryKind::Symlink | EntryKind::Hardlink)
    }
}

/// Metadata of an entry in a tar archive.
///
/// The content of the entry is read from the [`tar::Entry`] returned
/// with it by [`scan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    /// Path of the entry, as recorded in the archive.
    pub name: String,

    pub kind: EntryKind,

    /// Size of the content, in bytes.
    pub size: u64,

    /// Target of the link. Empty unless `kind` is a link.
    pub link_target: String,
}

impl EntryInfo {
    pub fn from_entry<R: Read>(entry: &tar::Entry<'_, R>) -> Self {
        let kind = EntryKind::from(entry.header().entry_type());

        let link_target = match entry.link_name_bytes() {
            Some(target) if kind.is_link() => lossy_string(target),
            _ => String::new(),
        };

        EntryInfo {
            name: lossy_string(entry.path_bytes()),
            kind,
            size: entry.size(),
            link_target,
        }
    }

    /// Return `true` if this entry can be the file requested
    /// at `path`.
    ///
    /// Directories and special files never match.
    pub(crate) fn is_file_at(&self, path: &str) -> bool {
        self.name == path && (self.kind == EntryKind::RegularFile || self.kind.is_link())
    }
}

fn lossy_string(bytes: Cow<'_, [u8]>) -> String {
    match bytes {
        Cow::Borrowed(b) => String::from_utf8_lossy(b).into_owned(),
        Cow::Owned(b) => String::from_utf8(b)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

/// Advance `entries` until `predicate` accepts an entry.
///
/// Returns `None` when the end of the archive is reached. For archives
/// from [`open`], the [`EndOfStream`] flag tells if the end-of-archive
/// marker was found. The content of
/// rejected entries, and their padding, is skipped by the tar reader, so
/// `entries` can be used again to continue the scan after a match.
pub fn scan<'a, R, P>(
    entries: &mut tar::Entries<'a, R>,
    mut predicate: P,
) -> io::Result<Option<(EntryInfo, tar::Entry<'a, R>)>>
where
    R: Read + 'a,
    P: FnMut(&EntryInfo) -> bool,
{
    for entry in entries.by_ref() {
        let entry = entry?;
        let info = EntryInfo::from_entry(&entry);

        if predicate(&info) {
            return Ok(Some((info, entry)));
        }
    }

    Ok(None)
}

/// Compression of a tar stream, detected from its first bytes.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    fn detect(head: &[u8]) -> Self {
        if head.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if head.starts_with(ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Return a reader for the uncompressed tar stream in `reader`.
///
/// Streams compressed with gzip or zstd are decoded. The first bytes are
/// read to detect the compression, and they are chained back in front
/// of the stream, so `reader` doesn't need to be seekable.
fn decompressed<'r, R: Read + 'r>(mut reader: R) -> io::Result<Box<dyn Read + 'r>> {
    let mut head = [0u8; 4];
    let mut len = 0;

    while len < head.len() {
        match reader.read(&mut head[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let compression = Compression::detect(&head[..len]);
    let reader = io::Cursor::new(head).take(len as u64).chain(reader);

    Ok(match compression {
        Compression::None => Box::new(reader),

        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),

        #[cfg(feature = "zstd")]
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),

        #[cfg(not(feature = "zstd"))]
        Compression::Zstd => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "zstd streams require the `zstd` feature",
            ))
        }
    })
}

/// Flag set when a tar stream reaches EOF.
///
/// The tar reader stops after the end-of-archive marker, so a complete
/// archive never reaches the end of its stream. If it does, the archive
/// was truncated at a block boundary.
#[derive(Clone, Debug, Default)]
pub(crate) struct EndOfStream(Rc<Cell<bool>>);

impl EndOfStream {
    /// Return an error if the stream was exhausted before the
    /// end-of-archive marker.
    pub(crate) fn check(&self) -> io::Result<()> {
        if self.0.get() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ends without the end-of-archive marker",
            ));
        }

        Ok(())
    }
}

/// Reader that updates an [`EndOfStream`] flag.
pub(crate) struct TrackEnd<R> {
    reader: R,
    end: EndOfStream,
}

impl<R: Read> Read for TrackEnd<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;

        if n == 0 && !buf.is_empty() {
            self.end.0.set(true);
        }

        Ok(n)
    }
}

pub(crate) type TarArchive<'r> = tar::Archive<TrackEnd<Box<dyn Read + 'r>>>;

/// Open the tar stream in `reader`, decompressing it if needed.
///
/// The returned flag tells if the stream ended before the
/// end-of-archive marker. Check it when [`scan`] returns `None`.
pub(crate) fn open<'r, R: Read + 'r>(reader: R) -> io::Result<(TarArchive<'r>, EndOfStream)> {
    let end = EndOfStream::default();

    let reader = TrackEnd {
        reader: decompressed(reader)?,
        end: end.clone(),
    };

    Ok((tar::Archive::new(reader), end))
}
