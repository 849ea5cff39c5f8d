use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use sha2::{Digest, Sha256};

/// Compression applied to the written content.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Compression {
    /// Write the content verbatim.
    #[default]
    None,

    /// Gzip stream, with a compression level between `0` and `9`.
    /// Higher values are treated as `9`.
    Gzip(u32),
}

impl Compression {
    /// Gzip with the default level.
    pub fn gzip() -> Self {
        Compression::Gzip(flate2::Compression::default().level())
    }
}

const MAX_GZIP_LEVEL: u32 = 9;

/// Summary of a [`write_to`] operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Written {
    /// Number of bytes read from the content.
    pub size: u64,

    /// SHA256 of the content, before compression, as a lowercase hex
    /// string.
    pub sha256: String,
}

/// Copy `content` to `destination`, compressing it if requested.
///
/// On failure, `destination` may contain partial data.
pub fn write_to<R, W>(content: &mut R, destination: W, compression: Compression) -> io::Result<Written>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut content = HashReader::new(content);
    let output = BufWriter::new(destination);

    match compression {
        Compression::None => {
            let mut output = output;
            io::copy(&mut content, &mut output)?;
            output.flush()?;
        }

        Compression::Gzip(level) => {
            let level = flate2::Compression::new(level.min(MAX_GZIP_LEVEL));
            let mut encoder = flate2::write::GzEncoder::new(output, level);
            io::copy(&mut content, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
    }

    Ok(content.finish())
}

/// Create (or truncate) the file at `path`, and copy `content` to it.
pub fn write_file<R>(content: &mut R, path: &Path, compression: Compression) -> io::Result<Written>
where
    R: Read + ?Sized,
{
    let file = File::create(path)?;
    let written = write_to(content, &file, compression)?;
    file.sync_all()?;
    Ok(written)
}

/// Compute the SHA256 of the data read from `reader`.
struct HashReader<R> {
    hasher: Sha256,
    size: u64,
    reader: R,
}

impl<R> HashReader<R> {
    fn new(reader: R) -> Self {
        HashReader {
            hasher: Sha256::new(),
            size: 0,
            reader,
        }
    }

    fn finish(self) -> Written {
        Written {
            size: self.size,
            sha256: HexString(self.hasher.finalize()).to_string(),
        }
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }
}

/// Encode a byte buffer as hex string.
pub(crate) struct HexString<T>(pub T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

/// SHA256 of `abc`.
#[cfg(test)]
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

#[test]
fn encode_hex_bytes() {
    assert_eq!(HexString(b"\x01\x20\xf0").to_string(), "0120f0");
}

#[test]
fn write_verbatim() {
    let mut output = Vec::new();
    let written = write_to(&mut &b"abc"[..], &mut output, Compression::None).unwrap();

    assert_eq!(output, b"abc");
    assert_eq!(written.size, 3);
    assert_eq!(written.sha256, ABC_SHA256);
}

#[test]
fn write_gzip() {
    let mut output = Vec::new();
    let written = write_to(&mut &b"abc"[..], &mut output, Compression::gzip()).unwrap();

    assert_eq!(&output[..2], b"\x1f\x8b");
    assert_eq!(written.sha256, ABC_SHA256);

    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(&output[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, b"abc");
}

#[test]
fn truncate_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("package.yaml");
    std::fs::write(&path, "a much longer previous content").unwrap();

    write_file(&mut &b"abc"[..], &path, Compression::None).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"abc");
}

#[test]
fn clamp_gzip_level() {
    let mut best = Vec::new();
    write_to(&mut &b"abc"[..], &mut best, Compression::Gzip(9)).unwrap();

    let mut output = Vec::new();
    let written = write_to(&mut &b"abc"[..], &mut output, Compression::Gzip(42)).unwrap();

    assert_eq!(output, best);
    assert_eq!(written.sha256, ABC_SHA256);
}
