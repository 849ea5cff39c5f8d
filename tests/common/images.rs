use std::{cell::RefCell, fmt, io::Write, path::Path, rc::Rc};

use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

/// Compression for an archive built in the tests.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Codec {
    Plain,
    Gzip,
    #[cfg(feature = "zstd")]
    Zstd,
}

/// Builder for a tar archive, like the content of a layer.
pub struct Archive {
    buffer: SharedBuffer,
    archive: tar::Builder<Box<dyn Write>>,
}

#[derive(Clone)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Archive {
    pub fn new() -> Archive {
        Archive::with_codec(Codec::Plain)
    }

    pub fn with_codec(codec: Codec) -> Archive {
        let buffer = SharedBuffer(Rc::new(Vec::with_capacity(4096).into()));

        let stream: Box<dyn Write> = match codec {
            Codec::Plain => Box::new(buffer.clone()),

            Codec::Gzip => Box::new(GzEncoder::new(buffer.clone(), Default::default())),

            #[cfg(feature = "zstd")]
            Codec::Zstd => Box::new(
                zstd::stream::write::Encoder::new(buffer.clone(), 0)
                    .unwrap()
                    .auto_finish(),
            ),
        };

        Archive {
            buffer,
            archive: tar::Builder::new(stream),
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        self.archive.finish().unwrap();
        drop(self.archive.into_inner().unwrap());

        self.buffer.0.take()
    }

    pub fn directory(mut self, path: impl AsRef<Path>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::dir());
        header.set_size(0);
        header.set_cksum();
        self.archive.append(&header, &b""[..]).unwrap();
        self
    }

    pub fn regular(mut self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::file());
        header.set_size(data.len() as u64);
        header.set_cksum();
        self.archive.append(&header, data).unwrap();
        self
    }

    pub fn symlink(mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::symlink());
        header.set_size(0);
        self.archive.append_link(&mut header, path, target).unwrap();
        self
    }

    pub fn hardlink(mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::hard_link());
        header.set_size(0);
        self.archive.append_link(&mut header, path, target).unwrap();
        self
    }
}

/// Builder for a saved image, like the output of `docker save`.
///
/// `manifest.json` is written at the end of the archive, and it lists
/// the layers in the order they were added.
pub struct SavedImage {
    archive: Archive,
    layers: Vec<String>,
    manifest: Manifest,
}

#[derive(Copy, Clone, PartialEq)]
enum Manifest {
    Normal,
    Reversed,
    Omitted,
}

impl SavedImage {
    pub fn new() -> SavedImage {
        SavedImage {
            archive: Archive::new(),
            layers: Vec::new(),
            manifest: Manifest::Normal,
        }
    }

    /// Add a layer with the classic layout (`<id>/layer.tar`).
    pub fn layer(self, data: Vec<u8>) -> Self {
        let id = sha256_hex([self.layers.len().to_string().as_bytes(), &data[..]].concat());
        self.layer_at(&id, data)
    }

    /// Add a layer with the classic layout, in the directory `id`.
    pub fn layer_at(mut self, id: &str, data: Vec<u8>) -> Self {
        let path = format!("{id}/layer.tar");

        self.archive = self
            .archive
            .directory(format!("{id}/"))
            .regular(format!("{id}/VERSION"), "1.0")
            .regular(format!("{id}/json"), "{}")
            .regular(&path, data);

        self.layers.push(path);
        self
    }

    /// Add a layer with the OCI layout (`blobs/sha256/<digest>`).
    pub fn oci_layer(mut self, data: Vec<u8>) -> Self {
        let path = format!("blobs/sha256/{}", sha256_hex(&data));
        self.archive = self.archive.regular(&path, data);
        self.layers.push(path);
        self
    }

    /// Add an entry that is not a layer.
    pub fn file(mut self, path: &str, data: impl AsRef<[u8]>) -> Self {
        self.archive = self.archive.regular(path, data);
        self
    }

    /// List the layers in `manifest.json` from the last added to the
    /// first one.
    pub fn reverse_manifest(mut self) -> Self {
        self.manifest = Manifest::Reversed;
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.manifest = Manifest::Omitted;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let SavedImage {
            mut archive,
            mut layers,
            manifest,
        } = self;

        if manifest != Manifest::Omitted {
            let config = r#"{"architecture":"amd64","os":"linux"}"#;
            let config_path = format!("{}.json", sha256_hex(config));
            archive = archive.regular(&config_path, config);

            if manifest == Manifest::Reversed {
                layers.reverse();
            }

            let manifest = serde_json::json!([{
                "Config": config_path,
                "RepoTags": ["crossplane/provider-test:v0.1.0"],
                "Layers": layers,
            }]);

            archive = archive.regular("manifest.json", manifest.to_string());
        }

        archive.build()
    }
}

pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    HexString(hasher.finalize()).to_string()
}

/// Encode a byte buffer as hex string.
struct HexString<T>(T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

/// Compress `data` with gzip.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Default::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
