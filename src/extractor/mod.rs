mod extract;
mod locate;

use std::{
    fmt,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use crate::{
    archive::{self, EndOfStream, TarArchive},
    event_handler::{EventHandler, NoEventHandler},
    manifest::{self, ManifestEntry, ManifestError, MANIFEST_PATH},
    opener::{into_source_error, SourceReader},
    sink::{self, Compression, Written},
    EntryKind, Opener,
};

pub use extract::Content;

/// Default pattern to identify layers in a saved image.
pub const DEFAULT_LAYER_PATTERN: &str = "layer.tar";

/// Default limit for the number of links followed to find a file.
pub const DEFAULT_MAX_LINK_DEPTH: u32 = 32;

/// Step of the extraction process where an error happened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Reading `manifest.json`.
    Manifest,

    /// Searching the layer containing the file.
    Locate,

    /// Reading the file from its layer.
    Extract,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Manifest => "reading manifest",
            Phase::Locate => "locating layer",
            Phase::Extract => "extracting file",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Failed to open the archive while {phase}: {source}")]
    OpenFailed { phase: Phase, source: io::Error },

    #[error("Malformed archive while {phase}{}: {source}", InLayer(.layer))]
    MalformedArchive {
        phase: Phase,
        layer: Option<String>,
        source: io::Error,
    },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    #[error("File {path} not found in any layer.")]
    FileNotFoundInAnyLayer { path: String },

    #[error("Layer {layer} not found in the archive.")]
    LayerNotFound { layer: String },

    #[error("File {path} not found in layer {layer}.")]
    FileNotFoundInLayer { layer: String, path: String },

    #[error("Too many links to resolve {path} in layer {layer} (limit is {limit}).")]
    SymlinkCycle {
        layer: String,
        path: String,
        limit: u32,
    },

    #[error("Failed to write {}: {source}", .destination.display())]
    WriteFailed {
        destination: PathBuf,
        source: io::Error,
    },

    #[error("Failed to consume the content of {path}: {source}")]
    Consume { path: String, source: io::Error },
}

impl ExtractError {
    /// Build an error for a failure while reading an archive.
    ///
    /// Errors from the stream returned by the opener are reported as
    /// [`OpenFailed`](ExtractError::OpenFailed). Anything else comes from
    /// the decoders.
    fn from_archive(phase: Phase, layer: Option<&str>, err: io::Error) -> Self {
        match into_source_error(err) {
            Ok(source) => ExtractError::OpenFailed { phase, source },
            Err(source) => ExtractError::MalformedArchive {
                phase,
                layer: layer.map(str::to_owned),
                source,
            },
        }
    }

    /// Return `true` if the operation may succeed if it is tried again.
    ///
    /// Only failures from the opener are considered transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::OpenFailed { .. })
    }
}

struct InLayer<'a>(&'a Option<String>);

impl fmt::Display for InLayer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(layer) => write!(f, " in layer {layer}"),
            None => Ok(()),
        }
    }
}

macro_rules! try_archive {
    ($phase:expr, $layer:expr, $e:expr $(,)?) => {
        $e.map_err(|e| ExtractError::from_archive($phase, $layer, io::Error::from(e)))?
    };
}

// Make visible to mods.
use try_archive;

/// How to find the layers in the outer archive.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerSelector {
    /// Regular files whose name contains the pattern.
    NameContains(String),

    /// Layers listed in the `manifest.json` of the archive.
    ///
    /// This works with any layout, including the one used by recent
    /// versions of Docker (`blobs/sha256/...`).
    Manifest,

    /// The archive is a single, flattened, layer.
    Flattened,
}

impl Default for LayerSelector {
    fn default() -> Self {
        LayerSelector::NameContains(DEFAULT_LAYER_PATTERN.to_owned())
    }
}

/// Which layer is used when the file is present in many layers.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum SearchOrder {
    /// First layer in the archive containing the file. The scan stops at
    /// the first match.
    ///
    /// The order of the entries in the archive is not the order of the
    /// layers in the image, so this may not be the file visible in a
    /// container.
    #[default]
    ArchiveOrder,

    /// Top-most layer containing the file, like a container filesystem.
    ///
    /// All layers are scanned. The position of the layers is taken from
    /// the manifest when the selector is [`LayerSelector::Manifest`];
    /// for other selectors, the last layer in the archive wins.
    ///
    /// Whiteout files are not processed.
    TopLayerFirst,
}

/// Name of a layer in the outer archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerReference {
    /// Path of the layer entry. Empty for a flattened archive.
    pub path: String,
}

impl LayerReference {
    pub fn new(path: impl Into<String>) -> Self {
        LayerReference { path: path.into() }
    }

    /// Reference to the outer archive itself.
    pub fn flattened() -> Self {
        LayerReference::new("")
    }

    pub fn is_flattened(&self) -> bool {
        self.path.is_empty()
    }

    /// Layer name, if any, to add context to errors.
    fn context(&self) -> Option<&str> {
        (!self.is_flattened()).then_some(self.path.as_str())
    }
}

impl fmt::Display for LayerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_flattened() {
            f.write_str("<flattened>")
        } else {
            f.write_str(&self.path)
        }
    }
}

/// Path of the regular file found after following links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub layer: LayerReference,

    pub path: String,

    /// Number of links followed.
    pub depth: u32,
}

/// Extract files from a saved image.
///
/// The archive is read from `opener`, which is invoked twice for every
/// extraction: once to locate the layer containing the file, and once
/// more (plus one for every link in the path) to read it.
///
/// # Examples
///
/// ```no_run
/// # use saved_image_extract::*;
/// let content = Extractor::new(FileOpener::new("image.tar"))
///     .layers(LayerSelector::Manifest)
///     .fetch_file("package.yaml")?;
/// # Ok::<(), ExtractError>(())
/// ```
pub struct Extractor<O, E = NoEventHandler> {
    opener: O,
    layers: LayerSelector,
    search_order: SearchOrder,
    max_link_depth: u32,
    event_handler: E,
}

impl<O: Opener> Extractor<O> {
    pub fn new(opener: O) -> Self {
        Extractor {
            opener,
            layers: LayerSelector::default(),
            search_order: SearchOrder::default(),
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            event_handler: NoEventHandler,
        }
    }
}

impl<O: Opener, E: EventHandler> Extractor<O, E> {
    pub fn layers(mut self, layers: LayerSelector) -> Self {
        self.layers = layers;
        self
    }

    pub fn search_order(mut self, search_order: SearchOrder) -> Self {
        self.search_order = search_order;
        self
    }

    /// Maximum number of links to follow. If the limit is exceeded, the
    /// extraction fails with [`ExtractError::SymlinkCycle`].
    pub fn max_link_depth(mut self, max_link_depth: u32) -> Self {
        self.max_link_depth = max_link_depth;
        self
    }

    pub fn event_handler<H: EventHandler>(self, event_handler: H) -> Extractor<O, H> {
        Extractor {
            opener: self.opener,
            layers: self.layers,
            search_order: self.search_order,
            max_link_depth: self.max_link_depth,
            event_handler,
        }
    }

    /// Find the layer containing `target`.
    pub fn locate(&self, target: &str) -> Result<LayerReference, ExtractError> {
        locate::locate(self, target)
    }

    /// Read `target` from `layer`.
    ///
    /// `consume` receives the content of the file, after following
    /// links. The archive is closed after it returns.
    pub fn extract<T, F>(
        &self,
        layer: &LayerReference,
        target: &str,
        consume: F,
    ) -> Result<T, ExtractError>
    where
        F: FnOnce(&mut Content<'_>) -> io::Result<T>,
    {
        extract::extract(self, layer, target, consume).map(|(value, _)| value)
    }

    /// Follow the links from `target` in `layer`, and return the path of
    /// the regular file.
    pub fn resolve(&self, layer: &LayerReference, target: &str) -> Result<ResolvedTarget, ExtractError> {
        extract::extract(self, layer, target, |_| Ok(())).map(|(_, resolved)| resolved)
    }

    /// Read the content of `target` from the image.
    pub fn fetch_file(&self, target: &str) -> Result<Vec<u8>, ExtractError> {
        let layer = self.locate(target)?;

        self.extract(&layer, target, |content| {
            // The size comes from the archive, so don't trust it for
            // large allocations.
            let capacity = content.size().min(1 << 20) as usize;

            let mut data = Vec::with_capacity(capacity);
            content.read_to_end(&mut data)?;
            Ok(data)
        })
    }

    /// Write the content of `target` to the file `destination`.
    ///
    /// The file is created only if `target` is found.
    pub fn save_file(
        &self,
        target: &str,
        destination: &Path,
        compression: Compression,
    ) -> Result<Written, ExtractError> {
        let layer = self.locate(target)?;

        self.extract(&layer, target, |content| {
            sink::write_file(content, destination, compression)
        })
        .map_err(|e| match e {
            ExtractError::Consume { source, .. } => ExtractError::WriteFailed {
                destination: destination.to_owned(),
                source,
            },
            e => e,
        })
    }

    /// Read the `manifest.json` file of the archive.
    pub fn manifest(&self) -> Result<Vec<ManifestEntry>, ExtractError> {
        const PHASE: Phase = Phase::Manifest;

        let (mut archive, end) = self.open_archive(PHASE)?;
        let mut entries = try_archive!(PHASE, None, archive.entries());

        let found = try_archive!(
            PHASE,
            None,
            archive::scan(&mut entries, |info| {
                info.kind == EntryKind::RegularFile && info.name == MANIFEST_PATH
            })
        );

        let Some((_, mut entry)) = found else {
            try_archive!(PHASE, None, end.check());
            return Err(ManifestError::Missing.into());
        };

        let mut data = Vec::new();
        try_archive!(PHASE, None, entry.read_to_end(&mut data));

        let manifest = manifest::parse(&data)?;

        self.event_handler
            .manifest_loaded(manifest.iter().map(|e| e.layers.len()).sum());

        Ok(manifest)
    }

    /// Open a new stream from the opener, and prepare a tar reader for it.
    fn open_archive(&self, phase: Phase) -> Result<(TarArchive<'_>, EndOfStream), ExtractError> {
        let stream = self
            .opener
            .open()
            .map_err(|source| ExtractError::OpenFailed { phase, source })?;

        self.event_handler.archive_opened(phase);

        let stream = BufReader::new(SourceReader(stream));

        Ok(try_archive!(phase, None, archive::open(stream)))
    }
}

/// Read the content of `target` from the image in `opener`, using the
/// default settings.
pub fn fetch_file<O: Opener>(opener: O, target: &str) -> Result<Vec<u8>, ExtractError> {
    Extractor::new(opener).fetch_file(target)
}
