//! Extract a single file from a saved container image, without unpacking
//! the image.
//!
//! A saved image (like the output of `docker save`) is a tar archive where
//! every layer is another tar archive. The [`Extractor`] scans the layers
//! to find the one containing the requested file, and then reads the
//! archive again to extract it, following symbolic and hard links.
//!
//! The archive is read from an [`Opener`], which has to provide a new
//! stream for every pass.
//!
//! ```no_run
//! use saved_image_extract::{CommandOpener, Compression, Extractor};
//!
//! let opener = CommandOpener::docker_save("crossplane/provider-nop:v0.2.1")?;
//!
//! Extractor::new(opener).save_file(
//!     "package.yaml",
//!     "package.yaml.gz".as_ref(),
//!     Compression::gzip(),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod archive;
mod command;
mod event_handler;
mod extractor;
mod manifest;
mod opener;
mod path;
mod sink;

pub use archive::{scan, EntryInfo, EntryKind};
pub use command::{CommandOpener, CommandReader};
pub use event_handler::{EventHandler, NoEventHandler};
pub use extractor::{
    fetch_file, Content, ExtractError, Extractor, LayerReference, LayerSelector, Phase,
    ResolvedTarget, SearchOrder, DEFAULT_LAYER_PATTERN, DEFAULT_MAX_LINK_DEPTH,
};
pub use manifest::{ManifestEntry, ManifestError, MANIFEST_PATH};
pub use opener::{BytesOpener, FileOpener, Opener, SpooledOpener};
pub use sink::{write_file, write_to, Compression, Written};

#[cfg(feature = "tracing")]
pub use event_handler::TracingEventHandler;
