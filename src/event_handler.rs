use crate::Phase;

/// Handler to receive notifications for events during an extraction.
///
/// All methods are optional.
#[expect(unused_variables)]
pub trait EventHandler {
    /// A new stream was requested from the opener.
    fn archive_opened(&self, phase: Phase) {}

    /// The `manifest.json` of the saved image was decoded.
    ///
    /// `layers` is the number of layers listed in it.
    fn manifest_loaded(&self, layers: usize) {}

    /// A layer of the outer archive is going to be scanned.
    fn layer_scanned(&self, layer: &str) {}

    /// The target file was found in `layer`.
    fn layer_found(&self, layer: &str) {}

    /// A symbolic or hard link was found at `from`, and the search
    /// continues at `to`.
    fn link_followed(&self, from: &str, to: &str) {}

    /// The content of `path` is ready to be read.
    ///
    /// `size` is the size recorded in the tar header.
    fn file_extracted(&self, path: &str, size: u64) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}

impl<E: EventHandler + ?Sized> EventHandler for &E {
    fn archive_opened(&self, phase: Phase) {
        (**self).archive_opened(phase)
    }

    fn manifest_loaded(&self, layers: usize) {
        (**self).manifest_loaded(layers)
    }

    fn layer_scanned(&self, layer: &str) {
        (**self).layer_scanned(layer)
    }

    fn layer_found(&self, layer: &str) {
        (**self).layer_found(layer)
    }

    fn link_followed(&self, from: &str, to: &str) {
        (**self).link_followed(from, to)
    }

    fn file_extracted(&self, path: &str, size: u64) {
        (**self).file_extracted(path, size)
    }
}

/// [`EventHandler`] that sends every event to [`tracing`].
///
/// Lookups of layers and links are emitted at the `trace` level, and
/// everything else at `debug`.
#[cfg(feature = "tracing")]
pub struct TracingEventHandler;

#[cfg(feature = "tracing")]
impl EventHandler for TracingEventHandler {
    fn archive_opened(&self, phase: Phase) {
        tracing::debug!(%phase, "archive opened");
    }

    fn manifest_loaded(&self, layers: usize) {
        tracing::debug!(layers, "manifest loaded");
    }

    fn layer_scanned(&self, layer: &str) {
        tracing::trace!(layer, "scanning layer");
    }

    fn layer_found(&self, layer: &str) {
        tracing::debug!(layer, "target found in layer");
    }

    fn link_followed(&self, from: &str, to: &str) {
        tracing::trace!(from, to, "following link");
    }

    fn file_extracted(&self, path: &str, size: u64) {
        tracing::debug!(path, size, "file extracted");
    }
}
