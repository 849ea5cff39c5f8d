use std::io::{self, Read};

use crate::{
    archive::{self, EndOfStream},
    event_handler::EventHandler,
    path, EntryKind, Opener,
};

use super::{try_archive, ExtractError, Extractor, LayerReference, Phase, ResolvedTarget};

const PHASE: Phase = Phase::Extract;

/// Content of a file extracted from a layer.
///
/// It borrows the readers of the outer and nested archives, which are
/// closed when the extraction returns.
pub struct Content<'a> {
    reader: &'a mut dyn Read,
    path: &'a str,
    size: u64,
    position: u64,

    /// Set when reading from the archive fails.
    failed: bool,
}

impl<'a> Content<'a> {
    fn new(reader: &'a mut dyn Read, path: &'a str, size: u64) -> Self {
        Content {
            reader,
            path,
            size,
            position: 0,
            failed: false,
        }
    }

    /// Path of the file in the layer, after following links.
    pub fn path(&self) -> &str {
        self.path
    }

    /// Size of the file, as recorded in the archive.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for Content<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.read(buf) {
            // The archive ended before the end of the file.
            Ok(0) if !buf.is_empty() && self.position < self.size => {
                self.failed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} is truncated at {} of {} bytes",
                        self.path, self.position, self.size
                    ),
                ))
            }

            Ok(n) => {
                self.position += n as u64;
                Ok(n)
            }

            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

/// Result of a single scan of the layer.
enum Lookup<T, F> {
    /// The regular file was found, and `consume` returned a value.
    Found(T),

    /// The path is a link to this target. `consume` is given back, to be
    /// used in the next scan.
    Link(String, F),
}

/// Read `target` from `layer`, following links.
///
/// The tar reader can't go backwards, so every link restarts the
/// process with a new stream from the opener.
pub(super) fn extract<O, E, T, F>(
    extractor: &Extractor<O, E>,
    layer: &LayerReference,
    target: &str,
    consume: F,
) -> Result<(T, ResolvedTarget), ExtractError>
where
    O: Opener,
    E: EventHandler,
    F: FnOnce(&mut Content<'_>) -> io::Result<T>,
{
    let mut path = target.to_owned();
    let mut consume = consume;
    let mut depth = 0;

    loop {
        match lookup(extractor, layer, &path, consume)? {
            Lookup::Found(value) => {
                let resolved = ResolvedTarget {
                    layer: layer.clone(),
                    path,
                    depth,
                };

                return Ok((value, resolved));
            }

            Lookup::Link(link_target, f) => {
                depth += 1;

                if depth > extractor.max_link_depth {
                    return Err(ExtractError::SymlinkCycle {
                        layer: layer.to_string(),
                        path: target.to_owned(),
                        limit: extractor.max_link_depth,
                    });
                }

                let next = path::resolve_link(&path, &link_target);
                extractor.event_handler.link_followed(&path, &next);

                path = next;
                consume = f;
            }
        }
    }
}

/// Open the archive, find `layer`, and scan it for `path`.
fn lookup<O, E, T, F>(
    extractor: &Extractor<O, E>,
    layer: &LayerReference,
    path: &str,
    consume: F,
) -> Result<Lookup<T, F>, ExtractError>
where
    O: Opener,
    E: EventHandler,
    F: FnOnce(&mut Content<'_>) -> io::Result<T>,
{
    let (mut archive, end) = extractor.open_archive(PHASE)?;
    let mut entries = try_archive!(PHASE, None, archive.entries());

    if layer.is_flattened() {
        return lookup_in(&extractor.event_handler, &mut entries, &end, layer, path, consume);
    }

    let found = try_archive!(
        PHASE,
        None,
        archive::scan(&mut entries, |info| {
            info.kind == EntryKind::RegularFile && info.name == layer.path
        })
    );

    let Some((_, layer_entry)) = found else {
        try_archive!(PHASE, None, end.check());

        return Err(ExtractError::LayerNotFound {
            layer: layer.path.clone(),
        });
    };

    let context = layer.context();
    let (mut nested, nested_end) = try_archive!(PHASE, context, archive::open(layer_entry));
    let mut nested_entries = try_archive!(PHASE, context, nested.entries());

    lookup_in(
        &extractor.event_handler,
        &mut nested_entries,
        &nested_end,
        layer,
        path,
        consume,
    )
}

fn lookup_in<R, E, T, F>(
    event_handler: &E,
    entries: &mut tar::Entries<'_, R>,
    end: &EndOfStream,
    layer: &LayerReference,
    path: &str,
    consume: F,
) -> Result<Lookup<T, F>, ExtractError>
where
    R: Read,
    E: EventHandler,
    F: FnOnce(&mut Content<'_>) -> io::Result<T>,
{
    let context = layer.context();

    let found = try_archive!(
        PHASE,
        context,
        archive::scan(entries, |info| info.is_file_at(path))
    );

    let Some((info, mut entry)) = found else {
        try_archive!(PHASE, context, end.check());

        return Err(ExtractError::FileNotFoundInLayer {
            layer: layer.to_string(),
            path: path.to_owned(),
        });
    };

    if info.kind.is_link() {
        return Ok(Lookup::Link(info.link_target, consume));
    }

    event_handler.file_extracted(path, info.size);

    let mut content = Content::new(&mut entry, path, info.size);

    match consume(&mut content) {
        Ok(value) => Ok(Lookup::Found(value)),

        Err(err) if content.failed => Err(ExtractError::from_archive(PHASE, context, err)),

        Err(err) => Err(ExtractError::Consume {
            path: path.to_owned(),
            source: err,
        }),
    }
}
