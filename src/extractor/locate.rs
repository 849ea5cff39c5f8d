use std::{
    collections::HashMap,
    io::{self, Read},
};

use crate::{
    archive::{self, EntryInfo},
    event_handler::EventHandler,
    manifest, EntryKind, Opener,
};

use super::{
    try_archive, ExtractError, Extractor, LayerReference, LayerSelector, Phase, SearchOrder,
};

const PHASE: Phase = Phase::Locate;

/// Rule to identify the layers in the outer archive.
enum Candidates<'a> {
    Pattern(&'a str),

    /// Position of every layer in the manifest.
    Manifest(HashMap<String, usize>),
}

impl Candidates<'_> {
    /// Return the rank of the entry if it is a layer. Higher ranks are
    /// closer to the top of the image.
    ///
    /// `index` is the number of layers found before this entry.
    fn rank(&self, info: &EntryInfo, index: usize) -> Option<usize> {
        if info.kind != EntryKind::RegularFile {
            return None;
        }

        match self {
            Candidates::Pattern(pattern) => info.name.contains(pattern).then_some(index),
            Candidates::Manifest(positions) => positions.get(&info.name).copied(),
        }
    }
}

pub(super) fn locate<O, E>(
    extractor: &Extractor<O, E>,
    target: &str,
) -> Result<LayerReference, ExtractError>
where
    O: Opener,
    E: EventHandler,
{
    let candidates = match &extractor.layers {
        LayerSelector::NameContains(pattern) => Candidates::Pattern(pattern),

        LayerSelector::Manifest => {
            let manifest = extractor.manifest()?;
            Candidates::Manifest(manifest::layer_positions(&manifest))
        }

        LayerSelector::Flattened => return locate_flattened(extractor, target),
    };

    let (mut archive, end) = extractor.open_archive(PHASE)?;
    let mut entries = try_archive!(PHASE, None, archive.entries());

    let mut layers_found = 0;
    let mut best: Option<(usize, String)> = None;

    loop {
        let next = archive::scan(&mut entries, |info| {
            candidates.rank(info, layers_found).is_some()
        });

        let Some((info, layer)) = try_archive!(PHASE, None, next) else {
            try_archive!(PHASE, None, end.check());
            break;
        };

        let rank = candidates.rank(&info, layers_found).unwrap_or_default();
        layers_found += 1;

        extractor.event_handler.layer_scanned(&info.name);

        let found = try_archive!(PHASE, Some(info.name.as_str()), layer_contains(layer, target));
        if !found {
            continue;
        }

        match extractor.search_order {
            SearchOrder::ArchiveOrder => {
                best = Some((rank, info.name));
                break;
            }

            SearchOrder::TopLayerFirst => {
                if best.as_ref().map_or(true, |(best_rank, _)| rank >= *best_rank) {
                    best = Some((rank, info.name));
                }
            }
        }
    }

    match best {
        Some((_, layer)) => {
            extractor.event_handler.layer_found(&layer);
            Ok(LayerReference::new(layer))
        }

        None => Err(ExtractError::FileNotFoundInAnyLayer {
            path: target.to_owned(),
        }),
    }
}

/// Search `target` in the outer archive, which is a single layer.
fn locate_flattened<O, E>(
    extractor: &Extractor<O, E>,
    target: &str,
) -> Result<LayerReference, ExtractError>
where
    O: Opener,
    E: EventHandler,
{
    let (mut archive, end) = extractor.open_archive(PHASE)?;
    let mut entries = try_archive!(PHASE, None, archive.entries());

    let layer = LayerReference::flattened();
    extractor.event_handler.layer_scanned(&layer.to_string());

    match try_archive!(PHASE, None, archive::scan(&mut entries, |info| info.is_file_at(target))) {
        Some(_) => {
            extractor.event_handler.layer_found(&layer.to_string());
            Ok(layer)
        }

        None => {
            try_archive!(PHASE, None, end.check());

            Err(ExtractError::FileNotFoundInAnyLayer {
                path: target.to_owned(),
            })
        }
    }
}

/// Check if the nested archive in `layer` contains `target`.
fn layer_contains(layer: impl Read, target: &str) -> io::Result<bool> {
    let (mut archive, end) = archive::open(layer)?;
    let mut entries = archive.entries()?;

    match archive::scan(&mut entries, |info| info.is_file_at(target))? {
        Some(_) => Ok(true),
        None => end.check().map(|_| false),
    }
}
