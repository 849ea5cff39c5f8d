use std::collections::HashMap;

/// Path of the manifest in a saved image.
pub const MANIFEST_PATH: &str = "manifest.json";

/// Errors from the manifest of a saved image.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("Missing {MANIFEST_PATH} in the archive.")]
    Missing,

    #[error("Invalid JSON in {MANIFEST_PATH}: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No layers in {MANIFEST_PATH}.")]
    NoLayers,
}

/// Image described in the `manifest.json` of a saved image.
///
/// The file contains one of these items for each saved image.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    /// Path of the image configuration.
    #[serde(rename = "Config")]
    pub config: String,

    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,

    /// Paths of the layers in the archive, from the bottom layer to the
    /// top one.
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

pub(crate) fn parse(data: &[u8]) -> Result<Vec<ManifestEntry>, ManifestError> {
    let entries: Vec<ManifestEntry> = serde_json::from_slice(data)?;

    if entries.iter().all(|e| e.layers.is_empty()) {
        return Err(ManifestError::NoLayers);
    }

    Ok(entries)
}

/// Map the path of every layer to its position in the image.
///
/// Higher values are closer to the top of the image.
pub(crate) fn layer_positions(entries: &[ManifestEntry]) -> HashMap<String, usize> {
    let mut positions = HashMap::new();

    for entry in entries {
        for (index, layer) in entry.layers.iter().enumerate() {
            let position = positions.entry(layer.clone()).or_insert(index);
            *position = index.max(*position);
        }
    }

    positions
}

#[test]
fn parse_saved_manifest() {
    let json = br#"[{
        "Config": "abc.json",
        "RepoTags": ["crossplane/provider-abc:v1"],
        "Layers": ["1111/layer.tar", "2222/layer.tar"]
    }]"#;

    let entries = parse(json).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].config, "abc.json");
    assert_eq!(
        entries[0].repo_tags.as_deref(),
        Some(&["crossplane/provider-abc:v1".to_string()][..])
    );

    let positions = layer_positions(&entries);
    assert_eq!(positions["1111/layer.tar"], 0);
    assert_eq!(positions["2222/layer.tar"], 1);
}

#[test]
fn untagged_image() {
    let json = br#"[{"Config":"blobs/sha256/aa","RepoTags":null,"Layers":["blobs/sha256/bb"]}]"#;
    let entries = parse(json).unwrap();
    assert_eq!(entries[0].repo_tags, None);
    assert_eq!(entries[0].layers, ["blobs/sha256/bb"]);
}

#[test]
fn reject_invalid_manifests() {
    assert!(matches!(parse(b"{"), Err(ManifestError::Json(_))));
    assert!(matches!(parse(b"[]"), Err(ManifestError::NoLayers)));
    assert!(matches!(
        parse(br#"[{"Config":"c","Layers":[]}]"#),
        Err(ManifestError::NoLayers)
    ));
}
