//! Typed document model for tileset.json manifests.
//!
//! These types mirror the JSON structure of a 3D Tiles tileset manifest
//! and carry no engine semantics: transforms are not composed, refine
//! strategies are not inherited, and content URIs are not resolved.

use serde::Deserialize;

use crate::error::Result;

/// A parsed tileset.json manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetDocument {
    /// Metadata about the tileset as a whole.
    pub asset: Option<AssetDocument>,
    /// Error, in meters, of the tileset's coarsest level of detail.
    pub geometric_error: Option<f64>,
    /// The root tile of the tileset.
    pub root: Option<TileDocument>,
}

impl TilesetDocument {
    /// Parse a tileset manifest from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The `asset` object of a tileset manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDocument {
    /// The 3D Tiles version targeted by the tileset.
    pub version: Option<String>,
    /// Application-specific version of this particular tileset.
    pub tileset_version: Option<String>,
}

/// A single tile entry in a tileset manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileDocument {
    /// The volume enclosing the tile and all of its descendants, in the
    /// tile's local frame.
    pub bounding_volume: Option<BoundingVolumeDocument>,
    /// Volume the viewer must be inside before this tile is rendered or
    /// refined.
    pub viewer_request_volume: Option<BoundingVolumeDocument>,
    /// Error, in meters, introduced by rendering this tile instead of its
    /// children.
    pub geometric_error: Option<f64>,
    /// How this tile's content relates to its children's content. Inherited
    /// from the parent when absent.
    pub refine: Option<RefineDocument>,
    /// Column-major 4x4 transform from the tile's local frame to the parent
    /// tile's frame.
    pub transform: Option<[f64; 16]>,
    /// The tile's content, if any.
    pub content: Option<ContentDocument>,
    /// Child tiles.
    #[serde(default)]
    pub children: Vec<TileDocument>,
}

/// The `content` object of a tile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDocument {
    /// Location of the content, relative to the manifest that declared it.
    ///
    /// Pre-1.0 tilesets spelled this field `url`; both spellings are
    /// accepted.
    #[serde(alias = "url")]
    pub uri: Option<String>,
    /// Optional tighter volume around the content alone.
    pub bounding_volume: Option<BoundingVolumeDocument>,
}

/// A bounding volume in one of the three manifest encodings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundingVolumeDocument {
    /// Oriented box: center (3 values) followed by the x, y, and z
    /// half-axis vectors (3 values each).
    Box([f64; 12]),
    /// Geographic region: west, south, east, north (radians), then minimum
    /// and maximum height (meters above the ellipsoid).
    Region([f64; 6]),
    /// Sphere: center (3 values) followed by the radius.
    Sphere([f64; 4]),
}

/// The `refine` strategy of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RefineDocument {
    /// Children replace this tile's content when refined.
    #[serde(rename = "REPLACE", alias = "Replace", alias = "replace")]
    Replace,
    /// Children render in addition to this tile's content.
    #[serde(rename = "ADD", alias = "Add", alias = "add")]
    Add,
}
