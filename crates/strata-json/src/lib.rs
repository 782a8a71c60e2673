//! Typed document model for 3D Tiles tileset manifests.
//!
//! This crate parses `tileset.json` manifests into plain data structures
//! and nothing more. Interpretation of those structures (composing
//! transforms, inheriting refine strategies, resolving content URIs)
//! belongs to the engine crate that consumes them.
//!
//! # Example
//!
//! ```
//! use strata_json::{BoundingVolumeDocument, TilesetDocument};
//!
//! let manifest = br#"{
//!     "asset": { "version": "1.0" },
//!     "root": {
//!         "boundingVolume": { "sphere": [0, 0, 0, 100] },
//!         "geometricError": 16.0
//!     }
//! }"#;
//!
//! let doc = TilesetDocument::from_slice(manifest)?;
//! let root = doc.root.expect("manifest has a root tile");
//! assert!(matches!(
//!     root.bounding_volume,
//!     Some(BoundingVolumeDocument::Sphere(_))
//! ));
//! # Ok::<(), strata_json::Error>(())
//! ```

pub mod error;

mod document;

pub use document::{
    AssetDocument, BoundingVolumeDocument, ContentDocument, RefineDocument, TileDocument,
    TilesetDocument,
};
pub use error::{Error, Result};
