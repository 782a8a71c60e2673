//! A renderer-agnostic streaming engine for 3D Tiles tilesets.
//!
//! This crate selects which tiles of a hierarchical level-of-detail tree to
//! draw for a given camera, streams their content in over pluggable I/O, and
//! bounds how much of it stays resident. It never touches the network, the
//! GPU, or a thread pool directly; hosts supply those through
//! [`TilesetExternals`] and receive per-frame render-list diffs back.
//!
//! # Design principles
//!
//! - **Renderer-agnostic**: Tile content and GPU resources are opaque;
//!   hosts decode and upload through their own [`PrepareRendererResources`]
//! - **Main-thread selection**: `update_view` owns the tree; workers only
//!   publish results through per-tile slots
//! - **Stable output**: A tile keeps rendering until its replacement is
//!   ready, so detail streams in without holes or flicker
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata::{Tileset, TilesetExternals, TilesetOptions};
//!
//! let externals = TilesetExternals {
//!     asset_accessor: Arc::new(strata::HttpAssetAccessor::new()),
//!     prepare_renderer_resources: Some(my_renderer_bridge),
//!     task_processor: Arc::new(strata::ThreadPoolTaskProcessor::default()),
//!     content_registry: Arc::new(my_registry),
//! };
//! let mut tileset = Tileset::new(externals, manifest_url, TilesetOptions::default());
//!
//! // Each frame:
//! let result = tileset.update_view(&camera);
//! for key in &result.tiles_newly_rendered_this_frame {
//!     // Fetch prepared resources and draw.
//! }
//! ```

mod builder;
mod cache;
mod camera;
mod content;
mod error;
pub mod geodetic;
#[cfg(not(target_family = "wasm"))]
pub mod http;
mod selection;
mod tile;
mod tileset;
mod volumes;

pub mod externals;

#[cfg(test)]
mod test_support;

pub use camera::Camera;
pub use content::{ContentRegistry, ExternalTilesetContent, TileContent};
pub use error::{ContentError, Error, Result};
pub use externals::{
    AssetAccessor, AssetRequest, AssetResponse, LoadContext, PrepareRendererResources,
    TaskProcessor, ThreadPoolTaskProcessor, TilesetExternals,
};
#[cfg(not(target_family = "wasm"))]
pub use http::HttpAssetAccessor;
pub use selection::{SelectionResult, TileSelectionState};
pub use tile::{Refine, Tile, TileArena, TileKey, TileLoadState};
pub use tileset::{Tileset, TilesetOptions, ViewUpdateResult};
pub use volumes::{
    BoundingRegion, BoundingSphere, BoundingVolume, CullingResult, OrientedBoundingBox, Plane,
};
