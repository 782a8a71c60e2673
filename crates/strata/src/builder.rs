//! Builds the tile tree from a parsed manifest document.
//!
//! The builder resolves everything the traversal doesn't want to think
//! about: transforms are composed down the tree, bounding volumes land in
//! world space, refine strategies are inherited, and content URIs become
//! absolute. A tile missing its required properties is skipped along with
//! its subtree; only a bad root fails the whole build.

use glam::{DMat3, DMat4, DVec3};

use strata_json::{BoundingVolumeDocument, RefineDocument, TileDocument, TilesetDocument};

use crate::error::{Error, Result};
use crate::geodetic::GlobeRectangle;
use crate::tile::{Refine, Tile, TileArena, TileKey};
use crate::volumes::{BoundingRegion, BoundingSphere, BoundingVolume, OrientedBoundingBox};

/// Builds the tree for a root manifest, returning the root tile's key.
pub(crate) fn build_tile_tree(
    arena: &mut TileArena,
    document: &TilesetDocument,
    base_url: &str,
) -> Result<TileKey> {
    let Some(root_document) = &document.root else {
        return Err(Error::InvalidManifest {
            url: base_url.to_owned(),
            detail: "the manifest has no root tile".to_owned(),
        });
    };

    build_tile(
        arena,
        root_document,
        None,
        DMat4::IDENTITY,
        Refine::Replace,
        base_url,
    )
    .ok_or_else(|| Error::InvalidManifest {
        url: base_url.to_owned(),
        detail: "the root tile is missing a bounding volume or geometric error".to_owned(),
    })
}

/// Splices an external tileset's root in as a child of the tile that
/// referenced it. A bad external root is logged and dropped; the rest of
/// the tree is unaffected.
pub(crate) fn attach_external_subtree(
    arena: &mut TileArena,
    parent: TileKey,
    document: &TilesetDocument,
    base_url: &str,
) {
    let Some(root_document) = &document.root else {
        tracing::warn!(url = base_url, "external tileset has no root tile");
        return;
    };

    let (parent_transform, parent_refine) = match arena.get(parent) {
        Some(tile) => (tile.transform(), tile.refine()),
        None => return,
    };

    let Some(child) = build_tile(
        arena,
        root_document,
        Some(parent),
        parent_transform,
        parent_refine,
        base_url,
    ) else {
        tracing::warn!(
            url = base_url,
            "external tileset root is missing a bounding volume or geometric error"
        );
        return;
    };

    if let Some(tile) = arena.get_mut(parent) {
        let mut children = tile.children().to_vec();
        children.push(child);
        tile.set_children(children);
    }
}

/// Builds one tile and its subtree. Returns `None` when the document is
/// missing a bounding volume or geometric error; the caller drops the
/// subtree.
fn build_tile(
    arena: &mut TileArena,
    document: &TileDocument,
    parent: Option<TileKey>,
    parent_transform: DMat4,
    parent_refine: Refine,
    base_url: &str,
) -> Option<TileKey> {
    let Some(bounding_volume) = &document.bounding_volume else {
        tracing::warn!(
            url = base_url,
            "tile has no bounding volume, dropping its subtree"
        );
        return None;
    };
    let Some(geometric_error) = document.geometric_error else {
        tracing::warn!(
            url = base_url,
            "tile has no geometric error, dropping its subtree"
        );
        return None;
    };

    let local_transform = document
        .transform
        .map_or(DMat4::IDENTITY, |values| DMat4::from_cols_array(&values));
    let transform = parent_transform * local_transform;

    let refine = match document.refine {
        Some(RefineDocument::Replace) => Refine::Replace,
        Some(RefineDocument::Add) => Refine::Add,
        None => parent_refine,
    };

    let key = arena.insert_with(|key| {
        let mut tile = Tile::new(key, parent);
        tile.set_transform(transform);
        tile.set_bounding_volume(convert_volume(bounding_volume).transform(&transform));
        tile.set_geometric_error(geometric_error);
        tile.set_refine(refine);

        if let Some(volume) = &document.viewer_request_volume {
            tile.set_viewer_request_volume(convert_volume(volume).transform(&transform));
        }

        if let Some(content) = &document.content {
            if let Some(uri) = &content.uri {
                tile.set_content_uri(resolve_uri(base_url, uri));
            } else {
                // Nothing to fetch or decode for this tile, so there is
                // nothing for the host to prepare either.
                tile.mark_renderer_resources_prepared();
            }
            if let Some(volume) = &content.bounding_volume {
                tile.set_content_bounding_volume(convert_volume(volume).transform(&transform));
            }
        }

        tile
    });

    let mut children = Vec::with_capacity(document.children.len());
    for child_document in &document.children {
        if let Some(child) =
            build_tile(arena, child_document, Some(key), transform, refine, base_url)
        {
            children.push(child);
        }
    }
    if let Some(tile) = arena.get_mut(key) {
        tile.set_children(children);
    }

    Some(key)
}

fn convert_volume(document: &BoundingVolumeDocument) -> BoundingVolume {
    match document {
        BoundingVolumeDocument::Box(v) => {
            let center = DVec3::new(v[0], v[1], v[2]);
            let half_axes = DMat3::from_cols(
                DVec3::new(v[3], v[4], v[5]),
                DVec3::new(v[6], v[7], v[8]),
                DVec3::new(v[9], v[10], v[11]),
            );
            BoundingVolume::Box(OrientedBoundingBox::new(center, half_axes))
        }
        BoundingVolumeDocument::Region(v) => BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::new(v[0], v[1], v[2], v[3]),
            v[4],
            v[5],
        )),
        BoundingVolumeDocument::Sphere(v) => {
            BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(v[0], v[1], v[2]), v[3]))
        }
    }
}

/// Resolves a content URI against the manifest it was declared in.
/// Absolute URIs pass through; relative ones replace the manifest URL's
/// final path segment and keep their own query string.
pub(crate) fn resolve_uri(base_url: &str, uri: &str) -> String {
    if uri.contains("://") || uri.starts_with("data:") {
        return uri.to_owned();
    }
    let base_path = base_url.split(['?', '#']).next().unwrap_or(base_url);
    match base_path.rfind('/') {
        Some(position) => format!("{}{}", &base_path[..=position], uri),
        None => uri.to_owned(),
    }
}
