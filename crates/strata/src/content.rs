//! Tile content and the registry that creates it from response payloads.
//!
//! Decoded payloads live behind the object-safe [`TileContent`] trait so
//! hosts can carry their own geometry types through the engine without the
//! engine knowing about them. A [`ContentRegistry`] maps payloads to
//! constructors; the engine itself understands only external tileset
//! manifests, and hosts register their geometry decoders on top.

use std::any::Any;
use std::fmt;

use strata_json::TilesetDocument;

use crate::error::ContentError;

/// Decoded tile content.
///
/// Implementations are created on worker threads by a [`ContentRegistry`]
/// and installed into their tile on the main thread once loading completes.
pub trait TileContent: Send {
    /// Short identifier for the content format, e.g. `"external-tileset"`.
    fn kind(&self) -> &'static str;

    /// The content as [`Any`], for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn TileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileContent")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Content that points at another tileset manifest.
///
/// An external tileset splices a whole subtree into the parent tree: when
/// the owning tile finishes loading, the tileset builds the document's root
/// as children of that tile. The content itself is never renderable, and a
/// tile carrying it refuses to unload while its children are wired in.
pub struct ExternalTilesetContent {
    document: TilesetDocument,
    base_url: String,
}

impl ExternalTilesetContent {
    /// The [`TileContent::kind`] string for external tileset content.
    pub const KIND: &'static str = "external-tileset";

    /// Parses `data` as a tileset manifest fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::ExternalTileset`] when the manifest does not
    /// parse.
    pub fn from_slice(url: &str, data: &[u8]) -> Result<Self, ContentError> {
        let document = TilesetDocument::from_slice(data).map_err(|source| {
            ContentError::ExternalTileset {
                url: url.to_owned(),
                source,
            }
        })?;
        Ok(Self {
            document,
            base_url: url.to_owned(),
        })
    }

    /// The parsed manifest.
    #[must_use]
    pub fn document(&self) -> &TilesetDocument {
        &self.document
    }

    /// The URL the manifest was fetched from; its tiles resolve content URIs
    /// against this rather than the parent tileset's URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl TileContent for ExternalTilesetContent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type ProbeFn = Box<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;
type ConstructorFn =
    Box<dyn Fn(&str, &[u8]) -> Result<Box<dyn TileContent>, ContentError> + Send + Sync>;

struct ContentType {
    name: &'static str,
    probe: ProbeFn,
    constructor: ConstructorFn,
}

/// An ordered set of recognized content formats.
///
/// Formats are probed in registration order and the first probe that accepts
/// a payload constructs the content. There is no global registry; each
/// tileset receives one through its [`TilesetExternals`].
///
/// [`TilesetExternals`]: crate::TilesetExternals
#[derive(Default)]
pub struct ContentRegistry {
    types: Vec<ContentType>,
}

impl ContentRegistry {
    /// Creates an empty registry that recognizes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Creates a registry with the formats the engine understands natively,
    /// currently only external tileset manifests.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ExternalTilesetContent::KIND,
            is_tileset_json,
            |url, data| Ok(Box::new(ExternalTilesetContent::from_slice(url, data)?)),
        );
        registry
    }

    /// Registers a content format. Formats registered earlier are probed
    /// first.
    pub fn register<P, C>(&mut self, name: &'static str, probe: P, constructor: C)
    where
        P: Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
        C: Fn(&str, &[u8]) -> Result<Box<dyn TileContent>, ContentError> + Send + Sync + 'static,
    {
        self.types.push(ContentType {
            name,
            probe: Box::new(probe),
            constructor: Box::new(constructor),
        });
    }

    /// Creates content for a payload fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::UnknownFormat`] when no registered format
    /// recognizes the payload, or the constructor's error when one does but
    /// the payload cannot be decoded.
    pub fn create(&self, url: &str, data: &[u8]) -> Result<Box<dyn TileContent>, ContentError> {
        for content_type in &self.types {
            if (content_type.probe)(url, data) {
                return (content_type.constructor)(url, data);
            }
        }
        Err(ContentError::UnknownFormat {
            url: url.to_owned(),
        })
    }
}

impl fmt::Debug for ContentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.types.iter().map(|t| t.name))
            .finish()
    }
}

/// True when the payload looks like a tileset manifest: the first
/// non-whitespace byte is `{`, or the URL path ends in `.json`.
fn is_tileset_json(url: &str, data: &[u8]) -> bool {
    if data.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
        return true;
    }
    url_path(url).to_ascii_lowercase().ends_with(".json")
}

/// The path portion of a URL, without query or fragment.
fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
