use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::core::tile_id::{CanonicalTileId, OverscaledTileId};
use crate::tiles::tile::Tile;

/// Future returned by [`TileSource::load_tile`]. Loads run on the thread that
/// owns the cache, so the future does not need to be `Send`.
pub type TileLoadFuture = LocalBoxFuture<'static, Result<TilePayload, TileLoadError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Vector,
    Raster,
    RasterDem,
    #[serde(rename = "geojson")]
    GeoJson,
    Image,
    Video,
    Canvas,
}

impl SourceType {
    /// Sources whose tiles cross-fade with their parents and children
    pub fn is_raster(&self) -> bool {
        matches!(self, SourceType::Raster | SourceType::Image | SourceType::Video)
    }
}

/// How a failed load should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileErrorKind {
    /// The tile does not exist. No event; coverage is re-evaluated so
    /// parents or children can fill the gap.
    NotFound,
    /// The failure is expected and should not be reported.
    Suppressed,
    /// A real failure that is reported as an error event.
    Transient,
}

impl fmt::Display for TileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileErrorKind::NotFound => "not found",
            TileErrorKind::Suppressed => "suppressed",
            TileErrorKind::Transient => "transient",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("tile load failed ({kind}): {message}")]
pub struct TileLoadError {
    pub kind: TileErrorKind,
    pub message: String,
}

impl TileLoadError {
    pub fn new(kind: TileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TileErrorKind::NotFound, message)
    }

    pub fn suppressed(message: impl Into<String>) -> Self {
        Self::new(TileErrorKind::Suppressed, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TileErrorKind::Transient, message)
    }
}

/// Everything the cache hands a source when asking for a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRequest {
    pub uid: u64,
    pub tile_id: OverscaledTileId,
    /// Tile size in pixels, including the overscale factor
    pub tile_size: f64,
    /// True when the tile already has data and is being refreshed
    pub reloading: bool,
}

/// Result of a successful load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TilePayload {
    pub data: Arc<Vec<u8>>,
    /// The tile carries symbol buckets and is held for a symbol fade when removed
    pub has_symbol_buckets: bool,
    /// Extra query padding in pixels for features drawn past their geometry
    pub query_padding: f64,
    /// Time until the data should be refreshed
    pub expires_in: Option<Duration>,
}

impl TilePayload {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            ..Default::default()
        }
    }

    pub fn with_symbol_buckets(mut self, has_symbol_buckets: bool) -> Self {
        self.has_symbol_buckets = has_symbol_buckets;
        self
    }

    pub fn with_query_padding(mut self, query_padding: f64) -> Self {
        self.query_padding = query_padding;
        self
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

/// A provider of tiles for one source.
///
/// Fetching, decoding and retry policy live behind `load_tile`. The static
/// properties describe the pyramid the source serves.
pub trait TileSource {
    fn source_type(&self) -> SourceType;

    fn tile_size(&self) -> u32 {
        512
    }

    fn min_zoom(&self) -> u8 {
        0
    }

    fn max_zoom(&self) -> u8 {
        22
    }

    fn round_zoom(&self) -> bool {
        false
    }

    fn reparse_overscaled(&self) -> bool {
        false
    }

    /// Sparse sources can report that no data exists for a tile
    fn has_tile(&self, _tile_id: &OverscaledTileId) -> bool {
        true
    }

    /// Image and video sources are pinned to a single tile
    fn tile_id(&self) -> Option<CanonicalTileId> {
        None
    }

    /// Whether the source's own metadata has loaded
    fn is_loaded(&self) -> bool {
        true
    }

    fn load_tile(&self, request: TileRequest) -> TileLoadFuture;

    /// Best-effort cancellation of an in-flight load
    fn abort_tile(&self, _tile: &Tile) {}

    /// Release any resources held for the tile
    fn unload_tile(&self, _tile: &Tile) {}

    fn has_transition(&self) -> bool {
        false
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.source_type() })
    }
}
