//! # tilepyramid
//!
//! The tile retention engine and viewport transform behind an interactive,
//! tile-based map renderer.
//!
//! [`Transform`](crate::core::transform::Transform) turns a camera (center, zoom,
//! bearing, pitch) into projection matrices and the set of tiles covering the
//! viewport. [`SourceCache`](crate::tiles::source_cache::SourceCache) keeps the live
//! tile set for one source in sync with that covering set: it requests loads
//! through an abstract [`TileSource`](crate::tiles::source::TileSource), substitutes
//! loaded ancestors and descendants while ideal tiles are still in flight,
//! holds tiles for cross-fading and parks unused tiles in an LRU cache.

pub mod core;
pub mod prelude;
pub mod tiles;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{CacheProfile, SourceCacheOptions, TransformOptions},
    geo::{Coordinate, LatLng, LatLngBounds, Point},
    tile_id::{CanonicalTileId, OverscaledTileId, TileKey, UnwrappedTileId},
    transform::{CoveringTilesOptions, Transform},
};

pub use crate::tiles::{
    cache::TileCache,
    events::{DataType, SourceEvent},
    source::{SourceType, TileErrorKind, TileLoadError, TilePayload, TileRequest, TileSource},
    source_cache::{SourceCache, TileQueryResult, VisibleTile},
    tile::{Tile, TileState},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The pixel matrix could not be inverted. The transform is in a
    /// degenerate numeric state and cannot answer screen-space queries.
    #[error("failed to invert pixel matrix")]
    MatrixInversion,
}

/// Error type alias for convenience
pub type Error = MapError;
