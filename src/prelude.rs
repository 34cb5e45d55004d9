//! Prelude module for common tilepyramid types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilepyramid::prelude::*;`

pub use crate::core::{
    config::{CacheProfile, SourceCacheOptions, TransformOptions},
    geo::{Coordinate, LatLng, LatLngBounds, Point},
    tile_id::{CanonicalTileId, OverscaledTileId, TileKey, UnwrappedTileId},
    transform::{CoveringTilesOptions, Transform},
};

pub use crate::tiles::{
    cache::TileCache,
    events::{DataType, SourceEvent},
    feature_state::FeatureState,
    source::{
        SourceType, TileErrorKind, TileLoadError, TileLoadFuture, TilePayload, TileRequest,
        TileSource,
    },
    source_cache::{SourceCache, TileQueryResult, VisibleTile},
    tile::{Tile, TileState},
};

pub use crate::{Error as MapError, Result};

pub use instant::Instant;
pub use std::{sync::Arc, time::Duration};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};
