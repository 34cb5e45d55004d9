//! Core constants shared by the transform and the tile cache.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Number of local vertex units along one tile edge.
pub const EXTENT: f64 = 8192.0;

/// Square tile size, in pixels, the transform measures its world in.
pub const DEFAULT_TILE_SIZE: f64 = 512.0;

/// Largest latitude Web Mercator can represent with a square world.
pub const MAX_VALID_LATITUDE: f64 = 85.051129;

/// Equatorial radius used for the vertical (meters per pixel) scale.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Default zoom limits of a transform.
pub const DEFAULT_MIN_ZOOM: f64 = 0.0;
pub const DEFAULT_MAX_ZOOM: f64 = 22.0;

/// Pitch is clamped to this range, in degrees.
pub const MIN_PITCH: f64 = 0.0;
pub const MAX_PITCH: f64 = 60.0;

/// Field of view is clamped to this range, in degrees.
pub const MIN_FOV: f64 = 0.01;
pub const MAX_FOV: f64 = 60.0;

/// Default vertical field of view in radians (about 36.87 degrees).
pub const DEFAULT_FOV: f64 = 0.643_501_108_793_284_4;

/// Deepest canonical zoom a [`TileKey`](crate::core::tile_id::TileKey) can encode.
pub const MAX_CANONICAL_ZOOM: u8 = 23;

/// Deepest overscaled zoom a [`TileKey`](crate::core::tile_id::TileKey) can encode.
pub const MAX_OVERSCALED_ZOOM: u8 = 31;

/// How many levels above the covering zoom a loaded ancestor may be used.
pub const MAX_OVERZOOMING: i32 = 10;

/// How many levels below the covering zoom loaded descendants may be used.
pub const MAX_UNDERZOOMING: i32 = 3;

/// Zoom levels worth of viewport tiles the LRU cache holds.
pub const COMMON_ZOOM_RANGE: usize = 5;

/// Default symbol fade hold, in milliseconds.
pub const DEFAULT_SYMBOL_FADE_DURATION_MS: u64 = 300;
