//! Configuration for transforms and tile caches
//!
//! Options are plain serde structs so they can be loaded from JSON alongside a
//! style. `CacheProfile` offers presets in the same resolve-to-options style
//! used elsewhere in the engine.

use serde::{Deserialize, Serialize};

use crate::core::constants::{
    DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_SYMBOL_FADE_DURATION_MS,
};
use crate::{MapError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub render_world_copies: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            render_world_copies: true,
        }
    }
}

impl TransformOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.min_zoom.is_finite() || !self.max_zoom.is_finite() {
            return Err(MapError::InvalidConfiguration(
                "zoom limits must be finite".to_string(),
            ));
        }
        if self.min_zoom > self.max_zoom {
            return Err(MapError::InvalidConfiguration(format!(
                "min zoom {} is above max zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCacheOptions {
    /// Upper bound on the LRU cache. The viewport-derived size is used when
    /// it is smaller.
    pub max_tile_cache_size: Option<usize>,
    /// How long tiles with symbol buckets are held after leaving the view.
    pub symbol_fade_duration_ms: u64,
}

impl Default for SourceCacheOptions {
    fn default() -> Self {
        CacheProfile::default().resolve()
    }
}

impl SourceCacheOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheProfile {
    Balanced,
    LowMemory,
    Custom(SourceCacheOptions),
}

impl CacheProfile {
    pub fn resolve(&self) -> SourceCacheOptions {
        match self {
            Self::Balanced => SourceCacheOptions {
                max_tile_cache_size: None,
                symbol_fade_duration_ms: DEFAULT_SYMBOL_FADE_DURATION_MS,
            },
            Self::LowMemory => SourceCacheOptions {
                max_tile_cache_size: Some(16),
                symbol_fade_duration_ms: 0,
            },
            Self::Custom(options) => options.clone(),
        }
    }
}

impl Default for CacheProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_resolve() {
        let balanced = CacheProfile::Balanced.resolve();
        assert_eq!(balanced.max_tile_cache_size, None);
        assert_eq!(balanced.symbol_fade_duration_ms, 300);

        let low = CacheProfile::LowMemory.resolve();
        assert_eq!(low.max_tile_cache_size, Some(16));

        let custom = SourceCacheOptions {
            max_tile_cache_size: Some(3),
            symbol_fade_duration_ms: 10,
        };
        assert_eq!(CacheProfile::Custom(custom.clone()).resolve(), custom);
    }

    #[test]
    fn test_transform_options_from_json() {
        let options = TransformOptions::from_json(r#"{"max_zoom": 18}"#).unwrap();
        assert_eq!(options.min_zoom, 0.0);
        assert_eq!(options.max_zoom, 18.0);
        assert!(options.render_world_copies);

        let err = TransformOptions::from_json(r#"{"min_zoom": 5, "max_zoom": 2}"#);
        assert!(matches!(err, Err(MapError::InvalidConfiguration(_))));

        let err = TransformOptions::from_json("not json");
        assert!(matches!(err, Err(MapError::Serialization(_))));
    }

    #[test]
    fn test_source_cache_options_partial_json() {
        let options = SourceCacheOptions::from_json(r#"{"max_tile_cache_size": 8}"#).unwrap();
        assert_eq!(options.max_tile_cache_size, Some(8));
        assert_eq!(options.symbol_fade_duration_ms, 300);
    }
}
