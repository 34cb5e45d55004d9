//! Per-feature state for one source, such as hover or selection flags.
//!
//! Updates are staged and folded into the committed state once per
//! `SourceCache::update`, so several changes within a frame coalesce.

use serde_json::{Map, Value};

use crate::prelude::HashMap;

pub type FeatureState = Map<String, Value>;

type LayerStates = HashMap<String, HashMap<String, FeatureState>>;

#[derive(Debug, Clone, Default)]
pub struct FeatureStateStore {
    state: LayerStates,
    changes: LayerStates,
}

impl FeatureStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `state` into the feature's staged state
    pub fn update_state(&mut self, source_layer: &str, feature_id: &str, state: FeatureState) {
        let feature = self
            .changes
            .entry(source_layer.to_string())
            .or_default()
            .entry(feature_id.to_string())
            .or_default();
        for (key, value) in state {
            feature.insert(key, value);
        }
    }

    /// Committed state overlaid with staged changes
    pub fn get_state(&self, source_layer: &str, feature_id: &str) -> FeatureState {
        let mut merged = self
            .state
            .get(source_layer)
            .and_then(|layer| layer.get(feature_id))
            .cloned()
            .unwrap_or_default();
        if let Some(changes) = self
            .changes
            .get(source_layer)
            .and_then(|layer| layer.get(feature_id))
        {
            for (key, value) in changes {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Remove one key of a feature, a whole feature, or a whole layer
    pub fn remove_state(&mut self, source_layer: &str, feature_id: Option<&str>, key: Option<&str>) {
        for states in [&mut self.state, &mut self.changes] {
            let Some(feature_id) = feature_id else {
                states.remove(source_layer);
                continue;
            };
            let Some(layer) = states.get_mut(source_layer) else {
                continue;
            };
            match key {
                Some(key) => {
                    if let Some(feature) = layer.get_mut(feature_id) {
                        feature.remove(key);
                    }
                }
                None => {
                    layer.remove(feature_id);
                }
            }
        }
    }

    /// Commit staged changes. Returns whether anything was staged.
    pub fn coalesce_changes(&mut self) -> bool {
        if self.changes.is_empty() {
            return false;
        }
        for (layer_id, features) in self.changes.drain() {
            let layer = self.state.entry(layer_id).or_default();
            for (feature_id, changes) in features {
                let feature = layer.entry(feature_id).or_default();
                for (key, value) in changes {
                    feature.insert(key, value);
                }
            }
        }
        true
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}
