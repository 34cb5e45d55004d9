use std::cmp::Ordering;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::poll_fn;
use futures::task::noop_waker_ref;
use instant::Instant;
use log::{debug, trace, warn};
use nalgebra::{Matrix2, Matrix4, Vector2};

use crate::core::config::SourceCacheOptions;
use crate::core::constants::{
    COMMON_ZOOM_RANGE, EXTENT, MAX_CANONICAL_ZOOM, MAX_OVERZOOMING, MAX_UNDERZOOMING,
};
use crate::core::geo::{envelope, Coordinate, Point};
use crate::core::tile_id::{OverscaledTileId, TileKey};
use crate::core::transform::{CoveringTilesOptions, Transform};
use crate::prelude::{HashMap, HashSet};
use crate::tiles::cache::TileCache;
use crate::tiles::events::{DataType, EventEmitter, SourceEvent};
use crate::tiles::feature_state::{FeatureState, FeatureStateStore};
use crate::tiles::loader::{LoadOutcome, TileLoadQueue};
use crate::tiles::source::{
    SourceType, TileErrorKind, TileLoadError, TilePayload, TileRequest, TileSource,
};
use crate::tiles::tile::{Tile, TileState};
use crate::{MapError, Result};

/// Layer name used for feature state of sources without source layers
const DEFAULT_SOURCE_LAYER: &str = "default";

/// A renderable tile with its clip-space matrix
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleTile {
    pub tile_id: OverscaledTileId,
    pub pos_matrix: Matrix4<f32>,
}

/// A tile hit by a screen-space query, with the query in tile space
#[derive(Debug)]
pub struct TileQueryResult<'a> {
    pub tile: &'a Tile,
    pub tile_id: OverscaledTileId,
    pub query_geometry: Vec<Point>,
    pub camera_query_geometry: Vec<Point>,
    /// Ratio between the view's zoom and the tile's zoom
    pub scale: f64,
}

/// Keeps the live tile set of one source in sync with a [`Transform`].
///
/// Every [`update`](SourceCache::update) computes the ideal tiles for the
/// view, requests the missing ones, retains loaded ancestors and descendants
/// while they are in flight and parks tiles that left the view in an LRU
/// cache.
pub struct SourceCache {
    id: String,
    source: Rc<dyn TileSource>,
    options: SourceCacheOptions,
    tiles: HashMap<TileKey, Tile>,
    cache: TileCache,
    covered_tiles: HashSet<TileKey>,
    loads: TileLoadQueue,
    events: EventEmitter,
    feature_state: FeatureStateStore,
    transform: Option<Transform>,
    prev_lng: Option<f64>,
    used: bool,
    paused: bool,
    should_reload_on_resume: bool,
    update_requested: bool,
    next_uid: u64,
}

impl SourceCache {
    pub fn new(
        id: impl Into<String>,
        source: Rc<dyn TileSource>,
        options: SourceCacheOptions,
    ) -> Result<Self> {
        let id = id.into();
        validate_source(&id, source.as_ref())?;

        let unload_source = Rc::clone(&source);
        let cache = TileCache::new(0, move |mut tile: Tile| {
            trace!("evicting cached tile {}", tile.tile_id());
            unload_source.unload_tile(&tile);
            tile.unload();
        });

        Ok(Self {
            id,
            source,
            options,
            tiles: HashMap::default(),
            cache,
            covered_tiles: HashSet::default(),
            loads: TileLoadQueue::new(),
            events: EventEmitter::default(),
            feature_state: FeatureStateStore::new(),
            transform: None,
            prev_lng: None,
            used: true,
            paused: false,
            should_reload_on_resume: false,
            update_requested: false,
            next_uid: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Rc<dyn TileSource> {
        &self.source
    }

    pub fn options(&self) -> &SourceCacheOptions {
        &self.options
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Receive tile events from now on
    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<SourceEvent> {
        self.events.subscribe()
    }

    /// Whether any layer renders this source. Unused caches keep no ideal tiles.
    pub fn used(&self) -> bool {
        self.used
    }

    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn get_tile(&self, tile_id: &OverscaledTileId) -> Option<&Tile> {
        self.tiles.get(&tile_id.key())
    }

    pub fn get_tile_mut(&mut self, tile_id: &OverscaledTileId) -> Option<&mut Tile> {
        self.tiles.get_mut(&tile_id.key())
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Retained only to cross-fade and not drawn on its own
    pub fn is_covered(&self, tile_id: &OverscaledTileId) -> bool {
        self.covered_tiles.contains(&tile_id.key())
    }

    /// Bring the live set in line with `transform`
    pub fn update(&mut self, transform: &Transform) {
        self.transform = Some(transform.clone());
        if self.paused {
            return;
        }

        self.update_tiles(transform);

        // a tile reported missing during the pass gets one more pass so its
        // parents and children can stand in
        if std::mem::take(&mut self.update_requested) {
            self.update_tiles(transform);
        }
    }

    fn update_tiles(&mut self, transform: &Transform) {
        self.update_cache_size(transform);
        self.handle_wrap_jump(transform.center().lng);
        self.refresh_expired_tiles(Instant::now());

        self.covered_tiles.clear();

        let ideal_tile_ids = self.ideal_tile_ids(transform);
        let zoom = self.covering_zoom(transform);
        let min_zoom = self.source.min_zoom() as i32;
        let min_covering_zoom = (zoom - MAX_OVERZOOMING).max(min_zoom);
        let max_covering_zoom = (zoom + MAX_UNDERZOOMING).max(min_zoom);

        let mut retain = self.update_retained_tiles(&ideal_tile_ids, zoom);

        if self.source.source_type().is_raster() {
            let now = Instant::now();
            let mut parents_for_fading = HashMap::default();
            let mut fading_tiles = HashMap::default();
            let retained: Vec<(TileKey, OverscaledTileId)> =
                retain.iter().map(|(key, id)| (*key, *id)).collect();

            for (key, tile_id) in retained {
                match self.tiles.get(&key) {
                    Some(tile) if !tile.fade_finished(now) => {}
                    _ => continue,
                }
                let parent_id = self
                    .find_loaded_parent(&tile_id, min_covering_zoom as u8)
                    .map(Tile::tile_id);
                if let Some(parent_id) = parent_id {
                    self.add_tile(parent_id);
                    parents_for_fading.insert(parent_id.key(), parent_id);
                }
                fading_tiles.insert(key, tile_id);
            }

            self.retain_loaded_children(&fading_tiles, zoom, max_covering_zoom, &mut retain);

            for (key, parent_id) in parents_for_fading {
                if !retain.contains_key(&key) {
                    self.covered_tiles.insert(key);
                    retain.insert(key, parent_id);
                }
            }
        }

        for key in retain.keys() {
            if let Some(tile) = self.tiles.get_mut(key) {
                tile.clear_fade_hold();
            }
        }

        let fade_duration = Duration::from_millis(self.options.symbol_fade_duration_ms);
        let remove: Vec<TileKey> = self
            .tiles
            .keys()
            .filter(|key| !retain.contains_key(*key))
            .copied()
            .collect();
        for key in remove {
            let Some(tile) = self.tiles.get_mut(&key) else {
                continue;
            };
            if tile.has_symbol_buckets() && !tile.holding_for_fade() {
                tile.set_hold_duration(fade_duration);
            } else if !tile.has_symbol_buckets() || tile.symbol_fade_finished() {
                self.remove_tile(key);
            }
        }

        if self.feature_state.coalesce_changes() {
            trace!("source {}: feature state changes committed", self.id);
        }

        trace!(
            "source {}: {} ideal, {} retained, {} live, {} cached, {} loading",
            self.id,
            ideal_tile_ids.len(),
            retain.len(),
            self.tiles.len(),
            self.cache.len(),
            self.loads.len()
        );
    }

    /// Size the LRU cache to a few zoom levels worth of viewport tiles
    pub fn update_cache_size(&mut self, transform: &Transform) {
        let tile_size = self.source.tile_size() as f64;
        let width_in_tiles = (transform.width() / tile_size).ceil() as usize + 1;
        let height_in_tiles = (transform.height() / tile_size).ceil() as usize + 1;
        let view_dependent_max_size = width_in_tiles * height_in_tiles * COMMON_ZOOM_RANGE;
        let max_size = match self.options.max_tile_cache_size {
            Some(cap) => cap.min(view_dependent_max_size),
            None => view_dependent_max_size,
        };
        self.cache.set_max_size(max_size);
    }

    /// Move every live tile to the world copy the center jumped to, so that
    /// crossing the antimeridian does not reload anything
    fn handle_wrap_jump(&mut self, lng: f64) {
        let prev_lng = self.prev_lng.unwrap_or(lng);
        let wrap_delta = ((lng - prev_lng) / 360.0).round() as i32;
        self.prev_lng = Some(lng);

        if wrap_delta == 0 {
            return;
        }
        debug!("source {}: rekeying {} tiles by wrap {}", self.id, self.tiles.len(), wrap_delta);
        let tiles = std::mem::take(&mut self.tiles);
        self.tiles = tiles
            .into_values()
            .map(|mut tile| {
                tile.tile_id = tile.tile_id.unwrap_to(tile.tile_id.wrap + wrap_delta);
                (tile.tile_id.key(), tile)
            })
            .collect();
    }

    fn refresh_expired_tiles(&mut self, now: Instant) {
        let expired: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|(_, tile)| tile.state() == TileState::Loaded && tile.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            debug!("source {}: refreshing expired tile {}", self.id, key.as_u128());
            self.reload_tile(key);
        }
    }

    fn ideal_tile_ids(&self, transform: &Transform) -> Vec<OverscaledTileId> {
        if !self.used {
            return Vec::new();
        }
        if let Some(tile_id) = self.source.tile_id() {
            return transform
                .get_visible_unwrapped_coordinates(tile_id)
                .into_iter()
                .map(|unwrapped| {
                    let canonical = unwrapped.canonical;
                    OverscaledTileId::new(
                        canonical.z,
                        unwrapped.wrap,
                        canonical.z,
                        canonical.x,
                        canonical.y,
                    )
                })
                .collect();
        }

        let options = CoveringTilesOptions {
            tile_size: self.source.tile_size() as f64,
            min_zoom: Some(self.source.min_zoom()),
            max_zoom: Some(self.source.max_zoom()),
            round_zoom: self.source.round_zoom(),
            reparse_overscaled: self.source.reparse_overscaled(),
            render_world_copies: None,
        };
        transform
            .covering_tiles(&options)
            .into_iter()
            .filter(|tile_id| self.source.has_tile(tile_id))
            .collect()
    }

    fn covering_zoom(&self, transform: &Transform) -> i32 {
        let zoom =
            transform.zoom() + (transform.tile_size() / self.source.tile_size() as f64).log2();
        if self.source.round_zoom() {
            zoom.round() as i32
        } else {
            zoom.floor() as i32
        }
    }

    /// Ideal tiles plus the loaded ancestors and descendants that stand in
    /// for ideal tiles without data
    pub(crate) fn update_retained_tiles(
        &mut self,
        ideal_tile_ids: &[OverscaledTileId],
        zoom: i32,
    ) -> HashMap<TileKey, OverscaledTileId> {
        let mut retain: HashMap<TileKey, OverscaledTileId> = HashMap::default();
        let mut checked: HashSet<TileKey> = HashSet::default();
        let source_min_zoom = self.source.min_zoom() as i32;
        let source_max_zoom = self.source.max_zoom();
        let min_covering_zoom = (zoom - MAX_OVERZOOMING).max(source_min_zoom);
        let max_covering_zoom = (zoom + MAX_UNDERZOOMING).max(source_min_zoom);

        let mut missing_tiles: HashMap<TileKey, OverscaledTileId> = HashMap::default();
        for tile_id in ideal_tile_ids {
            let key = self.add_tile(*tile_id);
            // ideal tiles are retained whatever their state
            retain.insert(key, *tile_id);
            let has_data = self.tiles.get(&key).map_or(false, Tile::has_data);
            if !has_data && zoom < source_max_zoom as i32 {
                missing_tiles.insert(key, *tile_id);
            }
        }

        self.retain_loaded_children(&missing_tiles, zoom, max_covering_zoom, &mut retain);

        for tile_id in ideal_tile_ids {
            let Some(tile) = self.tiles.get(&tile_id.key()) else {
                continue;
            };
            if tile.has_data() {
                continue;
            }

            if zoom + 1 > source_max_zoom as i32 {
                let child_id = tile_id.children(source_max_zoom)[0];
                let child_loaded = self
                    .tiles
                    .get(&child_id.key())
                    .map_or(false, Tile::has_data);
                if child_loaded {
                    retain.insert(child_id.key(), child_id);
                    continue;
                }
            } else {
                let children = tile_id.children(source_max_zoom);
                if children.iter().all(|child| retain.contains_key(&child.key())) {
                    continue;
                }
            }

            // ancestors are only requested above tiles that got an answer
            let mut parent_was_requested = tile.was_requested();

            let mut overscaled_z = tile_id.overscaled_z as i32 - 1;
            while overscaled_z >= min_covering_zoom {
                let parent_id = tile_id.scaled_to(overscaled_z as u8);
                let parent_key = parent_id.key();
                if !checked.insert(parent_key) {
                    break;
                }

                if !self.tiles.contains_key(&parent_key) && parent_was_requested {
                    self.add_tile(parent_id);
                }
                if let Some(parent) = self.tiles.get(&parent_key) {
                    retain.insert(parent_key, parent_id);
                    parent_was_requested = parent.was_requested();
                    if parent.has_data() {
                        break;
                    }
                }
                overscaled_z -= 1;
            }
        }

        retain
    }

    /// Retain the topmost loaded descendant of each tile in `ideal_tiles`,
    /// looking at most down to `max_covering_zoom`
    fn retain_loaded_children(
        &self,
        ideal_tiles: &HashMap<TileKey, OverscaledTileId>,
        zoom: i32,
        max_covering_zoom: i32,
        retain: &mut HashMap<TileKey, OverscaledTileId>,
    ) {
        for (key, tile) in &self.tiles {
            let tile_z = tile.tile_id.overscaled_z as i32;
            if retain.contains_key(key)
                || !tile.has_data()
                || tile_z <= zoom
                || tile_z > max_covering_zoom
            {
                continue;
            }

            let mut topmost_loaded_id = tile.tile_id;
            let mut current = Some(tile);
            while let Some(tile) = current {
                if tile.tile_id.overscaled_z as i32 <= zoom + 1 {
                    break;
                }
                let parent_id = tile.tile_id.scaled_to(tile.tile_id.overscaled_z - 1);
                current = self.tiles.get(&parent_id.key());
                if current.map_or(false, Tile::has_data) {
                    topmost_loaded_id = parent_id;
                }
            }

            let mut ancestor_id = topmost_loaded_id;
            while ancestor_id.overscaled_z as i32 > zoom {
                ancestor_id = ancestor_id.scaled_to(ancestor_id.overscaled_z - 1);
                if ideal_tiles.contains_key(&ancestor_id.key()) {
                    retain.insert(topmost_loaded_id.key(), topmost_loaded_id);
                    break;
                }
            }
        }
    }

    /// Nearest ancestor with data, from the live set or the cache. Cached
    /// tiles are only looked at, not promoted.
    pub fn find_loaded_parent(&self, tile_id: &OverscaledTileId, min_zoom: u8) -> Option<&Tile> {
        for z in (min_zoom..tile_id.overscaled_z).rev() {
            let parent_key = tile_id.scaled_to(z).key();
            if let Some(tile) = self.tiles.get(&parent_key) {
                if tile.has_data() {
                    return Some(tile);
                }
            }
            if let Some(tile) = self.cache.get(&parent_key) {
                return Some(tile);
            }
        }
        None
    }

    pub fn has_renderable_parent(&self, tile_id: &OverscaledTileId) -> bool {
        self.find_loaded_parent(tile_id, 0)
            .map_or(false, |parent| self.is_id_renderable(&parent.tile_id().key(), false))
    }

    fn is_id_renderable(&self, key: &TileKey, symbol_layer: bool) -> bool {
        self.tiles.get(key).map_or(false, |tile| {
            tile.has_data()
                && !self.covered_tiles.contains(key)
                && (symbol_layer || !tile.holding_for_fade())
        })
    }

    /// Every live tile, in draw order
    pub fn get_ids(&self) -> Vec<OverscaledTileId> {
        let mut ids: Vec<OverscaledTileId> = self.tiles.values().map(Tile::tile_id).collect();
        self.sort_for_drawing(&mut ids);
        ids
    }

    /// Tiles that should be drawn, in draw order. Symbol layers also draw
    /// tiles held for their label fade.
    pub fn get_renderable_ids(&self, symbol_layer: bool) -> Vec<OverscaledTileId> {
        let mut ids: Vec<OverscaledTileId> = self
            .tiles
            .iter()
            .filter(|(key, _)| self.is_id_renderable(key, symbol_layer))
            .map(|(_, tile)| tile.tile_id())
            .collect();
        self.sort_for_drawing(&mut ids);
        ids
    }

    pub fn get_visible_coordinates(&self, symbol_layer: bool) -> Vec<VisibleTile> {
        let Some(transform) = self.transform.as_ref() else {
            return Vec::new();
        };
        self.get_renderable_ids(symbol_layer)
            .into_iter()
            .map(|tile_id| VisibleTile {
                tile_id,
                pos_matrix: transform.calculate_pos_matrix(&tile_id.to_unwrapped(), false),
            })
            .collect()
    }

    /// Overscaled zoom ascending, then by position rotated with the map so
    /// that tiles lower on screen come first
    fn sort_for_drawing(&self, ids: &mut [OverscaledTileId]) {
        let rotation = self
            .transform
            .as_ref()
            .map_or_else(Matrix2::<f64>::identity, Transform::rotation_matrix);
        let rotated = |id: &OverscaledTileId| {
            rotation * Vector2::new(id.canonical.x as f64, id.canonical.y as f64)
        };
        ids.sort_by(|a, b| {
            let (ra, rb) = (rotated(a), rotated(b));
            a.overscaled_z
                .cmp(&b.overscaled_z)
                .then_with(|| rb.y.partial_cmp(&ra.y).unwrap_or(Ordering::Equal))
                .then_with(|| rb.x.partial_cmp(&ra.x).unwrap_or(Ordering::Equal))
                .then_with(|| a.wrap.cmp(&b.wrap))
        });
    }

    /// Tiles intersecting a screen-space query, with the query projected into
    /// each tile's [0, EXTENT) space
    pub fn tiles_in(
        &self,
        query_geometry: &[Point],
        max_pitch_scale_factor: f64,
        has_3d_layer: bool,
    ) -> Vec<TileQueryResult<'_>> {
        let Some(transform) = self.transform.as_ref() else {
            return Vec::new();
        };

        let camera_query_geometry = if has_3d_layer {
            transform.get_camera_query_geometry(query_geometry)
        } else {
            query_geometry.to_vec()
        };
        let query_coords: Vec<Coordinate> = query_geometry
            .iter()
            .map(|p| transform.point_coordinate(p, None))
            .collect();
        let camera_coords: Vec<Coordinate> = camera_query_geometry
            .iter()
            .map(|p| transform.point_coordinate(p, None))
            .collect();

        let Some(bbox) = envelope(camera_coords.iter().map(|c| (c.column, c.row))) else {
            return Vec::new();
        };
        let coord_zoom = transform.tile_zoom();
        let min = Coordinate::new(bbox.min().x, bbox.min().y, coord_zoom);
        let max = Coordinate::new(bbox.max().x, bbox.max().y, coord_zoom);

        let mut results = Vec::new();
        for tile_id in self.get_ids() {
            let Some(tile) = self.tiles.get(&tile_id.key()) else {
                continue;
            };
            // tiles held for fading are covered by tiles closer to ideal
            if tile.holding_for_fade() {
                continue;
            }

            let scale = 2_f64.powf(transform.zoom() - tile_id.overscaled_z as f64);
            let padding =
                max_pitch_scale_factor * tile.query_padding() * EXTENT / tile.tile_size() / scale;
            let top_left = tile_id.tile_point(&min);
            let bottom_right = tile_id.tile_point(&max);

            if top_left.x - padding < EXTENT
                && top_left.y - padding < EXTENT
                && bottom_right.x + padding >= 0.0
                && bottom_right.y + padding >= 0.0
            {
                results.push(TileQueryResult {
                    tile,
                    tile_id,
                    query_geometry: query_coords.iter().map(|c| tile_id.tile_point(c)).collect(),
                    camera_query_geometry: camera_coords
                        .iter()
                        .map(|c| tile_id.tile_point(c))
                        .collect(),
                    scale,
                });
            }
        }
        results
    }

    // ---- tile lifecycle ----

    /// Make `tile_id` live, promoting it from the cache or requesting it
    fn add_tile(&mut self, tile_id: OverscaledTileId) -> TileKey {
        let key = tile_id.key();
        if self.tiles.contains_key(&key) {
            return key;
        }

        let (mut tile, cached) = match self.cache.get_and_remove(&key) {
            Some(mut tile) => {
                trace!("source {}: reusing cached tile {}", self.id, tile_id);
                tile.tile_id = tile_id;
                (tile, true)
            }
            None => {
                let uid = self.next_uid;
                self.next_uid += 1;
                let tile_size = self.source.tile_size() as f64 * tile_id.overscale_factor() as f64;
                (Tile::new(uid, tile_id, tile_size), false)
            }
        };
        tile.uses += 1;
        self.tiles.insert(key, tile);

        if !cached {
            self.events.emit(SourceEvent::DataLoading {
                data_type: DataType::Source,
                tile_id,
            });
            self.load_tile(key);
        }
        key
    }

    fn remove_tile(&mut self, key: TileKey) {
        let Some(mut tile) = self.tiles.remove(&key) else {
            return;
        };
        tile.uses = tile.uses.saturating_sub(1);
        if tile.uses > 0 {
            return;
        }

        if tile.has_data() && tile.state() != TileState::Reloading {
            self.cache.add(tile);
        } else {
            tile.aborted = true;
            if self.loads.cancel(tile.uid()) {
                debug!("source {}: aborted load of tile {}", self.id, tile.tile_id());
            }
            self.source.abort_tile(&tile);
            self.source.unload_tile(&tile);
            tile.unload();
        }
    }

    fn load_tile(&mut self, key: TileKey) {
        let Some(tile) = self.tiles.get(&key) else {
            return;
        };
        let request = TileRequest {
            uid: tile.uid(),
            tile_id: tile.tile_id(),
            tile_size: tile.tile_size(),
            reloading: tile.state() == TileState::Reloading,
        };
        debug!("source {}: loading tile {}", self.id, request.tile_id);

        let future = self.source.load_tile(request);
        if let Some(result) = self.loads.submit(request.uid, future) {
            self.tile_loaded(key, result);
        }
    }

    fn reload_tile(&mut self, key: TileKey) {
        let Some(tile) = self.tiles.get_mut(&key) else {
            return;
        };
        if tile.state() != TileState::Loading {
            tile.state = TileState::Reloading;
        }
        self.load_tile(key);
    }

    fn tile_loaded(&mut self, key: TileKey, result: std::result::Result<TilePayload, TileLoadError>) {
        let Some(tile) = self.tiles.get_mut(&key) else {
            return;
        };
        if tile.is_aborted() {
            return;
        }
        let tile_id = tile.tile_id();

        match result {
            Ok(payload) => {
                tile.set_loaded(payload, Instant::now());
                debug!("source {}: loaded tile {}", self.id, tile_id);
                self.events.emit(SourceEvent::Data {
                    data_type: DataType::Source,
                    tile_id,
                });
            }
            Err(error) => {
                tile.set_errored(error.clone());
                match error.kind {
                    TileErrorKind::NotFound => {
                        debug!("source {}: tile {} not found", self.id, tile_id);
                        self.update_requested = true;
                    }
                    TileErrorKind::Suppressed => {
                        debug!("source {}: tile {} failed quietly: {}", self.id, tile_id, error);
                    }
                    TileErrorKind::Transient => {
                        warn!("source {}: tile {} failed: {}", self.id, tile_id, error);
                        self.events.emit(SourceEvent::Error { tile_id, error });
                    }
                }
            }
        }
    }

    fn apply_load_outcome(&mut self, outcome: LoadOutcome) -> Option<OverscaledTileId> {
        let key = self
            .tiles
            .iter()
            .find(|(_, tile)| tile.uid() == outcome.uid)
            .map(|(key, _)| *key);
        match key {
            Some(key) => {
                self.tile_loaded(key, outcome.result);
                self.tiles.get(&key).map(Tile::tile_id)
            }
            None => {
                trace!("source {}: dropping load for tile uid {}", self.id, outcome.uid);
                None
            }
        }
    }

    fn run_requested_update(&mut self) {
        if !std::mem::take(&mut self.update_requested) {
            return;
        }
        if let Some(transform) = self.transform.clone() {
            self.update(&transform);
        }
    }

    // ---- async completion ----

    /// Apply the next settled load. Resolves to the id of the tile it
    /// updated, or `None` once nothing is in flight.
    pub fn poll_loads(&mut self, cx: &mut Context<'_>) -> Poll<Option<OverscaledTileId>> {
        loop {
            match self.loads.poll_next(cx) {
                Poll::Ready(Some(outcome)) => {
                    if let Some(tile_id) = self.apply_load_outcome(outcome) {
                        self.run_requested_update();
                        return Poll::Ready(Some(tile_id));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    pub async fn next_loaded(&mut self) -> Option<OverscaledTileId> {
        poll_fn(|cx| self.poll_loads(cx)).await
    }

    /// Apply every load that has already settled without waiting
    pub fn process_ready_loads(&mut self) -> usize {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut applied = 0;
        while let Poll::Ready(Some(_)) = self.poll_loads(&mut cx) {
            applied += 1;
        }
        applied
    }

    pub fn pending_loads(&self) -> usize {
        self.loads.len()
    }

    // ---- whole-cache operations ----

    /// Reload every tile that has not errored. Tiles with data keep
    /// rendering it until the new data arrives.
    pub fn reload(&mut self) {
        if self.paused {
            self.should_reload_on_resume = true;
            return;
        }

        self.cache.reset();
        let keys: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|(_, tile)| tile.state() != TileState::Errored)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.reload_tile(key);
        }
    }

    /// Drop every tile, live and cached
    pub fn clear_tiles(&mut self) {
        self.should_reload_on_resume = false;
        self.paused = false;

        let keys: Vec<TileKey> = self.tiles.keys().copied().collect();
        for key in keys {
            self.remove_tile(key);
        }
        self.cache.reset();
    }

    /// Defer reloads and freeze the live set
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        let should_reload = self.should_reload_on_resume;
        self.paused = false;
        self.should_reload_on_resume = false;

        if should_reload {
            self.reload();
        }
        if let Some(transform) = self.transform.clone() {
            self.update(&transform);
        }
    }

    /// Remove tiles kept only for their label fade
    pub fn release_symbol_fade_tiles(&mut self) {
        let holding: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|(_, tile)| tile.holding_for_fade())
            .map(|(key, _)| *key)
            .collect();
        for key in holding {
            self.remove_tile(key);
        }
    }

    /// Whether the source or a raster cross-fade is still animating
    pub fn has_transition(&self) -> bool {
        if self.source.has_transition() {
            return true;
        }
        if self.source.source_type().is_raster() {
            let now = Instant::now();
            return self.tiles.values().any(|tile| tile.is_fading(now));
        }
        false
    }

    /// The source is loaded and no live tile is waiting for data
    pub fn loaded(&self) -> bool {
        self.source.is_loaded()
            && self
                .tiles
                .values()
                .all(|tile| matches!(tile.state(), TileState::Loaded | TileState::Errored))
    }

    pub fn serialize(&self) -> serde_json::Value {
        self.source.serialize()
    }

    // ---- feature state ----

    pub fn set_feature_state(
        &mut self,
        source_layer: Option<&str>,
        feature_id: &str,
        state: FeatureState,
    ) -> Result<()> {
        let layer = self.feature_state_layer(source_layer)?;
        self.feature_state.update_state(layer, feature_id, state);
        Ok(())
    }

    pub fn get_feature_state(
        &self,
        source_layer: Option<&str>,
        feature_id: &str,
    ) -> Result<FeatureState> {
        let layer = self.feature_state_layer(source_layer)?;
        Ok(self.feature_state.get_state(layer, feature_id))
    }

    pub fn remove_feature_state(
        &mut self,
        source_layer: Option<&str>,
        feature_id: Option<&str>,
        key: Option<&str>,
    ) -> Result<()> {
        let layer = self.feature_state_layer(source_layer)?;
        self.feature_state.remove_state(layer, feature_id, key);
        Ok(())
    }

    fn feature_state_layer<'a>(&self, source_layer: Option<&'a str>) -> Result<&'a str> {
        match source_layer {
            Some(layer) => Ok(layer),
            None if self.source.source_type() == SourceType::Vector => {
                Err(MapError::InvalidConfiguration(format!(
                    "source {}: a source layer is required for feature state on vector sources",
                    self.id
                )))
            }
            None => Ok(DEFAULT_SOURCE_LAYER),
        }
    }
}

fn validate_source(id: &str, source: &dyn TileSource) -> Result<()> {
    if source.tile_size() == 0 {
        return Err(MapError::InvalidConfiguration(format!(
            "source {}: tile size must be positive",
            id
        )));
    }
    if source.min_zoom() > source.max_zoom() {
        return Err(MapError::InvalidConfiguration(format!(
            "source {}: min zoom {} is above max zoom {}",
            id,
            source.min_zoom(),
            source.max_zoom()
        )));
    }
    if source.max_zoom() > MAX_CANONICAL_ZOOM {
        return Err(MapError::InvalidConfiguration(format!(
            "source {}: max zoom {} is above {}",
            id,
            source.max_zoom(),
            MAX_CANONICAL_ZOOM
        )));
    }
    Ok(())
}
