use std::sync::Arc;
use std::time::Duration;

use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::core::tile_id::OverscaledTileId;
use crate::tiles::source::{TileLoadError, TilePayload};

/// Load state of a tile.
///
/// `Loading -> Loaded | Errored`, `Loaded -> Reloading -> Loaded | Errored`,
/// and any state `-> Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    Loading,
    Loaded,
    Reloading,
    Errored,
    Unloaded,
}

/// One unit of tile data bound to a tile id
#[derive(Debug)]
pub struct Tile {
    uid: u64,
    pub(crate) tile_id: OverscaledTileId,
    tile_size: f64,
    pub(crate) state: TileState,
    pub(crate) uses: u32,
    pub(crate) aborted: bool,
    time_added: Option<Instant>,
    /// Raster cross-fade end
    fade_end_time: Option<Instant>,
    /// Symbol fade hold end, set while the tile is kept only for its labels
    symbol_fade_hold_until: Option<Instant>,
    expires_at: Option<Instant>,
    payload: Option<TilePayload>,
    error: Option<TileLoadError>,
}

impl Tile {
    pub fn new(uid: u64, tile_id: OverscaledTileId, tile_size: f64) -> Self {
        Self {
            uid,
            tile_id,
            tile_size,
            state: TileState::Loading,
            uses: 0,
            aborted: false,
            time_added: None,
            fade_end_time: None,
            symbol_fade_hold_until: None,
            expires_at: None,
            payload: None,
            error: None,
        }
    }

    /// Identity of this tile instance, stable across rekeying
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn tile_id(&self) -> OverscaledTileId {
        self.tile_id
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn uses(&self) -> u32 {
        self.uses
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn time_added(&self) -> Option<Instant> {
        self.time_added
    }

    pub fn payload(&self) -> Option<&TilePayload> {
        self.payload.as_ref()
    }

    pub fn data(&self) -> Option<Arc<Vec<u8>>> {
        self.payload.as_ref().map(|p| Arc::clone(&p.data))
    }

    pub fn error(&self) -> Option<&TileLoadError> {
        self.error.as_ref()
    }

    pub fn has_symbol_buckets(&self) -> bool {
        self.payload.as_ref().map_or(false, |p| p.has_symbol_buckets)
    }

    pub fn query_padding(&self) -> f64 {
        self.payload.as_ref().map_or(0.0, |p| p.query_padding)
    }

    /// Loaded and reloading tiles keep rendering their data
    pub fn has_data(&self) -> bool {
        matches!(self.state, TileState::Loaded | TileState::Reloading)
    }

    /// A response has come back for this tile at least once
    pub fn was_requested(&self) -> bool {
        matches!(
            self.state,
            TileState::Errored | TileState::Loaded | TileState::Reloading
        )
    }

    pub(crate) fn set_loaded(&mut self, payload: TilePayload, now: Instant) {
        self.expires_at = payload.expires_in.map(|d| now + d);
        self.payload = Some(payload);
        self.error = None;
        self.state = TileState::Loaded;
        self.time_added = Some(now);
    }

    pub(crate) fn set_errored(&mut self, error: TileLoadError) {
        self.error = Some(error);
        self.state = TileState::Errored;
    }

    /// Drops the payload. The slot may be loaded again later.
    pub fn unload(&mut self) {
        self.payload = None;
        self.expires_at = None;
        self.state = TileState::Unloaded;
    }

    // ---- raster cross-fade ----

    /// Extends the cross-fade to end `duration` after the tile was added.
    /// Never moves the end backwards and ignores ends already in the past.
    pub fn register_fade_duration(&mut self, duration: Duration) {
        let Some(time_added) = self.time_added else {
            return;
        };
        let fade_end_time = time_added + duration;
        if fade_end_time < Instant::now() {
            return;
        }
        if matches!(self.fade_end_time, Some(current) if fade_end_time < current) {
            return;
        }
        self.fade_end_time = Some(fade_end_time);
    }

    pub fn fade_end_time(&self) -> Option<Instant> {
        self.fade_end_time
    }

    /// A tile without a registered fade is still considered fading in
    pub fn fade_finished(&self, now: Instant) -> bool {
        matches!(self.fade_end_time, Some(end) if end <= now)
    }

    pub fn is_fading(&self, now: Instant) -> bool {
        matches!(self.fade_end_time, Some(end) if end >= now)
    }

    // ---- symbol fade hold ----

    pub fn set_hold_duration(&mut self, duration: Duration) {
        self.symbol_fade_hold_until = Some(Instant::now() + duration);
    }

    pub fn holding_for_fade(&self) -> bool {
        self.symbol_fade_hold_until.is_some()
    }

    pub fn symbol_fade_finished(&self) -> bool {
        match self.symbol_fade_hold_until {
            Some(until) => until < Instant::now(),
            None => true,
        }
    }

    pub fn clear_fade_hold(&mut self) {
        self.symbol_fade_hold_until = None;
    }

    // ---- expiry ----

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}
