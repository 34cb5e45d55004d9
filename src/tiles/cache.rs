use std::fmt;

use instant::Instant;
use lru::LruCache;

use crate::core::tile_id::TileKey;
use crate::tiles::tile::Tile;

/// Bounded LRU store of tiles that left the view but still hold data.
///
/// Lookups are by exact key only. Every tile leaving the cache other than
/// through [`TileCache::get_and_remove`] is handed to the `on_remove`
/// callback so its resources can be released. Tiles whose data has expired
/// are never handed back out.
pub struct TileCache {
    entries: LruCache<TileKey, Tile>,
    max_size: usize,
    on_remove: Box<dyn FnMut(Tile)>,
}

impl TileCache {
    /// Create a new tile cache holding at most `max_size` tiles
    pub fn new(max_size: usize, on_remove: impl FnMut(Tile) + 'static) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_size,
            on_remove: Box::new(on_remove),
        }
    }

    /// Insert a tile as the most recently used entry, evicting past capacity.
    /// A tile already stored under the same key is evicted first.
    pub fn add(&mut self, tile: Tile) {
        let key = tile.tile_id().key();
        if let Some((_, replaced)) = self.entries.push(key, tile) {
            (self.on_remove)(replaced);
        }
        self.trim();
    }

    /// Take a tile out of the cache for reuse. An expired tile is evicted
    /// instead.
    pub fn get_and_remove(&mut self, key: &TileKey) -> Option<Tile> {
        let tile = self.entries.pop(key)?;
        if tile.is_expired(Instant::now()) {
            (self.on_remove)(tile);
            return None;
        }
        Some(tile)
    }

    /// Look at a tile without touching its recency or removing it
    pub fn get(&self, key: &TileKey) -> Option<&Tile> {
        self.entries
            .peek(key)
            .filter(|tile| !tile.is_expired(Instant::now()))
    }

    pub fn has(&self, key: &TileKey) -> bool {
        self.get(key).is_some()
    }

    /// Change the capacity, evicting the oldest tiles if it shrank
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.trim();
    }

    /// Evict every tile
    pub fn reset(&mut self) {
        while let Some((_, tile)) = self.entries.pop_lru() {
            (self.on_remove)(tile);
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_size {
            match self.entries.pop_lru() {
                Some((_, tile)) => (self.on_remove)(tile),
                None => break,
            }
        }
    }
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("len", &self.entries.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}
