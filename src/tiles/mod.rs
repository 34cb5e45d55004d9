pub mod cache;
pub mod events;
pub mod feature_state;
pub mod loader;
pub mod source;
pub mod source_cache;
pub mod tile;

// Re-exports for convenience
pub use cache::TileCache;
pub use source::{TileSource, TilePayload};
pub use source_cache::SourceCache;
pub use tile::{Tile, TileState};
