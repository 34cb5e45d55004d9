pub mod config;
pub mod constants;
pub mod geo;
pub mod tile_cover;
pub mod tile_id;
pub mod transform;
