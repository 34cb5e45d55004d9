//! Tile identities in the quadtree pyramid.
//!
//! A tile is addressed by its canonical `z/x/y`, the world copy it belongs to
//! (`wrap`) and, for tiles past a source's max zoom, the overscaled zoom it is
//! displayed at. [`TileKey`] packs all of that into one `u128` map key.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::constants::EXTENT;
use crate::core::geo::{Coordinate, Point};

const X_BITS: u32 = 23;
const Y_BITS: u32 = 23;
const Z_BITS: u32 = 5;
const OVERSCALED_Z_BITS: u32 = 8;
const WRAP_BITS: u32 = 32;

const X_SHIFT: u32 = 0;
const Y_SHIFT: u32 = X_BITS;
const Z_SHIFT: u32 = X_BITS + Y_BITS;
const OVERSCALED_Z_SHIFT: u32 = Z_SHIFT + Z_BITS;
const WRAP_SHIFT: u32 = OVERSCALED_Z_SHIFT + OVERSCALED_Z_BITS;

const X_MASK: u128 = (1 << X_BITS) - 1;
const Y_MASK: u128 = (1 << Y_BITS) - 1;
const Z_MASK: u128 = (1 << Z_BITS) - 1;
const OVERSCALED_Z_MASK: u128 = (1 << OVERSCALED_Z_BITS) - 1;
const WRAP_MASK: u128 = (1 << WRAP_BITS) - 1;

/// Map key for a tile.
///
/// | wrap, zig-zag (32) | overscaled z (8) | z (5) | y (23) | x (23) |
/// 90               59 58              51 50   46 45    23 22     0
///
/// Every `i32` wrap gets its own key; canonical zoom is at most 23.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey(u128);

impl TileKey {
    pub fn new(wrap: i32, overscaled_z: u8, z: u8, x: u32, y: u32) -> Self {
        let wrap = ((wrap << 1) ^ (wrap >> 31)) as u32 as u128;
        TileKey(
            (wrap & WRAP_MASK) << WRAP_SHIFT
                | (overscaled_z as u128 & OVERSCALED_Z_MASK) << OVERSCALED_Z_SHIFT
                | (z as u128 & Z_MASK) << Z_SHIFT
                | (y as u128 & Y_MASK) << Y_SHIFT
                | (x as u128 & X_MASK) << X_SHIFT,
        )
    }

    pub fn wrap(&self) -> i32 {
        let zigzag = ((self.0 >> WRAP_SHIFT) & WRAP_MASK) as u32;
        ((zigzag >> 1) as i32) ^ -((zigzag & 1) as i32)
    }

    pub fn overscaled_z(&self) -> u8 {
        ((self.0 >> OVERSCALED_Z_SHIFT) & OVERSCALED_Z_MASK) as u8
    }

    pub fn z(&self) -> u8 {
        ((self.0 >> Z_SHIFT) & Z_MASK) as u8
    }

    pub fn x(&self) -> u32 {
        ((self.0 >> X_SHIFT) & X_MASK) as u32
    }

    pub fn y(&self) -> u32 {
        ((self.0 >> Y_SHIFT) & Y_MASK) as u32
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

/// A tile in the standard quadtree, independent of world copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        debug_assert!(z as u32 <= 31 && (x as u64) < (1u64 << z) && (y as u64) < (1u64 << z));
        Self { z, x, y }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(0, self.z, self.z, self.x, self.y)
    }

    /// Substitutes `{z}`, `{x}` and `{y}` in a URL template.
    pub fn url(&self, template: &str) -> String {
        template
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }

    /// Position of `coord` in this tile's local [0, EXTENT) space.
    pub fn tile_point(&self, coord: &Coordinate) -> Point {
        let zoomed = coord.zoom_to(self.z as f64);
        Point::new(
            (zoomed.column - self.x as f64) * EXTENT,
            (zoomed.row - self.y as f64) * EXTENT,
        )
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A canonical tile placed in a specific copy of the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnwrappedTileId {
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl UnwrappedTileId {
    pub fn new(wrap: i32, canonical: CanonicalTileId) -> Self {
        Self { wrap, canonical }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(
            self.wrap,
            self.canonical.z,
            self.canonical.z,
            self.canonical.x,
            self.canonical.y,
        )
    }

    /// Column of the tile counted across world copies.
    pub fn unwrapped_x(&self) -> f64 {
        self.canonical.x as f64 + 2_f64.powi(self.canonical.z as i32) * self.wrap as f64
    }
}

/// The identity the tile cache works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> Self {
        debug_assert!(overscaled_z >= z);
        Self {
            overscaled_z,
            wrap,
            canonical: CanonicalTileId::new(z, x, y),
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(
            self.wrap,
            self.overscaled_z,
            self.canonical.z,
            self.canonical.x,
            self.canonical.y,
        )
    }

    /// The ancestor (or overscaled self) of this tile at `target_z`.
    pub fn scaled_to(&self, target_z: u8) -> OverscaledTileId {
        debug_assert!(target_z <= self.overscaled_z);
        if target_z > self.canonical.z {
            OverscaledTileId::new(
                target_z,
                self.wrap,
                self.canonical.z,
                self.canonical.x,
                self.canonical.y,
            )
        } else {
            let z_difference = self.canonical.z - target_z;
            OverscaledTileId::new(
                target_z,
                self.wrap,
                target_z,
                self.canonical.x >> z_difference,
                self.canonical.y >> z_difference,
            )
        }
    }

    pub fn is_child_of(&self, parent: &OverscaledTileId) -> bool {
        if parent.wrap != self.wrap {
            return false;
        }
        if parent.overscaled_z == 0 {
            return true;
        }
        if parent.overscaled_z >= self.overscaled_z || parent.canonical.z > self.canonical.z {
            return false;
        }
        let z_difference = self.canonical.z - parent.canonical.z;
        parent.canonical.x == self.canonical.x >> z_difference
            && parent.canonical.y == self.canonical.y >> z_difference
    }

    /// Immediate children. Past the source's max zoom there is a single
    /// overscaled child that shares this tile's canonical data.
    pub fn children(&self, source_max_zoom: u8) -> Vec<OverscaledTileId> {
        if self.overscaled_z >= source_max_zoom {
            return vec![OverscaledTileId::new(
                self.overscaled_z + 1,
                self.wrap,
                self.canonical.z,
                self.canonical.x,
                self.canonical.y,
            )];
        }

        let z = self.canonical.z + 1;
        let x = self.canonical.x * 2;
        let y = self.canonical.y * 2;
        vec![
            OverscaledTileId::new(z, self.wrap, z, x, y),
            OverscaledTileId::new(z, self.wrap, z, x + 1, y),
            OverscaledTileId::new(z, self.wrap, z, x, y + 1),
            OverscaledTileId::new(z, self.wrap, z, x + 1, y + 1),
        ]
    }

    /// Same tile in world copy 0.
    pub fn wrapped(&self) -> OverscaledTileId {
        self.unwrap_to(0)
    }

    pub fn unwrap_to(&self, wrap: i32) -> OverscaledTileId {
        OverscaledTileId {
            wrap,
            ..*self
        }
    }

    pub fn overscale_factor(&self) -> u32 {
        1 << (self.overscaled_z - self.canonical.z)
    }

    pub fn to_unwrapped(&self) -> UnwrappedTileId {
        UnwrappedTileId::new(self.wrap, self.canonical)
    }

    /// Position of `coord` in this tile's local [0, EXTENT) space, taking the
    /// world copy into account.
    pub fn tile_point(&self, coord: &Coordinate) -> Point {
        let zoomed = coord.zoom_to(self.canonical.z as f64);
        let unwrapped_x = self.to_unwrapped().unwrapped_x();
        Point::new(
            (zoomed.column - unwrapped_x) * EXTENT,
            (zoomed.row - self.canonical.y as f64) * EXTENT,
        )
    }
}

impl PartialOrd for OverscaledTileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OverscaledTileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wrap
            .cmp(&other.wrap)
            .then(self.overscaled_z.cmp(&other.overscaled_z))
            .then(self.canonical.z.cmp(&other.canonical.z))
            .then(self.canonical.x.cmp(&other.canonical.x))
            .then(self.canonical.y.cmp(&other.canonical.y))
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} (overscaled {}, wrap {})",
            self.canonical.z, self.canonical.x, self.canonical.y, self.overscaled_z, self.wrap
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxhash::FxHashSet;

    #[test]
    fn test_key_fields_round_trip() {
        let key = TileKey::new(-3, 16, 14, 8_000, 5_000);
        assert_eq!(key.wrap(), -3);
        assert_eq!(key.overscaled_z(), 16);
        assert_eq!(key.z(), 14);
        assert_eq!(key.x(), 8_000);
        assert_eq!(key.y(), 5_000);
    }

    #[test]
    fn test_keys_are_unique() {
        let mut keys = FxHashSet::default();
        for wrap in -2..=2 {
            for z in 0..3u8 {
                let dim = 1u32 << z;
                for x in 0..dim {
                    for y in 0..dim {
                        assert!(keys.insert(OverscaledTileId::new(z, wrap, z, x, y).key()));
                        assert!(keys.insert(OverscaledTileId::new(z + 1, wrap, z, x, y).key()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_distant_wraps_get_distinct_keys() {
        let root = OverscaledTileId::new(0, 0, 0, 0, 0);
        let mut keys = FxHashSet::default();
        for wrap in -200..=200 {
            let key = root.unwrap_to(wrap).key();
            assert_eq!(key.wrap(), wrap);
            assert!(keys.insert(key), "wrap {} reused another key", wrap);
        }
        assert_ne!(root.key(), root.unwrap_to(128).key());
        assert_eq!(TileKey::new(i32::MIN, 0, 0, 0, 0).wrap(), i32::MIN);
        assert_eq!(TileKey::new(i32::MAX, 0, 0, 0, 0).wrap(), i32::MAX);
    }

    #[test]
    fn test_scaled_to() {
        let id = OverscaledTileId::new(3, 0, 3, 5, 6);
        assert_eq!(id.scaled_to(2), OverscaledTileId::new(2, 0, 2, 2, 3));
        assert_eq!(id.scaled_to(0), OverscaledTileId::new(0, 0, 0, 0, 0));

        let overscaled = OverscaledTileId::new(6, 1, 4, 3, 3);
        assert_eq!(overscaled.scaled_to(5), OverscaledTileId::new(5, 1, 4, 3, 3));
        assert_eq!(overscaled.scaled_to(3), OverscaledTileId::new(3, 1, 3, 1, 1));
    }

    #[test]
    fn test_children() {
        let id = OverscaledTileId::new(1, 0, 1, 1, 0);
        assert_eq!(
            id.children(5),
            vec![
                OverscaledTileId::new(2, 0, 2, 2, 0),
                OverscaledTileId::new(2, 0, 2, 3, 0),
                OverscaledTileId::new(2, 0, 2, 2, 1),
                OverscaledTileId::new(2, 0, 2, 3, 1),
            ]
        );

        let at_max = OverscaledTileId::new(5, 0, 5, 1, 1);
        assert_eq!(at_max.children(5), vec![OverscaledTileId::new(6, 0, 5, 1, 1)]);
    }

    #[test]
    fn test_is_child_of() {
        let parent = OverscaledTileId::new(2, 0, 2, 1, 1);
        assert!(OverscaledTileId::new(3, 0, 3, 2, 3).is_child_of(&parent));
        assert!(!OverscaledTileId::new(3, 0, 3, 4, 3).is_child_of(&parent));
        assert!(!OverscaledTileId::new(3, 1, 3, 2, 3).is_child_of(&parent));
        assert!(OverscaledTileId::new(3, 0, 3, 7, 7).is_child_of(&OverscaledTileId::new(0, 0, 0, 0, 0)));
    }

    #[test]
    fn test_unwrap_to_keeps_canonical() {
        let id = OverscaledTileId::new(4, 0, 4, 3, 9);
        let moved = id.unwrap_to(2);
        assert_eq!(moved.canonical, id.canonical);
        assert_eq!(moved.wrap, 2);
        assert_ne!(moved.key(), id.key());
        assert_eq!(moved.wrapped(), id);
    }

    #[test]
    fn test_tile_point_with_wrap() {
        let id = OverscaledTileId::new(1, 1, 1, 0, 1);
        let coord = Coordinate::new(2.5, 1.25, 1.0);
        let p = id.tile_point(&coord);
        assert_eq!(p, Point::new(0.5 * EXTENT, 0.25 * EXTENT));
    }

    #[test]
    fn test_url() {
        let id = CanonicalTileId::new(3, 4, 5);
        assert_eq!(id.url("https://tiles/{z}/{x}/{y}.png"), "https://tiles/3/4/5.png");
    }
}
