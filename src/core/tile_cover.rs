//! Scanline tile cover of a viewport quadrilateral.
//!
//! The quad is split into two triangles and every tile row crossing each
//! triangle is rasterized, so pitched (trapezoidal) viewports produce the exact
//! set of intersecting cells rather than a bounding box.

use std::collections::BTreeMap;

use crate::core::geo::Coordinate;
use crate::core::tile_id::{OverscaledTileId, TileKey};

#[derive(Debug, Clone, Copy)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    dx: f64,
    dy: f64,
}

impl Edge {
    fn new(a: (f64, f64), b: (f64, f64)) -> Self {
        let (a, b) = if a.1 > b.1 { (b, a) } else { (a, b) };
        Edge {
            x0: a.0,
            y0: a.1,
            x1: b.0,
            y1: b.1,
            dx: b.0 - a.0,
            dy: b.1 - a.1,
        }
    }
}

fn scan_spans<F>(mut e0: Edge, mut e1: Edge, y_min: i64, y_max: i64, scan_line: &mut F)
where
    F: FnMut(i64, i64, i64),
{
    let y0 = y_min.max(e1.y0.floor() as i64);
    let y1 = y_max.min(e1.y1.ceil() as i64);

    // order the edges left to right
    let swap = if e0.x0 == e1.x0 && e0.y0 == e1.y0 {
        e0.x0 + e1.dy / e0.dy * e0.dx < e1.x1
    } else {
        e0.x1 - e1.dy / e0.dy * e0.dx < e1.x0
    };
    if swap {
        std::mem::swap(&mut e0, &mut e1);
    }

    let m0 = e0.dx / e0.dy;
    let m1 = e1.dx / e1.dy;
    let d0 = if e0.dx > 0.0 { 1.0 } else { 0.0 };
    let d1 = if e1.dx < 0.0 { 1.0 } else { 0.0 };
    for y in y0..y1 {
        let yf = y as f64;
        let x0 = m0 * (yf + d0 - e0.y0).min(e0.dy).max(0.0) + e0.x0;
        let x1 = m1 * (yf + d1 - e1.y0).min(e1.dy).max(0.0) + e1.x0;
        scan_line(x1.floor() as i64, x0.ceil() as i64, y);
    }
}

fn scan_triangle<F>(
    a: (f64, f64),
    b: (f64, f64),
    c: (f64, f64),
    y_min: i64,
    y_max: i64,
    scan_line: &mut F,
) where
    F: FnMut(i64, i64, i64),
{
    let mut ab = Edge::new(a, b);
    let mut bc = Edge::new(b, c);
    let mut ca = Edge::new(c, a);

    // sort edges by vertical extent
    if ab.dy > bc.dy {
        std::mem::swap(&mut ab, &mut bc);
    }
    if ab.dy > ca.dy {
        std::mem::swap(&mut ab, &mut ca);
    }
    if bc.dy > ca.dy {
        std::mem::swap(&mut bc, &mut ca);
    }

    if ab.dy != 0.0 {
        scan_spans(ca, ab, y_min, y_max, scan_line);
    }
    if bc.dy != 0.0 {
        scan_spans(ca, bc, y_min, y_max, scan_line);
    }
}

/// Tiles at zoom `z` intersecting the quad `bounds` (tile-space corners,
/// in order). Tiles are emitted with `overscaled_z = actual_z`.
///
/// Columns outside `[0, 2^z)` map onto neighbouring world copies, which are
/// dropped unless `render_world_copies` is set. The result is ordered by key.
pub fn tile_cover(
    z: u8,
    bounds: &[Coordinate; 4],
    actual_z: u8,
    render_world_copies: bool,
) -> Vec<OverscaledTileId> {
    let tiles = 1i64 << z;
    let mut found: BTreeMap<TileKey, OverscaledTileId> = BTreeMap::new();

    let mut scan_line = |x0: i64, x1: i64, y: i64| {
        if y < 0 || y >= tiles {
            return;
        }
        for x in x0..x1 {
            let wrap = x.div_euclid(tiles);
            let wrapped_x = x.rem_euclid(tiles);
            if wrap == 0 || render_world_copies {
                let id =
                    OverscaledTileId::new(actual_z, wrap as i32, z, wrapped_x as u32, y as u32);
                found.insert(id.key(), id);
            }
        }
    };

    let zoomed: Vec<(f64, f64)> = bounds
        .iter()
        .map(|coord| {
            let c = coord.zoom_to(z as f64);
            (c.column, c.row)
        })
        .collect();

    scan_triangle(zoomed[0], zoomed[1], zoomed[2], 0, tiles, &mut scan_line);
    scan_triangle(zoomed[2], zoomed[3], zoomed[0], 0, tiles, &mut scan_line);

    found.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(z: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> [Coordinate; 4] {
        [
            Coordinate::new(x0, y0, z),
            Coordinate::new(x1, y0, z),
            Coordinate::new(x1, y1, z),
            Coordinate::new(x0, y1, z),
        ]
    }

    fn canonical(ids: &[OverscaledTileId]) -> Vec<(i32, u32, u32)> {
        let mut out: Vec<_> = ids
            .iter()
            .map(|id| (id.wrap, id.canonical.x, id.canonical.y))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_whole_world_at_zoom_zero() {
        let tiles = tile_cover(0, &quad(0.0, 0.0, 0.0, 1.0, 1.0), 0, true);
        assert_eq!(tiles, vec![OverscaledTileId::new(0, 0, 0, 0, 0)]);
    }

    #[test]
    fn test_four_tiles_at_zoom_one() {
        let tiles = tile_cover(1, &quad(1.0, 0.0, 0.0, 2.0, 2.0), 1, true);
        assert_eq!(
            canonical(&tiles),
            vec![(0, 0, 0), (0, 0, 1), (0, 1, 0), (0, 1, 1)]
        );
    }

    #[test]
    fn test_partial_viewport() {
        let tiles = tile_cover(2, &quad(2.0, 1.2, 1.2, 2.8, 1.9), 2, true);
        assert_eq!(canonical(&tiles), vec![(0, 1, 1), (0, 2, 1)]);
    }

    #[test]
    fn test_world_copies() {
        let bounds = quad(1.0, -0.5, 0.2, 0.5, 0.8);
        let with_copies = tile_cover(1, &bounds, 1, true);
        assert_eq!(canonical(&with_copies), vec![(-1, 1, 0), (0, 0, 0)]);

        let without = tile_cover(1, &bounds, 1, false);
        assert_eq!(canonical(&without), vec![(0, 0, 0)]);
    }

    #[test]
    fn test_rows_outside_world_are_skipped() {
        let tiles = tile_cover(1, &quad(1.0, 0.2, -1.5, 0.8, 0.5), 1, false);
        assert_eq!(canonical(&tiles), vec![(0, 0, 0)]);
    }

    #[test]
    fn test_overscaled_zoom_is_applied() {
        let tiles = tile_cover(0, &quad(0.0, 0.0, 0.0, 1.0, 1.0), 3, true);
        assert_eq!(tiles[0].overscaled_z, 3);
        assert_eq!(tiles[0].canonical.z, 0);
    }
}
