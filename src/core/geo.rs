use geo::BoundingRect;
use geo_types::{MultiPoint, Rect};
use serde::{Deserialize, Serialize};

use crate::core::constants::MAX_VALID_LATITUDE;

/// Wraps `n` into the half-open range `(min, max]`.
pub fn wrap(n: f64, min: f64, max: f64) -> f64 {
    let d = max - min;
    let w = ((n - min) % d + d) % d + min;
    if w == min {
        max
    } else {
        w
    }
}

/// Linear interpolation between `a` and `b`.
pub fn interpolate(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat >= -90.0 && self.lat <= 90.0 && self.lng.is_finite()
    }

    /// Wraps longitude to (-180, 180]
    pub fn wrap_lng(lng: f64) -> f64 {
        wrap(lng, -180.0, 180.0)
    }

    /// Returns a copy with the longitude wrapped into (-180, 180]
    pub fn wrapped(&self) -> LatLng {
        LatLng::new(self.lat, Self::wrap_lng(self.lng))
    }

    /// Clamps latitude to the range Web Mercator can represent
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_VALID_LATITUDE, MAX_VALID_LATITUDE)
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Represents a point in screen, world-pixel or tile-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn multiply(&self, scalar: f64) -> Point {
        Point::new(self.x * scalar, self.y * scalar)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Rotates around the origin by `angle` radians
    pub fn rotate(&self, angle: f64) -> Point {
        let (sin, cos) = angle.sin_cos();
        Point::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Position in tile space: `column`/`row` are measured in tiles at `zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub column: f64,
    pub row: f64,
    pub zoom: f64,
}

impl Coordinate {
    pub fn new(column: f64, row: f64, zoom: f64) -> Self {
        Self { column, row, zoom }
    }

    /// Rescales the coordinate into the tile units of another zoom level.
    pub fn zoom_to(&self, zoom: f64) -> Coordinate {
        let scale = 2_f64.powf(zoom - self.zoom);
        Coordinate::new(self.column * scale, self.row * scale, zoom)
    }

    /// Component-wise difference; `other` is first rescaled to this zoom.
    pub fn sub(&self, other: &Coordinate) -> Coordinate {
        let other = other.zoom_to(self.zoom);
        Coordinate::new(self.column - other.column, self.row - other.row, self.zoom)
    }

    /// Component-wise sum; `other` is first rescaled to this zoom.
    pub fn add(&self, other: &Coordinate) -> Coordinate {
        let other = other.zoom_to(self.zoom);
        Coordinate::new(self.column + other.column, self.row + other.row, self.zoom)
    }
}

/// Axis-aligned envelope of a set of points, `None` when the set is empty.
pub fn envelope<I>(points: I) -> Option<Rect<f64>>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let points: MultiPoint<f64> = points.into_iter().collect::<Vec<_>>().into();
    points.bounding_rect()
}

/// Represents a bounding box of geographical coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    pub fn west(&self) -> f64 {
        self.south_west.lng
    }

    pub fn east(&self) -> f64 {
        self.north_east.lng
    }

    pub fn south(&self) -> f64 {
        self.south_west.lat
    }

    pub fn north(&self) -> f64 {
        self.north_east.lat
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
            && point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
    }

    /// Extends the bounds to include a point
    pub fn extend(&mut self, point: &LatLng) {
        self.south_west.lat = self.south_west.lat.min(point.lat);
        self.south_west.lng = self.south_west.lng.min(point.lng);
        self.north_east.lat = self.north_east.lat.max(point.lat);
        self.north_east.lng = self.north_east.lng.max(point.lng);
    }

    /// Smallest bounds containing every given location
    pub fn from_points(points: &[LatLng]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = LatLngBounds::new(*first, *first);
        for point in rest {
            bounds.extend(point);
        }
        Some(bounds)
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}
