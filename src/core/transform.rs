use std::cell::RefCell;
use std::f64::consts::PI;

use fxhash::FxHashMap;
use log::error;
use nalgebra::{Matrix2, Matrix4, Rotation2, Vector3, Vector4};

use crate::core::config::TransformOptions;
use crate::core::constants::{
    DEFAULT_FOV, DEFAULT_TILE_SIZE, EARTH_RADIUS, EXTENT, MAX_FOV, MAX_OVERSCALED_ZOOM, MAX_PITCH,
    MAX_VALID_LATITUDE, MIN_FOV, MIN_PITCH,
};
use crate::core::geo::{envelope, interpolate, wrap, Coordinate, LatLng, LatLngBounds, Point};
use crate::core::tile_cover::tile_cover;
use crate::core::tile_id::{CanonicalTileId, OverscaledTileId, TileKey, UnwrappedTileId};
use crate::{MapError, Result};

/// Parameters for [`Transform::covering_tiles`]
#[derive(Debug, Clone, PartialEq)]
pub struct CoveringTilesOptions {
    pub tile_size: f64,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub round_zoom: bool,
    /// Request tiles past `max_zoom` as overscaled children of `max_zoom`
    pub reparse_overscaled: bool,
    /// Overrides the transform's own world copy setting
    pub render_world_copies: Option<bool>,
}

impl Default for CoveringTilesOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            min_zoom: None,
            max_zoom: None,
            round_zoom: false,
            reparse_overscaled: false,
            render_world_copies: None,
        }
    }
}

/// The camera of a map view.
///
/// Holds center, zoom, bearing, pitch and viewport size and keeps every
/// derived matrix current: each setter recomputes the projection synchronously
/// and clears the memoized per-tile matrices. Clone it to take a snapshot.
#[derive(Debug, Clone)]
pub struct Transform {
    tile_size: f64,
    min_zoom: f64,
    max_zoom: f64,
    render_world_copies: bool,

    lat_range: Option<(f64, f64)>,
    lng_range: Option<(f64, f64)>,

    width: f64,
    height: f64,
    center: LatLng,
    zoom: f64,
    scale: f64,
    tile_zoom: f64,
    zoom_fraction: f64,
    /// Rotation in radians, the negated bearing
    angle: f64,
    /// Radians
    fov: f64,
    /// Radians
    pitch: f64,
    unmodified: bool,
    constraining: bool,

    camera_to_center_distance: f64,
    pixels_to_gl_units: [f64; 2],
    proj_matrix: Matrix4<f64>,
    aligned_proj_matrix: Matrix4<f64>,
    label_plane_matrix: Matrix4<f64>,
    gl_coord_matrix: Matrix4<f64>,
    pixel_matrix: Matrix4<f64>,
    pixel_matrix_inverse: Matrix4<f64>,

    pos_matrix_cache: RefCell<FxHashMap<TileKey, Matrix4<f32>>>,
    aligned_pos_matrix_cache: RefCell<FxHashMap<TileKey, Matrix4<f32>>>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform {
    /// Creates a transform with the default zoom range (0 to 22) and world copies on
    pub fn new() -> Self {
        let defaults = TransformOptions::default();
        Self::build(defaults.min_zoom, defaults.max_zoom, defaults.render_world_copies)
    }

    /// Creates a transform from validated options
    pub fn with_options(options: &TransformOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(
            options.min_zoom,
            options.max_zoom,
            options.render_world_copies,
        ))
    }

    fn build(min_zoom: f64, max_zoom: f64, render_world_copies: bool) -> Self {
        let zoom = min_zoom.max(0.0);
        let tile_zoom = zoom.floor();
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            min_zoom,
            max_zoom,
            render_world_copies,
            lat_range: Some((-MAX_VALID_LATITUDE, MAX_VALID_LATITUDE)),
            lng_range: None,
            width: 0.0,
            height: 0.0,
            center: LatLng::default(),
            zoom,
            scale: 2_f64.powf(zoom),
            tile_zoom,
            zoom_fraction: zoom - tile_zoom,
            angle: 0.0,
            fov: DEFAULT_FOV,
            pitch: 0.0,
            unmodified: true,
            constraining: false,
            camera_to_center_distance: 0.0,
            pixels_to_gl_units: [0.0, 0.0],
            proj_matrix: Matrix4::identity(),
            aligned_proj_matrix: Matrix4::identity(),
            label_plane_matrix: Matrix4::identity(),
            gl_coord_matrix: Matrix4::identity(),
            pixel_matrix: Matrix4::identity(),
            pixel_matrix_inverse: Matrix4::identity(),
            pos_matrix_cache: RefCell::new(FxHashMap::default()),
            aligned_pos_matrix_cache: RefCell::new(FxHashMap::default()),
        }
    }

    // ---- accessors ----

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn min_zoom(&self) -> f64 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> f64 {
        self.max_zoom
    }

    pub fn render_world_copies(&self) -> bool {
        self.render_world_copies
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn size(&self) -> Point {
        Point::new(self.width, self.height)
    }

    pub fn center_point(&self) -> Point {
        self.size().multiply(0.5)
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn tile_zoom(&self) -> f64 {
        self.tile_zoom
    }

    pub fn zoom_fraction(&self) -> f64 {
        self.zoom_fraction
    }

    pub fn world_size(&self) -> f64 {
        self.tile_size * self.scale
    }

    /// Rotation of the map in radians
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Bearing in degrees
    pub fn bearing(&self) -> f64 {
        -self.angle / PI * 180.0
    }

    /// Pitch in degrees
    pub fn pitch(&self) -> f64 {
        self.pitch / PI * 180.0
    }

    /// Field of view in degrees
    pub fn fov(&self) -> f64 {
        self.fov / PI * 180.0
    }

    pub fn lat_range(&self) -> Option<(f64, f64)> {
        self.lat_range
    }

    pub fn lng_range(&self) -> Option<(f64, f64)> {
        self.lng_range
    }

    /// False once any camera property has been changed by a caller
    pub fn is_unmodified(&self) -> bool {
        self.unmodified
    }

    pub fn camera_to_center_distance(&self) -> f64 {
        self.camera_to_center_distance
    }

    pub fn pixels_to_gl_units(&self) -> [f64; 2] {
        self.pixels_to_gl_units
    }

    pub fn proj_matrix(&self) -> &Matrix4<f64> {
        &self.proj_matrix
    }

    pub fn aligned_proj_matrix(&self) -> &Matrix4<f64> {
        &self.aligned_proj_matrix
    }

    pub fn label_plane_matrix(&self) -> &Matrix4<f64> {
        &self.label_plane_matrix
    }

    pub fn gl_coord_matrix(&self) -> &Matrix4<f64> {
        &self.gl_coord_matrix
    }

    pub fn pixel_matrix(&self) -> &Matrix4<f64> {
        &self.pixel_matrix
    }

    pub fn pixel_matrix_inverse(&self) -> &Matrix4<f64> {
        &self.pixel_matrix_inverse
    }

    /// 2x2 rotation by the map angle, for rotating screen-space offsets
    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        Rotation2::new(self.angle).into_inner()
    }

    /// Center in world pixels
    pub fn x(&self) -> f64 {
        self.lng_x(self.center.lng)
    }

    pub fn y(&self) -> f64 {
        self.lat_y(self.center.lat)
    }

    pub fn point(&self) -> Point {
        Point::new(self.x(), self.y())
    }

    // ---- mutators ----

    pub fn set_min_zoom(&mut self, zoom: f64) -> Result<()> {
        if self.min_zoom == zoom {
            return Ok(());
        }
        if zoom > self.max_zoom {
            return Err(MapError::InvalidConfiguration(format!(
                "min zoom {} is above max zoom {}",
                zoom, self.max_zoom
            )));
        }
        self.min_zoom = zoom;
        self.set_zoom(self.zoom.max(zoom))
    }

    pub fn set_max_zoom(&mut self, zoom: f64) -> Result<()> {
        if self.max_zoom == zoom {
            return Ok(());
        }
        if zoom < self.min_zoom {
            return Err(MapError::InvalidConfiguration(format!(
                "max zoom {} is below min zoom {}",
                zoom, self.min_zoom
            )));
        }
        self.max_zoom = zoom;
        self.set_zoom(self.zoom.min(zoom))
    }

    pub fn set_render_world_copies(&mut self, render_world_copies: bool) {
        self.render_world_copies = render_world_copies;
    }

    /// Sets the bearing in degrees, wrapped into (-180, 180]
    pub fn set_bearing(&mut self, bearing: f64) -> Result<()> {
        let angle = -wrap(bearing, -180.0, 180.0) * PI / 180.0;
        if self.angle == angle {
            return Ok(());
        }
        self.unmodified = false;
        self.angle = angle;
        self.calc_matrices()
    }

    /// Sets the pitch in degrees, clamped to [0, 60]
    pub fn set_pitch(&mut self, pitch: f64) -> Result<()> {
        let pitch = pitch.clamp(MIN_PITCH, MAX_PITCH) / 180.0 * PI;
        if self.pitch == pitch {
            return Ok(());
        }
        self.unmodified = false;
        self.pitch = pitch;
        self.calc_matrices()
    }

    /// Sets the field of view in degrees, clamped to [0.01, 60]
    pub fn set_fov(&mut self, fov: f64) -> Result<()> {
        let fov = fov.clamp(MIN_FOV, MAX_FOV) / 180.0 * PI;
        if self.fov == fov {
            return Ok(());
        }
        self.unmodified = false;
        self.fov = fov;
        self.calc_matrices()
    }

    /// Sets the zoom, clamped to the configured range
    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        let zoom = zoom.max(self.min_zoom).min(self.max_zoom);
        if self.zoom == zoom {
            return Ok(());
        }
        self.unmodified = false;
        self.zoom = zoom;
        self.scale = 2_f64.powf(zoom);
        self.tile_zoom = zoom.floor();
        self.zoom_fraction = zoom - self.tile_zoom;
        self.constrain()?;
        self.calc_matrices()
    }

    /// Sets the center. Longitude is not wrapped so that panning across the
    /// antimeridian stays continuous.
    pub fn set_center(&mut self, center: LatLng) -> Result<()> {
        if center == self.center {
            return Ok(());
        }
        if !center.lat.is_finite() || !center.lng.is_finite() {
            return Err(MapError::InvalidCoordinates(format!(
                "center ({}, {}) is not finite",
                center.lat, center.lng
            )));
        }
        self.unmodified = false;
        self.center = center;
        self.constrain()?;
        self.calc_matrices()
    }

    /// Sets the viewport size in pixels
    pub fn resize(&mut self, width: f64, height: f64) -> Result<()> {
        self.width = width;
        self.height = height;
        self.pixels_to_gl_units = [2.0 / width, -2.0 / height];
        self.constrain()?;
        self.calc_matrices()
    }

    /// Restricts the center to `bounds`, or lifts the restriction with `None`
    pub fn set_max_bounds(&mut self, bounds: Option<LatLngBounds>) -> Result<()> {
        match bounds {
            Some(bounds) => {
                self.lng_range = Some((bounds.west(), bounds.east()));
                self.lat_range = Some((bounds.south(), bounds.north()));
                self.constrain()?;
                self.calc_matrices()
            }
            None => {
                self.lng_range = None;
                self.lat_range = Some((-MAX_VALID_LATITUDE, MAX_VALID_LATITUDE));
                Ok(())
            }
        }
    }

    /// Sets the allowed longitude range, applied from the next camera change
    pub fn set_lng_range(&mut self, range: Option<(f64, f64)>) {
        self.lng_range = range;
    }

    /// Sets the allowed latitude range, applied from the next camera change
    pub fn set_lat_range(&mut self, range: Option<(f64, f64)>) {
        self.lat_range = range;
    }

    // ---- projection ----

    pub fn lng_x(&self, lng: f64) -> f64 {
        (180.0 + lng) * self.world_size() / 360.0
    }

    pub fn lat_y(&self, lat: f64) -> f64 {
        let lat = LatLng::clamp_lat(lat);
        let y = 180.0 / PI * (PI / 4.0 + lat * PI / 360.0).tan().ln();
        (180.0 - y) * self.world_size() / 360.0
    }

    pub fn x_lng(&self, x: f64) -> f64 {
        x * 360.0 / self.world_size() - 180.0
    }

    pub fn y_lat(&self, y: f64) -> f64 {
        let y2 = 180.0 - y * 360.0 / self.world_size();
        360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0
    }

    /// Location to world pixels at the current zoom
    pub fn project(&self, location: &LatLng) -> Point {
        Point::new(self.lng_x(location.lng), self.lat_y(location.lat))
    }

    /// World pixels at the current zoom to a location
    pub fn unproject(&self, point: &Point) -> LatLng {
        LatLng::new(self.y_lat(point.y), self.x_lng(point.x))
    }

    /// Location to tile space at the current tile zoom
    pub fn location_coordinate(&self, location: &LatLng) -> Coordinate {
        Coordinate::new(
            self.lng_x(location.lng) / self.tile_size,
            self.lat_y(location.lat) / self.tile_size,
            self.zoom,
        )
        .zoom_to(self.tile_zoom)
    }

    pub fn coordinate_location(&self, coord: &Coordinate) -> LatLng {
        let zoomed = coord.zoom_to(self.zoom);
        LatLng::new(
            self.y_lat(zoomed.row * self.tile_size),
            self.x_lng(zoomed.column * self.tile_size),
        )
    }

    /// Screen pixel to tile space at `zoom` (default: the tile zoom).
    ///
    /// Casts a ray through the point at depth 0 and depth 1 and intersects it
    /// with the ground plane, which stays correct under pitch.
    pub fn point_coordinate(&self, point: &Point, zoom: Option<f64>) -> Coordinate {
        let zoom = zoom.unwrap_or(self.tile_zoom);
        let target_z = 0.0;

        let coord0 = self.pixel_matrix_inverse * Vector4::new(point.x, point.y, 0.0, 1.0);
        let coord1 = self.pixel_matrix_inverse * Vector4::new(point.x, point.y, 1.0, 1.0);

        let (w0, w1) = (coord0.w, coord1.w);
        let (x0, y0, z0) = (coord0.x / w0, coord0.y / w0, coord0.z / w0);
        let (x1, y1, z1) = (coord1.x / w1, coord1.y / w1, coord1.z / w1);

        let t = if z0 == z1 {
            0.0
        } else {
            (target_z - z0) / (z1 - z0)
        };

        Coordinate::new(
            interpolate(x0, x1, t) / self.tile_size,
            interpolate(y0, y1, t) / self.tile_size,
            self.zoom,
        )
        .zoom_to(zoom)
    }

    /// Tile space to screen pixels
    pub fn coordinate_point(&self, coord: &Coordinate) -> Point {
        let zoomed = coord.zoom_to(self.zoom);
        let p = self.pixel_matrix
            * Vector4::new(
                zoomed.column * self.tile_size,
                zoomed.row * self.tile_size,
                0.0,
                1.0,
            );
        Point::new(p.x / p.w, p.y / p.w)
    }

    pub fn location_point(&self, location: &LatLng) -> Point {
        self.coordinate_point(&self.location_coordinate(location))
    }

    pub fn point_location(&self, point: &Point) -> LatLng {
        self.coordinate_location(&self.point_coordinate(point, None))
    }

    /// Moves the camera so that `location` ends up under the screen `point`
    pub fn set_location_at_point(&mut self, location: &LatLng, point: &Point) -> Result<()> {
        let translate = self
            .point_coordinate(point, None)
            .sub(&self.point_coordinate(&self.center_point(), None));
        let center = self.coordinate_location(&self.location_coordinate(location).sub(&translate));
        let center = if self.render_world_copies {
            center.wrapped()
        } else {
            center
        };
        self.set_center(center)
    }

    /// Geographic bounds of the four viewport corners
    pub fn bounds(&self) -> LatLngBounds {
        let top_left = self.point_location(&Point::new(0.0, 0.0));
        let mut bounds = LatLngBounds::new(top_left, top_left);
        bounds.extend(&self.point_location(&Point::new(self.width, 0.0)));
        bounds.extend(&self.point_location(&Point::new(self.width, self.height)));
        bounds.extend(&self.point_location(&Point::new(0.0, self.height)));
        bounds
    }

    // ---- tiles ----

    /// Zoom level whose tiles of `tile_size` pixels best match the view
    pub fn covering_zoom_level(&self, tile_size: f64, round_zoom: bool) -> i32 {
        let z = self.zoom + (self.tile_size / tile_size).log2();
        let z = if round_zoom { z.round() } else { z.floor() };
        (z as i32).max(0)
    }

    /// Tiles covering the viewport, nearest to the center first
    pub fn covering_tiles(&self, options: &CoveringTilesOptions) -> Vec<OverscaledTileId> {
        let mut z = self.covering_zoom_level(options.tile_size, options.round_zoom);
        let actual_z = z.min(MAX_OVERSCALED_ZOOM as i32);

        if let Some(min_zoom) = options.min_zoom {
            if z < min_zoom as i32 {
                return Vec::new();
            }
        }
        if let Some(max_zoom) = options.max_zoom {
            if z > max_zoom as i32 {
                z = max_zoom as i32;
            }
        }
        let z = z.min(MAX_OVERSCALED_ZOOM as i32) as u8;
        let actual_z = if options.reparse_overscaled {
            actual_z as u8
        } else {
            z
        };
        let zf = z as f64;

        let center = self.point_coordinate(&self.center_point(), Some(zf));
        let center = Point::new(center.column - 0.5, center.row - 0.5);
        let corners = [
            self.point_coordinate(&Point::new(0.0, 0.0), Some(zf)),
            self.point_coordinate(&Point::new(self.width, 0.0), Some(zf)),
            self.point_coordinate(&Point::new(self.width, self.height), Some(zf)),
            self.point_coordinate(&Point::new(0.0, self.height), Some(zf)),
        ];

        let render_world_copies = options
            .render_world_copies
            .unwrap_or(self.render_world_copies);
        let mut tiles = tile_cover(z, &corners, actual_z, render_world_copies);

        let distance = |id: &OverscaledTileId| {
            let unwrapped = id.to_unwrapped();
            center.distance_to(&Point::new(
                unwrapped.unwrapped_x(),
                id.canonical.y as f64,
            ))
        };
        tiles.sort_by(|a, b| {
            distance(a)
                .partial_cmp(&distance(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tiles
    }

    /// The tile in world 0 plus every other world copy visible in the
    /// viewport, with one extra copy on each side.
    pub fn get_visible_unwrapped_coordinates(
        &self,
        tile_id: CanonicalTileId,
    ) -> Vec<UnwrappedTileId> {
        let mut result = vec![UnwrappedTileId::new(0, tile_id)];
        if !self.render_world_copies {
            return result;
        }

        let corners = [
            self.point_coordinate(&Point::new(0.0, 0.0), Some(0.0)),
            self.point_coordinate(&Point::new(self.width, 0.0), Some(0.0)),
            self.point_coordinate(&Point::new(self.width, self.height), Some(0.0)),
            self.point_coordinate(&Point::new(0.0, self.height), Some(0.0)),
        ];
        let w0 = corners
            .iter()
            .map(|c| c.column)
            .fold(f64::INFINITY, f64::min)
            .floor() as i32;
        let w1 = corners
            .iter()
            .map(|c| c.column)
            .fold(f64::NEG_INFINITY, f64::max)
            .floor() as i32;

        let extra_world_copy = 1;
        for w in (w0 - extra_world_copy)..=(w1 + extra_world_copy) {
            if w == 0 {
                continue;
            }
            result.push(UnwrappedTileId::new(w, tile_id));
        }
        result
    }

    /// Matrix placing a tile's [0, EXTENT) vertex space into clip space.
    ///
    /// Memoized per tile until the next camera change. The aligned variant
    /// snaps the camera translation to the pixel grid for raster sampling.
    pub fn calculate_pos_matrix(&self, tile_id: &UnwrappedTileId, aligned: bool) -> Matrix4<f32> {
        let key = tile_id.key();
        let cache = if aligned {
            &self.aligned_pos_matrix_cache
        } else {
            &self.pos_matrix_cache
        };
        if let Some(matrix) = cache.borrow().get(&key) {
            return *matrix;
        }

        let canonical = tile_id.canonical;
        let scale = self.world_size() / 2_f64.powi(canonical.z as i32);
        let unwrapped_x = tile_id.unwrapped_x();

        let pos_matrix = Matrix4::new_translation(&Vector3::new(
            unwrapped_x * scale,
            canonical.y as f64 * scale,
            0.0,
        ))
        .prepend_nonuniform_scaling(&Vector3::new(scale / EXTENT, scale / EXTENT, 1.0));
        let projection = if aligned {
            &self.aligned_proj_matrix
        } else {
            &self.proj_matrix
        };
        let matrix: Matrix4<f32> = (projection * pos_matrix).cast::<f32>();

        cache.borrow_mut().insert(key, matrix);
        matrix
    }

    /// Ratio between the clip-space depth of the top screen edge and of the center
    pub fn max_pitch_scale_factor(&self) -> f64 {
        if self.height == 0.0 {
            return 1.0;
        }
        let coord = self
            .point_coordinate(&Point::new(0.0, 0.0), None)
            .zoom_to(self.zoom);
        let top = self.pixel_matrix
            * Vector4::new(
                coord.column * self.tile_size,
                coord.row * self.tile_size,
                0.0,
                1.0,
            );
        top.w / self.camera_to_center_distance
    }

    /// Screen position of the ground point below the camera
    pub fn get_camera_point(&self) -> Point {
        let distance = if self.camera_to_center_distance == 0.0 {
            1.0
        } else {
            self.camera_to_center_distance
        };
        let y_offset = self.pitch.tan() * distance;
        self.center_point().add(&Point::new(0.0, y_offset))
    }

    /// Inflates a screen query toward the camera so that tall features whose
    /// base lies toward the horizon are still hit under pitch.
    ///
    /// A single point becomes a line to the camera point; anything else
    /// becomes the closed envelope of the query and the camera point.
    pub fn get_camera_query_geometry(&self, query: &[Point]) -> Vec<Point> {
        let camera = self.get_camera_point();
        if query.len() == 1 {
            return vec![query[0], camera];
        }

        let rect = envelope(
            query
                .iter()
                .chain(std::iter::once(&camera))
                .map(|p| (p.x, p.y)),
        );
        match rect {
            Some(rect) => {
                let (min, max) = (rect.min(), rect.max());
                vec![
                    Point::new(min.x, min.y),
                    Point::new(max.x, min.y),
                    Point::new(max.x, max.y),
                    Point::new(min.x, max.y),
                    Point::new(min.x, min.y),
                ]
            }
            None => vec![camera],
        }
    }

    // ---- internals ----

    /// Zooms in or pans so the viewport stays inside the configured ranges.
    /// Re-entrant calls from the center/zoom setters it uses are no-ops.
    fn constrain(&mut self) -> Result<()> {
        if self.width == 0.0 || self.height == 0.0 || self.constraining {
            return Ok(());
        }
        self.constraining = true;
        let unmodified = self.unmodified;
        let result = self.constrain_to_ranges();
        self.unmodified = unmodified;
        self.constraining = false;
        result
    }

    fn constrain_to_ranges(&mut self) -> Result<()> {
        let size = self.size();
        let (mut min_x, mut max_x) = (-180.0, 180.0);
        let (mut min_y, mut max_y) = (-90.0, 90.0);
        let mut sx = 0.0;
        let mut sy = 0.0;

        if let Some((south, north)) = self.lat_range {
            min_y = self.lat_y(north);
            max_y = self.lat_y(south);
            if max_y - min_y < size.y {
                sy = size.y / (max_y - min_y);
            }
        }
        if let Some((west, east)) = self.lng_range {
            min_x = self.lng_x(west);
            max_x = self.lng_x(east);
            if max_x - min_x < size.x {
                sx = size.x / (max_x - min_x);
            }
        }

        let s = f64::max(sx, sy);
        if s != 0.0 {
            let x = if sx != 0.0 {
                (max_x + min_x) / 2.0
            } else {
                self.x()
            };
            let y = if sy != 0.0 {
                (max_y + min_y) / 2.0
            } else {
                self.y()
            };
            let center = self.unproject(&Point::new(x, y));
            self.set_center(center)?;
            return self.set_zoom(self.zoom + s.log2());
        }

        let mut x2 = None;
        let mut y2 = None;
        if self.lat_range.is_some() {
            let (y, h2) = (self.y(), size.y / 2.0);
            if y - h2 < min_y {
                y2 = Some(min_y + h2);
            }
            if y + h2 > max_y {
                y2 = Some(max_y - h2);
            }
        }
        if self.lng_range.is_some() {
            let (x, w2) = (self.x(), size.x / 2.0);
            if x - w2 < min_x {
                x2 = Some(min_x + w2);
            }
            if x + w2 > max_x {
                x2 = Some(max_x - w2);
            }
        }

        if x2.is_some() || y2.is_some() {
            let center = self.unproject(&Point::new(
                x2.unwrap_or_else(|| self.x()),
                y2.unwrap_or_else(|| self.y()),
            ));
            self.set_center(center)?;
        }
        Ok(())
    }

    fn calc_matrices(&mut self) -> Result<()> {
        if self.width == 0.0 || self.height == 0.0 {
            return Ok(());
        }

        self.camera_to_center_distance = 0.5 / (self.fov / 2.0).tan() * self.height;

        // distance from the center to the top edge along the ground (law of sines)
        let half_fov = self.fov / 2.0;
        let ground_angle = PI / 2.0 + self.pitch;
        let top_half_surface_distance = half_fov.sin() * self.camera_to_center_distance
            / (PI - ground_angle - half_fov).sin();
        let (x, y) = (self.x(), self.y());

        let furthest_distance = (PI / 2.0 - self.pitch).cos() * top_half_surface_distance
            + self.camera_to_center_distance;
        let far_z = furthest_distance * 1.01;

        // meters per pixel at the center latitude
        let vertical_scale = self.world_size()
            / (2.0 * PI * EARTH_RADIUS * (self.center.lat * PI / 180.0).cos().abs());

        let m = Matrix4::new_perspective(self.width / self.height, self.fov, 1.0, far_z)
            .prepend_nonuniform_scaling(&Vector3::new(1.0, -1.0, 1.0))
            .prepend_translation(&Vector3::new(0.0, 0.0, -self.camera_to_center_distance))
            * Matrix4::from_axis_angle(&Vector3::x_axis(), self.pitch)
            * Matrix4::from_axis_angle(&Vector3::z_axis(), self.angle);
        let m = m
            .prepend_translation(&Vector3::new(-x, -y, 0.0))
            .prepend_nonuniform_scaling(&Vector3::new(1.0, 1.0, vertical_scale));
        self.proj_matrix = m;

        // snap to the pixel grid, accounting for odd viewport sizes and rotation
        let x_shift = (self.width % 2.0) / 2.0;
        let y_shift = (self.height % 2.0) / 2.0;
        let (angle_sin, angle_cos) = self.angle.sin_cos();
        let dx = x - x.round() + angle_cos * x_shift + angle_sin * y_shift;
        let dy = y - y.round() + angle_cos * y_shift + angle_sin * x_shift;
        self.aligned_proj_matrix = m.prepend_translation(&Vector3::new(
            if dx > 0.5 { dx - 1.0 } else { dx },
            if dy > 0.5 { dy - 1.0 } else { dy },
            0.0,
        ));

        self.label_plane_matrix =
            Matrix4::new_nonuniform_scaling(&Vector3::new(self.width / 2.0, -self.height / 2.0, 1.0))
                .prepend_translation(&Vector3::new(1.0, -1.0, 0.0));

        self.gl_coord_matrix = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, -1.0, 1.0))
            .prepend_translation(&Vector3::new(-1.0, -1.0, 0.0))
            .prepend_nonuniform_scaling(&Vector3::new(
                2.0 / self.width,
                2.0 / self.height,
                1.0,
            ));

        self.pixel_matrix = self.label_plane_matrix * self.proj_matrix;
        self.pixel_matrix_inverse = match self.pixel_matrix.try_inverse() {
            Some(inverse) => inverse,
            None => {
                error!(
                    "pixel matrix is singular at zoom {} pitch {} size {}x{}",
                    self.zoom,
                    self.pitch(),
                    self.width,
                    self.height
                );
                return Err(MapError::MatrixInversion);
            }
        };

        self.pos_matrix_cache.borrow_mut().clear();
        self.aligned_pos_matrix_cache.borrow_mut().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn viewport(width: f64, height: f64) -> Transform {
        let mut transform = Transform::new();
        transform.resize(width, height).unwrap();
        transform
    }

    #[test]
    fn test_creates_with_defaults() {
        let transform = viewport(500.0, 500.0);
        assert_eq!(transform.tile_size(), 512.0);
        assert_eq!(transform.world_size(), 512.0);
        assert_eq!(transform.width(), 500.0);
        assert_eq!(transform.min_zoom(), 0.0);
        assert_eq!(transform.max_zoom(), 22.0);
        assert_eq!(transform.bearing(), 0.0);
        assert!(transform.is_unmodified());
        assert_eq!(transform.center_point(), Point::new(250.0, 250.0));
        assert_eq!(transform.scale(), 1.0);
    }

    #[test]
    fn test_zero_sized_viewport_is_accepted() {
        let mut transform = Transform::new();
        assert!(transform.resize(0.0, 500.0).is_ok());
        assert!(transform.resize(500.0, 0.0).is_ok());
        assert!(transform.resize(0.0, 0.0).is_ok());

        transform.resize(500.0, 500.0).unwrap();
        let p = Point::new(120.0, 330.0);
        let back = transform.coordinate_point(&transform.point_coordinate(&p, None));
        assert!(approx(back.x, p.x, 1e-6));
        assert!(approx(back.y, p.y, 1e-6));
    }

    #[test]
    fn test_bearing_wraps() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_bearing(1.0).unwrap();
        assert!(approx(transform.bearing(), 1.0, 1e-12));
        transform.set_bearing(190.0).unwrap();
        assert!(approx(transform.bearing(), -170.0, 1e-12));
        assert!(!transform.is_unmodified());
    }

    #[test]
    fn test_zoom_updates_derived_values() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(3.25).unwrap();
        assert_eq!(transform.tile_zoom(), 3.0);
        assert_eq!(transform.zoom_fraction(), 0.25);
        assert_eq!(transform.scale(), 2_f64.powf(3.25));
    }

    #[test]
    fn test_fov_clamped() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_fov(120.0).unwrap();
        assert!(approx(transform.fov(), 60.0, 1e-9));
        transform.set_fov(0.0).unwrap();
        assert!(approx(transform.fov(), 0.01, 1e-9));
    }

    #[test]
    fn test_point_coordinate_round_trip() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(4.5).unwrap();
        transform.set_pitch(40.0).unwrap();
        transform.set_bearing(20.0).unwrap();
        transform.set_center(LatLng::new(10.0, 20.0)).unwrap();

        let p = Point::new(120.0, 380.0);
        let coord = transform.point_coordinate(&p, None);
        let back = transform.coordinate_point(&coord);
        assert!(approx(back.x, p.x, 1e-6));
        assert!(approx(back.y, p.y, 1e-6));

        let center = transform.point_location(&transform.center_point());
        assert!(approx(center.lat, 10.0, 1e-6));
        assert!(approx(center.lng, 20.0, 1e-6));
    }

    #[test]
    fn test_set_location_at_point() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(4.0).unwrap();
        let target = LatLng::new(5.0, 5.0);
        let p = Point::new(100.0, 100.0);
        transform.set_location_at_point(&target, &p).unwrap();
        let moved = transform.location_point(&target);
        assert!(approx(moved.x, 100.0, 1e-6));
        assert!(approx(moved.y, 100.0, 1e-6));
    }

    #[test]
    fn test_pos_matrix_is_memoized_and_invalidated() {
        let mut transform = viewport(500.0, 500.0);
        let id = UnwrappedTileId::new(0, CanonicalTileId::new(1, 1, 0));
        let first = transform.calculate_pos_matrix(&id, false);
        assert_eq!(transform.pos_matrix_cache.borrow().len(), 1);
        assert_eq!(transform.calculate_pos_matrix(&id, false), first);
        transform.calculate_pos_matrix(&id, true);
        assert_eq!(transform.aligned_pos_matrix_cache.borrow().len(), 1);

        transform.set_zoom(1.0).unwrap();
        assert!(transform.pos_matrix_cache.borrow().is_empty());
        assert!(transform.aligned_pos_matrix_cache.borrow().is_empty());
        assert_ne!(transform.calculate_pos_matrix(&id, false), first);
    }

    #[test]
    fn test_pos_matrix_places_tile_corner() {
        let transform = viewport(512.0, 512.0);
        let id = UnwrappedTileId::new(0, CanonicalTileId::new(0, 0, 0));
        let m = transform.calculate_pos_matrix(&id, false).cast::<f64>();
        // the tile center is the map center, which projects to clip origin
        let clip = m * Vector4::new(EXTENT / 2.0, EXTENT / 2.0, 0.0, 1.0);
        assert!(approx(clip.x / clip.w, 0.0, 1e-6));
        assert!(approx(clip.y / clip.w, 0.0, 1e-6));
    }

    #[test]
    fn test_covering_zoom_level() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(3.6).unwrap();
        assert_eq!(transform.covering_zoom_level(512.0, false), 3);
        assert_eq!(transform.covering_zoom_level(512.0, true), 4);
        assert_eq!(transform.covering_zoom_level(256.0, false), 4);
        transform.set_zoom(0.0).unwrap();
        assert_eq!(transform.covering_zoom_level(1024.0, false), 0);
    }

    #[test]
    fn test_visible_unwrapped_coordinates() {
        let transform = viewport(1000.0, 500.0);
        let tile = CanonicalTileId::new(0, 0, 0);
        let wraps: Vec<i32> = transform
            .get_visible_unwrapped_coordinates(tile)
            .iter()
            .map(|id| id.wrap)
            .collect();
        assert_eq!(wraps, vec![0, -2, -1, 1, 2]);

        let mut single = viewport(1000.0, 500.0);
        single.set_render_world_copies(false);
        assert_eq!(single.get_visible_unwrapped_coordinates(tile).len(), 1);
    }

    #[test]
    fn test_camera_query_geometry() {
        let mut transform = viewport(200.0, 200.0);
        transform.set_pitch(45.0).unwrap();
        let camera = transform.get_camera_point();
        assert!(camera.y > 100.0);

        let line = transform.get_camera_query_geometry(&[Point::new(10.0, 20.0)]);
        assert_eq!(line, vec![Point::new(10.0, 20.0), camera]);

        let ring = transform.get_camera_query_geometry(&[Point::new(10.0, 20.0), Point::new(50.0, 40.0)]);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert_eq!(ring[0], Point::new(10.0, 20.0));
        assert_eq!(ring[2], Point::new(100.0, camera.y));
    }

    #[test]
    fn test_max_pitch_scale_factor() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(5.0).unwrap();
        assert!(approx(transform.max_pitch_scale_factor(), 1.0, 1e-9));
        transform.set_pitch(60.0).unwrap();
        assert!(transform.max_pitch_scale_factor() > 1.0);
    }

    #[test]
    fn test_min_max_zoom_reclamp() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(10.0).unwrap();
        transform.set_max_zoom(8.0).unwrap();
        assert_eq!(transform.zoom(), 8.0);
        transform.set_min_zoom(9.0).unwrap_err();
        transform.set_min_zoom(8.0).unwrap();
        transform.set_zoom(2.0).unwrap();
        assert_eq!(transform.zoom(), 8.0);
    }

    #[test]
    fn test_bounds() {
        let mut transform = viewport(512.0, 512.0);
        transform.set_zoom(1.0).unwrap();
        let bounds = transform.bounds();
        assert!(approx(bounds.west(), -90.0, 1e-6));
        assert!(approx(bounds.east(), 90.0, 1e-6));
        assert!(bounds.north() > 0.0 && bounds.south() < 0.0);
    }

    #[test]
    fn test_max_bounds_pans_back() {
        let mut transform = viewport(500.0, 500.0);
        transform.set_zoom(10.0).unwrap();
        transform
            .set_max_bounds(Some(LatLngBounds::from_coords(-5.0, -5.0, 5.0, 5.0)))
            .unwrap();
        transform.set_center(LatLng::new(-30.0, -50.0)).unwrap();
        let center = transform.center();
        assert!(approx(center.lng, -4.828338623046875, 1e-9));
        assert!(approx(center.lat, -4.828969771321582, 1e-9));

        transform.set_max_bounds(None).unwrap();
        assert_eq!(transform.lng_range(), None);
    }
}
