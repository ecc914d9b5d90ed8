use std::f64::consts::PI;

use log::warn;

use crate::data::geo::{Extent, Loc};

pub const DEFAULT_TILE_ZOOM: u32 = 16;

/// Deepest tile zoom the map API serves.
pub const MAX_TILE_ZOOM: u32 = 22;

/// Viewports so far zoomed out that they would need more tiles than this plan nothing.
pub const MAX_PLANNED_TILES: usize = 4096;

const TILE_SIZE: f64 = 256.0;

/// Maps geographic positions to viewport pixels and back.
pub trait Projection {
    /// Pixels per radian.
    fn scale(&self) -> f64;
    /// Pixel offset of the projection origin.
    fn translate(&self) -> [f64; 2];
    fn project(&self, loc: Loc) -> [f64; 2];
    fn invert(&self, point: [f64; 2]) -> Loc;
}

/// Spherical web mercator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorProjection {
    scale: f64,
    translate: [f64; 2],
}

impl MercatorProjection {
    pub fn new(scale: f64, translate: [f64; 2]) -> Self {
        MercatorProjection { scale, translate }
    }

    /// Projection showing `center` in the middle of a `dimensions` viewport at web-map `zoom`.
    pub fn centered(center: Loc, zoom: f64, dimensions: [f64; 2]) -> Self {
        let scale = TILE_SIZE * 2f64.powf(zoom) / (2.0 * PI);
        let origin = MercatorProjection::new(scale, [0.0, 0.0]).project(center);
        MercatorProjection::new(scale, [dimensions[0] / 2.0 - origin[0], dimensions[1] / 2.0 - origin[1]])
    }
}

impl Projection for MercatorProjection {
    fn scale(&self) -> f64 {
        self.scale
    }

    fn translate(&self) -> [f64; 2] {
        self.translate
    }

    fn project(&self, loc: Loc) -> [f64; 2] {
        let lambda = loc.lon.to_radians();
        let phi = loc.lat.to_radians();
        [
            lambda * self.scale + self.translate[0],
            self.translate[1] - (PI / 4.0 + phi / 2.0).tan().ln() * self.scale,
        ]
    }

    fn invert(&self, point: [f64; 2]) -> Loc {
        let lambda = (point[0] - self.translate[0]) / self.scale;
        let phi = 2.0 * ((self.translate[1] - point[1]) / self.scale).exp().atan() - PI / 2.0;
        Loc::new(lambda.to_degrees(), phi.to_degrees())
    }
}

/// A projection together with the pixel size of the area it is drawn into.
pub struct Viewport<'a> {
    pub projection: &'a dyn Projection,
    pub dimensions: [f64; 2],
}

impl<'a> Viewport<'a> {
    pub fn new(projection: &'a dyn Projection, dimensions: [f64; 2]) -> Self {
        Viewport { projection, dimensions }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// `x,y,z`; equal coordinates always give equal ids.
    pub id: String,
    pub x: i64,
    pub y: i64,
    pub z: u32,
    pub extent: Extent,
}

/// Tiles at `tile_zoom` covering the viewport, row by row.
///
/// The visual zoom is derived from the projection scale; each tile's edge in
/// viewport pixels is `256 * 2^(zoom - tile_zoom)` and its extent comes from
/// inverting its pixel corners. Pure: the same viewport always plans the same tiles.
pub fn plan_tiles(viewport: &Viewport, tile_zoom: u32) -> Vec<Tile> {
    let projection = viewport.projection;
    let translate = projection.translate();
    let world_size = projection.scale() * 2.0 * PI;
    let zoom = (world_size.log2() - 8.0).max(0.0);
    let tile_size = TILE_SIZE * 2f64.powf(zoom - tile_zoom as f64);
    if !tile_size.is_finite() || tile_size <= 0.0 {
        return Vec::new();
    }

    // Pixel position of the world's top-left corner, in tile units.
    let grid_origin = [
        (translate[0] - world_size / 2.0) / tile_size,
        (translate[1] - world_size / 2.0) / tile_size,
    ];
    let span = |origin: f64, size: f64| {
        let start = (-origin).floor().max(0.0) as i64;
        let end = (size / tile_size - origin).ceil().max(0.0) as i64;
        start..end.max(start)
    };
    let cols = span(grid_origin[0], viewport.dimensions[0]);
    let rows = span(grid_origin[1], viewport.dimensions[1]);

    let count = match ((cols.end - cols.start) as usize).checked_mul((rows.end - rows.start) as usize) {
        Some(count) if count <= MAX_PLANNED_TILES => count,
        _ => {
            warn!(zoom = zoom, tile_zoom = tile_zoom; "Viewport needs too many tiles, planning none");
            return Vec::new();
        },
    };

    let world_origin = [world_size / 2.0 - translate[0], world_size / 2.0 - translate[1]];
    let mut tiles = Vec::with_capacity(count);
    for y in rows {
        for x in cols.clone() {
            let px = x as f64 * tile_size - world_origin[0];
            let py = y as f64 * tile_size - world_origin[1];
            tiles.push(Tile {
                id: format!("{x},{y},{tile_zoom}"),
                x,
                y,
                z: tile_zoom,
                extent: Extent::from_corners(
                    projection.invert([px, py + tile_size]),
                    projection.invert([px + tile_size, py]),
                ),
            });
        }
    }
    tiles
}
