/// Geographic position in degrees, longitude first.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Loc {
    pub lon: f64,
    pub lat: f64,
}

impl Loc {
    pub fn new(lon: f64, lat: f64) -> Self {
        Loc { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: Loc,
    pub max: Loc,
}

impl Extent {
    /// Builds the smallest extent covering both corners, in whatever order they come.
    pub fn from_corners(a: Loc, b: Loc) -> Self {
        Extent {
            min: Loc::new(a.lon.min(b.lon), a.lat.min(b.lat)),
            max: Loc::new(a.lon.max(b.lon), a.lat.max(b.lat)),
        }
    }

    pub fn contains(&self, loc: Loc) -> bool {
        loc.lon >= self.min.lon
            && loc.lon <= self.max.lon
            && loc.lat >= self.min.lat
            && loc.lat <= self.max.lat
    }

    /// `minlon,minlat,maxlon,maxlat`, the form the `bbox` query parameter expects.
    pub fn to_param(&self) -> String {
        format!("{},{},{},{}", self.min.lon, self.min.lat, self.max.lon, self.max.lat)
    }
}
