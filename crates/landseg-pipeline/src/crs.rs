//! Coordinate reference systems identified by EPSG code.
//!
//! GeoTIFF encodes the CRS as GeoKeys (`GeographicTypeGeoKey` or
//! `ProjectedCSTypeGeoKey`); shapefiles carry it as WKT in a `.prj`
//! sidecar. WKT definitions come from the EPSG registry bundled with
//! `crs-definitions`.

use serde::{Deserialize, Serialize};

/// A CRS identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic (lat/lon) CRS, e.g. EPSG:4326.
    Geographic(u16),
    /// Projected CRS, e.g. EPSG:32633.
    Projected(u16),
}

/// EPSG code of WGS 84.
pub const EPSG_WGS84: u16 = 4326;

/// EPSG code of WGS 84 / Pseudo-Mercator.
pub const EPSG_WEB_MERCATOR: u16 = 3857;

impl Crs {
    /// The EPSG code.
    #[must_use]
    pub const fn epsg(self) -> u16 {
        match self {
            Self::Geographic(code) | Self::Projected(code) => code,
        }
    }

    /// Render the CRS as WKT1 for a `.prj` sidecar.
    ///
    /// Returns `None` when the registry has no definition for the code or
    /// the definition is of the other kind (a `GEOGCS` for a projected
    /// code, or the reverse).
    #[must_use]
    pub fn to_wkt(self) -> Option<String> {
        let def = crs_definitions::from_code(self.epsg())?;
        let kind = match self {
            Self::Geographic(_) => "GEOGCS[",
            Self::Projected(_) => "PROJCS[",
        };
        def.wkt.starts_with(kind).then(|| def.wkt.to_string())
    }

    /// Recover the CRS from WKT1 text by its outermost EPSG authority.
    ///
    /// Only the top-level `AUTHORITY` (the last one in the string) is
    /// considered; nested datum and unit authorities are ignored.
    #[must_use]
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let wkt = wkt.trim();
        let marker = r#"AUTHORITY["EPSG",""#;
        let start = wkt.rfind(marker)? + marker.len();
        let end = start + wkt[start..].find('"')?;
        let code: u16 = wkt[start..end].parse().ok()?;
        if wkt.starts_with("PROJCS") {
            Some(Self::Projected(code))
        } else if wkt.starts_with("GEOGCS") {
            Some(Self::Geographic(code))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}
