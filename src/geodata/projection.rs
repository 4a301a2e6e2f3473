//! CRS detection for shapefile sidecars and reprojection to WGS84.
//!
//! The territory layers ship either in geographic coordinates or in one
//! of the MAGNA-SIRGAS transverse-Mercator grids used for Colombian
//! cadastral data. Anything else is rejected rather than guessed.

use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::Proj;

use super::GeodataError;

const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

const MAGNA_ORIGEN_NACIONAL_PROJ: &str =
    "+proj=tmerc +lat_0=4.0 +lon_0=-73.0 +k=0.9992 +x_0=5000000 +y_0=2000000 +ellps=GRS80 +units=m +no_defs";

const MAGNA_BOGOTA_PROJ: &str =
    "+proj=tmerc +lat_0=4.596200416666666 +lon_0=-74.07750791666666 +k=1 +x_0=1000000 +y_0=1000000 +ellps=GRS80 +units=m +no_defs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    Wgs84,
    Projected {
        name: &'static str,
        proj4: &'static str,
    },
}

impl Crs {
    pub fn name(&self) -> &'static str {
        match self {
            Crs::Wgs84 => "WGS84",
            Crs::Projected { name, .. } => name,
        }
    }
}

/// Detects the CRS from a `.prj` WKT by keyword. A missing sidecar is
/// treated as WGS84 with a warning, matching how the source layers
/// behave when their CRS metadata is absent.
pub fn detect_crs(prj: Option<&str>) -> Result<Crs, GeodataError> {
    let Some(wkt) = prj.map(str::trim).filter(|v| !v.is_empty()) else {
        tracing::warn!("shapefile has no .prj sidecar; assuming WGS84");
        return Ok(Crs::Wgs84);
    };
    let upper = wkt.to_uppercase();

    if upper.contains("MAGNA") {
        if upper.contains("CTM12")
            || upper.contains("ORIGEN-NACIONAL")
            || upper.contains("ORIGEN_NACIONAL")
            || upper.contains("9377")
        {
            return Ok(Crs::Projected {
                name: "MAGNA-SIRGAS / Origen-Nacional (EPSG:9377)",
                proj4: MAGNA_ORIGEN_NACIONAL_PROJ,
            });
        }
        if upper.contains("BOGOTA") {
            return Ok(Crs::Projected {
                name: "MAGNA-SIRGAS / Colombia Bogota zone (EPSG:3116)",
                proj4: MAGNA_BOGOTA_PROJ,
            });
        }
        if !upper.contains("PROJCS") {
            // Geographic MAGNA-SIRGAS (EPSG:4686) coincides with WGS84
            // at the precision this data carries.
            return Ok(Crs::Wgs84);
        }
    }

    if !upper.contains("PROJCS")
        && (upper.contains("WGS_1984") || upper.contains("WGS 84") || upper.contains("WGS84"))
    {
        return Ok(Crs::Wgs84);
    }

    let label: String = wkt.chars().take(80).collect();
    Err(GeodataError::UnsupportedCrs(label))
}

/// Reprojects a geometry into WGS84 degrees. Geographic input passes
/// through untouched.
pub fn to_wgs84(
    geometry: &MultiPolygon<f64>,
    crs: &Crs,
) -> Result<MultiPolygon<f64>, GeodataError> {
    let Crs::Projected { proj4, name } = crs else {
        return Ok(geometry.clone());
    };
    let src =
        Proj::from_proj_string(proj4).map_err(|err| GeodataError::Projection(err.to_string()))?;
    let dst = Proj::from_proj_string(WGS84_PROJ)
        .map_err(|err| GeodataError::Projection(err.to_string()))?;

    geometry.try_map_coords(|coord| {
        let mut point = (coord.x, coord.y, 0.0);
        proj4rs::transform::transform(&src, &dst, &mut point)
            .map_err(|err| GeodataError::Projection(format!("{name}: {err}")))?;
        // Geographic output from proj4rs is in radians.
        Ok(Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    const WGS84_WKT: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

    const ORIGEN_NACIONAL_WKT: &str = r#"PROJCS["MAGNA-SIRGAS / Origen-Nacional",GEOGCS["MAGNA-SIRGAS",DATUM["Marco_Geocentrico_Nacional_de_Referencia",SPHEROID["GRS 1980",6378137,298.257222101]]],PROJECTION["Transverse_Mercator"],PARAMETER["latitude_of_origin",4],PARAMETER["central_meridian",-73],PARAMETER["scale_factor",0.9992],PARAMETER["false_easting",5000000],PARAMETER["false_northing",2000000],UNIT["metre",1]]"#;

    #[test]
    fn detects_wgs84_and_missing_prj() {
        assert_eq!(detect_crs(Some(WGS84_WKT)).unwrap(), Crs::Wgs84);
        assert_eq!(detect_crs(None).unwrap(), Crs::Wgs84);
        assert_eq!(detect_crs(Some("   ")).unwrap(), Crs::Wgs84);
    }

    #[test]
    fn detects_magna_origen_nacional() {
        let crs = detect_crs(Some(ORIGEN_NACIONAL_WKT)).unwrap();
        assert!(matches!(crs, Crs::Projected { .. }));
        assert!(crs.name().contains("9377"));
    }

    #[test]
    fn rejects_unknown_projected_crs() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 18N",GEOGCS["WGS 84"]]"#;
        let err = detect_crs(Some(wkt)).unwrap_err();
        assert!(matches!(err, GeodataError::UnsupportedCrs(_)));
    }

    #[test]
    fn reprojects_origen_nacional_to_degrees() {
        // The false origin (5_000_000, 2_000_000) is at 73°W 4°N.
        let crs = detect_crs(Some(ORIGEN_NACIONAL_WKT)).unwrap();
        let projected: MultiPolygon<f64> = MultiPolygon(vec![polygon![
            (x: 5_000_000.0, y: 2_000_000.0),
            (x: 5_010_000.0, y: 2_000_000.0),
            (x: 5_010_000.0, y: 2_010_000.0),
            (x: 5_000_000.0, y: 2_010_000.0),
        ]]);

        let wgs84 = to_wgs84(&projected, &crs).unwrap();
        let first = wgs84.0[0].exterior().0[0];
        assert!((first.x - -73.0).abs() < 1e-6, "lon was {}", first.x);
        assert!((first.y - 4.0).abs() < 1e-6, "lat was {}", first.y);
    }

    #[test]
    fn wgs84_input_passes_through() {
        let square: MultiPolygon<f64> = MultiPolygon(vec![polygon![
            (x: -73.0, y: 4.0),
            (x: -72.9, y: 4.0),
            (x: -72.9, y: 4.1),
            (x: -73.0, y: 4.1),
        ]]);
        let out = to_wgs84(&square, &Crs::Wgs84).unwrap();
        assert_eq!(out, square);
    }
}
