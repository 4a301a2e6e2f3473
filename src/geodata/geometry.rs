//! Thin wrappers over `geo` for the operations the dashboard needs:
//! simplification for rendering, geodesic areas in hectares, and the
//! polygon intersection behind the traslape analysis.

use geo::{BooleanOps, BoundingRect, GeodesicArea, Intersects, MultiPolygon, Simplify};
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::GeodataError;
use crate::config::clamp_tolerance;

/// Ramer-Douglas-Peucker simplification, tolerance in degrees clamped
/// to the dashboard's slider range.
pub fn simplify(geometry: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    let tolerance = clamp_tolerance(tolerance);
    geometry.simplify(&tolerance)
}

/// Unsigned geodesic area on the WGS84 ellipsoid, in hectares.
pub fn geodesic_area_ha(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.geodesic_area_unsigned() / 10_000.0
}

/// Polygon-set intersection. The underlying overlay can panic on
/// degenerate rings, so those inputs surface as geometry errors.
pub fn intersection(
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
) -> Result<MultiPolygon<f64>, GeodataError> {
    catch_unwind(AssertUnwindSafe(|| a.intersection(b)))
        .map_err(|_| GeodataError::Geometry("polygon overlay failed on degenerate input".into()))
}

/// Cheap bounding-box test run before the full overlay.
pub fn boxes_intersect(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

/// `[min_lon, min_lat, max_lon, max_lat]` over a set of geometries.
pub fn collection_bounds<'a, I>(geometries: I) -> Option<[f64; 4]>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let mut bounds: Option<[f64; 4]> = None;
    for geometry in geometries {
        let Some(rect) = geometry.bounding_rect() else {
            continue;
        };
        let candidate = [rect.min().x, rect.min().y, rect.max().x, rect.max().y];
        bounds = Some(match bounds {
            None => candidate,
            Some(current) => [
                current[0].min(candidate[0]),
                current[1].min(candidate[1]),
                current[2].max(candidate[2]),
                current[3].max(candidate[3]),
            ],
        });
    }
    bounds
}

/// Map center as `[lat, lon]`, the midpoint of the bounds.
pub fn bounds_center(bounds: [f64; 4]) -> [f64; 2] {
    [(bounds[1] + bounds[3]) / 2.0, (bounds[0] + bounds[2]) / 2.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, CoordsIter};

    fn square(min_x: f64, min_y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: min_x, y: min_y),
            (x: min_x + size, y: min_y),
            (x: min_x + size, y: min_y + size),
            (x: min_x, y: min_y + size),
        ]])
    }

    #[test]
    fn intersection_of_overlapping_squares() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(0.5, 0.5, 1.0);
        let overlap = intersection(&a, &b).unwrap();
        assert_eq!(overlap.0.len(), 1);

        let bounds = collection_bounds(std::iter::once(&overlap)).unwrap();
        assert!((bounds[0] - 0.5).abs() < 1e-9);
        assert!((bounds[1] - 0.5).abs() < 1e-9);
        assert!((bounds[2] - 1.0).abs() < 1e-9);
        assert!((bounds[3] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_squares_do_not_intersect() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(5.0, 5.0, 1.0);
        assert!(!boxes_intersect(&a, &b));
        assert!(intersection(&a, &b).unwrap().0.is_empty());
    }

    #[test]
    fn geodesic_area_of_small_equatorial_square() {
        // 0.01° x 0.01° at the equator is roughly 1.11 km x 1.11 km.
        let area = geodesic_area_ha(&square(-73.0, 0.0, 0.01));
        assert!(area > 110.0 && area < 135.0, "area was {area}");
    }

    #[test]
    fn simplify_drops_redundant_vertices() {
        let dense = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 0.5, y: 0.000001),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]]);
        let simplified = simplify(&dense, 0.0001);
        assert!(simplified.coords_count() < dense.coords_count());
    }

    #[test]
    fn bounds_center_is_the_midpoint() {
        let center = bounds_center([-74.0, 2.0, -72.0, 4.0]);
        assert_eq!(center, [3.0, -73.0]);
    }
}
