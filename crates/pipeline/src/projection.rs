//! Spherical Mercator (EPSG:3857) <-> WGS 84 (EPSG:4326) conversions.

use geo::MapCoords;

/// WGS 84 semi-major axis used by Pseudo-Mercator.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Project `(x, y)` metres in EPSG:3857 to `(lon, lat)` degrees.
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Project `(lon, lat)` degrees to `(x, y)` metres in EPSG:3857.
pub fn wgs84_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon.to_radians() * EARTH_RADIUS_M;
    let y = (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS_M;
    (x, y)
}

/// Reproject any geometry from EPSG:3857 to EPSG:4326.
pub fn geometry_to_wgs84<G>(geometry: &G) -> G::Output
where
    G: MapCoords<f64, f64>,
{
    geometry.map_coords(|c| {
        let (x, y) = mercator_to_wgs84(c.x, c.y);
        geo::coord! { x: x, y: y }
    })
}

/// Reproject any geometry from EPSG:4326 to EPSG:3857.
pub fn geometry_to_mercator<G>(geometry: &G) -> G::Output
where
    G: MapCoords<f64, f64>,
{
    geometry.map_coords(|c| {
        let (x, y) = wgs84_to_mercator(c.x, c.y);
        geo::coord! { x: x, y: y }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_maps_to_origin() {
        assert_eq!(mercator_to_wgs84(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn known_points() {
        let (lon, lat) = mercator_to_wgs84(20037508.342789244, 5621521.486192066);
        assert!((lon - 180.0).abs() < 1e-9, "lon {lon}");
        assert!((lat - 45.0).abs() < 1e-6, "lat {lat}");
    }

    #[test]
    fn forward_and_inverse_agree() {
        let (x, y) = wgs84_to_mercator(-73.9857, 40.7484);
        let (lon, lat) = mercator_to_wgs84(x, y);
        assert!((lon + 73.9857).abs() < 1e-9);
        assert!((lat - 40.7484).abs() < 1e-9);
    }
}
