use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(CoreError::InvalidArea(format!(
                "non-finite coordinate ({}, {})",
                self.lat, self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoreError::InvalidArea(format!(
                "coordinate ({}, {}) out of range",
                self.lat, self.lon
            )));
        }
        Ok(())
    }
}

/// How an instance type expects its geofence payload to be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaShape {
    /// Flat list of route points.
    Points,
    /// List of polygons, each a list of vertices.
    Polygons,
}

/// Decoded coverage area of an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Area {
    Points(Vec<Coordinate>),
    Polygons(Vec<Vec<Coordinate>>),
}

impl Area {
    /// Decode and concatenate one or more stored geofence payloads.
    ///
    /// Fails on the first payload that does not match `shape`; a half-decoded
    /// area is never returned.
    pub fn decode(shape: AreaShape, payloads: &[&serde_json::Value]) -> Result<Self> {
        if payloads.is_empty() {
            return Err(CoreError::InvalidArea("no geofence payload".to_string()));
        }

        match shape {
            AreaShape::Points => {
                let mut points = Vec::new();
                for payload in payloads {
                    let decoded: Vec<Coordinate> = serde_json::from_value((*payload).clone())
                        .map_err(|e| {
                            CoreError::InvalidArea(format!("expected list of coordinates: {e}"))
                        })?;
                    for point in &decoded {
                        point.validate()?;
                    }
                    points.extend(decoded);
                }
                if points.is_empty() {
                    return Err(CoreError::InvalidArea("route has no points".to_string()));
                }
                Ok(Area::Points(points))
            }
            AreaShape::Polygons => {
                let mut polygons = Vec::new();
                for payload in payloads {
                    let decoded: Vec<Vec<Coordinate>> =
                        serde_json::from_value((*payload).clone()).map_err(|e| {
                            CoreError::InvalidArea(format!("expected list of polygons: {e}"))
                        })?;
                    for polygon in &decoded {
                        if polygon.len() < 3 {
                            return Err(CoreError::InvalidArea(format!(
                                "polygon needs at least 3 vertices, got {}",
                                polygon.len()
                            )));
                        }
                        for vertex in polygon {
                            vertex.validate()?;
                        }
                    }
                    polygons.extend(decoded);
                }
                if polygons.is_empty() {
                    return Err(CoreError::InvalidArea("area has no polygons".to_string()));
                }
                Ok(Area::Polygons(polygons))
            }
        }
    }

    pub fn shape(&self) -> AreaShape {
        match self {
            Area::Points(_) => AreaShape::Points,
            Area::Polygons(_) => AreaShape::Polygons,
        }
    }

    /// Ordered coordinates a device walks through.
    pub fn route(&self) -> Vec<Coordinate> {
        match self {
            Area::Points(points) => points.clone(),
            Area::Polygons(polygons) => polygons.iter().flatten().copied().collect(),
        }
    }

    /// Point-in-polygon test (even-odd rule). A flat route contains nothing.
    pub fn contains(&self, point: &Coordinate) -> bool {
        match self {
            Area::Points(_) => false,
            Area::Polygons(polygons) => polygons
                .iter()
                .any(|polygon| polygon_contains(polygon, point)),
        }
    }
}

fn polygon_contains(polygon: &[Coordinate], point: &Coordinate) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.lat > point.lat) != (b.lat > point.lat)
            && point.lon < (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn square() -> serde_json::Value {
        json!([[
            {"lat": 0.0, "lon": 0.0},
            {"lat": 0.0, "lon": 1.0},
            {"lat": 1.0, "lon": 1.0},
            {"lat": 1.0, "lon": 0.0}
        ]])
    }

    #[test]
    fn test_decode_points() {
        let payload = json!([{"lat": 1.5, "lon": 2.5}, {"lat": 1.6, "lon": 2.6}]);
        let area = Area::decode(AreaShape::Points, &[&payload]).unwrap();
        assert_eq!(area.route().len(), 2);
        assert_eq!(area.shape(), AreaShape::Points);
    }

    #[test]
    fn test_decode_polygons_concatenates_geofences() {
        let first = square();
        let second = square();
        let area = Area::decode(AreaShape::Polygons, &[&first, &second]).unwrap();
        match area {
            Area::Polygons(polygons) => assert_eq!(polygons.len(), 2),
            other => panic!("unexpected area {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let flat = json!([{"lat": 1.5, "lon": 2.5}]);
        assert!(matches!(
            Area::decode(AreaShape::Polygons, &[&flat]),
            Err(CoreError::InvalidArea(_))
        ));

        let nested = square();
        assert!(Area::decode(AreaShape::Points, &[&nested]).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let garbage = json!("not an area");
        assert!(Area::decode(AreaShape::Points, &[&garbage]).is_err());
        assert!(Area::decode(AreaShape::Points, &[]).is_err());

        let degenerate = json!([[{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 1.0}]]);
        assert!(Area::decode(AreaShape::Polygons, &[&degenerate]).is_err());

        let out_of_range = json!([{"lat": 91.0, "lon": 0.0}]);
        assert!(Area::decode(AreaShape::Points, &[&out_of_range]).is_err());
    }

    #[test]
    fn test_contains() {
        let payload = square();
        let area = Area::decode(AreaShape::Polygons, &[&payload]).unwrap();
        assert!(area.contains(&Coordinate::new(0.5, 0.5)));
        assert!(!area.contains(&Coordinate::new(1.5, 0.5)));

        let route = Area::Points(vec![Coordinate::new(0.5, 0.5)]);
        assert!(!route.contains(&Coordinate::new(0.5, 0.5)));
    }

    proptest! {
        #[test]
        fn property_points_outside_bounding_box_never_contained(
            lat in 1.0001f64..89.0,
            lon in -179.0f64..179.0,
        ) {
            let payload = square();
            let area = Area::decode(AreaShape::Polygons, &[&payload]).unwrap();
            prop_assert!(!area.contains(&Coordinate::new(lat, lon)));
        }
    }
}
