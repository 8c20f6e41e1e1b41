//! Geospatial members (Redis GEO)

use std::collections::BTreeMap;

const EARTH_RADIUS_KM: f64 = 6371.0;
const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const GEOHASH_PRECISION: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoValue {
    points: BTreeMap<String, GeoPoint>,
}

impl GeoValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or move a member, returns true if the member is new
    pub fn add(&mut self, member: impl Into<String>, lon: f64, lat: f64) -> bool {
        self.points
            .insert(member.into(), GeoPoint { lon, lat })
            .is_none()
    }

    pub fn get(&self, member: &str) -> Option<GeoPoint> {
        self.points.get(member).copied()
    }

    /// Remove members, returns how many existed
    pub fn remove<S: AsRef<str>>(&mut self, members: &[S]) -> usize {
        members
            .iter()
            .filter(|m| self.points.remove(m.as_ref()).is_some())
            .count()
    }

    /// Great-circle distance in kilometres
    pub fn distance(&self, from: &str, to: &str) -> Option<f64> {
        let a = self.points.get(from)?;
        let b = self.points.get(to)?;
        Some(haversine(a.lon, a.lat, b.lon, b.lat))
    }

    pub fn geohash(&self, member: &str) -> Option<String> {
        self.points.get(member).map(|p| encode_geohash(p.lon, p.lat))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn size_of(&self) -> i64 {
        self.points.len() as i64 * 24 + 48
    }
}

/// Haversine distance between two lon/lat pairs, in kilometres
pub fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// 12-character base32 geohash
pub fn encode_geohash(lon: f64, lat: f64) -> String {
    let (mut min_lon, mut max_lon) = (-180.0_f64, 180.0_f64);
    let (mut min_lat, mut max_lat) = (-90.0_f64, 90.0_f64);
    let mut bits: u64 = 0;

    for i in 0..GEOHASH_PRECISION * 5 {
        bits <<= 1;
        if i % 2 == 0 {
            let mid = (min_lon + max_lon) / 2.0;
            if lon >= mid {
                bits |= 1;
                min_lon = mid;
            } else {
                max_lon = mid;
            }
        } else {
            let mid = (min_lat + max_lat) / 2.0;
            if lat >= mid {
                bits |= 1;
                min_lat = mid;
            } else {
                max_lat = mid;
            }
        }
    }

    let mut out = vec![0u8; GEOHASH_PRECISION];
    for slot in out.iter_mut().rev() {
        *slot = GEOHASH_ALPHABET[(bits & 31) as usize];
        bits >>= 5;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut geo = GeoValue::new();
        assert!(geo.add("palermo", 13.361389, 38.115556));
        assert!(!geo.add("palermo", 13.361389, 38.115556));
        assert!(geo.add("catania", 15.087269, 37.502669));

        assert_eq!(geo.len(), 2);
        assert_eq!(geo.get("palermo").unwrap().lat, 38.115556);
        assert_eq!(geo.remove(&["palermo", "nowhere"]), 1);
        assert_eq!(geo.size_of(), 24 + 48);
    }

    #[test]
    fn test_distance() {
        let mut geo = GeoValue::new();
        geo.add("palermo", 13.361389, 38.115556);
        geo.add("catania", 15.087269, 37.502669);

        let km = geo.distance("palermo", "catania").unwrap();
        assert!((km - 166.27).abs() < 0.5, "distance was {}", km);
        assert!(geo.distance("palermo", "missing").is_none());
    }

    #[test]
    fn test_geohash() {
        let mut geo = GeoValue::new();
        geo.add("palermo", 13.361389, 38.115556);
        let hash = geo.geohash("palermo").unwrap();
        assert_eq!(hash.len(), 12);
        assert!(hash.starts_with("sqc8b49rny"));
    }
}
