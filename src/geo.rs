//! Geohash buckets and great-circle distance for location search.

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate cell width in km per geohash length, from 1 to 9.
const CELL_KM: [f64; 9] = [5000.0, 1250.0, 156.0, 39.1, 4.89, 1.22, 0.153, 0.0382, 0.00477];

/// Geohash of a point with `precision` characters (clamped to 1..=12).
#[must_use]
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> String {
    let precision = precision.clamp(1, 12);
    let (mut lat, mut lon) = ((-90.0_f64, 90.0_f64), (-180.0_f64, 180.0_f64));
    let mut out = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0u8;
    let mut ch = 0usize;
    while out.len() < precision {
        let (range, value) = if even { (&mut lon, longitude) } else { (&mut lat, latitude) };
        let mid = (range.0 + range.1) / 2.0;
        ch <<= 1;
        if value >= mid {
            ch |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            out.push(char::from(BASE32[ch]));
            bits = 0;
            ch = 0;
        }
    }
    out
}

/// Bounding box `(lat_min, lat_max, lon_min, lon_max)`; `None` for invalid characters.
#[must_use]
pub fn bounds(hash: &str) -> Option<(f64, f64, f64, f64)> {
    let (mut lat, mut lon) = ((-90.0_f64, 90.0_f64), (-180.0_f64, 180.0_f64));
    let mut even = true;
    for c in hash.bytes() {
        let idx = BASE32.iter().position(|b| *b == c.to_ascii_lowercase())?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1 == 1;
            let range = if even { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if bit {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }
    Some((lat.0, lat.1, lon.0, lon.1))
}

/// The up to 8 cells around `hash`, without duplicates. Cells past the poles are left out;
/// longitude wraps around.
#[must_use]
pub fn neighbors(hash: &str) -> Vec<String> {
    let Some((lat_min, lat_max, lon_min, lon_max)) = bounds(hash) else {
        return Vec::new();
    };
    let (height, width) = (lat_max - lat_min, lon_max - lon_min);
    let (lat, lon) = ((lat_min + lat_max) / 2.0, (lon_min + lon_max) / 2.0);
    let mut out: Vec<String> = Vec::with_capacity(8);
    for dy in [-1.0, 0.0, 1.0] {
        for dx in [-1.0, 0.0, 1.0] {
            if dy == 0.0 && dx == 0.0 {
                continue;
            }
            let y = lat + dy * height;
            if !(-90.0..=90.0).contains(&y) {
                continue;
            }
            let mut x = lon + dx * width;
            if x > 180.0 {
                x -= 360.0;
            } else if x < -180.0 {
                x += 360.0;
            }
            let cell = encode(y, x, hash.len());
            if cell != hash && !out.contains(&cell) {
                out.push(cell);
            }
        }
    }
    out
}

/// Longest geohash whose cells are still at least `radius_km` wide.
#[must_use]
pub fn precision_for(radius_km: f64) -> usize {
    CELL_KM
        .iter()
        .rposition(|cell| *cell >= radius_km)
        .map_or(1, |i| i + 1)
}

/// Haversine distance in km.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_points() {
        assert_eq!(encode(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(encode(37.7749, -122.4194, 5), "9q8yy");
        let (lat_min, lat_max, lon_min, lon_max) = bounds("9q8yy").unwrap();
        assert!((lat_min..=lat_max).contains(&37.7749));
        assert!((lon_min..=lon_max).contains(&-122.4194));
        assert!(bounds("9q8ya").is_none());
    }

    #[test]
    fn neighbors_surround_the_cell() {
        let around = neighbors("9q8yy");
        assert_eq!(around.len(), 8);
        assert!(around.contains(&"9q8yv".to_string()));
        assert!(around.contains(&"9q8yz".to_string()));
        assert!(!around.contains(&"9q8yy".to_string()));
    }

    #[test]
    fn distances_and_precision() {
        let d = distance_km(37.7749, -122.4194, 34.0522, -118.2437);
        assert!((d - 559.0).abs() < 5.0);
        assert_eq!(precision_for(2.0), 5);
        assert_eq!(precision_for(10_000.0), 1);
        assert_eq!(precision_for(0.1), 7);
    }
}
