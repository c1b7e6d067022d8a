use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use tracing::{info, warn};

use crate::models::event::Location;

/// Optional GeoIP enrichment over a MaxMind city database.
///
/// The database is loaded once at startup; when it is absent or a lookup
/// fails for any reason, the Unknown default location is returned and the
/// pipeline carries on.
pub struct GeoIpLookup {
    city_reader: Option<maxminddb::Reader<Vec<u8>>>,
}

#[derive(serde::Deserialize, Debug)]
struct GeoIpCity {
    city: Option<NamedRecord>,
    country: Option<NamedRecord>,
    location: Option<LocationRecord>,
}

#[derive(serde::Deserialize, Debug)]
struct NamedRecord {
    names: Option<HashMap<String, String>>,
}

#[derive(serde::Deserialize, Debug)]
struct LocationRecord {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl GeoIpLookup {
    pub fn new(city_db: &str) -> Self {
        let city_reader = if Path::new(city_db).exists() {
            match maxminddb::Reader::open_readfile(city_db) {
                Ok(reader) => {
                    info!(path = city_db, "GeoIP city database loaded successfully");
                    Some(reader)
                }
                Err(e) => {
                    warn!(path = city_db, error = %e, "Failed to load GeoIP city database");
                    None
                }
            }
        } else {
            warn!(
                path = city_db,
                "GeoIP city database file not found; locations will be Unknown"
            );
            None
        };

        Self { city_reader }
    }

    /// A lookup instance with no database, for tests and degraded setups.
    pub fn disabled() -> Self {
        Self { city_reader: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Resolve the location for `ip`, falling back to the Unknown default
    /// on every failure path.
    pub fn lookup(&self, ip: IpAddr) -> Location {
        let Some(reader) = self.city_reader.as_ref() else {
            return Location::default();
        };

        match reader.lookup::<GeoIpCity>(ip) {
            Ok(record) => {
                let english = |named: Option<NamedRecord>| {
                    named
                        .and_then(|n| n.names)
                        .and_then(|names| names.get("en").cloned())
                        .unwrap_or_else(|| "Unknown".to_string())
                };
                let (latitude, longitude) = record
                    .location
                    .map(|l| (l.latitude.unwrap_or(0.0), l.longitude.unwrap_or(0.0)))
                    .unwrap_or((0.0, 0.0));
                Location {
                    country: english(record.country),
                    city: english(record.city),
                    latitude,
                    longitude,
                }
            }
            Err(e) => {
                if !matches!(e, maxminddb::MaxMindDBError::AddressNotFoundError(_)) {
                    warn!(ip = %ip, error = %e, "GeoIP lookup error");
                }
                Location::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_lookup_returns_unknown() {
        let geoip = GeoIpLookup::disabled();
        assert!(!geoip.is_enabled());
        let loc = geoip.lookup("203.0.113.5".parse().unwrap());
        assert_eq!(loc, Location::default());
    }

    #[test]
    fn test_missing_database_degrades() {
        let geoip = GeoIpLookup::new("/nonexistent/GeoLite2-City.mmdb");
        assert!(!geoip.is_enabled());
        assert_eq!(geoip.lookup("10.0.0.1".parse().unwrap()), Location::default());
    }
}
