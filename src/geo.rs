//! IP-based geolocation of the current client via ipapi.co.

use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const GEO_ENDPOINT: &str = "https://ipapi.co/json/";

/// Approximate location of the current client.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorLocation {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
    pub ip: String,
}

impl VisitorLocation {
    /// Raleigh, NC — used whenever the lookup fails.
    pub fn fallback() -> Self {
        Self {
            lat: 35.7796,
            lng: -78.6382,
            city: "Unknown".into(),
            country: "Unknown".into(),
            ip: "Unknown".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    latitude: f64,
    longitude: f64,
    city: Option<String>,
    country_name: Option<String>,
    ip: Option<String>,
}

impl From<GeoResponse> for VisitorLocation {
    fn from(geo: GeoResponse) -> Self {
        Self {
            lat: geo.latitude,
            lng: geo.longitude,
            city: geo.city.unwrap_or_else(|| "Unknown".into()),
            country: geo.country_name.unwrap_or_else(|| "Unknown".into()),
            ip: geo.ip.unwrap_or_else(|| "Unknown".into()),
        }
    }
}

/// Location lookup seam. The production implementation talks to ipapi.co;
/// the contract is that `locate` never fails.
pub trait Locate: Send + Sync {
    fn locate(&self) -> VisitorLocation;
}

#[derive(Clone)]
pub struct GeoLocator {
    agent: ureq::Agent,
}

impl Default for GeoLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoLocator {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        }
    }

    fn fetch(&self) -> Result<VisitorLocation, String> {
        let geo: GeoResponse = self
            .agent
            .get(GEO_ENDPOINT)
            .call()
            .map_err(|e| e.to_string())?
            .into_json()
            .map_err(|e| e.to_string())?;
        Ok(geo.into())
    }
}

impl Locate for GeoLocator {
    /// Never fails: a lookup error is logged and replaced by the fixed
    /// default location.
    fn locate(&self) -> VisitorLocation {
        match self.fetch() {
            Ok(loc) => loc,
            Err(e) => {
                warn!(error = %e, "geolocation failed, using default location");
                VisitorLocation::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ipapi_shape() {
        let geo: GeoResponse = serde_json::from_str(
            r#"{"latitude":35.7796,"longitude":-78.6382,"city":"Raleigh",
                "country_name":"United States","ip":"203.0.113.9","org":"x"}"#,
        )
        .unwrap();
        let loc = VisitorLocation::from(geo);
        assert_eq!(loc.city, "Raleigh");
        assert_eq!(loc.ip, "203.0.113.9");
    }

    #[test]
    fn missing_fields_become_unknown() {
        let geo: GeoResponse =
            serde_json::from_str(r#"{"latitude":1.0,"longitude":2.0}"#).unwrap();
        let loc = VisitorLocation::from(geo);
        assert_eq!(loc.city, "Unknown");
        assert_eq!(loc.country, "Unknown");
    }

    #[test]
    fn fallback_is_raleigh() {
        let loc = VisitorLocation::fallback();
        assert_eq!(loc.lat, 35.7796);
        assert_eq!(loc.lng, -78.6382);
    }
}
