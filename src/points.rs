//! Visitor records and location aggregation
//!
//! Raw rows are grouped by their textual `(lat, lng)` pair exactly as the
//! remote table returns them. Two rows whose coordinates differ only in
//! rendering (`-78.6382` vs `"-78.63820"` stored as text) stay separate
//! groups; the key is never normalized numerically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Point color by visit count: busiest locations get the darkest blue.
pub const COLOR_HOT: &str = "#3b82f6"; // visits > 5
pub const COLOR_WARM: &str = "#60a5fa"; // 2 < visits <= 5
pub const COLOR_COOL: &str = "#93c5fd"; // visits <= 2

/// One tracked visit, as inserted into the remote table.
#[derive(Debug, Clone, Serialize)]
pub struct VisitorRecord {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
    pub ip: String,
    pub user_agent: String,
    pub timestamp: String,
}

/// One row of the visitor table as queried for aggregation.
///
/// Coordinates stay as raw JSON values so the grouping key reflects the
/// stored representation, not a parsed float.
#[derive(Debug, Clone, Deserialize)]
pub struct VisitorRow {
    pub lat: Value,
    pub lng: Value,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

/// Aggregated location ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
    pub visits: u32,
    pub size: f64,
    pub color: String,
}

/// Marker altitude derived from visit count. Bounded below by ~0.3 and
/// strictly increasing in `visits`.
pub fn point_size(visits: u32) -> f64 {
    (visits as f64 + 1.0).log10() * 0.5 + 0.3
}

/// Threshold palette from the original widget.
pub fn point_color(visits: u32) -> &'static str {
    if visits > 5 {
        COLOR_HOT
    } else if visits > 2 {
        COLOR_WARM
    } else {
        COLOR_COOL
    }
}

fn coord_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn coord_key(value: &Value) -> String {
    match value {
        // String coordinates keep their exact stored text.
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Group rows by raw coordinate pair and derive visual weights.
///
/// Output preserves first-seen order, so aggregating the same rows twice
/// produces identical sequences (and identical cached snapshots). An empty
/// input yields an empty output; the caller decides whether to fall back.
pub fn aggregate(rows: &[VisitorRow]) -> Vec<AggregatedPoint> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut points: Vec<AggregatedPoint> = Vec::new();

    for row in rows {
        let key = format!("{},{}", coord_key(&row.lat), coord_key(&row.lng));
        match index.get(&key) {
            Some(&i) => points[i].visits += 1,
            None => {
                index.insert(key, points.len());
                points.push(AggregatedPoint {
                    lat: coord_to_f64(&row.lat),
                    lng: coord_to_f64(&row.lng),
                    city: row.city.clone(),
                    country: row.country.clone(),
                    visits: 1,
                    size: 0.0,
                    color: String::new(),
                });
            }
        }
    }

    for p in &mut points {
        p.size = point_size(p.visits);
        p.color = point_color(p.visits).to_string();
    }

    points
}

/// Built-in point set used when neither the store nor the cache can serve
/// anything. The globe never renders empty.
pub fn default_points() -> Vec<AggregatedPoint> {
    [
        (35.7796, -78.6382, "Raleigh", "United States", 5),
        (40.7128, -74.0060, "New York", "United States", 3),
        (51.5074, -0.1278, "London", "United Kingdom", 2),
        (35.6762, 139.6503, "Tokyo", "Japan", 4),
        (52.5200, 13.4050, "Berlin", "Germany", 1),
    ]
    .into_iter()
    .map(|(lat, lng, city, country, visits)| AggregatedPoint {
        lat,
        lng,
        city: city.to_string(),
        country: country.to_string(),
        visits,
        size: point_size(visits),
        color: point_color(visits).to_string(),
    })
    .collect()
}
