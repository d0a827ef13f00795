//! Remote visitor table over the Supabase REST (PostgREST) surface.

use crate::points::{VisitorRecord, VisitorRow};
use crate::settings::StoreSettings;
use serde::Deserialize;
use std::time::Duration;

/// Errors from the remote store. Request and decode failures are transient
/// from the coordinator's point of view: they drive the Disconnected state
/// and the next poll retries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] ureq::Error),
    #[error("response decode failed: {0}")]
    Decode(#[from] std::io::Error),
    /// Credentials absent or placeholders; permanent for this run.
    #[error("remote store not configured")]
    NotConfigured,
}

/// Newest-first probe row; `id` is selected to mirror the original query
/// shape but only the timestamp is consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentRow {
    #[allow(dead_code)]
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub timestamp: String,
}

/// Query/insert surface the coordinator needs from a backing store.
pub trait VisitorStore: Send + Sync {
    /// All rows, for a full reload-and-aggregate.
    fn fetch_all(&self) -> Result<Vec<VisitorRow>, StoreError>;

    /// Rows newer than `since`, newest first, bounded by `limit`. Doubles as
    /// the liveness probe: an `Ok` with no rows still proves the store is up.
    fn recent_since(&self, since: &str, limit: u32) -> Result<Vec<RecentRow>, StoreError>;

    /// Record one visit.
    fn insert_visit(&self, record: &VisitorRecord) -> Result<(), StoreError>;
}

/// PostgREST client for the visitors table.
#[derive(Clone)]
pub struct SupabaseStore {
    agent: ureq::Agent,
    base: String,
    anon_key: String,
    table: String,
}

impl SupabaseStore {
    /// Returns `None` for absent or placeholder credentials: the store stays
    /// disabled for the whole run instead of failing on every poll.
    pub fn from_settings(settings: &StoreSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }
        let base = settings.url.as_deref()?.trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        Some(Self {
            agent,
            base,
            anon_key: settings.anon_key.clone()?,
            table: settings.table().to_string(),
        })
    }

    fn rows_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base, self.table)
    }

    fn get(&self, url: &str) -> ureq::Request {
        self.agent
            .get(url)
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {}", self.anon_key))
    }
}

impl VisitorStore for SupabaseStore {
    fn fetch_all(&self) -> Result<Vec<VisitorRow>, StoreError> {
        let rows = self
            .get(&self.rows_url())
            .query("select", "lat,lng,city,country")
            .call()?
            .into_json()?;
        Ok(rows)
    }

    fn recent_since(&self, since: &str, limit: u32) -> Result<Vec<RecentRow>, StoreError> {
        let rows = self
            .get(&self.rows_url())
            .query("select", "id,timestamp")
            .query("timestamp", &format!("gt.{since}"))
            .query("order", "timestamp.desc")
            .query("limit", &limit.to_string())
            .call()?
            .into_json()?;
        Ok(rows)
    }

    fn insert_visit(&self, record: &VisitorRecord) -> Result<(), StoreError> {
        self.agent
            .post(&self.rows_url())
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {}", self.anon_key))
            .set("Prefer", "return=minimal")
            .send_json(record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_settings_build_no_store() {
        let s = StoreSettings {
            url: Some("YOUR_SUPABASE_URL".into()),
            anon_key: Some("YOUR_SUPABASE_ANON_KEY".into()),
            table: None,
        };
        assert!(SupabaseStore::from_settings(&s).is_none());
        assert!(SupabaseStore::from_settings(&StoreSettings::default()).is_none());
    }

    #[test]
    fn rows_url_trims_trailing_slash() {
        let s = StoreSettings {
            url: Some("https://abc.supabase.co/".into()),
            anon_key: Some("k".into()),
            table: Some("hits".into()),
        };
        let store = SupabaseStore::from_settings(&s).unwrap();
        assert_eq!(store.rows_url(), "https://abc.supabase.co/rest/v1/hits");
    }

    #[test]
    fn recent_rows_decode_without_id() {
        let rows: Vec<RecentRow> =
            serde_json::from_str(r#"[{"timestamp":"2026-01-01T00:00:00Z"}]"#).unwrap();
        assert_eq!(rows[0].timestamp, "2026-01-01T00:00:00Z");
    }
}
