//! User settings loaded from `<config_dir>/globetrack/config.toml`.
//!
//! ```toml
//! [store]
//! url = "https://xxxxx.supabase.co"
//! anon_key = "eyJ..."
//! table = "visitors"
//!
//! [globe]
//! interval_secs = 30
//!
//! [github]
//! username = "octocat"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub globe: GlobeSettings,
    #[serde(default)]
    pub github: GithubSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSettings {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GlobeSettings {
    pub interval_secs: Option<u64>,
    pub time_step: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GithubSettings {
    pub username: Option<String>,
    pub token: Option<String>,
}

impl StoreSettings {
    /// Placeholder credentials (or none at all) mean the store is disabled
    /// for the whole run, not retried.
    pub fn is_configured(&self) -> bool {
        let filled = |v: &Option<String>| {
            v.as_deref()
                .map(|s| !s.trim().is_empty() && !s.starts_with("YOUR_"))
                .unwrap_or(false)
        };
        filled(&self.url) && filled(&self.anon_key)
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or("visitors")
    }
}

impl Settings {
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("globetrack")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_placeholder_store_is_unconfigured() {
        let s = StoreSettings::default();
        assert!(!s.is_configured());

        let s = StoreSettings {
            url: Some("YOUR_SUPABASE_URL".into()),
            anon_key: Some("YOUR_SUPABASE_ANON_KEY".into()),
            table: None,
        };
        assert!(!s.is_configured());

        let s = StoreSettings {
            url: Some("https://abc.supabase.co".into()),
            anon_key: Some("".into()),
            table: None,
        };
        assert!(!s.is_configured());
    }

    #[test]
    fn real_credentials_are_configured() {
        let s = StoreSettings {
            url: Some("https://abc.supabase.co".into()),
            anon_key: Some("anon-key".into()),
            table: None,
        };
        assert!(s.is_configured());
        assert_eq!(s.table(), "visitors");
    }

    #[test]
    fn parses_partial_config() {
        let s: Settings = toml::from_str(
            r#"
            [store]
            url = "https://abc.supabase.co"
            anon_key = "k"
            table = "hits"

            [globe]
            interval_secs = 10
            "#,
        )
        .unwrap();
        assert!(s.store.is_configured());
        assert_eq!(s.store.table(), "hits");
        assert_eq!(s.globe.interval_secs, Some(10));
        assert!(s.github.username.is_none());
    }
}
