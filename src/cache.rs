//! Last-known-good point snapshot persisted under the platform cache dir.

use crate::points::AggregatedPoint;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct PointCache {
    path: PathBuf,
}

impl Default for PointCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCache {
    pub fn new() -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("globetrack");
        Self {
            path: dir.join("points.json"),
        }
    }

    /// Cache rooted at an explicit directory.
    pub fn at(dir: PathBuf) -> Self {
        Self {
            path: dir.join("points.json"),
        }
    }

    /// Last cached snapshot. A missing file, read error or parse error is a
    /// plain miss.
    pub fn load(&self) -> Option<Vec<AggregatedPoint>> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(points) => Some(points),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "cache unreadable, ignoring");
                None
            }
        }
    }

    /// Overwrite the snapshot. Best-effort: a write failure is logged and
    /// otherwise ignored.
    pub fn store(&self, points: &[AggregatedPoint]) {
        let result = self
            .path
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| serde_json::to_vec(points).map_err(std::io::Error::from))
            .and_then(|bytes| fs::write(&self.path, bytes));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to cache points");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::default_points;

    #[test]
    fn round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PointCache::at(dir.path().to_path_buf());
        assert!(cache.load().is_none());

        let points = default_points();
        cache.store(&points);
        assert_eq!(cache.load().unwrap(), points);
    }

    #[test]
    fn overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PointCache::at(dir.path().to_path_buf());

        let mut points = default_points();
        cache.store(&points);
        points.truncate(2);
        cache.store(&points);
        assert_eq!(cache.load().unwrap().len(), 2);
    }

    #[test]
    fn garbage_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PointCache::at(dir.path().to_path_buf());
        fs::write(dir.path().join("points.json"), b"not json").unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn identical_snapshots_store_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PointCache::at(dir.path().to_path_buf());
        let points = default_points();

        cache.store(&points);
        let first = fs::read(dir.path().join("points.json")).unwrap();
        cache.store(&points);
        let second = fs::read(dir.path().join("points.json")).unwrap();
        assert_eq!(first, second);
    }
}
