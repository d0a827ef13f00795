//! VisitorSync: reconciles the rendered point set with the remote table.
//!
//! A single coordinator instance owns the connectivity flag, the change
//! cursor and the cache. It is driven from one thread at a time (the initial
//! load on the main thread, then the poller), so none of this needs locking.

use crate::cache::PointCache;
use crate::geo::{Locate, VisitorLocation};
use crate::points::{aggregate, default_points, AggregatedPoint, VisitorRecord};
use crate::settings::Settings;
use crate::store::{StoreError, SupabaseStore, VisitorStore};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Rows fetched per poll: enough to detect changes, small enough to stay a
/// cheap liveness probe.
const PROBE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

/// Result of one poll tick.
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    /// Fresh aggregated data; push it to the renderer.
    Updated(Vec<AggregatedPoint>),
    /// Nothing new (or the store is down); keep what is on screen.
    Unchanged,
}

pub struct VisitorSync {
    store: Option<Arc<dyn VisitorStore>>,
    geo: Arc<dyn Locate>,
    cache: PointCache,
    state: Connectivity,
    last_seen: String,
    track_visits: bool,
    record_task: Option<JoinHandle<()>>,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One best-effort visit: resolve a location (default on failure), insert a
/// record. Used both synchronously (`track`) and from detached tasks.
fn record_once(store: &dyn VisitorStore, geo: &dyn Locate) -> Result<VisitorLocation, StoreError> {
    let loc = geo.locate();
    let record = VisitorRecord {
        lat: loc.lat,
        lng: loc.lng,
        city: loc.city.clone(),
        country: loc.country.clone(),
        ip: loc.ip.clone(),
        user_agent: format!("globetrack/{}", env!("CARGO_PKG_VERSION")),
        timestamp: now_iso(),
    };
    store.insert_visit(&record)?;
    Ok(loc)
}

impl VisitorSync {
    pub fn new(
        store: Option<Arc<dyn VisitorStore>>,
        geo: Arc<dyn Locate>,
        cache: PointCache,
    ) -> Self {
        Self {
            store,
            geo,
            cache,
            state: Connectivity::Disconnected,
            last_seen: now_iso(),
            track_visits: true,
            record_task: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let store = SupabaseStore::from_settings(&settings.store)
            .map(|s| Arc::new(s) as Arc<dyn VisitorStore>);
        Self::new(store, Arc::new(crate::geo::GeoLocator::new()), PointCache::new())
    }

    /// Disable the opportunistic visit recording (diagnostic runs).
    pub fn tracking(mut self, enabled: bool) -> Self {
        self.track_visits = enabled;
        self
    }

    pub fn connectivity(&self) -> Connectivity {
        self.state
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Startup sequence. Always returns something renderable: live data when
    /// the store answers, cached or built-in points otherwise.
    pub fn initial_load(&mut self) -> Vec<AggregatedPoint> {
        let Some(store) = self.store.clone() else {
            info!("remote store not configured, serving fallback points");
            return self.resolve_fallback();
        };

        // Recorded in parallel with the data load; its outcome never blocks
        // or fails the startup path.
        self.spawn_record();

        match self.reload(store.as_ref()) {
            Ok(points) => {
                self.state = Connectivity::Connected;
                info!(locations = points.len(), "loaded live visitor data");
                points
            }
            Err(e) => {
                warn!(error = %e, "store unavailable at startup, serving fallback points");
                self.state = Connectivity::Disconnected;
                self.resolve_fallback()
            }
        }
    }

    /// One poll tick: a bounded newest-first query doubling as liveness
    /// probe and change detector.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(store) = self.store.clone() else {
            return TickOutcome::Unchanged;
        };

        match store.recent_since(&self.last_seen, PROBE_LIMIT) {
            Err(e) => {
                self.mark_disconnected(&e);
                TickOutcome::Unchanged
            }
            Ok(rows) => {
                let reconnected = self.state == Connectivity::Disconnected;
                if !reconnected && rows.is_empty() {
                    debug!("no new visitors since last check");
                    return TickOutcome::Unchanged;
                }

                if let Some(newest) = rows.first() {
                    self.last_seen = newest.timestamp.clone();
                }

                if reconnected {
                    self.state = Connectivity::Connected;
                    info!("store reachable again, reloading visitor data");
                    if self.track_visits {
                        self.spawn_record();
                    }
                } else {
                    info!(new = rows.len(), "new visitors detected, updating points");
                }

                match self.reload(store.as_ref()) {
                    Ok(points) => TickOutcome::Updated(points),
                    Err(e) => {
                        self.mark_disconnected(&e);
                        TickOutcome::Unchanged
                    }
                }
            }
        }
    }

    /// Cached snapshot if present and usable, else the built-in set. Never
    /// fails and never returns an empty sequence.
    pub fn resolve_fallback(&self) -> Vec<AggregatedPoint> {
        match self.cache.load() {
            Some(points) if !points.is_empty() => points,
            _ => default_points(),
        }
    }

    /// Synchronous visit recording for the `track` subcommand.
    pub fn record_visit(&self) -> Result<VisitorLocation, StoreError> {
        let Some(store) = self.store.as_ref() else {
            return Err(StoreError::NotConfigured);
        };
        record_once(store.as_ref(), self.geo.as_ref())
    }

    fn reload(&mut self, store: &dyn VisitorStore) -> Result<Vec<AggregatedPoint>, StoreError> {
        let rows = store.fetch_all()?;
        let points = aggregate(&rows);
        self.cache.store(&points);
        Ok(points)
    }

    /// Logged once per edge, not once per failed poll.
    fn mark_disconnected(&mut self, error: &StoreError) {
        if self.state == Connectivity::Connected {
            warn!(error = %error, "store unreachable, keeping last rendered points");
        } else {
            debug!(error = %error, "store still unreachable");
        }
        self.state = Connectivity::Disconnected;
    }

    /// Detached best-effort visit recording; failure only reaches the log.
    fn spawn_record(&mut self) {
        if !self.track_visits {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let geo = self.geo.clone();
        self.record_task = Some(std::thread::spawn(move || {
            match record_once(store.as_ref(), geo.as_ref()) {
                Ok(loc) => info!(city = %loc.city, country = %loc.country, "visit recorded"),
                Err(e) => warn!(error = %e, "failed to record visit"),
            }
        }));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::points::VisitorRow;
    use crate::store::RecentRow;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub fail: bool,
        pub rows: Vec<VisitorRow>,
        pub recent: Vec<RecentRow>,
        pub fetch_calls: usize,
        pub recent_calls: usize,
        pub insert_calls: usize,
    }

    /// Scripted store: flip `fail`, stage rows, count calls.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub state: Mutex<FakeState>,
    }

    fn down() -> StoreError {
        StoreError::Decode(std::io::Error::new(std::io::ErrorKind::Other, "store down"))
    }

    impl VisitorStore for FakeStore {
        fn fetch_all(&self) -> Result<Vec<VisitorRow>, StoreError> {
            let mut s = self.state.lock().unwrap();
            s.fetch_calls += 1;
            if s.fail {
                return Err(down());
            }
            Ok(s.rows.clone())
        }

        fn recent_since(&self, _since: &str, _limit: u32) -> Result<Vec<RecentRow>, StoreError> {
            let mut s = self.state.lock().unwrap();
            s.recent_calls += 1;
            if s.fail {
                return Err(down());
            }
            Ok(s.recent.clone())
        }

        fn insert_visit(&self, _record: &VisitorRecord) -> Result<(), StoreError> {
            let mut s = self.state.lock().unwrap();
            s.insert_calls += 1;
            if s.fail {
                return Err(down());
            }
            Ok(())
        }
    }

    /// Locator that never touches the network.
    pub(crate) struct FixedLocator;

    impl Locate for FixedLocator {
        fn locate(&self) -> VisitorLocation {
            VisitorLocation::fallback()
        }
    }

    pub(crate) fn row(lat: f64, lng: f64) -> VisitorRow {
        VisitorRow {
            lat: json!(lat),
            lng: json!(lng),
            city: "Raleigh".into(),
            country: "United States".into(),
        }
    }

    fn recent_row(ts: &str) -> RecentRow {
        RecentRow {
            id: None,
            timestamp: ts.into(),
        }
    }

    pub(crate) fn sync_with(
        fake: Arc<FakeStore>,
        cache_dir: std::path::PathBuf,
    ) -> VisitorSync {
        VisitorSync::new(
            Some(fake as Arc<dyn VisitorStore>),
            Arc::new(FixedLocator),
            PointCache::at(cache_dir),
        )
    }

    fn join_record(sync: &mut VisitorSync) {
        if let Some(task) = sync.record_task.take() {
            task.join().unwrap();
        }
    }

    #[test]
    fn no_store_serves_default_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = VisitorSync::new(
            None,
            Arc::new(FixedLocator),
            PointCache::at(dir.path().to_path_buf()),
        );
        let points = sync.initial_load();
        assert_eq!(points.len(), 5);
        assert_eq!(sync.connectivity(), Connectivity::Disconnected);
        assert_eq!(sync.tick(), TickOutcome::Unchanged);
    }

    #[test]
    fn startup_failure_prefers_cached_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PointCache::at(dir.path().to_path_buf());
        let snapshot = aggregate(&[row(1.0, 2.0), row(1.0, 2.0)]);
        cache.store(&snapshot);

        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().fail = true;
        let mut sync = sync_with(fake, dir.path().to_path_buf());
        assert_eq!(sync.initial_load(), snapshot);
        assert_eq!(sync.connectivity(), Connectivity::Disconnected);
    }

    #[test]
    fn startup_failure_without_cache_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().fail = true;
        let mut sync = sync_with(fake, dir.path().to_path_buf());
        assert_eq!(sync.initial_load(), default_points());
    }

    #[test]
    fn successful_startup_loads_and_caches_live_data() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().rows = vec![row(1.0, 2.0), row(3.0, 4.0), row(1.0, 2.0)];

        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        let points = sync.initial_load();
        join_record(&mut sync);

        assert_eq!(points.len(), 2);
        assert_eq!(sync.connectivity(), Connectivity::Connected);
        assert_eq!(fake.state.lock().unwrap().insert_calls, 1);
        // Cached for the next degraded startup.
        assert_eq!(sync.resolve_fallback(), points);
    }

    #[test]
    fn quiet_polls_do_not_reload() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().rows = vec![row(1.0, 2.0)];
        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        join_record(&mut sync);

        for _ in 0..3 {
            assert_eq!(sync.tick(), TickOutcome::Unchanged);
        }
        let state = fake.state.lock().unwrap();
        assert_eq!(state.fetch_calls, 1, "only the initial load fetched");
        assert_eq!(state.recent_calls, 3);
    }

    #[test]
    fn new_rows_advance_cursor_and_reload_once() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().rows = vec![row(1.0, 2.0)];
        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        join_record(&mut sync);

        fake.state.lock().unwrap().recent = vec![recent_row("2026-08-28T12:00:00Z")];
        assert!(matches!(sync.tick(), TickOutcome::Updated(_)));
        assert_eq!(sync.last_seen, "2026-08-28T12:00:00Z");
        assert_eq!(fake.state.lock().unwrap().fetch_calls, 2);

        // Same probe result again would mean the server still reports rows
        // newer than the cursor; with none staged, nothing reloads.
        fake.state.lock().unwrap().recent.clear();
        assert_eq!(sync.tick(), TickOutcome::Unchanged);
        assert_eq!(fake.state.lock().unwrap().fetch_calls, 2);
    }

    #[test]
    fn reconnection_triggers_one_reload_and_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        fake.state.lock().unwrap().fail = true;
        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        join_record(&mut sync);
        let inserts_after_startup = fake.state.lock().unwrap().insert_calls;

        // Repeated failures stay Disconnected without touching fetch_all.
        assert_eq!(sync.tick(), TickOutcome::Unchanged);
        assert_eq!(sync.tick(), TickOutcome::Unchanged);
        assert_eq!(fake.state.lock().unwrap().fetch_calls, 1);

        {
            let mut state = fake.state.lock().unwrap();
            state.fail = false;
            state.rows = vec![row(1.0, 2.0)];
        }
        assert!(matches!(sync.tick(), TickOutcome::Updated(_)));
        join_record(&mut sync);
        assert_eq!(sync.connectivity(), Connectivity::Connected);

        let state = fake.state.lock().unwrap();
        assert_eq!(state.fetch_calls, 2, "exactly one reload on reconnect");
        assert_eq!(
            state.insert_calls,
            inserts_after_startup + 1,
            "exactly one visit-record attempt on reconnect"
        );
    }

    #[test]
    fn record_failure_does_not_affect_the_machine() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        // Break the store after the load but before the record task ran; a
        // failed insert must leave the machine Connected.
        fake.state.lock().unwrap().fail = true;
        join_record(&mut sync);
        assert_eq!(sync.connectivity(), Connectivity::Connected);
    }

    #[test]
    fn reload_failure_after_probe_success_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeStore::default());
        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        join_record(&mut sync);

        // Probe succeeds (rows staged) but the full reload fails.
        struct HalfStore(Arc<FakeStore>);
        impl VisitorStore for HalfStore {
            fn fetch_all(&self) -> Result<Vec<VisitorRow>, StoreError> {
                Err(down())
            }
            fn recent_since(&self, s: &str, l: u32) -> Result<Vec<RecentRow>, StoreError> {
                self.0.recent_since(s, l)
            }
            fn insert_visit(&self, r: &VisitorRecord) -> Result<(), StoreError> {
                self.0.insert_visit(r)
            }
        }
        fake.state.lock().unwrap().recent = vec![recent_row("2026-08-28T12:00:00Z")];
        sync.store = Some(Arc::new(HalfStore(fake)));
        assert_eq!(sync.tick(), TickOutcome::Unchanged);
        assert_eq!(sync.connectivity(), Connectivity::Disconnected);
    }
}
