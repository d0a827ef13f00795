//! Background polling task around a [`VisitorSync`].
//!
//! The coordinator moves into a worker thread that ticks at a fixed
//! interval; ticks are sequential by construction so they can never
//! overlap. Updates travel over a channel, and a shared flag mirrors
//! connectivity for the status line.

use crate::points::AggregatedPoint;
use crate::sync::{Connectivity, TickOutcome, VisitorSync};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::info;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub struct Poller {
    rx: Receiver<Vec<AggregatedPoint>>,
    stop: Arc<AtomicBool>,
    refresh: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn start(mut sync: VisitorSync, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let refresh = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(
            sync.connectivity() == Connectivity::Connected,
        ));

        let stop_flag = stop.clone();
        let refresh_flag = refresh.clone();
        let connected_flag = connected.clone();

        let handle = std::thread::spawn(move || {
            info!(interval_secs = interval.as_secs(), "visitor polling started");
            loop {
                // Sleep in slices so stop and manual refresh act promptly.
                let tick_due = Instant::now() + interval;
                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    if refresh_flag.swap(false, Ordering::Relaxed) {
                        break;
                    }
                    let now = Instant::now();
                    if now >= tick_due {
                        break;
                    }
                    std::thread::sleep(SLEEP_SLICE.min(tick_due - now));
                }
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }

                if let TickOutcome::Updated(points) = sync.tick() {
                    if tx.send(points).is_err() {
                        return;
                    }
                }
                connected_flag.store(
                    sync.connectivity() == Connectivity::Connected,
                    Ordering::Relaxed,
                );
            }
        });

        Self {
            rx,
            stop,
            refresh,
            connected,
            handle: Some(handle),
        }
    }

    /// Most recent pushed point set, skipping any the renderer missed.
    pub fn latest_update(&self) -> Option<Vec<AggregatedPoint>> {
        let mut latest = None;
        while let Ok(points) = self.rx.try_recv() {
            latest = Some(points);
        }
        latest
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Skip the remainder of the current interval.
    pub fn request_refresh(&self) {
        self.refresh.store(true, Ordering::Relaxed);
    }

    /// Cancel and wait for the worker to finish its current tick.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Signal without joining: a tick stuck in a slow request should not
        // stall teardown past its bounded timeout.
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::{row, sync_with, FakeStore};
    use std::time::Duration;

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(value) = poll() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for poller");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn pushes_updates_after_reconnection() {
        let dir = tempfile::tempdir().unwrap();
        let fake = std::sync::Arc::new(FakeStore::default());
        fake.state.lock().unwrap().fail = true;

        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        let mut poller = Poller::start(sync, Duration::from_millis(10));
        assert!(!poller.is_connected());

        {
            let mut state = fake.state.lock().unwrap();
            state.fail = false;
            state.rows = vec![row(1.0, 2.0), row(1.0, 2.0)];
        }
        let points = wait_for(|| poller.latest_update());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].visits, 2);
        wait_for(|| poller.is_connected().then_some(()));

        poller.stop();
    }

    #[test]
    fn stop_terminates_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let fake = std::sync::Arc::new(FakeStore::default());
        let mut sync = sync_with(fake, dir.path().to_path_buf());
        sync.initial_load();

        let mut poller = Poller::start(sync, Duration::from_secs(3600));
        poller.stop();
        assert!(poller.handle.is_none());
    }

    #[test]
    fn refresh_short_circuits_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let fake = std::sync::Arc::new(FakeStore::default());
        fake.state.lock().unwrap().rows = vec![row(5.0, 6.0)];

        let mut sync = sync_with(fake.clone(), dir.path().to_path_buf());
        sync.initial_load();
        let mut poller = Poller::start(sync, Duration::from_secs(3600));

        fake.state.lock().unwrap().recent = vec![crate::store::RecentRow {
            id: None,
            timestamp: "2026-08-28T12:00:00Z".into(),
        }];
        poller.request_refresh();
        let points = wait_for(|| poller.latest_update());
        assert_eq!(points.len(), 1);

        poller.stop();
    }
}
