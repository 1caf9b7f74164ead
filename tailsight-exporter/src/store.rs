//! Windowed metrics stores.
//!
//! A [`RequestStore`] keeps one [`RingSeries`] per status code, latency tier
//! and traffic direction. All rings roll forward together: before every read
//! and every write the store maps the clock onto a window id and pushes one
//! zero slot per elapsed window (capped at the ring depth).
//!
//! A [`PoolStore`] keeps only the last sampled gauge pair.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tailsight_common::{LineFormat, LogEvent, PoolSample, RequestEvent};
use tracing::warn;

use crate::clock::SharedClock;
use crate::config::WindowConfig;
use crate::ring::RingSeries;

/// Pool capacity reported before the first sample arrives.
pub const DEFAULT_POOL_MAX: u64 = 50;

/// Latency classification by lower-inclusive millisecond boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyTiers {
    bounds: Vec<u64>,
    labels: Vec<String>,
}

impl LatencyTiers {
    /// Build tiers from ascending boundaries. `n` boundaries give `n + 1` tiers.
    pub fn new(bounds: Vec<u64>) -> Self {
        let labels = tier_labels(&bounds);
        Self { bounds, labels }
    }

    /// Index of the tier `duration_ms` falls into.
    pub fn classify(&self, duration_ms: u64) -> usize {
        self.bounds.partition_point(|&bound| bound <= duration_ms)
    }

    /// Tier labels, fastest first (`lt_5s`, `5s_10s`, ...).
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LatencyTiers {
    fn default() -> Self {
        Self::new(WindowConfig::default().latency_tiers_ms)
    }
}

fn tier_labels(bounds: &[u64]) -> Vec<String> {
    let Some((first, last)) = bounds.first().zip(bounds.last()) else {
        return vec!["all".to_string()];
    };

    let mut labels = Vec::with_capacity(bounds.len() + 1);
    labels.push(format!("lt_{}", duration_label(*first)));
    for pair in bounds.windows(2) {
        labels.push(format!(
            "{}_{}",
            duration_label(pair[0]),
            duration_label(pair[1])
        ));
    }
    labels.push(format!("ge_{}", duration_label(*last)));
    labels
}

fn duration_label(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

/// Traffic direction, as seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// Names one series of a [`RequestStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesRef<'a> {
    Status(&'a str),
    Latency(usize),
    Traffic(Direction),
}

/// Everything guarded by the request store lock.
#[derive(Debug)]
struct RequestWindows {
    current_window_id: i64,
    status: BTreeMap<String, RingSeries>,
    latency: Vec<RingSeries>,
    upload: RingSeries,
    download: RingSeries,
    requests_total: u64,
    dropped_status_codes: u64,
    limit_reported: bool,
}

impl RequestWindows {
    fn advance(&mut self, steps: usize) {
        self.status
            .values_mut()
            .chain(self.latency.iter_mut())
            .chain([&mut self.upload, &mut self.download])
            .for_each(|series| series.advance(steps));
    }
}

/// Sliding-window aggregator for request events.
pub struct RequestStore {
    inner: Mutex<RequestWindows>,
    clock: SharedClock,
    window_ms: i64,
    depth: usize,
    tiers: LatencyTiers,
    known_status_codes: Vec<String>,
    max_status_codes: usize,
}

impl RequestStore {
    pub fn new(config: &WindowConfig, clock: SharedClock) -> Self {
        let window_ms =
            i64::try_from(config.size_secs.max(1).saturating_mul(1000)).unwrap_or(i64::MAX);
        let depth = config.depth.max(1);
        let tiers = LatencyTiers::new(config.latency_tiers_ms.clone());
        let current_window_id = clock.now_millis().div_euclid(window_ms);

        let inner = RequestWindows {
            current_window_id,
            status: BTreeMap::new(),
            latency: (0..tiers.len()).map(|_| RingSeries::new(depth)).collect(),
            upload: RingSeries::new(depth),
            download: RingSeries::new(depth),
            requests_total: 0,
            dropped_status_codes: 0,
            limit_reported: false,
        };

        Self {
            inner: Mutex::new(inner),
            clock,
            window_ms,
            depth,
            tiers,
            known_status_codes: config.known_status_codes.clone(),
            max_status_codes: config.max_status_codes,
        }
    }

    /// Count one request in the current window.
    pub fn record(&self, event: &RequestEvent) {
        let now = self.clock.now_millis();
        let mut windows = self.inner.lock();
        self.sync_window(&mut windows, now);

        let status = &event.status_code;
        if let Some(series) = windows.status.get_mut(status) {
            series.add(1);
        } else if windows.status.len() < self.max_status_codes {
            let mut series = RingSeries::new(self.depth);
            series.add(1);
            windows.status.insert(status.clone(), series);
        } else {
            windows.dropped_status_codes += 1;
            if !windows.limit_reported {
                warn!(
                    status = %status,
                    limit = self.max_status_codes,
                    "Status code limit reached, new codes will not be tracked"
                );
                windows.limit_reported = true;
            }
        }

        let tier = self.tiers.classify(event.duration_ms);
        windows.latency[tier].add(1);
        windows.upload.add(event.upload_bytes);
        windows.download.add(event.download_bytes);
        windows.requests_total = windows.requests_total.saturating_add(1);
    }

    /// Read the newest window of every series.
    pub fn snapshot(&self) -> RequestSnapshot {
        let now = self.clock.now_millis();
        let mut windows = self.inner.lock();
        self.sync_window(&mut windows, now);

        let mut status: BTreeMap<String, u64> = self
            .known_status_codes
            .iter()
            .map(|code| (code.clone(), 0))
            .collect();
        for (code, series) in &windows.status {
            status.insert(code.clone(), series.newest());
        }

        let latency: Vec<(String, u64)> = self
            .tiers
            .labels()
            .iter()
            .zip(&windows.latency)
            .map(|(label, series)| (label.clone(), series.newest()))
            .collect();
        let requests_in_window = latency
            .iter()
            .fold(0u64, |sum, (_, count)| sum.saturating_add(*count));

        RequestSnapshot {
            status,
            latency,
            upload_bytes: windows.upload.newest(),
            download_bytes: windows.download.newest(),
            requests_in_window,
            requests_total: windows.requests_total,
            dropped_status_codes: windows.dropped_status_codes,
            window_secs: self.window_secs(),
            window_id: windows.current_window_id,
            taken_at_millis: now,
        }
    }

    /// Full ring of one series, oldest first. `None` for unseen keys.
    pub fn history(&self, series: SeriesRef<'_>) -> Option<Vec<u64>> {
        let now = self.clock.now_millis();
        let mut windows = self.inner.lock();
        self.sync_window(&mut windows, now);

        match series {
            SeriesRef::Status(code) => windows.status.get(code).map(RingSeries::slots),
            SeriesRef::Latency(tier) => windows.latency.get(tier).map(RingSeries::slots),
            SeriesRef::Traffic(Direction::Upload) => Some(windows.upload.slots()),
            SeriesRef::Traffic(Direction::Download) => Some(windows.download.slots()),
        }
    }

    pub fn current_window_id(&self) -> i64 {
        let now = self.clock.now_millis();
        let mut windows = self.inner.lock();
        self.sync_window(&mut windows, now);
        windows.current_window_id
    }

    pub fn window_secs(&self) -> u64 {
        (self.window_ms / 1000) as u64
    }

    pub fn tiers(&self) -> &LatencyTiers {
        &self.tiers
    }

    fn sync_window(&self, windows: &mut RequestWindows, now_millis: i64) {
        let now_window_id = now_millis.div_euclid(self.window_ms);
        let gap = now_window_id - windows.current_window_id;
        if gap <= 0 {
            return;
        }

        let steps = usize::try_from(gap).unwrap_or(usize::MAX).min(self.depth);
        windows.advance(steps);
        windows.current_window_id = now_window_id;
    }
}

/// Newest-window view of a [`RequestStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// Requests per status code, known codes included at 0.
    pub status: BTreeMap<String, u64>,
    /// Requests per latency tier, fastest first.
    pub latency: Vec<(String, u64)>,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub requests_in_window: u64,
    pub requests_total: u64,
    pub dropped_status_codes: u64,
    pub window_secs: u64,
    pub window_id: i64,
    pub taken_at_millis: i64,
}

/// Everything guarded by the pool store lock.
#[derive(Debug)]
struct PoolState {
    current: u64,
    max: u64,
    last_updated_millis: Option<i64>,
    samples_total: u64,
}

/// Last known connection pool occupancy.
pub struct PoolStore {
    inner: Mutex<PoolState>,
    clock: SharedClock,
}

impl PoolStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(PoolState {
                current: 0,
                max: DEFAULT_POOL_MAX,
                last_updated_millis: None,
                samples_total: 0,
            }),
            clock,
        }
    }

    /// Replace the gauge pair with a fresh sample.
    pub fn record(&self, sample: PoolSample) {
        let now = self.clock.now_millis();
        let mut state = self.inner.lock();
        state.current = sample.current;
        state.max = sample.max;
        state.last_updated_millis = Some(now);
        state.samples_total = state.samples_total.saturating_add(1);
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let now = self.clock.now_millis();
        let state = self.inner.lock();
        PoolSnapshot {
            current: state.current,
            max: state.max,
            last_updated_millis: state.last_updated_millis,
            samples_total: state.samples_total,
            taken_at_millis: now,
        }
    }
}

/// Point-in-time view of a [`PoolStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub current: u64,
    pub max: u64,
    pub last_updated_millis: Option<i64>,
    pub samples_total: u64,
    pub taken_at_millis: i64,
}

impl PoolSnapshot {
    /// Share of the pool in use, 0 to 100. Zero when the capacity is zero.
    pub fn usage_percentage(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.current as f64 / self.max as f64 * 100.0
        }
    }

    /// Free connections. Negative when the pool is over-allocated.
    pub fn available(&self) -> i64 {
        let available = self.max as i128 - self.current as i128;
        available.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

/// The store behind one source, chosen by its line format.
pub enum MetricsStore {
    Request(RequestStore),
    Pool(PoolStore),
}

impl MetricsStore {
    pub fn for_format(format: LineFormat, window: &WindowConfig, clock: SharedClock) -> Self {
        match format {
            LineFormat::Request => MetricsStore::Request(RequestStore::new(window, clock)),
            LineFormat::Pool => MetricsStore::Pool(PoolStore::new(clock)),
        }
    }

    /// Apply an event. Returns `false` if the event does not belong to this store.
    pub fn apply(&self, event: &LogEvent) -> bool {
        match (self, event) {
            (MetricsStore::Request(store), LogEvent::Request(request)) => {
                store.record(request);
                true
            }
            (MetricsStore::Pool(store), LogEvent::PoolSample(sample)) => {
                store.record(*sample);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        match self {
            MetricsStore::Request(store) => StoreSnapshot::Request(store.snapshot()),
            MetricsStore::Pool(store) => StoreSnapshot::Pool(store.snapshot()),
        }
    }
}

/// Snapshot of either store kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreSnapshot {
    Request(RequestSnapshot),
    Pool(PoolSnapshot),
}
