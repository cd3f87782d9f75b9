use ahash::AHashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Counter of enforced turns, labelled by `phase`.
pub const TURNS_TOTAL: &str = "warden_turns_total";
/// Counter of recorded violations, labelled by `kind`.
pub const VIOLATIONS_TOTAL: &str = "warden_violations_total";
/// Counter of guidance requests, labelled by `outcome`.
pub const GUIDANCE_REQUESTS_TOTAL: &str = "warden_guidance_requests_total";
pub const ESCALATIONS_TOTAL: &str = "warden_escalations_total";
pub const ACTIVE_JOBS: &str = "warden_active_jobs";
pub const QUALITY_SCORE: &str = "warden_quality_score";
pub const ADVISOR_DURATION_SECONDS: &str = "warden_advisor_request_duration_seconds";

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Distribution of observed values across fixed upper-bound buckets.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// f64 sum stored as bits.
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        // Only the first matching bucket; export accumulates.
        if let Some(i) = self.buckets.iter().position(|b| value <= *b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

fn quality_score_buckets() -> Vec<f64> {
    vec![20.0, 40.0, 50.0, 60.0, 80.0, 100.0]
}

fn duration_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Sorted key=value pairs distinguishing series of one counter family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    /// `{key="value",key2="value2"}`, or empty when there are no labels.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

type CounterMap = AHashMap<(String, Labels), AtomicU64>;

/// Counters, gauges and histograms behind `RwLock`ed maps with atomic values.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<CounterMap>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector with the enforcement histograms pre-registered.
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        collector.register_histogram(QUALITY_SCORE, quality_score_buckets());
        collector.register_histogram(ADVISOR_DURATION_SECONDS, duration_buckets());
        collector
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        if let Some(c) = read(&self.counters).get(&key) {
            c.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        write(&self.counters)
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    pub fn set_gauge(&self, name: &str, value: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Register (or replace) a histogram with explicit buckets.
    pub fn register_histogram(&self, name: &str, buckets: Vec<f64>) {
        write(&self.histograms).insert(name.to_string(), Histogram::new(buckets));
    }

    /// Observe a value. Unknown histograms are created with duration buckets.
    pub fn observe(&self, name: &str, value: f64) {
        if let Some(h) = read(&self.histograms).get(name) {
            h.observe(value);
            return;
        }
        write(&self.histograms)
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(duration_buckets()))
            .observe(value);
    }

    /// `(count, sum)` of a histogram, if registered.
    pub fn histogram_totals(&self, name: &str) -> Option<(u64, f64)> {
        read(&self.histograms).get(name).map(|h| (h.count(), h.sum()))
    }

    // -- Export --------------------------------------------------------------

    /// Export all metrics in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let map = read(&self.counters);
            let mut series: Vec<(&String, &Labels, u64)> = map
                .iter()
                .map(|((name, labels), v)| (name, labels, v.load(Ordering::Relaxed)))
                .collect();
            series.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.prometheus_str().cmp(&b.1.prometheus_str())));
            let mut last: Option<&String> = None;
            for (name, labels, value) in series {
                if last != Some(name) {
                    let _ = writeln!(out, "# TYPE {} counter", name);
                    last = Some(name);
                }
                let _ = writeln!(out, "{}{} {}", name, labels.prometheus_str(), value);
            }
        }

        {
            let map = read(&self.gauges);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let _ = writeln!(out, "# TYPE {} gauge", name);
                let _ = writeln!(out, "{} {}", name, map[name].load(Ordering::Relaxed));
            }
        }

        {
            let map = read(&self.histograms);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let h = &map[name];
                let _ = writeln!(out, "# TYPE {} histogram", name);
                let mut cumulative = 0u64;
                for (i, boundary) in h.buckets.iter().enumerate() {
                    cumulative += h.counts[i].load(Ordering::Relaxed);
                    let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, boundary, cumulative);
                }
                let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, h.count());
                let _ = writeln!(out, "{}_sum {}", name, h.sum());
                let _ = writeln!(out, "{}_count {}", name, h.count());
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
