//! Filters: compiled predicates with rolling per-window aggregates.

use crate::monitor::expr::CompiledFilter;
use crate::schema::Record;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Default number of window slots per filter.
pub const DEFAULT_FILTER_SLOTS: usize = 256;

/// Default retention, in windows: buckets older than this behind the
/// newest observed window are reclaimed lazily on insert.
pub const DEFAULT_RETENTION_WINDOWS: u64 = 64;

/// Sizing and retention of a filter's window table.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Capacity of the open-addressed window table.
    pub slots: usize,
    /// Number of windows kept behind the newest one.
    pub retention_windows: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_FILTER_SLOTS,
            retention_windows: DEFAULT_RETENTION_WINDOWS,
        }
    }
}

/// Rolling aggregate over one time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Number of matching records.
    pub count: u64,
    /// Sum of the projected numeric values.
    pub sum: f64,
    /// Minimum projected value.
    pub min: f64,
    /// Maximum projected value.
    pub max: f64,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn merge(&mut self, value: Option<f64>) {
        self.count += 1;
        if let Some(v) = value {
            self.sum += v;
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
    }

    /// Mean of the projected values; zero for an empty aggregate.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

struct WindowSlot {
    window: u64,
    agg: Aggregate,
}

/// A registered filter: compiled predicate plus a monitor window.
///
/// `update` runs on every append from any number of threads; matching
/// records merge their numeric projection into the aggregate of the
/// window `ts / window_ms`. Slots are guarded by per-slot locks (merges
/// are short); the newest-window watermark uses the usual CAS-max loop.
pub struct Filter {
    predicate: Box<dyn CompiledFilter>,
    window_ms: u64,
    slots: Box<[Mutex<Option<WindowSlot>>]>,
    retention_windows: u64,
    latest_window: AtomicU64,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("window_ms", &self.window_ms)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl Filter {
    /// Creates a filter over `predicate` aggregating per `window_ms`
    /// window.
    pub fn new(predicate: Box<dyn CompiledFilter>, window_ms: u64, config: FilterConfig) -> Self {
        assert!(window_ms > 0, "monitor window must be non-zero");
        assert!(config.slots > 0, "filter needs at least one slot");
        Self {
            predicate,
            window_ms,
            slots: (0..config.slots)
                .map(|_| Mutex::new(None))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            retention_windows: config.retention_windows,
            latest_window: AtomicU64::new(0),
        }
    }

    /// The filter's aggregation period in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Evaluates the predicate against `record` and, on a match, merges
    /// the record's numeric projection into its window's aggregate.
    pub fn update(&self, record: &Record<'_>) {
        if !self.predicate.matches(record) {
            return;
        }
        let window = record.ts() / self.window_ms;
        self.note_window(window);
        let value = self
            .predicate
            .projection()
            .first()
            .and_then(|&ordinal| record.field(ordinal).as_f64());

        let len = self.slots.len();
        let start = window as usize % len;
        for probe in 0..len {
            let slot = &self.slots[(start + probe) % len];
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            match &mut *guard {
                state @ None => {
                    let mut agg = Aggregate::new();
                    agg.merge(value);
                    *state = Some(WindowSlot { window, agg });
                    return;
                }
                Some(s) if s.window == window => {
                    s.agg.merge(value);
                    return;
                }
                Some(s) if self.expired(s.window) => {
                    let mut agg = Aggregate::new();
                    agg.merge(value);
                    *s = WindowSlot { window, agg };
                    return;
                }
                Some(_) => {}
            }
        }
        warn!(
            "filter window table full ({} slots), dropping update for window {}",
            len, window
        );
    }

    /// Snapshot of the aggregate for `window` (a quantized timestamp,
    /// `ts / window_ms`), if it is resident.
    pub fn aggregate(&self, window: u64) -> Option<Aggregate> {
        let len = self.slots.len();
        let start = window as usize % len;
        for probe in 0..len {
            let slot = &self.slots[(start + probe) % len];
            let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                // Slots never return to empty, so an empty slot ends the
                // probe chain.
                None => return None,
                Some(s) if s.window == window => return Some(s.agg),
                Some(_) => {}
            }
        }
        None
    }

    /// Snapshot of every resident window and its aggregate, unordered.
    pub fn windows(&self) -> Vec<(u64, Aggregate)> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
                guard.as_ref().map(|s| (s.window, s.agg))
            })
            .collect()
    }

    fn expired(&self, window: u64) -> bool {
        self.latest_window
            .load(Ordering::Relaxed)
            .saturating_sub(window)
            > self.retention_windows
    }

    fn note_window(&self, window: u64) {
        let mut current = self.latest_window.load(Ordering::Relaxed);
        while window > current {
            match self.latest_window.compare_exchange_weak(
                current,
                window,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::expr::CompiledFilter;
    use crate::schema::{ColumnType, RecordBuilder, Schema, SchemaBuilder, Value};

    struct GreaterThan {
        ordinal: usize,
        threshold: f64,
        projection: Vec<usize>,
    }

    impl CompiledFilter for GreaterThan {
        fn matches(&self, record: &Record<'_>) -> bool {
            record
                .field(self.ordinal)
                .as_f64()
                .is_some_and(|v| v > self.threshold)
        }

        fn projection(&self) -> &[usize] {
            &self.projection
        }
    }

    fn schema() -> Schema {
        SchemaBuilder::new()
            .column("id", ColumnType::Int)
            .column("val", ColumnType::Double)
            .build()
            .unwrap()
    }

    fn filter(schema_val_gt: f64, window_ms: u64, config: FilterConfig) -> Filter {
        Filter::new(
            Box::new(GreaterThan {
                ordinal: 1,
                threshold: schema_val_gt,
                projection: vec![1],
            }),
            window_ms,
            config,
        )
    }

    fn record_bytes(schema: &Schema, val: f64) -> Vec<u8> {
        let mut b = RecordBuilder::new(schema);
        b.set(1, Value::Double(val)).unwrap();
        b.finish()
    }

    #[test]
    fn test_windows_bucket_by_timestamp() {
        let schema = schema();
        let f = filter(3.0, 1_000, FilterConfig::default());

        for (ts, val) in [(0u64, 2.0), (500, 3.5), (1_500, 4.0)] {
            let bytes = record_bytes(&schema, val);
            let record = schema.apply(0, &bytes, ts).unwrap();
            f.update(&record);
        }

        let w0 = f.aggregate(0).unwrap();
        assert_eq!(w0.count, 1);
        assert_eq!(w0.sum, 3.5);
        let w1 = f.aggregate(1).unwrap();
        assert_eq!(w1.count, 1);
        assert_eq!(w1.max, 4.0);
        assert!(f.aggregate(2).is_none());
    }

    #[test]
    fn test_aggregate_merges() {
        let schema = schema();
        let f = filter(0.0, 100, FilterConfig::default());
        for val in [1.0, 2.0, 3.0] {
            let bytes = record_bytes(&schema, val);
            let record = schema.apply(0, &bytes, 50).unwrap();
            f.update(&record);
        }
        let agg = f.aggregate(0).unwrap();
        assert_eq!(agg.count, 3);
        assert_eq!(agg.sum, 6.0);
        assert_eq!(agg.min, 1.0);
        assert_eq!(agg.max, 3.0);
        assert_eq!(agg.mean(), 2.0);
    }

    #[test]
    fn test_non_matching_records_are_ignored() {
        let schema = schema();
        let f = filter(10.0, 100, FilterConfig::default());
        let bytes = record_bytes(&schema, 5.0);
        let record = schema.apply(0, &bytes, 0).unwrap();
        f.update(&record);
        assert!(f.aggregate(0).is_none());
    }

    #[test]
    fn test_expired_windows_are_reclaimed() {
        let schema = schema();
        let f = filter(
            0.0,
            1,
            FilterConfig {
                slots: 2,
                retention_windows: 1,
            },
        );
        for ts in [0u64, 1] {
            let bytes = record_bytes(&schema, 1.0);
            f.update(&schema.apply(0, &bytes, ts).unwrap());
        }
        assert!(f.aggregate(0).is_some());

        // Window 100 evicts the long-expired window 0 from its slot.
        let bytes = record_bytes(&schema, 1.0);
        f.update(&schema.apply(0, &bytes, 100).unwrap());
        assert!(f.aggregate(100).is_some());
        assert!(f.aggregate(0).is_none());
    }

    #[test]
    fn test_full_table_drops_update() {
        let schema = schema();
        let f = filter(
            0.0,
            1,
            FilterConfig {
                slots: 1,
                retention_windows: 1_000,
            },
        );
        let bytes = record_bytes(&schema, 1.0);
        f.update(&schema.apply(0, &bytes, 0).unwrap());
        // Window 1 finds the single slot live and in retention.
        f.update(&schema.apply(0, &bytes, 1).unwrap());
        assert_eq!(f.aggregate(0).unwrap().count, 1);
        assert!(f.aggregate(1).is_none());
    }
}
