// File: src/aggregate.rs

use std::collections::BTreeMap;

use tracing::debug;

use crate::metric::{Metric, MetricType};
use crate::normalize::normalize;
use crate::parsers::{LogRecord, STATUS_FIELD};

/// Per-request duration field (`%D`, microseconds).
pub const DURATION_FIELD: &str = "time_us";

pub fn is_duration_field(field: &str) -> bool {
    field == DURATION_FIELD
}

/// Accumulated value of one key inside a method bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Running integer sum.
    Counter(i64),
    /// Last raw value seen for a field that didn't coerce to an integer.
    Text(String),
    /// Duration samples, in arrival order.
    Samples(Vec<i64>),
}

impl FieldValue {
    /// The value a metric reports for this key, if it has a numeric one.
    pub fn metric_value(&self) -> Option<f64> {
        match self {
            FieldValue::Counter(n) => Some(*n as f64),
            FieldValue::Samples(samples) => Some(average(samples)),
            FieldValue::Text(_) => None,
        }
    }

    fn zeroed(&self) -> Self {
        match self {
            FieldValue::Samples(_) => FieldValue::Samples(Vec::new()),
            FieldValue::Counter(_) | FieldValue::Text(_) => FieldValue::Counter(0),
        }
    }
}

/// Aggregation state for one request method within a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBucket {
    count: u64,
    fields: BTreeMap<String, FieldValue>,
}

impl MethodBucket {
    /// Seeds a bucket from the first record seen for its method.
    fn seeded_from(record: &LogRecord) -> Self {
        let fields = record
            .iter()
            .filter(|(key, _)| *key != STATUS_FIELD)
            .map(|(key, _)| {
                let value = if is_duration_field(key) {
                    FieldValue::Samples(Vec::new())
                } else {
                    FieldValue::Counter(0)
                };
                (key.to_string(), value)
            })
            .collect();
        Self { count: 0, fields }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn reset(&mut self) {
        self.count = 0;
        for value in self.fields.values_mut() {
            *value = value.zeroed();
        }
    }
}

/// Global response time statistics for the current cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseTimeStats {
    /// `None` until the first sample arrives.
    min: Option<i64>,
    max: i64,
    samples: Vec<i64>,
}

impl ResponseTimeStats {
    fn record(&mut self, value: i64) {
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = self.max.max(value);
        self.samples.push(value);
    }

    /// Smallest sample, reported as `0` when the cycle saw none.
    pub fn min(&self) -> i64 {
        self.min.unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn avg(&self) -> f64 {
        average(&self.samples)
    }

    pub fn samples(&self) -> &[i64] {
        &self.samples
    }
}

/// Folds parsed records into per-method buckets and emits them as metrics.
///
/// State lives for one cycle: [`Engine::reset`] zeroes every value but keeps
/// the set of keys each method has accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    methods: BTreeMap<String, MethodBucket>,
    response_time: ResponseTimeStats,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the cycle state from one record.
    pub fn fold(&mut self, record: &LogRecord) {
        let method = record.method();
        let bucket = self
            .methods
            .entry(method.to_string())
            .or_insert_with(|| MethodBucket::seeded_from(record));

        bucket.count = bucket.count.saturating_add(1);

        // 1. Status class: "404" -> "status_4xx"
        let status = record.status();
        let class = status
            .char_indices()
            .nth(status.chars().count().saturating_sub(2))
            .map_or("", |(idx, _)| &status[..idx]);
        let class_key = format!("status_{class}xx");
        match bucket.fields.entry(class_key).or_insert(FieldValue::Counter(0)) {
            FieldValue::Counter(n) => *n = n.saturating_add(1),
            other => *other = FieldValue::Counter(1),
        }

        // 2. Every other field
        for (key, raw) in record.iter() {
            if key == STATUS_FIELD {
                continue;
            }
            let value = normalize(key, raw);
            let parsed = value.trim().parse::<i64>().ok();

            if is_duration_field(key) {
                if let Some(sample) = parsed {
                    self.response_time.record(sample);
                    if let Some(FieldValue::Samples(samples)) = bucket.fields.get_mut(key) {
                        samples.push(sample);
                    }
                }
                continue;
            }

            // Keys are fixed by the first record of the method
            let Some(slot) = bucket.fields.get_mut(key) else {
                continue;
            };
            match (slot, parsed) {
                (FieldValue::Counter(n), Some(v)) => *n = n.saturating_add(v),
                (slot, Some(v)) => *slot = FieldValue::Counter(v),
                (slot, None) => *slot = FieldValue::Text(value.into_owned()),
            }
        }
    }

    /// Finalizes the cycle into an ordered list of metrics.
    pub fn flush(&self, plugin: &str) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(4 + self.methods.len() * 4);
        let rt = &self.response_time;

        metrics.push(Metric::new(plugin, MetricType::ResponseTime, "avg", rt.avg()));
        metrics.push(Metric::new(plugin, MetricType::ResponseTime, "min", rt.min() as f64));
        metrics.push(Metric::new(plugin, MetricType::ResponseTime, "max", rt.max() as f64));
        metrics.push(Metric::new(plugin, MetricType::Count, "hits", self.hits() as f64));

        for (method, bucket) in &self.methods {
            metrics.push(Metric::new(plugin, MetricType::Count, method, bucket.count as f64));

            for (key, value) in &bucket.fields {
                let Some(kind) = route(key) else {
                    continue;
                };
                let instance = format!("{method}-{key}");
                match value.metric_value() {
                    Some(v) => metrics.push(Metric::new(plugin, kind, &instance, v)),
                    None => debug!(%instance, "skipping non-numeric value"),
                }
            }
        }
        metrics
    }

    /// Zeroes every counter and sample list for the next cycle.
    pub fn reset(&mut self) {
        for bucket in self.methods.values_mut() {
            bucket.reset();
        }
        self.response_time = ResponseTimeStats::default();
    }

    /// Total requests folded this cycle, across methods.
    pub fn hits(&self) -> u64 {
        self.methods.values().map(MethodBucket::count).sum()
    }

    pub fn bucket(&self, method: &str) -> Option<&MethodBucket> {
        self.methods.get(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn response_time(&self) -> &ResponseTimeStats {
        &self.response_time
    }
}

/// Picks the metric type for an accumulated key, or `None` if it isn't emitted.
pub fn route(key: &str) -> Option<MetricType> {
    if key.contains("bytes") {
        Some(MetricType::Bytes)
    } else if key.contains("time") && !key.contains("received") {
        Some(MetricType::ResponseTime)
    } else if key.contains("num") || key.contains("status") {
        Some(MetricType::Count)
    } else {
        None
    }
}

/// Mean of `samples`; `0` for an empty slice.
pub fn average(samples: &[i64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64
}
