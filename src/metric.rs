// File: src/metric.rs

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::io::Write;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Count,
    Bytes,
    ResponseTime,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Count => "count",
            MetricType::Bytes => "bytes",
            MetricType::ResponseTime => "response_time",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished value handed to a sink: `(type, instance, value)` under a plugin name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub plugin: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
    pub instance: String,
    pub value: f64,
}

impl Metric {
    pub fn new(plugin: &str, kind: MetricType, instance: &str, value: f64) -> Self {
        Self {
            plugin: plugin.to_string(),
            kind,
            instance: instance.to_string(),
            value,
        }
    }
}

/// Receives finished metrics once per cycle. Timestamping and transport are the sink's job.
pub trait MetricSink {
    /// # Errors
    ///
    /// Returns a [`SinkError`] when the metric could not be delivered. Callers
    /// don't retry.
    fn submit(&mut self, metric: &Metric) -> Result<(), SinkError>;
}

/// Collects metrics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub metrics: Vec<Metric>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the first metric with this instance name.
    pub fn value(&self, instance: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.instance == instance)
            .map(|m| m.value)
    }

    pub fn take(&mut self) -> Vec<Metric> {
        std::mem::take(&mut self.metrics)
    }
}

impl MetricSink for MemorySink {
    fn submit(&mut self, metric: &Metric) -> Result<(), SinkError> {
        if !metric.value.is_finite() {
            return Err(SinkError::TypeMismatch {
                instance: metric.instance.clone(),
            });
        }
        self.metrics.push(metric.clone());
        Ok(())
    }
}

/// Writes metrics as text lines (`[ts] plugin/type-instance=value`) or JSON lines.
pub struct PrintSink<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }
}

impl<W: Write> MetricSink for PrintSink<W> {
    fn submit(&mut self, metric: &Metric) -> Result<(), SinkError> {
        let written = if self.json {
            let line = serde_json::to_string(metric).map_err(|source| SinkError::Encode { source })?;
            writeln!(self.out, "{line}")
        } else {
            writeln!(
                self.out,
                "[{}] {}/{}-{}={}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                metric.plugin,
                metric.kind,
                metric.instance,
                metric.value
            )
        };
        written.map_err(|source| SinkError::Io { source })
    }
}
