pub mod acquire;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod logger;
pub mod metric;
pub mod normalize;
pub mod parsers;
pub mod plugin;
pub mod time;

// Re-export for easy access
pub use aggregate::Engine;
pub use config::{ConfigNode, Settings};
pub use metric::{Metric, MetricSink, MetricType};
pub use parsers::{Grammar, LogRecord};
pub use plugin::AccessLogPlugin;
