// File: src/plugin.rs

use tracing::{debug, error, info, warn};

use crate::acquire::{Acquire, AcquisitionKind, CycleStats, ReverseScan, StreamingTail};
use crate::aggregate::Engine;
use crate::config::{ConfigNode, Settings};
use crate::error::ConfigError;
use crate::metric::MetricSink;
use crate::time::TIME_RECEIVED_FIELD;

/// Access log collector: configure once, then call [`AccessLogPlugin::read`]
/// once per interval from a single thread.
pub struct AccessLogPlugin {
    settings: Settings,
    engine: Engine,
    acquisition: Option<Box<dyn Acquire>>,
}

impl Default for AccessLogPlugin {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl AccessLogPlugin {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            engine: Engine::new(),
            acquisition: None,
        }
    }

    /// Applies configuration nodes; see [`Settings::apply`].
    ///
    /// The log path and acquisition strategy are fixed by the first `read`.
    pub fn configure(&mut self, nodes: &[ConfigNode]) -> Vec<ConfigError> {
        self.settings.apply(nodes)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Aggregation state of the last cycle.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs one collection cycle and hands every metric to `sink`.
    ///
    /// Never fails: unreadable logs, rejected lines and sink errors are logged
    /// and the cycle emits whatever it aggregated.
    pub fn read(&mut self, sink: &mut dyn MetricSink) -> CycleStats {
        self.init();

        let Self {
            settings,
            engine,
            acquisition,
        } = self;

        let stats = match acquisition {
            Some(acquisition) => acquisition.collect(&settings.grammar, settings.interval, &mut |record| {
                engine.fold(&record)
            }),
            None => CycleStats::default(),
        };
        debug!(
            plugin = %settings.name,
            lines = stats.lines,
            records = stats.records,
            rejected = stats.rejected,
            "done reading, writing metrics"
        );

        for metric in engine.flush(&settings.name) {
            if let Err(err) = sink.submit(&metric) {
                debug!(plugin = %settings.name, instance = %metric.instance, %err, "metric not submitted");
            }
        }
        stats
    }

    /// Stops the background follower, if any.
    pub fn shutdown(&mut self) {
        if let Some(acquisition) = self.acquisition.as_mut() {
            acquisition.shutdown();
        }
    }

    /// Starts acquisition on first use and clears the previous cycle.
    fn init(&mut self) {
        if self.acquisition.is_none() {
            self.acquisition = self.start_acquisition();
        }
        self.engine.reset();
    }

    fn start_acquisition(&self) -> Option<Box<dyn Acquire>> {
        let path = &self.settings.access_log;
        match self.settings.acquisition {
            AcquisitionKind::Tail => match StreamingTail::spawn(path) {
                Ok(tail) => {
                    info!(plugin = %self.settings.name, path = %path.display(), "tailing access log");
                    Some(Box::new(tail))
                }
                Err(err) => {
                    error!(plugin = %self.settings.name, "{err}");
                    None
                }
            },
            AcquisitionKind::Reverse => {
                if !self.settings.grammar.has_field(TIME_RECEIVED_FIELD) {
                    warn!(
                        plugin = %self.settings.name,
                        "access log format has no %t; reverse scans are bounded only by the last seen line"
                    );
                }
                info!(plugin = %self.settings.name, path = %path.display(), "scanning access log backward");
                Some(Box::new(ReverseScan::new(path)))
            }
        }
    }
}

impl Drop for AccessLogPlugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}
