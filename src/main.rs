// File: src/main.rs

use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use access_log_metrics::config::{load_nodes, ConfigNode};
use access_log_metrics::logger::init_logging;
use access_log_metrics::metric::PrintSink;
use access_log_metrics::{AccessLogPlugin, MetricSink};

/// Debug harness: runs collection cycles on a fixed interval and prints the metrics.
#[derive(Debug, Parser)]
#[clap(version, about = "Collect HTTP request metrics from an access log and print them every interval.")]
struct Args {
    /// Flat .toml or .json file with collector options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Plugin name metrics are emitted under
    #[arg(long)]
    name: Option<String>,

    /// Collection interval (seconds, or e.g. 10s, 1m)
    #[arg(long)]
    interval: Option<String>,

    /// Access log to watch
    #[arg(long = "access-log", env = "ACCESS_LOG")]
    access_log: Option<PathBuf>,

    /// Apache LogFormat template of the access log
    #[arg(long = "format")]
    format: Option<String>,

    /// Line acquisition strategy: tail or reverse
    #[arg(long)]
    acquisition: Option<String>,

    /// Stop after this many cycles (0 runs forever)
    #[arg(long, default_value_t = 0)]
    cycles: u64,

    /// Print metrics as JSON lines
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags override the config file, so they are applied after it.
    fn nodes(&self) -> Vec<ConfigNode> {
        let mut nodes = Vec::new();
        if let Some(name) = &self.name {
            nodes.push(ConfigNode::new("name", name.as_str()));
        }
        if let Some(interval) = &self.interval {
            nodes.push(ConfigNode::new("interval", interval.as_str()));
        }
        if let Some(path) = &self.access_log {
            nodes.push(ConfigNode::new("access_log", path.to_string_lossy()));
        }
        if let Some(format) = &self.format {
            nodes.push(ConfigNode::new("access_log_format", format.as_str()));
        }
        if let Some(acquisition) = &self.acquisition {
            nodes.push(ConfigNode::new("acquisition", acquisition.as_str()));
        }
        nodes
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut plugin = AccessLogPlugin::default();
    if let Some(path) = &args.config {
        match load_nodes(path) {
            Ok(nodes) => {
                plugin.configure(&nodes);
            }
            Err(err) => {
                tracing::error!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }
    plugin.configure(&args.nodes());

    let interval = plugin.settings().interval;
    let mut sink = PrintSink::new(std::io::stdout(), args.json);
    let interrupted = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupted, shutting down"),
            Err(err) => {
                tracing::warn!(%err, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };
    run_cycles(&mut plugin, &mut sink, args.cycles, interval, interrupted).await;

    plugin.shutdown();
    ExitCode::SUCCESS
}

/// Reads every `interval` until `cycles` have run (`0` means no limit) or `stop` resolves.
async fn run_cycles(
    plugin: &mut AccessLogPlugin,
    sink: &mut dyn MetricSink,
    cycles: u64,
    interval: Duration,
    stop: impl Future<Output = ()>,
) -> u64 {
    tokio::pin!(stop);
    let mut done: u64 = 0;
    loop {
        plugin.read(sink);
        done += 1;
        if cycles != 0 && done >= cycles {
            return done;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut stop => return done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_log_metrics::metric::MemorySink;
    use access_log_metrics::ConfigNode;

    fn scanning_plugin(dir: &tempfile::TempDir) -> AccessLogPlugin {
        let log = dir.path().join("access.log");
        std::fs::write(&log, "GET / 200 1\n").unwrap();
        let mut plugin = AccessLogPlugin::default();
        let problems = plugin.configure(&[
            ConfigNode::new("access_log", log.to_string_lossy()),
            ConfigNode::new("access_log_format", "%m %U %>s %b"),
            ConfigNode::new("acquisition", "reverse"),
        ]);
        assert!(problems.is_empty(), "{problems:?}");
        plugin
    }

    #[tokio::test]
    async fn unbounded_run_stops_when_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = scanning_plugin(&dir);
        let mut sink = MemorySink::new();

        let done = run_cycles(&mut plugin, &mut sink, 0, Duration::from_secs(3600), async {}).await;
        assert_eq!(done, 1);
        assert_eq!(sink.value("hits"), Some(1.0));
        plugin.shutdown();
    }

    #[tokio::test]
    async fn bounded_run_stops_after_its_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = scanning_plugin(&dir);
        let mut sink = MemorySink::new();

        let done = run_cycles(
            &mut plugin,
            &mut sink,
            3,
            Duration::from_millis(10),
            std::future::pending(),
        )
        .await;
        assert_eq!(done, 3);
        assert_eq!(sink.metrics.iter().filter(|m| m.instance == "hits").count(), 3);
    }
}
