// File: src/config.rs

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use tracing::{error, warn};

use crate::acquire::AcquisitionKind;
use crate::error::ConfigError;
use crate::parsers::{Grammar, DEFAULT_FORMAT};
use crate::time::parse_interval;

pub const DEFAULT_NAME: &str = "access_log";
pub const DEFAULT_ACCESS_LOG: &str = "/var/log/ssl_access.log";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// One configuration entry as handed over by the host's config loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNode {
    pub key: String,
    pub value: String,
}

impl ConfigNode {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Effective options of the collector.
#[derive(Debug, Clone)]
pub struct Settings {
    pub name: String,
    pub interval: Duration,
    pub access_log: PathBuf,
    pub grammar: Grammar,
    pub acquisition: AcquisitionKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            interval: DEFAULT_INTERVAL,
            access_log: PathBuf::from(DEFAULT_ACCESS_LOG),
            grammar: default_grammar(),
            acquisition: AcquisitionKind::default(),
        }
    }
}

impl Settings {
    /// Applies `nodes` in order. Keys are case-insensitive.
    ///
    /// Nothing here is fatal: every problem is logged and returned, and the
    /// option it concerns keeps its previous value (except an unreadable log
    /// path, which is still taken since the file may appear later).
    pub fn apply(&mut self, nodes: &[ConfigNode]) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        for node in nodes {
            if let Err(err) = self.apply_one(node) {
                if is_warning(&err) {
                    warn!(plugin = %self.name, "{err}");
                } else {
                    error!(plugin = %self.name, "{err}");
                }
                problems.push(err);
            }
        }
        problems
    }

    fn apply_one(&mut self, node: &ConfigNode) -> Result<(), ConfigError> {
        let value = node.value.trim();
        match node.key.trim().to_ascii_lowercase().as_str() {
            "name" => self.name = value.to_string(),
            "interval" => self.interval = parse_interval(value)?,
            "access_log" | "accesslog" => {
                self.access_log = PathBuf::from(value);
                check_readable(&self.access_log)?;
            }
            "access_log_format" | "accesslogformat" => {
                self.grammar = Grammar::compile(value).map_err(|source| ConfigError::InvalidFormat {
                    template: value.to_string(),
                    source,
                })?;
            }
            "acquisition" => self.acquisition = value.parse()?,
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: node.key.clone(),
                })
            }
        }
        Ok(())
    }
}

static DEFAULT_GRAMMAR: LazyLock<Grammar> =
    LazyLock::new(|| Grammar::compile(DEFAULT_FORMAT).expect("Invalid default access log format"));

fn default_grammar() -> Grammar {
    DEFAULT_GRAMMAR.clone()
}

/// Unknown keys are only warned about; every other problem is a configuration error.
fn is_warning(err: &ConfigError) -> bool {
    matches!(err, ConfigError::UnknownKey { .. })
}

fn check_readable(path: &Path) -> Result<(), ConfigError> {
    std::fs::File::open(path)
        .map(drop)
        .map_err(|source| ConfigError::UnreadableLog {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads a flat `.toml` or `.json` table into config nodes.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file can't be read or parsed, or
/// contains nested values.
pub fn load_nodes(path: &Path) -> Result<Vec<ConfigNode>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => {
            let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::ParseToml {
                path: path.to_path_buf(),
                source,
            })?;
            table
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        toml::Value::String(s) => s,
                        toml::Value::Integer(n) => n.to_string(),
                        toml::Value::Float(n) => n.to_string(),
                        toml::Value::Boolean(b) => b.to_string(),
                        toml::Value::Datetime(dt) => dt.to_string(),
                        toml::Value::Array(_) | toml::Value::Table(_) => {
                            return Err(ConfigError::NonScalarValue { key })
                        }
                    };
                    Ok(ConfigNode::new(key, value))
                })
                .collect()
        }
        Some("json") => {
            let value: serde_json::Value =
                serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson {
                    path: path.to_path_buf(),
                    source,
                })?;
            let serde_json::Value::Object(map) = value else {
                return Err(ConfigError::NotATable {
                    path: path.to_path_buf(),
                });
            };
            map.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        serde_json::Value::Null
                        | serde_json::Value::Array(_)
                        | serde_json::Value::Object(_) => {
                            return Err(ConfigError::NonScalarValue { key })
                        }
                    };
                    Ok(ConfigNode::new(key, value))
                })
                .collect()
        }
        Some(ext) => Err(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        }),
        None => Err(ConfigError::MissingExtension),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_common_log_format() {
        let settings = Settings::default();
        assert_eq!(settings.name, DEFAULT_NAME);
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.access_log, PathBuf::from(DEFAULT_ACCESS_LOG));
        assert_eq!(settings.grammar.template(), DEFAULT_FORMAT);
        assert_eq!(settings.acquisition, AcquisitionKind::Tail);
        assert!(settings.grammar.has_field("request_first_line"));
    }

    #[test]
    fn keys_are_case_insensitive_and_aliased() {
        let log = tempfile::NamedTempFile::new().unwrap();
        let mut settings = Settings::default();
        let problems = settings.apply(&[
            ConfigNode::new("Name", "serverX_requests"),
            ConfigNode::new("INTERVAL", "5"),
            ConfigNode::new("AccessLog", log.path().to_string_lossy()),
            ConfigNode::new("AccessLogFormat", "%m %U %>s %b %D"),
            ConfigNode::new("acquisition", "reverse"),
        ]);

        assert!(problems.is_empty(), "{problems:?}");
        assert_eq!(settings.name, "serverX_requests");
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.access_log, log.path());
        assert!(settings.grammar.has_field("time_us"));
        assert_eq!(settings.acquisition, AcquisitionKind::Reverse);

        let problems = settings.apply(&[ConfigNode::new("access_log_format", "%m %s")]);
        assert!(problems.is_empty());
        assert_eq!(settings.grammar.template(), "%m %s");
    }

    #[test]
    fn bad_values_are_reported_and_leave_options_unchanged() {
        let mut settings = Settings::default();
        let problems = settings.apply(&[
            ConfigNode::new("access_log_format", "%m %Q"),
            ConfigNode::new("interval", "whenever"),
            ConfigNode::new("acquisition", "sideways"),
            ConfigNode::new("colour", "blue"),
            ConfigNode::new("name", "still-applied"),
        ]);

        assert_eq!(problems.len(), 4);
        assert!(matches!(problems[0], ConfigError::InvalidFormat { .. }));
        assert!(matches!(problems[1], ConfigError::InvalidInterval { .. }));
        assert!(matches!(problems[2], ConfigError::InvalidAcquisition { .. }));
        assert!(matches!(&problems[3], ConfigError::UnknownKey { key } if key == "colour"));
        assert!(problems[..3].iter().all(|p| !is_warning(p)));
        assert!(is_warning(&problems[3]));
        assert_eq!(settings.grammar.template(), DEFAULT_FORMAT);
        assert_eq!(settings.interval, DEFAULT_INTERVAL);
        assert_eq!(settings.acquisition, AcquisitionKind::Tail);
        assert_eq!(settings.name, "still-applied");
    }

    #[test]
    fn unreadable_log_is_reported_but_kept() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.log");
        let mut settings = Settings::default();
        let problems = settings.apply(&[ConfigNode::new("access_log", missing.to_string_lossy())]);

        assert!(matches!(problems.as_slice(), [ConfigError::UnreadableLog { .. }]));
        assert!(!is_warning(&problems[0]));
        assert_eq!(settings.access_log, missing);
    }

    #[test]
    fn loads_toml_and_json_tables() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("collector.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(file, "Name = \"web\"\ninterval = 10\nAccessLogFormat = '%m %U %>s %b'").unwrap();
        let nodes = load_nodes(&toml_path).unwrap();
        assert!(nodes.contains(&ConfigNode::new("Name", "web")));
        assert!(nodes.contains(&ConfigNode::new("interval", "10")));
        assert!(nodes.contains(&ConfigNode::new("AccessLogFormat", "%m %U %>s %b")));

        let json_path = dir.path().join("collector.json");
        std::fs::write(&json_path, r#"{"name": "web", "interval": 2.5}"#).unwrap();
        let nodes = load_nodes(&json_path).unwrap();
        assert!(nodes.contains(&ConfigNode::new("interval", "2.5")));

        std::fs::write(&json_path, r#"{"name": ["a"]}"#).unwrap();
        assert!(matches!(load_nodes(&json_path), Err(ConfigError::NonScalarValue { .. })));
        std::fs::write(&json_path, "[1]").unwrap();
        assert!(matches!(load_nodes(&json_path), Err(ConfigError::NotATable { .. })));

        let yaml_path = dir.path().join("collector.yaml");
        std::fs::write(&yaml_path, "name: web").unwrap();
        assert!(matches!(load_nodes(&yaml_path), Err(ConfigError::UnsupportedExtension { .. })));
    }
}
