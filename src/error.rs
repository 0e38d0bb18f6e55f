// File: src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failures while compiling a `LogFormat` template into a line grammar.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("Template ends with a dangling '%'.")]
    DanglingPercent,
    #[error("Unterminated '%{{' starting at byte {offset}.")]
    UnterminatedBrace { offset: usize },
    #[error("Unsupported directive '%{directive}'.")]
    UnknownDirective { directive: String },
    #[error("Directive '%{{{name}}}{directive}' needs a non-empty name.")]
    EmptyName { directive: char, name: String },
    #[error("Field '{field}' appears more than once in the template.")]
    DuplicateField { field: String },
    #[error("Template does not define any fields.")]
    NoFields,
    #[error("Failed to build line pattern: {source}")]
    Regex {
        #[source]
        source: regex::Error,
    },
}

/// Why a single log line could not become a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Line does not match the access log format.")]
    NoMatch,
    #[error("Line has no '{field}' field.")]
    MissingField { field: &'static str },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Access log '{path}' is not readable: {source}")]
    UnreadableLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Couldn't compile access log format '{template}': {source}")]
    InvalidFormat {
        template: String,
        #[source]
        source: GrammarError,
    },
    #[error("Invalid interval '{value}'.")]
    InvalidInterval { value: String },
    #[error("Interval must be > 0.")]
    IntervalZero,
    #[error("Invalid acquisition '{value}'. Use 'tail' or 'reverse'.")]
    InvalidAcquisition { value: String },
    #[error("Unknown config key: {key}.")]
    UnknownKey { key: String },
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Config '{path}' must be a flat table of key/value pairs.")]
    NotATable { path: PathBuf },
    #[error("Config key '{key}' must be a scalar value.")]
    NonScalarValue { key: String },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
}

/// Failures of the line acquisition layer (opening, reading or following the log).
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Failed to open access log '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read access log '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn log follower thread: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Metric '{instance}' has no numeric value.")]
    TypeMismatch { instance: String },
    #[error("Failed to write metric: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode metric: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}
