// File: src/parsers/apache.rs

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{GrammarError, ParseError};

use super::LogRecord;

/// Default Common Log Format template.
pub const DEFAULT_FORMAT: &str = r#"%h %l %u %t "%r" %>s %b"#;

/// A compiled Apache `LogFormat` template.
///
/// Compiling turns the template into one anchored regex with a named
/// capture per directive, so matching a line is a single regex pass.
#[derive(Debug, Clone)]
pub struct Grammar {
    template: String,
    pattern: Regex,
    fields: Vec<String>,
}

impl Grammar {
    /// Compiles `template` (e.g. `%h %l %u %t "%r" %>s %b`).
    ///
    /// # Errors
    ///
    /// Returns a [`GrammarError`] for unsupported directives, malformed
    /// `%{...}` blocks, repeated fields, or a template without fields.
    pub fn compile(template: &str) -> Result<Self, GrammarError> {
        let mut pattern = String::from("^");
        let mut fields: Vec<String> = Vec::new();
        let mut chars = template.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            if c != '%' {
                pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                continue;
            }

            // 1. Optional `%{name}` argument
            let mut name = None;
            if let Some(&(_, '{')) = chars.peek() {
                chars.next();
                let mut arg = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, ch)) => arg.push(ch),
                        None => return Err(GrammarError::UnterminatedBrace { offset }),
                    }
                }
                name = Some(arg);
            }

            // 2. Optional `<` / `>` original/final request modifier
            while let Some(&(_, '<' | '>')) = chars.peek() {
                chars.next();
            }

            // 3. The directive letter itself
            let Some((_, directive)) = chars.next() else {
                return Err(GrammarError::DanglingPercent);
            };

            if directive == '%' && name.is_none() {
                pattern.push('%');
                continue;
            }

            let (field, capture) = directive_field(directive, name.as_deref())?;
            if fields.contains(&field) {
                return Err(GrammarError::DuplicateField { field });
            }
            // `%t` is written inside brackets; keep them out of the field value
            if directive == 't' && name.is_none() {
                let _ = write!(pattern, r"\[(?P<{field}>{capture})\]");
            } else {
                let _ = write!(pattern, "(?P<{field}>{capture})");
            }
            fields.push(field);
        }

        if fields.is_empty() {
            return Err(GrammarError::NoFields);
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|source| GrammarError::Regex { source })?;
        Ok(Self {
            template: template.to_string(),
            pattern,
            fields,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Field names produced by the template, in template order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Splits one raw line into field/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NoMatch`] when the line doesn't fit the template,
    /// or [`ParseError::MissingField`] when it lacks a method or status.
    pub fn parse(&self, line: &str) -> Result<LogRecord, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let caps = self.pattern.captures(line).ok_or(ParseError::NoMatch)?;

        let mut map = BTreeMap::new();
        for field in &self.fields {
            if let Some(m) = caps.name(field) {
                map.insert(field.clone(), m.as_str().to_string());
            }
        }

        // `%r` also yields the request line parts, unless set explicitly
        if let Some(first_line) = map.get("request_first_line").cloned() {
            let mut parts = first_line.split_whitespace();
            for key in ["request_method", "request_url", "request_http_ver"] {
                match parts.next() {
                    Some(part) if !map.contains_key(key) => {
                        map.insert(key.to_string(), part.to_string());
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }

        LogRecord::from_fields(map)
    }
}

/// Maps one directive to its field name and capture pattern.
fn directive_field(directive: char, name: Option<&str>) -> Result<(String, &'static str), GrammarError> {
    if let Some(name) = name {
        let prefix = match directive {
            'i' => "request_header",
            'o' => "response_header",
            'e' => "env",
            'n' => "note",
            'C' => "cookie",
            _ => {
                return Err(GrammarError::UnknownDirective {
                    directive: format!("{{{name}}}{directive}"),
                })
            }
        };
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(GrammarError::EmptyName {
                directive,
                name: name.to_string(),
            });
        }
        return Ok((format!("{prefix}_{slug}"), LAZY_ANY));
    }

    let (field, capture) = match directive {
        'a' => ("remote_ip", NON_SPACE),
        'A' => ("local_ip", NON_SPACE),
        'b' => ("response_bytes_clf", r"\d+|-"),
        'B' => ("response_bytes", DIGITS),
        'D' => ("time_us", DIGITS),
        'f' => ("filename", NON_SPACE),
        'h' => ("remote_host", NON_SPACE),
        'H' => ("protocol", NON_SPACE),
        'I' => ("bytes_rx", DIGITS),
        'k' => ("num_keepalives", DIGITS),
        'l' => ("remote_logname", NON_SPACE),
        'L' => ("log_id", NON_SPACE),
        'm' => ("request_method", NON_SPACE),
        'O' => ("bytes_tx", DIGITS),
        'p' => ("server_port", DIGITS),
        'P' => ("pid", DIGITS),
        'q' => ("query_string", r"\S*"),
        'r' => ("request_first_line", LAZY_ANY),
        's' => ("status", r"\d{3}"),
        'S' => ("bytes_combined", DIGITS),
        't' => ("time_received", r"[^\]]+"),
        'T' => ("time_s", DIGITS),
        'u' => ("remote_user", NON_SPACE),
        'U' => ("url_path", NON_SPACE),
        'v' => ("server_name", NON_SPACE),
        'V' => ("canonical_server_name", NON_SPACE),
        'X' => ("conn_status", r"[X+-]"),
        other => {
            return Err(GrammarError::UnknownDirective {
                directive: other.to_string(),
            })
        }
    };

    Ok((field.to_string(), capture))
}

// --- Helpers ---

const NON_SPACE: &str = r"\S+";
const DIGITS: &str = r"\d+";
const LAZY_ANY: &str = r".*?";

/// `User-Agent` -> `user_agent`
fn slugify(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
