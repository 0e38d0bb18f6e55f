// File: src/acquire/reverse.rs

use chrono::{DateTime, TimeDelta, Utc};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::AcquireError;
use crate::parsers::{Grammar, LogRecord};
use crate::time::record_timestamp;

use super::{Acquire, CycleStats};

const CHUNK_SIZE: u64 = 8 * 1024;

/// Lines of a seekable source, newest (last) first.
///
/// Reads backward in fixed-size chunks so only the tail of the file that is
/// actually consumed gets read.
pub struct ReverseLines<R> {
    reader: R,
    /// Bytes `[0, remaining)` haven't been read yet.
    remaining: u64,
    buf: Vec<u8>,
    /// No line has been split off yet.
    at_end: bool,
    done: bool,
}

impl ReverseLines<File> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let remaining = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            remaining,
            buf: Vec::new(),
            at_end: true,
            done: false,
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        let len = self.remaining.min(CHUNK_SIZE);
        self.remaining -= len;
        self.reader.seek(SeekFrom::Start(self.remaining))?;

        let mut chunk = vec![0; len as usize];
        self.reader.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&self.buf);
        self.buf = chunk;
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Some(idx) = self.buf.iter().rposition(|&b| b == b'\n') {
                let line = self.buf.split_off(idx + 1);
                self.buf.truncate(idx);
                // A trailing newline doesn't start another line
                let was_at_end = std::mem::replace(&mut self.at_end, false);
                if was_at_end && line.is_empty() {
                    continue;
                }
                return Some(Ok(decode(&line)));
            }

            if self.remaining == 0 {
                self.done = true;
                if self.buf.is_empty() && self.at_end {
                    return None;
                }
                let line = std::mem::take(&mut self.buf);
                return Some(Ok(decode(&line)));
            }

            if let Err(err) = self.fill() {
                self.done = true;
                return Some(Err(err));
            }
        }
        None
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Finds the lines written since the previous cycle by scanning the log backward.
///
/// The scan for a cycle stops at the first line older than the interval, or at
/// the end of the previous cycle, whichever comes first. The previous cycle is
/// recognized by its newest line, how often that line repeated at the end of
/// the file, and the line before that run. A fresh request that repeats the
/// newest line byte for byte is therefore still counted.
#[derive(Debug, Clone)]
pub struct ReverseScan {
    path: PathBuf,
    boundary: Option<Boundary>,
}

/// Where the previous scan found the end of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Boundary {
    newest: String,
    /// Consecutive copies of `newest` at the end of the file.
    repeats: usize,
    /// First line before that run; `None` if the run started the file.
    previous: Option<String>,
}

impl Boundary {
    /// Judges a run of `run` copies of `newest` preceded by `before` (`None`
    /// at the start of the file). Returns how many copies are new if the run
    /// ends where the last scan ended, `None` if the whole run is new.
    fn fresh_in_run(&self, run: usize, before: Option<&str>) -> Option<usize> {
        (run >= self.repeats && self.previous.as_deref() == before).then(|| run - self.repeats)
    }
}

/// Builds the boundary of the current scan from the lines it reads.
#[derive(Default)]
struct BoundaryTracker {
    boundary: Option<Boundary>,
    sealed: bool,
}

impl BoundaryTracker {
    fn observe(&mut self, line: &str) {
        if self.sealed {
            return;
        }
        match &mut self.boundary {
            Some(boundary) if boundary.newest == line => boundary.repeats += 1,
            Some(boundary) => {
                boundary.previous = Some(line.to_string());
                self.sealed = true;
            }
            None => {
                self.boundary = Some(Boundary {
                    newest: line.to_string(),
                    repeats: 1,
                    previous: None,
                })
            }
        }
    }

    fn needs_more(&self) -> bool {
        self.boundary.is_some() && !self.sealed
    }
}

enum Step {
    Continue,
    Stop,
}

/// Parse, window check and hand-off for one scan.
struct Pass<'g, 'f> {
    grammar: &'g Grammar,
    window: TimeDelta,
    now: DateTime<Utc>,
    stats: CycleStats,
    on_record: &'f mut dyn FnMut(LogRecord),
}

impl Pass<'_, '_> {
    fn take(&mut self, line: &str) -> Step {
        let record = match self.grammar.parse(line) {
            Ok(record) => record,
            Err(err) => {
                debug!(line, %err, "dropping line");
                self.stats.lines += 1;
                self.stats.rejected += 1;
                return Step::Continue;
            }
        };
        if let Some(at) = record_timestamp(&record) {
            if self.now.signed_duration_since(at) > self.window {
                debug!(%at, "line is older than the interval");
                return Step::Stop;
            }
        }
        debug!(line, "folding");
        self.stats.lines += 1;
        self.stats.records += 1;
        (self.on_record)(record);
        Step::Continue
    }

    fn take_repeated(&mut self, line: &str, count: usize) -> Step {
        for _ in 0..count {
            if let Step::Stop = self.take(line) {
                return Step::Stop;
            }
        }
        Step::Continue
    }
}

impl ReverseScan {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            boundary: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest line processed by the last scan.
    pub fn sentinel(&self) -> Option<&str> {
        self.boundary.as_ref().map(|b| b.newest.as_str())
    }

    /// Scans as of `now`.
    pub fn scan(
        &mut self,
        grammar: &Grammar,
        interval: Duration,
        now: DateTime<Utc>,
        on_record: &mut dyn FnMut(LogRecord),
    ) -> CycleStats {
        let mut lines = match ReverseLines::open(&self.path) {
            Ok(lines) => lines,
            Err(source) => {
                let err = AcquireError::Open {
                    path: self.path.clone(),
                    source,
                };
                warn!("{err}");
                return CycleStats::default();
            }
        };
        let mut pass = Pass {
            grammar,
            window: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            now,
            stats: CycleStats::default(),
            on_record,
        };
        let mut tracker = BoundaryTracker::default();

        // Copies of the last newest line seen in a row, not yet judged
        let mut run = 0;
        while let Some(line) = self.next_line(&mut lines) {
            tracker.observe(&line);
            let Some(last) = &self.boundary else {
                if let Step::Stop = pass.take(&line) {
                    break;
                }
                continue;
            };
            if line == last.newest {
                run += 1;
                continue;
            }
            if run > 0 {
                let count = std::mem::take(&mut run);
                if let Some(fresh) = last.fresh_in_run(count, Some(line.as_str())) {
                    debug!(fresh, "reached the previous cycle's newest line");
                    pass.take_repeated(&last.newest, fresh);
                    break;
                }
                if let Step::Stop = pass.take_repeated(&last.newest, count) {
                    break;
                }
            }
            if let Step::Stop = pass.take(&line) {
                break;
            }
        }

        // A run still open here reaches the start of the file
        if let Some(last) = self.boundary.as_ref().filter(|_| run > 0) {
            let fresh = last.fresh_in_run(run, None).unwrap_or(run);
            pass.take_repeated(&last.newest, fresh);
        }

        while tracker.needs_more() {
            match self.next_line(&mut lines) {
                Some(line) => tracker.observe(&line),
                None => break,
            }
        }
        if tracker.boundary.is_some() {
            self.boundary = tracker.boundary;
        }
        pass.stats
    }

    /// Next non-blank line; read errors end the scan.
    fn next_line(&self, lines: &mut ReverseLines<File>) -> Option<String> {
        for line in lines {
            match line {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => return Some(line),
                Err(source) => {
                    let err = AcquireError::Read {
                        path: self.path.clone(),
                        source,
                    };
                    warn!("{err}");
                    return None;
                }
            }
        }
        None
    }
}

impl Acquire for ReverseScan {
    fn collect(
        &mut self,
        grammar: &Grammar,
        interval: Duration,
        on_record: &mut dyn FnMut(LogRecord),
    ) -> CycleStats {
        self.scan(grammar, interval, Utc::now(), on_record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::format_clf_timestamp;
    use std::io::{Cursor, Write};

    fn collect_lines(data: &str) -> Vec<String> {
        ReverseLines::new(Cursor::new(data.as_bytes().to_vec()))
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
    }

    #[test]
    fn yields_lines_newest_first() {
        assert_eq!(collect_lines("a\nb\nc\n"), vec!["c", "b", "a"]);
        assert_eq!(collect_lines("a\nb\nc"), vec!["c", "b", "a"]);
        assert_eq!(collect_lines("a\r\nb\r\n"), vec!["b", "a"]);
        assert_eq!(collect_lines("a\n\nb\n"), vec!["b", "", "a"]);
        assert_eq!(collect_lines("\n"), vec![""]);
        assert!(collect_lines("").is_empty());
    }

    #[test]
    fn handles_lines_longer_than_a_chunk() {
        let long = "x".repeat(CHUNK_SIZE as usize * 2 + 17);
        let data = format!("first\n{long}\nlast\n");
        assert_eq!(collect_lines(&data), vec!["last".to_string(), long, "first".to_string()]);
    }

    fn line(method: &str, url: &str, at: DateTime<Utc>) -> String {
        format!("{method} {url} [{}] 200 100", format_clf_timestamp(at))
    }

    fn scan_urls(scan: &mut ReverseScan, grammar: &Grammar, now: DateTime<Utc>) -> Vec<String> {
        let mut urls = Vec::new();
        scan.scan(grammar, Duration::from_secs(10), now, &mut |r| {
            urls.push(r.get("url_path").unwrap_or_default().to_string())
        });
        urls
    }

    #[test]
    fn stops_at_the_time_window() {
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("GET", "/old", now - chrono::Duration::seconds(60))).unwrap();
        writeln!(file, "{}", line("GET", "/recent", now - chrono::Duration::seconds(5))).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "{}", line("GET", "/new", now)).unwrap();
        file.flush().unwrap();

        let mut scan = ReverseScan::new(file.path());
        let mut urls = Vec::new();
        let stats = scan.scan(&grammar, Duration::from_secs(10), now, &mut |r| {
            urls.push(r.get("url_path").unwrap_or_default().to_string())
        });

        assert_eq!(urls, vec!["/new", "/recent"]);
        assert_eq!(stats, CycleStats { lines: 3, records: 2, rejected: 1 });
        assert_eq!(scan.sentinel(), Some(line("GET", "/new", now).as_str()));
    }

    #[test]
    fn sentinel_prevents_double_counting() {
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("GET", "/a", now)).unwrap();
        writeln!(file, "{}", line("GET", "/b", now)).unwrap();
        file.flush().unwrap();

        let mut scan = ReverseScan::new(file.path());
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/b", "/a"]);

        // Nothing new: the newest line is the sentinel
        assert!(scan_urls(&mut scan, &grammar, now).is_empty());

        writeln!(file, "{}", line("POST", "/c", now)).unwrap();
        file.flush().unwrap();
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/c"]);
        assert_eq!(scan.sentinel(), Some(line("POST", "/c", now).as_str()));
    }

    #[test]
    fn identical_request_after_the_sentinel_is_counted() {
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("GET", "/a", now)).unwrap();
        writeln!(file, "{}", line("GET", "/b", now)).unwrap();
        file.flush().unwrap();

        let mut scan = ReverseScan::new(file.path());
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/b", "/a"]);

        // Same request, same second: byte-identical to the sentinel
        writeln!(file, "{}", line("GET", "/b", now)).unwrap();
        file.flush().unwrap();
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/b"]);
        assert!(scan_urls(&mut scan, &grammar, now).is_empty());

        writeln!(file, "{}", line("GET", "/b", now)).unwrap();
        writeln!(file, "{}", line("PUT", "/c", now)).unwrap();
        file.flush().unwrap();
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/c", "/b"]);
    }

    #[test]
    fn repeated_single_line_file_is_counted_once_per_append() {
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("GET", "/a", now)).unwrap();
        file.flush().unwrap();

        let mut scan = ReverseScan::new(file.path());
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/a"]);
        assert!(scan_urls(&mut scan, &grammar, now).is_empty());

        writeln!(file, "{}", line("GET", "/a", now)).unwrap();
        file.flush().unwrap();
        assert_eq!(scan_urls(&mut scan, &grammar, now), vec!["/a"]);
        assert!(scan_urls(&mut scan, &grammar, now).is_empty());
    }

    #[test]
    fn newest_line_becomes_sentinel_even_when_too_old() {
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let now = Utc::now();
        let old = line("GET", "/old", now - chrono::Duration::hours(1));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{old}").unwrap();
        file.flush().unwrap();

        let mut scan = ReverseScan::new(file.path());
        assert!(scan_urls(&mut scan, &grammar, now).is_empty());
        assert_eq!(scan.sentinel(), Some(old.as_str()));
    }

    #[test]
    fn missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let grammar = Grammar::compile("%m %U %t %>s %b").unwrap();
        let mut scan = ReverseScan::new(&dir.path().join("missing.log"));
        assert!(scan_urls(&mut scan, &grammar, Utc::now()).is_empty());
        assert_eq!(scan.sentinel(), None);
    }
}
