// File: src/acquire/tail.rs

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use tracing::{debug, warn};

use crate::error::AcquireError;
use crate::parsers::{Grammar, LogRecord};

use super::{forward_line, Acquire, CycleStats};

/// How long the follower sleeps when it has caught up with the file.
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);
/// How long shutdown waits for the follower before abandoning it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Streams lines appended to a file through a background follower thread.
///
/// The follower is the queue's only producer and [`Acquire::collect`] its
/// only consumer. An empty string on the queue marks the end of the stream.
pub struct StreamingTail {
    path: PathBuf,
    queue: Arc<SegQueue<String>>,
    killed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamingTail {
    /// Opens `path`, positions at its current end and starts following it.
    ///
    /// # Errors
    ///
    /// Returns an [`AcquireError`] if the file can't be opened or the thread can't start.
    pub fn spawn(path: &Path) -> Result<Self, AcquireError> {
        Self::spawn_with_poll(path, DEFAULT_POLL)
    }

    /// Like [`StreamingTail::spawn`] with a custom idle poll interval.
    ///
    /// # Errors
    ///
    /// Returns an [`AcquireError`] if the file can't be opened or the thread can't start.
    pub fn spawn_with_poll(path: &Path, poll: Duration) -> Result<Self, AcquireError> {
        let open_err = |source| AcquireError::Open {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(open_err)?;
        file.seek(SeekFrom::End(0)).map_err(open_err)?;
        Self::follow(path, file, poll)
    }

    /// Starts the follower on an already positioned `reader`; `path` names it in logs.
    pub(crate) fn follow<R>(path: &Path, reader: R, poll: Duration) -> Result<Self, AcquireError>
    where
        R: Read + Send + 'static,
    {
        let queue = Arc::new(SegQueue::new());
        let killed = Arc::new(AtomicBool::new(false));

        let follower = Follower {
            path: path.to_path_buf(),
            reader: BufReader::new(reader),
            queue: Arc::clone(&queue),
            killed: Arc::clone(&killed),
            poll,
        };
        let handle = thread::Builder::new()
            .name("access-log-follower".into())
            .spawn(move || follower.run())
            .map_err(|source| AcquireError::Spawn { source })?;

        debug!(path = %path.display(), "following access log");
        Ok(Self {
            path: path.to_path_buf(),
            queue,
            killed,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Lines waiting to be collected.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Acquire for StreamingTail {
    fn collect(
        &mut self,
        grammar: &Grammar,
        interval: Duration,
        on_record: &mut dyn FnMut(LogRecord),
    ) -> CycleStats {
        let deadline = Instant::now() + interval;
        let mut stats = CycleStats::default();

        while Instant::now() < deadline {
            if !self.is_alive() {
                warn!(path = %self.path.display(), "log follower is not running");
                break;
            }
            // An empty queue ends the read phase; we never wait for more lines
            let Some(line) = self.queue.pop() else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            forward_line(grammar, &line, &mut stats, on_record);
        }
        stats
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.killed.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("log follower panicked");
            }
        } else {
            warn!(path = %self.path.display(), "log follower did not stop in time; abandoning it");
        }
    }
}

impl Drop for StreamingTail {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Producer side: the `tail -f` loop.
struct Follower<R> {
    path: PathBuf,
    reader: BufReader<R>,
    queue: Arc<SegQueue<String>>,
    killed: Arc<AtomicBool>,
    poll: Duration,
}

impl<R: Read> Follower<R> {
    fn run(mut self) {
        let mut pending: Vec<u8> = Vec::new();

        while !self.killed.load(Ordering::Relaxed) {
            match self.reader.read_until(b'\n', &mut pending) {
                Ok(0) => thread::sleep(self.poll),
                // Partial lines wait for their newline
                Ok(_) if pending.last() != Some(&b'\n') => {}
                Ok(_) => {
                    let line = String::from_utf8_lossy(&pending)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    pending.clear();
                    if !line.is_empty() {
                        self.queue.push(line);
                    }
                }
                Err(source) => {
                    let err = AcquireError::Read {
                        path: self.path.clone(),
                        source,
                    };
                    warn!("{err}; access log stream closed");
                    break;
                }
            }
        }
        self.queue.push(String::new());
    }
}

/// Yields `data`, then fails every read as a vanished device would.
#[cfg(test)]
pub(crate) struct FailingReader {
    data: std::io::Cursor<Vec<u8>>,
}

#[cfg(test)]
impl FailingReader {
    pub(crate) fn new(data: &str) -> Self {
        Self {
            data: std::io::Cursor::new(data.as_bytes().to_vec()),
        }
    }
}

#[cfg(test)]
impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(std::io::Error::other("device went away")),
            n => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POLL: Duration = Duration::from_millis(5);

    fn wait_for(tail: &StreamingTail, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while tail.pending() < n && Instant::now() < deadline {
            thread::sleep(POLL);
        }
    }

    #[test]
    fn only_lines_appended_after_spawn_are_collected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "GET /old 200 1").unwrap();
        file.flush().unwrap();

        let mut tail = StreamingTail::spawn_with_poll(file.path(), POLL).unwrap();
        writeln!(file, "GET /a 200 10").unwrap();
        writeln!(file, "not a request").unwrap();
        write!(file, "POST /b 500 ").unwrap();
        file.flush().unwrap();
        wait_for(&tail, 2);

        let grammar = Grammar::compile("%m %U %>s %b").unwrap();
        let mut urls = Vec::new();
        let stats = tail.collect(&grammar, Duration::from_secs(1), &mut |r| {
            urls.push(r.get("url_path").unwrap_or_default().to_string())
        });
        assert_eq!(urls, vec!["/a"]);
        assert_eq!(stats, CycleStats { lines: 2, records: 1, rejected: 1 });

        // The partial line is completed by the next write
        writeln!(file, "7").unwrap();
        file.flush().unwrap();
        wait_for(&tail, 1);
        let stats = tail.collect(&grammar, Duration::from_secs(1), &mut |r| {
            urls.push(r.get("url_path").unwrap_or_default().to_string())
        });
        assert_eq!(stats.records, 1);
        assert_eq!(urls, vec!["/a", "/b"]);

        tail.shutdown();
        assert!(!tail.is_alive());
    }

    #[test]
    fn empty_queue_ends_the_cycle_early() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut tail = StreamingTail::spawn_with_poll(file.path(), POLL).unwrap();
        let grammar = Grammar::compile("%m %U %>s %b").unwrap();

        let started = Instant::now();
        let stats = tail.collect(&grammar, Duration::from_secs(30), &mut |_| {});
        assert_eq!(stats, CycleStats::default());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stopped_follower_ends_collection() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut tail = StreamingTail::spawn_with_poll(file.path(), POLL).unwrap();
        tail.shutdown();
        assert!(!tail.is_alive());

        writeln!(file, "GET /a 200 10").unwrap();
        let grammar = Grammar::compile("%m %U %>s %b").unwrap();
        let stats = tail.collect(&grammar, Duration::from_secs(1), &mut |_| {});
        assert_eq!(stats.lines, 0);
        // A second shutdown is a no-op
        tail.shutdown();
    }

    #[test]
    fn follower_that_dies_on_a_read_error_ends_every_later_cycle() {
        let reader = FailingReader::new("GET /a 200 10\nGET /b 200 20\n");
        let mut tail = StreamingTail::follow(Path::new("broken.log"), reader, POLL).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while tail.is_alive() && Instant::now() < deadline {
            thread::sleep(POLL);
        }
        assert!(!tail.is_alive());
        // Both lines and the end-of-stream marker are still queued
        assert_eq!(tail.pending(), 3);

        let grammar = Grammar::compile("%m %U %>s %b").unwrap();
        for _ in 0..2 {
            let started = Instant::now();
            let stats = tail.collect(&grammar, Duration::from_secs(30), &mut |_| {});
            assert_eq!(stats, CycleStats::default());
            assert!(started.elapsed() < Duration::from_secs(5));
        }
        tail.shutdown();
    }

    #[test]
    fn missing_file_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = StreamingTail::spawn(&dir.path().join("missing.log")).err().unwrap();
        assert!(matches!(err, AcquireError::Open { .. }));
    }
}
