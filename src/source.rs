//! Line-oriented payload sources.
//!
//! A source reads one payload per line from stdin or a file on a background
//! thread and forwards each line, tagged with a protocol id, to a sink. Blank
//! lines are skipped.

use crate::error::{HubError, SourceError};
use crate::runtime::HubHandle;
use crossbeam_channel::Sender;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where payload lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    Stdin,
    File(PathBuf),
}

/// Receiver of payload lines. Returns `false` once it no longer accepts lines.
pub trait LineSink: Send + 'static {
    fn send_line(&self, protocol: &str, line: String) -> bool;
}

impl LineSink for HubHandle {
    fn send_line(&self, protocol: &str, line: String) -> bool {
        match self.send_payload(protocol, line) {
            Ok(()) => true,
            Err(HubError::Stopped) => false,
            Err(e) => {
                tracing::warn!("Could not forward payload: {}", e);
                true
            }
        }
    }
}

impl LineSink for Sender<(String, String)> {
    fn send_line(&self, protocol: &str, line: String) -> bool {
        self.send((protocol.to_string(), line)).is_ok()
    }
}

pub struct LineSource {
    protocol: String,
    input: LineInput,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl LineSource {
    pub fn new(protocol: impl Into<String>, input: LineInput) -> Self {
        Self {
            protocol: protocol.into(),
            input,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Start reading in a background thread.
    ///
    /// Returns an error if the source is already running or the input file
    /// cannot be opened.
    pub fn start<S: LineSink>(&mut self, sink: S) -> Result<(), SourceError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SourceError::AlreadyRunning);
        }

        let reader: Box<dyn BufRead + Send> = match &self.input {
            LineInput::Stdin => Box::new(BufReader::new(std::io::stdin())),
            LineInput::File(path) => Box::new(BufReader::new(File::open(path)?)),
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let protocol = self.protocol.clone();

        let handle = thread::spawn(move || {
            read_lines(reader, &protocol, &sink, &running);
            running.store(false, Ordering::SeqCst);
        });
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop reading. A read blocked on stdin ends with the next line.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if matches!(self.input, LineInput::File(_)) {
            self.join();
        }
    }

    /// Wait for the reader thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Source thread for {} panicked", self.protocol);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn read_lines(reader: Box<dyn BufRead + Send>, protocol: &str, sink: &dyn LineSink, running: &AtomicBool) {
    let mut forwarded = 0u64;
    for line in reader.lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Stopped reading {} payloads: {}", protocol, e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !sink.send_line(protocol, line.to_string()) {
            break;
        }
        forwarded += 1;
    }
    tracing::debug!("Source for {} finished after {} line(s)", protocol, forwarded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Write;

    #[test]
    fn test_file_source_forwards_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"model":"A","id":1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"model":"B","id":2}}"#).unwrap();

        let (tx, rx) = unbounded();
        let mut source = LineSource::new("rtl433", LineInput::File(file.path().to_path_buf()));
        source.start(tx).unwrap();
        source.join();

        let lines: Vec<(String, String)> = rx.try_iter().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, "rtl433");
        assert!(lines[1].1.contains("\"B\""));
        assert!(!source.is_running());
    }

    #[test]
    fn test_missing_file() {
        let (tx, _rx) = unbounded::<(String, String)>();
        let mut source = LineSource::new("rtl433", LineInput::File("/nonexistent/input".into()));
        assert!(matches!(source.start(tx), Err(SourceError::Io(_))));
        assert!(!source.is_running());
    }

    #[test]
    fn test_stops_when_sink_closes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(file, "line {i}").unwrap();
        }

        let (tx, rx) = unbounded();
        drop(rx);
        let mut source = LineSource::new("normalized", LineInput::File(file.path().to_path_buf()));
        source.start(tx).unwrap();
        source.join();
        assert!(!source.is_running());
    }
}
