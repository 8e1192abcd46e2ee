//! Captured process output
//!
//! A spawned server's stdout and stderr are drained continuously (a full
//! pipe would stall it) and the most recent lines are kept so a failed
//! startup can explain itself.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::trace;

/// Lines kept per process by default
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 200;

/// Bounded tail of a process's output
#[derive(Clone, Debug)]
pub struct DiagnosticLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTIC_LINES)
    }
}

impl DiagnosticLog {
    /// Create a log keeping at most `capacity` lines
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Append one line, evicting the oldest when full
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Drain `reader` line by line into this log on a background task
    ///
    /// The task ends at EOF, i.e. when the process closes the stream.
    pub fn attach<R>(&self, reader: R, stream: &'static str, pid: Option<u32>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(pid, stream, "{line}");
                log.push(line);
            }
        })
    }

    /// Everything captured so far, newline-joined
    #[must_use]
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock();
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Number of lines held
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing has been captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
