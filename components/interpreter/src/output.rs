//! Program output sinks
//!
//! `PRINT`, `DEPLETE` and `FORCE_TERMINATE` write lines through an
//! [`OutputSink`]. Diagnostics go through `tracing`, never through a sink.

use std::cell::RefCell;
use std::rc::Rc;

/// Destination for lines emitted by a running program
pub trait OutputSink {
    /// Write one line of program output
    fn write_line(&self, line: &str);
}

/// Sink that prints to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

/// Sink that keeps lines in memory.
///
/// Clones share the same buffer, so one handle can be given to an engine
/// while another reads the result.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl CaptureSink {
    /// Create an empty capture buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every captured line
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Captured output joined with newlines, each line terminated
    pub fn text(&self) -> String {
        self.lines
            .borrow()
            .iter()
            .map(|line| format!("{}\n", line))
            .collect()
    }
}

impl OutputSink for CaptureSink {
    fn write_line(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}
