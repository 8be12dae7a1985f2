//! The person at the keyboard.
//!
//! Provisioning asks questions (project name, whether to retry, whether to
//! keep waiting on a stalled fetch) and shows a live progress line. The
//! binary implements this against the terminal.

use std::io;

pub trait Operator {
    /// Ask a free-form question and return the trimmed answer.
    fn ask(&mut self, question: &str) -> io::Result<String>;

    /// Ask a yes/no question.
    fn confirm(&mut self, question: &str) -> io::Result<bool>;

    /// Latest line of output from a long-running step.
    fn progress(&mut self, _line: &str) {}

    /// The long-running step is over; clear any progress display.
    fn end_progress(&mut self) {}
}
