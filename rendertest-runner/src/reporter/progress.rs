// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{rerun::AttemptInfo, suite::SuiteReport, test_case::TestCase};
use owo_colors::{OwoColorize, Style};
use rendertest_metadata::TestStatus;
use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};
use swrite::{SWrite, swrite};
use tracing::warn;

/// Prints a line per test attempt as tests finish, and the final summary.
///
/// Workers report concurrently; every line is written while holding a lock, so lines never
/// interleave.
pub struct ProgressReporter {
    styles: Styles,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ProgressReporter {
    /// Creates a reporter writing to `writer`.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            styles: Styles::default(),
            writer: Mutex::new(writer),
        }
    }

    /// Creates a reporter writing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Reports the end of an attempt: just the name of passing tests, the status and the summary
    /// otherwise.
    pub fn attempt_finished(&self, test: &TestCase, info: AttemptInfo) {
        let mut line = test.name().to_owned();
        if !info.status.is_ok() {
            let style = self.styles.status(info.status);
            let label = format!(
                "{:>width$}",
                info.status.label(),
                width = TestStatus::MAX_LABEL_WIDTH
            );
            swrite!(line, " {}: {}", label.style(style), test.summary());
        }
        if info.attempt > 1 {
            let attempt = format!("(attempt {}/{})", info.attempt, info.total_attempts);
            swrite!(line, " {}", attempt.style(self.styles.retry));
        }
        self.write_line(&line);
    }

    /// Reports the outcome of the whole run. `failed` is the verdict for the run.
    pub fn run_finished(&self, report: &SuiteReport, failed: bool) {
        let style = if failed {
            self.styles.fail
        } else {
            self.styles.pass
        };
        self.write_line(&report.summary_text().style(style).to_string());
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!("failed to write progress: {error}");
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    retry: Style,
    skip: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.retry = Style::new().magenta().bold();
        self.skip = Style::new().yellow().bold();
    }

    fn status(&self, status: TestStatus) -> Style {
        match status {
            TestStatus::Ok => self.pass,
            TestStatus::Unstable => self.retry,
            TestStatus::Skipped => self.skip,
            TestStatus::Failed | TestStatus::Crashed | TestStatus::TimedOut => self.fail,
        }
    }
}
