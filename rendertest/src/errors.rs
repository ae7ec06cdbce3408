// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use rendertest_metadata::RendertestExitCode;
use rendertest_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with display_to_stderr,
// which colorizes them.

/// An error that rendertest knows how to report, with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config read error")]
    ConfigReadError {
        #[from]
        err: ConfigReadError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("test suite load error")]
    SuiteLoadError {
        #[from]
        err: SuiteLoadError,
    },
    #[error("test suite prepare error")]
    SuitePrepareError {
        #[from]
        err: SuitePrepareError,
    },
    #[error("test suite run error")]
    SuiteRunError {
        #[from]
        err: SuiteRunError,
    },
    #[error("unknown pass")]
    UnknownPass { pass: String, passes: Vec<String> },
    #[error("unknown test")]
    UnknownTest { test: String, suite: Utf8PathBuf },
    #[error("report write error")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::SuitePrepareError {
                err: SuitePrepareError::Filter(_),
            } => RendertestExitCode::INVALID_PATTERN,
            Self::ConfigReadError { .. }
            | Self::ProfileNotFound { .. }
            | Self::SuiteLoadError { .. }
            | Self::SuitePrepareError { .. }
            | Self::SuiteRunError { .. }
            | Self::UnknownPass { .. }
            | Self::UnknownTest { .. } => RendertestExitCode::SETUP_ERROR,
            Self::WriteReportError { .. } | Self::WriteOutputError { .. } => {
                RendertestExitCode::WRITE_REPORT_FAILED
            }
            Self::TestRunFailed => RendertestExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::SuiteLoadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::SuitePrepareError { err } => {
                error!("{err}");
                err.source()
            }
            Self::SuiteRunError { err } => {
                error!("{err}");
                err.source()
            }
            Self::UnknownPass { pass, passes } => {
                error!(
                    "cannot update references for pass `{}` (configured passes: {})",
                    pass.style(styles.bold),
                    passes.join(", "),
                );
                None
            }
            Self::UnknownTest { test, suite } => {
                error!(
                    "test `{}` not found in `{}`",
                    test.style(styles.bold),
                    suite.style(styles.bold),
                );
                None
            }
            Self::WriteReportError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("{}", "test run failed".style(styles.error));
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
