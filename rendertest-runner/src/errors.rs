// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by rendertest.

use camino::Utf8PathBuf;
use itertools::Itertools;
use std::{borrow::Cow, fmt};
use thiserror::Error;

/// An error that occurred while reading the rendertest config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigReadError {
    /// The config file could not be read.
    #[error("failed to read config file `{file}`")]
    Read {
        /// The config file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The config file is not valid TOML, or has unknown keys.
    #[error("failed to parse config file `{file}`")]
    Toml {
        /// The config file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Box<toml::de::Error>,
    },

    /// The default profile named in the config does not exist.
    #[error("default profile `{profile}` not found (known profiles: {})", .known.join(", "))]
    DefaultProfileNotFound {
        /// The profile name.
        profile: String,

        /// The known profiles.
        known: Vec<String>,
    },

    /// A profile has an empty pass list.
    #[error("profile `{profile}` does not configure any passes")]
    NoPasses {
        /// The profile name.
        profile: String,
    },
}

/// An error which indicates that a profile was requested but not known to rendertest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a test-threads value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}\n(hint: {message})")]
pub struct TestThreadsParseError {
    input: String,
    message: &'static str,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>, message: &'static str) -> Self {
        Self {
            input: input.into(),
            message,
        }
    }
}

/// Error returned while parsing a diff check such as `hydra:out-usd:ref`.
#[derive(Clone, Debug, Error)]
#[error("invalid diff check `{input}`: {message}")]
pub struct DiffCheckParseError {
    input: String,
    message: Cow<'static, str>,
}

impl DiffCheckParseError {
    pub(crate) fn new(input: impl Into<String>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input: input.into(),
            message: message.into(),
        }
    }
}

/// Error returned while parsing a test order value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for order: {input}\n(known values: forward, reverse)")]
pub struct TestOrderParseError {
    input: String,
}

impl TestOrderParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a `--chunk` input.
#[derive(Clone, Debug, Error)]
pub struct PartitionParseError {
    input: String,
    message: Cow<'static, str>,
}

impl PartitionParseError {
    pub(crate) fn new(input: impl Into<String>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input: input.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PartitionParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "chunk `{}` must be in the format \"I/N\":\n{}",
            self.input, self.message
        )
    }
}

/// An error that occurred while loading a group file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GroupIndexError {
    /// The group file exists but could not be read.
    #[error("failed to read group file `{path}`")]
    Read {
        /// The group file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Group definitions refer to each other in a loop.
    #[error("group definitions form a cycle: {}", .cycle.iter().join(" -> "))]
    Cycle {
        /// The groups on the cycle, with the first group repeated at the end.
        cycle: Vec<String>,
    },
}

/// An error that occurred while reading the parameters block of a test's README.
#[derive(Debug, Error)]
#[error("failed to parse PARAMS block in `{readme}`")]
pub struct ParamsParseError {
    readme: Utf8PathBuf,
    #[source]
    error: Box<toml::de::Error>,
}

impl ParamsParseError {
    pub(crate) fn new(readme: impl Into<Utf8PathBuf>, error: toml::de::Error) -> Self {
        Self {
            readme: readme.into(),
            error: Box::new(error),
        }
    }
}

/// An error that occurred while loading a test case from its source folder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestLoadError {
    /// The test folder does not exist.
    #[error("test folder `{path}` does not exist")]
    MissingFolder {
        /// The test folder.
        path: Utf8PathBuf,
    },

    /// The test folder has no README.
    #[error("test folder `{path}` has no README")]
    MissingReadme {
        /// The test folder.
        path: Utf8PathBuf,
    },

    /// The README could not be read.
    #[error("failed to read `{path}`")]
    ReadReadme {
        /// The README path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The README parameters are invalid.
    #[error(transparent)]
    Params(#[from] ParamsParseError),
}

/// An error that occurred while parsing test filter patterns.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestFilterError {
    /// A name expression could not be turned into a regular expression.
    #[error("invalid test expression `{expression}`")]
    InvalidExpression {
        /// The expression.
        expression: String,

        /// The underlying error.
        #[source]
        error: Box<regex::Error>,
    },
}

/// An error that occurred while preparing a test's working directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrepareError {
    /// A file system operation failed.
    #[error("error operating on path `{path}`")]
    Fs {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Walking a source directory failed.
    #[error("error walking directory `{path}`")]
    Walk {
        /// The directory being walked.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A plugin source pattern is not a valid glob.
    #[error("invalid plugin source pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },
}

/// An error that occurred while running a test.
///
/// Command failures are not errors: they are reflected in the test status. These errors are about
/// the runner failing to manage the working directory or its records.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunTestError {
    /// The test was run before it was prepared.
    #[error("test `{test}` was not prepared")]
    NotPrepared {
        /// The test name.
        test: String,
    },

    /// A file system operation failed.
    #[error("error operating on path `{path}`")]
    Fs {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The per-test record could not be serialized or deserialized.
    #[error("error reading or writing test record `{path}`")]
    Record {
        /// The record path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while capturing or restoring a working directory snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// Archiving the directory failed.
    #[error("failed to snapshot `{dir}`")]
    Capture {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Restoring the directory failed.
    #[error("failed to restore snapshot into `{dir}`")]
    Restore {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while running a test with reruns.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RerunError {
    /// An attempt failed to run.
    #[error(transparent)]
    Run(#[from] RunTestError),

    /// The first failing attempt could not be saved or restored.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// An error that occurred while building the worker pool.
#[derive(Debug, Error)]
#[error("failed to spawn worker thread {index}")]
pub struct PoolBuildError {
    index: usize,
    #[source]
    error: std::io::Error,
}

impl PoolBuildError {
    pub(crate) fn new(index: usize, error: std::io::Error) -> Self {
        Self { index, error }
    }
}

/// An error that occurred while loading a test suite.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteLoadError {
    /// The suite root does not exist or is not a directory.
    #[error("test suite `{path}` does not exist")]
    Missing {
        /// The suite root.
        path: Utf8PathBuf,
    },

    /// The suite root could not be listed.
    #[error("failed to list test suite `{path}`")]
    ReadDir {
        /// The suite root.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A group file is invalid.
    #[error(transparent)]
    Groups(#[from] GroupIndexError),
}

/// An error that occurred while preparing a suite run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuitePrepareError {
    /// The output directory could not be reset.
    #[error("error operating on path `{path}`")]
    Fs {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The filter patterns are invalid.
    #[error(transparent)]
    Filter(#[from] TestFilterError),
}

/// An error that occurred while running a prepared suite.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteRunError {
    /// The suite was run before being prepared.
    #[error("the test suite must be prepared before it is run")]
    NotPrepared,

    /// The worker pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolBuildError),
}

/// An error that occurred while writing a suite report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// A file system operation failed.
    #[error("error operating on path `{path}`")]
    Fs {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The JSON report could not be serialized.
    #[error("error writing JSON report to `{path}`")]
    Json {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The JUnit report could not be serialized.
    #[error("error writing JUnit report to `{path}`")]
    Junit {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
