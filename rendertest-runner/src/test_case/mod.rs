// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test cases: the unit of work of a suite run.
//!
//! A test case is loaded from `<suite>/<name>/README`, prepared into a working directory under
//! the output directory, then run once per attempt. Each run goes through every active pass,
//! compares images, and leaves a `<name>.json` record plus logs, thumbnails and an HTML page in
//! the working directory.

mod prepare;
mod run;

pub use prepare::*;
pub use run::*;

use crate::{
    diff::ImageSet,
    errors::TestLoadError,
    params::{TestParams, readme_summary},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rendertest_metadata::{TestRecord, TestStatus};
use std::{collections::BTreeSet, time::Duration};

/// The README of every test.
pub const README_FILE: &str = "README";

/// A test case.
#[derive(Clone, Debug)]
pub struct TestCase {
    name: String,
    source: Utf8PathBuf,
    readme: String,
    params: TestParams,
    prepared: Option<PreparedTest>,
    state: RunState,
}

/// How a prepared test is run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedTest {
    /// The working directory.
    pub target: Utf8PathBuf,

    /// The command script, one command per line.
    pub script: String,

    /// Where the script came from.
    pub script_kind: ScriptKind,

    /// The image the script writes, in the working directory.
    pub out_image: Option<Utf8PathBuf>,

    /// The reference image, in the test source directory.
    pub ref_image: Option<Utf8PathBuf>,

    /// Passes this test doesn't run.
    pub skip_passes: BTreeSet<String>,
}

/// Where the command script of a test came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScriptKind {
    /// The `script` parameter of the README.
    Custom,

    /// The program compiled from `data/test.cpp`.
    Program,

    /// `data/test.py`.
    Python,

    /// A `kick` command line generated from the parameters.
    Kick,
}

/// The state left by the latest run of a test.
#[derive(Clone, Debug)]
pub struct RunState {
    /// The final status.
    pub status: TestStatus,

    /// The status of every pass that ran.
    pub pass_status: IndexMap<String, TestStatus>,

    /// Output and reference images of the passes that ran.
    pub images: ImageSet,

    /// Time spent running the pass commands.
    pub duration: Duration,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: TestStatus::Skipped,
            pass_status: IndexMap::new(),
            images: ImageSet::new(),
            duration: Duration::ZERO,
        }
    }
}

impl TestCase {
    /// Loads the test `name` from the suite at `source_root`.
    ///
    /// `symbols` are substituted into the README parameters.
    pub fn load(
        source_root: &Utf8Path,
        name: &str,
        symbols: &IndexMap<String, String>,
    ) -> Result<Self, TestLoadError> {
        let source = source_root.join(name);
        if !source.is_dir() {
            return Err(TestLoadError::MissingFolder { path: source });
        }
        let readme_path = source.join(README_FILE);
        if !readme_path.is_file() {
            return Err(TestLoadError::MissingReadme { path: source });
        }
        let readme = std::fs::read_to_string(&readme_path).map_err(|error| {
            TestLoadError::ReadReadme {
                path: readme_path.clone(),
                error,
            }
        })?;
        let params = TestParams::from_readme(&readme_path, &readme, symbols)?;

        Ok(Self {
            name: name.to_owned(),
            source,
            readme,
            params,
            prepared: None,
            state: RunState::default(),
        })
    }

    /// Returns the name of the test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the test source directory.
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// Returns the contents of the README.
    pub fn readme(&self) -> &str {
        &self.readme
    }

    /// Returns the first line of the README.
    pub fn summary(&self) -> &str {
        readme_summary(&self.readme)
    }

    /// Returns the parameters read from the README.
    pub fn params(&self) -> &TestParams {
        &self.params
    }

    /// Returns how the test runs, if it was prepared.
    pub fn prepared(&self) -> Option<&PreparedTest> {
        self.prepared.as_ref()
    }

    /// Returns the working directory, if the test was prepared.
    pub fn target(&self) -> Option<&Utf8Path> {
        self.prepared.as_ref().map(|prepared| prepared.target.as_path())
    }

    /// Returns the state left by the latest run.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Returns the status of the latest run, `SKIPPED` if the test never ran.
    pub fn status(&self) -> TestStatus {
        self.state.status
    }

    pub(crate) fn set_status(&mut self, status: TestStatus) {
        self.state.status = status;
    }

    /// Returns the path of the record written by every run.
    pub fn record_path(&self) -> Option<Utf8PathBuf> {
        self.target().map(|target| record_path(target, &self.name))
    }
}

/// Returns the path of the record of test `name` in its working directory `target`.
pub fn record_path(target: &Utf8Path, name: &str) -> Utf8PathBuf {
    target.join(format!("{name}.json"))
}

/// Reads a test record. Returns `None` if the record doesn't exist or can't be parsed.
pub fn read_record(path: &Utf8Path) -> Option<TestRecord> {
    let contents = std::fs::read(path).ok()?;
    serde_json::from_slice(&contents).ok()
}
