// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test suites: discovery, selection, preparation and execution of tests.
//!
//! A suite is a directory holding one `test_*` folder per test, plus optional group files. Running
//! a suite happens in phases:
//!
//! 1. [`TestSuite::load`] discovers tests and loads groups.
//! 2. [`TestSuite::select`] filters, orders and chunks the tests, setting aside the tests ignored
//!    for the host OS or by the `ignore` group.
//! 3. [`TestSuite::prepare`] resets the output directory and prepares a working directory per
//!    selected test.
//! 4. [`TestSuite::run`] runs the prepared tests on a worker pool.
//!
//! Phases 1 to 3 are single-threaded; only phase 4 runs tests concurrently, and each worker only
//! touches the test it was handed.

use crate::{
    command::ExitAbi,
    config::{TestOrder, ToolPaths},
    environment::OPTIX_CACHE_DIR,
    errors::{DisplayErrorChain, SuiteLoadError, SuitePrepareError, SuiteRunError},
    groups::GroupIndex,
    helpers::{is_test_name, test_sort_key},
    partition::Chunk,
    pool::WorkerPool,
    reporter::ProgressReporter,
    rerun::run_with_reruns,
    stopwatch::StopwatchStart,
    test_case::{PrepareOutcome, RunContext, TestCase, read_record, record_path},
    test_filter::{FilterContext, TestFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rendertest_metadata::TestStatus;
use std::{cmp::Ordering, collections::BTreeSet, fmt, time::Duration};
use swrite::{SWrite, swrite};
use tracing::{debug, error, info, warn};

/// The group of tests that are never run, unless selected alone.
pub const IGNORE_GROUP: &str = "ignore";

/// Groups marking the tests that only run on one OS.
pub const OS_GROUPS: [&str; 3] = ["linux", "darwin", "windows"];

/// Groups named `skip_<pass>` list the tests that skip a pass.
pub const SKIP_PASS_GROUP_PREFIX: &str = "skip_";

/// The directory of files shared by tests, available to README parameters as
/// `{testsuite_common}`.
pub const COMMON_DIR: &str = "common";

/// Returns the OS group of the host.
pub fn host_os() -> &'static str {
    if cfg!(windows) {
        "windows"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        "linux"
    }
}

/// Why a selected test isn't run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum IgnoreReason {
    /// The test only runs on other OSes.
    Os,

    /// The test is in the `ignore` group.
    Ignore,

    /// The test could not be loaded.
    Load,

    /// The test needs building and has no prebuilt binaries.
    Build,

    /// Preparing the test failed.
    Other,
}

impl IgnoreReason {
    /// All reasons, in report order.
    pub const ALL: [IgnoreReason; 5] = [
        IgnoreReason::Os,
        IgnoreReason::Ignore,
        IgnoreReason::Load,
        IgnoreReason::Build,
        IgnoreReason::Other,
    ];

    /// Returns a short description of the reason.
    pub fn description(self) -> &'static str {
        match self {
            IgnoreReason::Os => "wrong OS",
            IgnoreReason::Ignore => "ignored",
            IgnoreReason::Load => "failed to load",
            IgnoreReason::Build => "failed to build",
            IgnoreReason::Other => "failed to prepare",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Tests that were selected but aren't run, by reason.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IgnoredTests {
    sets: IndexMap<IgnoreReason, BTreeSet<String>>,
}

impl IgnoredTests {
    /// Returns the tests ignored for `reason`.
    pub fn get(&self, reason: IgnoreReason) -> impl Iterator<Item = &str> + '_ {
        self.sets
            .get(&reason)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Returns the number of tests ignored for `reason`.
    pub fn count(&self, reason: IgnoreReason) -> usize {
        self.sets.get(&reason).map_or(0, BTreeSet::len)
    }

    /// Returns the total number of ignored tests.
    pub fn total(&self) -> usize {
        self.sets.values().map(BTreeSet::len).sum()
    }

    /// Returns the reason `test` is ignored, if it is.
    pub fn reason(&self, test: &str) -> Option<IgnoreReason> {
        self.sets
            .iter()
            .find(|(_, tests)| tests.contains(test))
            .map(|(reason, _)| *reason)
    }

    fn insert(&mut self, reason: IgnoreReason, test: impl Into<String>) {
        self.sets.entry(reason).or_default().insert(test.into());
    }
}

/// Options for [`TestSuite::select`].
#[derive(Clone, Debug)]
pub struct SelectOptions<'a> {
    /// Filter patterns. No patterns select every test.
    pub patterns: &'a [String],

    /// Where the previous run left its records, for the `failed` group.
    pub previous_output: Option<&'a Utf8Path>,

    /// The order tests are scheduled in.
    pub order: TestOrder,

    /// The chunk of the ordered tests to keep.
    pub chunk: Chunk,

    /// The OS group of the host.
    pub host_os: &'a str,
}

/// The tests selected to run, in scheduling order, and those set aside.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    /// The tests to prepare, in scheduling order.
    pub scheduled: Vec<String>,

    /// Tests set aside for their OS or by the `ignore` group.
    pub ignored: IgnoredTests,
}

/// Options for [`TestSuite::prepare`].
#[derive(Clone, Debug)]
pub struct PrepareOptions<'a> {
    /// The output directory. Every test gets a working directory below it.
    pub output_dir: &'a Utf8Path,

    /// The passes the suite runs.
    pub passes: &'a [String],

    /// The exit code conventions of the host.
    pub abi: ExitAbi,
}

/// A test suite.
#[derive(Debug)]
pub struct TestSuite {
    source_root: Utf8PathBuf,
    groups: GroupIndex,
    tests_found: BTreeSet<String>,
    symbols: IndexMap<String, String>,
    output_dir: Option<Utf8PathBuf>,
    ignored: IgnoredTests,
    tests: Vec<TestCase>,
    total_time: Duration,
}

impl TestSuite {
    /// Discovers the tests of the suite at `source_root` and loads its groups.
    ///
    /// README parameters may refer to the paths of `tools`, and to the suite's `common`
    /// directory as `{testsuite_common}`.
    pub fn load(
        source_root: impl Into<Utf8PathBuf>,
        tools: &ToolPaths,
    ) -> Result<Self, SuiteLoadError> {
        let source_root = source_root.into();
        if !source_root.is_dir() {
            return Err(SuiteLoadError::Missing { path: source_root });
        }
        let read_dir_error = |error| SuiteLoadError::ReadDir {
            path: source_root.clone(),
            error,
        };
        let mut tests_found = BTreeSet::new();
        for entry in source_root.read_dir_utf8().map_err(read_dir_error)? {
            let entry = entry.map_err(read_dir_error)?;
            if is_test_name(entry.file_name()) && entry.path().is_dir() {
                tests_found.insert(entry.file_name().to_owned());
            }
        }
        let groups = GroupIndex::load(&source_root)?;

        let common_dir = source_root.join(COMMON_DIR);
        let symbols = tools.symbols(common_dir.is_dir().then_some(common_dir.as_path()));
        info!(
            "found {} tests and {} groups in {source_root}",
            tests_found.len(),
            groups.group_names().count()
        );

        Ok(Self {
            source_root,
            groups,
            tests_found,
            symbols,
            output_dir: None,
            ignored: IgnoredTests::default(),
            tests: Vec::new(),
            total_time: Duration::ZERO,
        })
    }

    /// Returns the suite root.
    pub fn source_root(&self) -> &Utf8Path {
        &self.source_root
    }

    /// Returns the group index.
    pub fn groups(&self) -> &GroupIndex {
        &self.groups
    }

    /// Returns the name of every test in the suite.
    pub fn tests_found(&self) -> &BTreeSet<String> {
        &self.tests_found
    }

    /// Returns the tests whose record in `output_dir` doesn't say `OK`.
    pub fn failed_tests(&self, output_dir: &Utf8Path) -> BTreeSet<String> {
        self.tests_found
            .iter()
            .filter(|test| {
                let path = record_path(&output_dir.join(test.as_str()), test);
                read_record(&path).is_some_and(|record| !record.result.is_ok())
            })
            .cloned()
            .collect()
    }

    /// Returns the tests selected by `opts`, without touching the disk.
    pub fn select(&self, opts: &SelectOptions<'_>) -> Result<Selection, SuitePrepareError> {
        let filter = TestFilter::new(opts.patterns)?;
        let failed = match opts.previous_output {
            Some(previous) if filter.uses_failed_group() => self.failed_tests(previous),
            _ => BTreeSet::new(),
        };
        let mut filtered = filter.apply(&FilterContext {
            tests: &self.tests_found,
            groups: &self.groups,
            failed: &failed,
            source_root: &self.source_root,
        });
        debug!("{} tests match the filter", filtered.len());

        let mut ignored = IgnoredTests::default();
        for test in self.os_ignored(opts.host_os).intersection(&filtered) {
            ignored.insert(IgnoreReason::Os, test.as_str());
        }
        filtered.retain(|test| ignored.reason(test).is_none());
        // A test selected on its own runs even if it is in the ignore group.
        if filtered.len() > 1 {
            let ignore = self.groups.get_tests(IGNORE_GROUP);
            for test in ignore.intersection(&filtered) {
                ignored.insert(IgnoreReason::Ignore, test.as_str());
            }
            filtered.retain(|test| !ignore.contains(test));
        }

        let mut ordered: Vec<String> = filtered.into_iter().collect();
        ordered.sort_by(|a, b| {
            let ordering = test_sort_key(a)
                .partial_cmp(&test_sort_key(b))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b));
            match opts.order {
                TestOrder::Forward => ordering,
                TestOrder::Reverse => ordering.reverse(),
            }
        });

        Ok(Selection {
            scheduled: opts.chunk.select(&ordered),
            ignored,
        })
    }

    /// Tests listed for another OS and not for the host.
    fn os_ignored(&self, host_os: &str) -> BTreeSet<String> {
        let host_tests = self.groups.get_tests(host_os);
        OS_GROUPS
            .iter()
            .filter(|os| **os != host_os)
            .flat_map(|os| self.groups.get_tests(os))
            .filter(|test| !host_tests.contains(test))
            .collect()
    }

    /// Returns the passes `test` skips through `skip_<pass>` groups.
    pub fn skipped_passes(&self, test: &str, passes: &[String]) -> BTreeSet<String> {
        passes
            .iter()
            .filter(|pass| {
                self.groups
                    .get_tests(&format!("{SKIP_PASS_GROUP_PREFIX}{pass}"))
                    .contains(test)
            })
            .cloned()
            .collect()
    }

    /// Resets the output directory and prepares the selected tests in it.
    ///
    /// Tests that fail to load or prepare are set aside with the matching [`IgnoreReason`]; only
    /// errors affecting the output directory itself are returned.
    pub fn prepare(
        &mut self,
        selection: Selection,
        opts: &PrepareOptions<'_>,
    ) -> Result<(), SuitePrepareError> {
        let output_dir = opts.output_dir;
        let fs_error = |error| SuitePrepareError::Fs {
            path: output_dir.to_owned(),
            error,
        };
        if output_dir.exists() {
            std::fs::remove_dir_all(output_dir).map_err(fs_error)?;
        }
        std::fs::create_dir_all(output_dir.join(OPTIX_CACHE_DIR)).map_err(fs_error)?;

        let Selection {
            scheduled,
            mut ignored,
        } = selection;
        let mut tests = Vec::with_capacity(scheduled.len());
        for name in scheduled {
            let mut test = match TestCase::load(&self.source_root, &name, &self.symbols) {
                Ok(test) => test,
                Err(error) => {
                    warn!("{name}: {}", DisplayErrorChain::new(error));
                    ignored.insert(IgnoreReason::Load, name);
                    continue;
                }
            };
            let skip_passes = self.skipped_passes(&name, opts.passes);
            match test.prepare(&output_dir.join(&name), &skip_passes, opts.abi) {
                Ok(PrepareOutcome::Prepared) => tests.push(test),
                Ok(PrepareOutcome::NeedsBuild) => {
                    warn!("{name}: needs building, skipping");
                    ignored.insert(IgnoreReason::Build, name);
                }
                Err(error) => {
                    warn!("{name}: {}", DisplayErrorChain::new(error));
                    ignored.insert(IgnoreReason::Other, name);
                }
            }
        }
        info!(
            "prepared {} tests, {} ignored",
            tests.len(),
            ignored.total()
        );

        self.output_dir = Some(output_dir.to_owned());
        self.ignored = ignored;
        self.tests = tests;
        Ok(())
    }

    /// Returns the output directory, once prepared.
    pub fn output_dir(&self) -> Option<&Utf8Path> {
        self.output_dir.as_deref()
    }

    /// Returns the prepared tests, in scheduling order.
    pub fn prepared_tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Returns the tests that were selected but aren't run.
    pub fn ignored(&self) -> &IgnoredTests {
        &self.ignored
    }

    /// Returns true if command output should be echoed: only when a single test runs.
    pub fn echo_output(&self) -> bool {
        self.tests.len() == 1
    }

    /// Returns how long the last run took.
    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Runs every prepared test on `pool`, rerunning failing tests up to `reruns` times.
    ///
    /// Test failures are reflected in test statuses; errors managing a test's working directory
    /// are logged and leave that test's status as it was.
    pub fn run(
        &mut self,
        cx: &RunContext<'_>,
        pool: WorkerPool,
        reruns: usize,
        progress: &ProgressReporter,
    ) -> Result<(), SuiteRunError> {
        if self.output_dir.is_none() {
            return Err(SuiteRunError::NotPrepared);
        }
        info!(
            "running {} tests on {} workers",
            self.tests.len(),
            pool.threads()
        );
        let stopwatch = StopwatchStart::now();
        let tests: Vec<&mut TestCase> = self.tests.iter_mut().collect();
        pool.scope(move |scope| {
            for test in tests {
                scope.add_task(move || {
                    let on_attempt = |test: &TestCase, info| progress.attempt_finished(test, info);
                    if let Err(error) = run_with_reruns(test, cx, reruns, on_attempt) {
                        error!("{}: {}", test.name(), DisplayErrorChain::new(error));
                        // A test that couldn't run to completion counts as a failure.
                        if matches!(test.status(), TestStatus::Ok | TestStatus::Skipped) {
                            test.set_status(TestStatus::Failed);
                        }
                    }
                });
            }
        })?;
        self.total_time = stopwatch.end().duration;
        Ok(())
    }

    /// Counts the results of the last run.
    pub fn report(&self) -> SuiteReport {
        let mut report = SuiteReport {
            total: self.tests.len(),
            total_time: self.total_time,
            ..SuiteReport::default()
        };
        for test in &self.tests {
            match test.status() {
                TestStatus::Ok => report.passed += 1,
                TestStatus::Failed => report.failed += 1,
                TestStatus::Crashed => report.crashed += 1,
                TestStatus::TimedOut => report.timedout += 1,
                TestStatus::Unstable => report.unstable += 1,
                TestStatus::Skipped => {}
            }
        }
        for reason in IgnoreReason::ALL {
            let count = self.ignored.count(reason);
            report.skipped += count;
            report.skipped_by_reason.insert(reason, count);
        }
        report
    }
}

/// Result counts of a suite run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SuiteReport {
    /// The number of tests that were prepared to run.
    pub total: usize,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that crashed.
    pub crashed: usize,

    /// Tests that timed out.
    pub timedout: usize,

    /// Tests that passed only on a rerun.
    pub unstable: usize,

    /// Tests that were selected but not run.
    pub skipped: usize,

    /// Skipped tests by reason.
    pub skipped_by_reason: IndexMap<IgnoreReason, usize>,

    /// How long running the tests took.
    pub total_time: Duration,
}

impl SuiteReport {
    /// Returns the number of tests that ran to a verdict.
    pub fn executed(&self) -> usize {
        self.passed + self.failed + self.crashed + self.timedout + self.unstable
    }

    /// Returns the number of tests skipped for `reason`.
    pub fn skipped_for(&self, reason: IgnoreReason) -> usize {
        self.skipped_by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Returns true if the run failed: a test failed for good, or more than
    /// `instability_threshold` percent of the executed tests were unstable.
    pub fn failed(&self, instability_threshold: f64) -> bool {
        let executed = self.executed();
        let stable_failures = executed - self.passed - self.unstable;
        let max_unstable = instability_threshold * executed as f64 / 100.0;
        stable_failures > 0 || self.unstable as f64 > max_unstable
    }

    /// Returns the one-line summary of the run.
    pub fn summary_text(&self) -> String {
        let mut text = format!("Ran {} regression tests", self.total);
        if self.skipped > 0 {
            swrite!(text, " ({} skipped)", self.skipped);
        }
        let failures = [
            (self.failed, "failed"),
            (self.crashed, "crashed"),
            (self.timedout, "timedout"),
            (self.unstable, "unstable"),
        ];
        if failures.iter().all(|(count, _)| *count == 0) {
            text.push_str(" - ALL TESTS OK");
        } else {
            let details: Vec<String> = failures
                .iter()
                .map(|(count, word)| format!("{count} {word}"))
                .collect();
            swrite!(text, " - {}", details.join(", "));
        }
        text
    }
}
