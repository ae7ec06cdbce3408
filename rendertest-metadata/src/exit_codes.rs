// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `rendertest` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum RendertestExitCode {}

impl RendertestExitCode {
    /// No errors occurred and every selected test passed, or the unstable ones stayed under the
    /// instability threshold.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests failed, or too many tests were unstable.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Writing a report (JSON, JUnit or HTML) produced an error.
    pub const WRITE_REPORT_FAILED: i32 = 110;

    /// A test filter pattern could not be parsed.
    pub const INVALID_PATTERN: i32 = 94;

    /// A user issue happened while setting up a run: a bad config file, a missing test suite
    /// directory, an invalid group file.
    pub const SETUP_ERROR: i32 = 96;
}
