// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the results of a suite run in human and machine-readable formats.
//!
//! Progress lines are printed as tests finish. Once the run is over, the JSON, JUnit and HTML
//! reports are built from the records each test left in its working directory.

pub mod html;
mod json;
mod junit;
mod progress;

pub use json::*;
pub use junit::*;
pub use progress::*;

use crate::{suite::TestSuite, test_case::read_record};
use rendertest_metadata::TestRecord;

/// Reads the records of the prepared tests, in report order. Tests without a readable record are
/// paired with `None`.
pub(crate) fn suite_records(
    suite: &TestSuite,
) -> impl Iterator<Item = (&crate::test_case::TestCase, Option<TestRecord>)> {
    suite
        .prepared_tests()
        .iter()
        .map(|test| (test, test.record_path().and_then(|path| read_record(&path))))
}
