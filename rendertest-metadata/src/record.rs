// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestStatus;
use serde::{Deserialize, Serialize};

/// The record written to `<test-name>.json` in a test's working directory after every run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    /// The test name, e.g. `test_0042`.
    pub name: String,

    /// UTC time the run started, formatted as `%Y%m%d%H%M%S.%f`.
    pub epoch: String,

    /// Time spent running the pass commands, in seconds.
    #[serde(default)]
    pub duration: f64,

    /// The final status, stored as its integer code.
    pub result: TestStatus,
}

impl TestRecord {
    /// Converts this record into an entry of the suite report, with the status as a label.
    pub fn into_summary(self) -> TestSummaryRecord {
        TestSummaryRecord {
            name: self.name,
            epoch: self.epoch,
            duration: self.duration,
            result: self.result.label().to_owned(),
        }
    }
}

/// One entry of the suite-level `report.json` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSummaryRecord {
    /// The test name.
    pub name: String,

    /// UTC time the run started.
    pub epoch: String,

    /// Time spent running the pass commands, in seconds.
    pub duration: f64,

    /// The final status label, e.g. `UNSTABLE`.
    pub result: String,
}
