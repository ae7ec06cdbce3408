// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::StatusParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// The outcome of a test, a pass, or a single command.
///
/// Variants are ordered by severity: aggregating several statuses takes the maximum. `Skipped` is
/// reserved for tests that never ran a pass.
///
/// In per-test JSON records the status is stored as its integer code (see [`Self::code`]); the
/// suite report uses the upper-case label instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum TestStatus {
    /// The test passed.
    #[default]
    Ok,

    /// The test failed: a command exited with a non-zero code, an expected image was missing, or
    /// an image comparison failed.
    Failed,

    /// A command was terminated by a signal or a fatal OS exception.
    Crashed,

    /// A command was killed after exceeding its timeout.
    TimedOut,

    /// The test failed on its first attempt but passed on a rerun.
    Unstable,

    /// No pass ran for this test.
    Skipped,
}

impl TestStatus {
    /// All statuses, in severity order.
    pub const ALL: [TestStatus; 6] = [
        TestStatus::Ok,
        TestStatus::Failed,
        TestStatus::Crashed,
        TestStatus::TimedOut,
        TestStatus::Unstable,
        TestStatus::Skipped,
    ];

    /// The width of the longest label, for aligned output.
    pub const MAX_LABEL_WIDTH: usize = 8;

    /// Returns the upper-case label for this status, e.g. `TIMEDOUT`.
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Ok => "OK",
            TestStatus::Failed => "FAILED",
            TestStatus::Crashed => "CRASHED",
            TestStatus::TimedOut => "TIMEDOUT",
            TestStatus::Unstable => "UNSTABLE",
            TestStatus::Skipped => "SKIPPED",
        }
    }

    /// Returns the integer code stored in per-test records.
    pub fn code(self) -> u8 {
        match self {
            TestStatus::Ok => 0,
            TestStatus::Failed => 1,
            TestStatus::Crashed => 2,
            TestStatus::TimedOut => 3,
            TestStatus::Unstable => 4,
            TestStatus::Skipped => 5,
        }
    }

    /// Converts an integer code back into a status.
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| u64::from(status.code()) == code)
    }

    /// Returns the lower-case word used in summaries and dashboards (`passed`, `failed`, ...).
    pub fn summary_word(self) -> &'static str {
        match self {
            TestStatus::Ok => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Crashed => "crashed",
            TestStatus::TimedOut => "timedout",
            TestStatus::Unstable => "unstable",
            TestStatus::Skipped => "skipped",
        }
    }

    /// Returns true if this status is `Ok`.
    #[inline]
    pub fn is_ok(self) -> bool {
        self == TestStatus::Ok
    }

    /// Returns true if the test should not be rerun: it passed, or never ran.
    #[inline]
    pub fn is_final_on_first_attempt(self) -> bool {
        matches!(self, TestStatus::Ok | TestStatus::Skipped)
    }

    /// Returns all the labels, for error messages.
    pub fn labels() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(Self::label)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TestStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| StatusParseError::new(s))
    }
}

impl Serialize for TestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TestStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestStatus;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "a status code (0-5) or a status label ({})",
                    TestStatus::labels().collect::<Vec<_>>().join(", ")
                )
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                TestStatus::from_code(v)
                    .ok_or_else(|| E::invalid_value(serde::de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .ok()
                    .and_then(TestStatus::from_code)
                    .ok_or_else(|| E::invalid_value(serde::de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse()
                    .map_err(|_| E::invalid_value(serde::de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(V)
    }
}
