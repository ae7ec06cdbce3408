// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long it takes to run tests.
//!
//! Test records need a start time and a duration. For that we use a combination of a UTC
//! timestamp (realtime clock) and an `Instant` (monotonic clock). Once the stopwatch transitions
//! to the "end" state, we can report the elapsed time using the monotonic clock.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// The format of the `epoch` field in test records.
pub const EPOCH_FORMAT: &str = "%Y%m%d%H%M%S%.6f";

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Utc>,
    instant: Instant,
}

impl StopwatchStart {
    pub(crate) fn now() -> Self {
        Self {
            // These two syscalls will happen imperceptibly close to each other, which is good
            // enough for our purposes.
            start_time: Utc::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn end(&self) -> StopwatchEnd {
        StopwatchEnd {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchEnd {
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) duration: Duration,
}

impl StopwatchEnd {
    /// Returns the start time, formatted for test records.
    pub(crate) fn epoch(&self) -> String {
        self.start_time.format(EPOCH_FORMAT).to_string()
    }
}
