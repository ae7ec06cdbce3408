// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestStatus;
use thiserror::Error;

/// An error that occurs while parsing a [`TestStatus`] label.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized test status: {input}\n(known values: {})",
    TestStatus::labels().collect::<Vec<_>>().join(", ")
)]
pub struct StatusParseError {
    input: String,
}

impl StatusParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}
