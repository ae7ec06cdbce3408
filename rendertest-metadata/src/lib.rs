// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Records written by rendertest runs.
//!
//! Every test run leaves a `<test-name>.json` record in its working directory, and a suite run
//! aggregates those into `report.json`. The formats here are a contract with downstream tooling
//! (dashboards, "rerun failed" selections), so they are kept in a separate crate from the runner.

mod errors;
mod exit_codes;
mod record;
mod status;

pub use errors::*;
pub use exit_codes::*;
pub use record::*;
pub use status::*;
