// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for rendertest, a regression test runner for renderer plugins.
//!
//! A suite run goes through discovery ([`suite::TestSuite::load`]), selection and preparation of
//! working directories, then runs every test's passes on a [`pool::WorkerPool`]. Each test
//! leaves a JSON record behind, which the [`reporter`] module aggregates into JSON, JUnit and HTML
//! reports.

pub mod command;
pub mod config;
pub mod diff;
pub mod environment;
pub mod errors;
pub mod groups;
pub mod helpers;
pub mod params;
pub mod partition;
pub mod pool;
pub mod redact;
pub mod reporter;
pub mod rerun;
mod stopwatch;
pub mod suite;
pub mod test_case;
pub mod test_filter;
