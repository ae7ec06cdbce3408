// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A regression test runner for renderer plugins.
//!
//! `rendertest run` renders every selected test of a suite through each configured pass, compares
//! the images against references and writes JSON, JUnit and HTML reports. `rendertest list` and
//! `rendertest groups` inspect a suite without running it.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputContext;
