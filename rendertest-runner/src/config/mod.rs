// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for rendertest.
//!
//! Settings live in profiles within `rendertest.toml` at the root of a test suite, layered on top
//! of an embedded default configuration. Tool locations are configured in a `[tools]` table.

mod diff_check;
mod imp;
mod test_threads;
mod tools;

pub use diff_check::*;
pub use imp::*;
pub use test_threads::*;
pub use tools::*;
