// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

// The fixtures stand in for the image tool and the renderer with shell scripts.
#[cfg(unix)]
mod basic;
#[cfg(unix)]
mod fixtures;
#[cfg(unix)]
mod reports;
