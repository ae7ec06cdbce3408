// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for splitting a test run across several machines.
//!
//! The ordered list of filtered tests is split into N contiguous chunks of nearly equal size (the
//! first `len % N` chunks are one test longer) and a single chunk is run.

use crate::errors::PartitionParseError;
use std::{fmt, str::FromStr};

/// A chunk of the test list, selected with `--chunk I/N`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// The chunk to run, counting up from 1.
    pub index: usize,

    /// The total number of chunks.
    pub total: usize,
}

impl Chunk {
    /// The chunk that contains every test.
    pub const ALL: Chunk = Chunk { index: 1, total: 1 };

    /// Returns the items of `items` that belong to this chunk.
    pub fn select<T: Clone>(&self, items: &[T]) -> Vec<T> {
        chunk_list(items, self.index, self.total).to_vec()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::ALL
    }
}

/// Splits `items` into `total` contiguous chunks and returns chunk `index` (1-based).
///
/// Returns an empty slice if there are fewer items than chunks, or if `index` isn't between 1 and
/// `total`.
pub fn chunk_list<T>(items: &[T], index: usize, total: usize) -> &[T] {
    if total > items.len() || index < 1 || total < 1 || index > total {
        return &[];
    }
    let i = index - 1;
    let (k, m) = (items.len() / total, items.len() % total);
    &items[i * k + i.min(m)..(i + 1) * k + (i + 1).min(m)]
}

impl FromStr for Chunk {
    type Err = PartitionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, total) = s
            .split_once('/')
            .ok_or_else(|| PartitionParseError::new(s, "expected a `/` separator"))?;
        let index: usize = index.trim().parse().map_err(|err| {
            PartitionParseError::new(s, format!("failed to parse chunk `{index}`: {err}"))
        })?;
        let total: usize = total.trim().parse().map_err(|err| {
            PartitionParseError::new(s, format!("failed to parse total `{total}`: {err}"))
        })?;

        if !(1..=total).contains(&index) {
            return Err(PartitionParseError::new(
                s,
                format!("chunk {index} must be a number between 1 and total chunks {total}, inclusive"),
            ));
        }
        Ok(Self { index, total })
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}
