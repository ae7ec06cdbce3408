// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::DiffCheckParseError;
use serde::{Deserialize, Deserializer};
use std::{fmt, str::FromStr};

/// Which image of a pass a comparison refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ImageKind {
    /// The image produced by running the pass.
    Out,

    /// The reference image for the pass.
    Ref,
}

impl ImageKind {
    /// Returns the name used in diff log headers and thumbnail file names.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Out => "out",
            ImageKind::Ref => "ref",
        }
    }

    /// Returns the single-letter prefix used in difference image file names.
    pub fn initial(self) -> char {
        match self {
            ImageKind::Out => 'o',
            ImageKind::Ref => 'r',
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image slot: a kind of image for a given pass, e.g. `hydra:out`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageSlot {
    /// The pass name.
    pub pass: String,

    /// The kind of image.
    pub kind: ImageKind,
}

impl ImageSlot {
    /// Creates a new slot.
    pub fn new(pass: impl Into<String>, kind: ImageKind) -> Self {
        Self {
            pass: pass.into(),
            kind,
        }
    }
}

/// A comparison between two image slots, performed by the diff engine after every run.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DiffCheck {
    /// The image under test.
    pub out: ImageSlot,

    /// The image it is compared against.
    pub reference: ImageSlot,
}

impl DiffCheck {
    /// The output of `pass` compared against the reference of the same pass.
    pub fn same_pass(pass: &str) -> Self {
        Self {
            out: ImageSlot::new(pass, ImageKind::Out),
            reference: ImageSlot::new(pass, ImageKind::Ref),
        }
    }

    /// Returns true if an error reported by this comparison fails the test.
    ///
    /// Only comparisons between the output and the reference of a single pass are fatal.
    pub fn is_hard_fail(&self) -> bool {
        self.out.pass == self.reference.pass && self.out.kind != self.reference.kind
    }

    /// Returns the key used for this check in diff log headers, e.g. `usd_out-usd_ref`.
    pub fn log_key(&self) -> String {
        format!(
            "{}_{}-{}_{}",
            self.out.pass, self.out.kind, self.reference.pass, self.reference.kind
        )
    }

    /// Returns the file name of the difference image, e.g. `dif.ousd-rusd.png`.
    pub fn diff_image_name(&self) -> String {
        format!(
            "dif.{}{}-{}{}.png",
            self.out.kind.initial(),
            self.out.pass,
            self.reference.kind.initial(),
            self.reference.pass
        )
    }

    /// Returns the passes whose run produces an image compared by this check.
    pub fn producing_passes(&self) -> impl Iterator<Item = &str> {
        [&self.out, &self.reference]
            .into_iter()
            .filter(|slot| slot.kind == ImageKind::Out)
            .map(|slot| slot.pass.as_str())
    }
}

impl fmt::Display for DiffCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.out.pass, self.out.kind, self.reference.pass, self.reference.kind
        )
    }
}

fn parse_kind(input: &str, kind: &str) -> Result<ImageKind, DiffCheckParseError> {
    match kind {
        "out" => Ok(ImageKind::Out),
        "ref" => Ok(ImageKind::Ref),
        other => Err(DiffCheckParseError::new(
            input,
            format!("unknown image kind `{other}` (expected `out` or `ref`)"),
        )),
    }
}

impl FromStr for DiffCheck {
    type Err = DiffCheckParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The format is "<pass>:<kind>-<pass>:<kind>". Pass names may contain '-', so split on
        // the kind that ends the first slot.
        let format_error = || DiffCheckParseError::new(s, "expected `<pass>:<kind>-<pass>:<kind>`");

        let (out_pass, rest) = s.split_once(':').ok_or_else(format_error)?;
        let (out_kind, rest) = rest.split_once('-').ok_or_else(format_error)?;
        let (ref_pass, ref_kind) = rest.rsplit_once(':').ok_or_else(format_error)?;
        if out_pass.is_empty() || ref_pass.is_empty() {
            return Err(DiffCheckParseError::new(s, "pass names must not be empty"));
        }

        Ok(Self {
            out: ImageSlot::new(out_pass, parse_kind(s, out_kind)?),
            reference: ImageSlot::new(ref_pass, parse_kind(s, ref_kind)?),
        })
    }
}

impl<'de> Deserialize<'de> for DiffCheck {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
