// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test parameters, read from the `PARAMS:` block of a test's README.
//!
//! The first line of a README is the test summary. Everything after a line starting with
//! `PARAMS:` is a TOML document with a fixed set of keys:
//!
//! ```text
//! Checks that motion blur on instanced curves matches the reference
//!
//! PARAMS:
//! scene = "curves.usda"
//! kick_params = ["-t", "4"]
//! skip_passes = ["hydra"]
//! environment = { USD_SHADE_STRICT = "1" }
//! ```
//!
//! String values of `script` and `kick_params` may refer to tool symbols such as
//! `{oiiotool_path}`.

use crate::{diff::DiffThresholds, errors::ParamsParseError};
use camino::Utf8Path;
use indexmap::IndexMap;
use rendertest_metadata::TestStatus;
use serde::Deserialize;

/// The marker that starts the parameter block.
pub const PARAMS_MARKER: &str = "PARAMS:";

/// Extra arguments for the generated `kick` command line.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KickParams {
    /// Arguments as a single string.
    Line(String),

    /// Arguments as a list of strings, joined with spaces.
    List(Vec<String>),
}

impl KickParams {
    /// Returns the arguments as a single command line fragment.
    pub fn to_line(&self) -> String {
        match self {
            KickParams::Line(line) => line.clone(),
            KickParams::List(list) => list.join(" "),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            KickParams::Line(line) => line.trim().is_empty(),
            KickParams::List(list) => list.is_empty(),
        }
    }
}

impl Default for KickParams {
    fn default() -> Self {
        KickParams::Line(String::new())
    }
}

/// Whether the scene is first resaved by the renderer and the resaved scene rendered instead.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Resaved {
    /// `true` resaves to `.ass`, `false` disables resaving.
    Enabled(bool),

    /// Resave to a file with this extension.
    Extension(String),
}

impl Resaved {
    /// Returns the extension of the resaved scene, if resaving is enabled.
    pub fn extension(&self) -> Option<&str> {
        match self {
            Resaved::Enabled(true) => Some("ass"),
            Resaved::Enabled(false) => None,
            Resaved::Extension(ext) if ext.is_empty() => None,
            Resaved::Extension(ext) => Some(ext),
        }
    }
}

impl Default for Resaved {
    fn default() -> Self {
        Resaved::Enabled(false)
    }
}

/// The parameters of a test.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TestParams {
    /// The command script, one command per line. Generated if not set.
    pub script: Option<String>,

    /// Space-separated plugin source files or glob patterns in `data/`.
    pub plugin_sources: String,

    /// Space-separated program source files in `data/`.
    pub program_sources: String,

    /// The name of the compiled program.
    pub program_name: String,

    /// The image produced by the test, relative to its working directory. Empty if the test
    /// doesn't produce one.
    pub output_image: String,

    /// The reference image, relative to the test source directory.
    pub reference_image: String,

    /// Render progressively instead of with `-dp`.
    pub progressive: bool,

    /// Extra arguments for the generated `kick` command line.
    pub kick_params: KickParams,

    /// Resave the scene before rendering it.
    pub resaved: Resaved,

    /// Pass `-forceexpand` when resaving.
    pub forceexpand: bool,

    /// The scene rendered by the generated command line.
    pub scene: String,

    /// Image tool `--hardfail` threshold.
    pub diff_hardfail: f64,

    /// Image tool `--fail` threshold.
    pub diff_fail: f64,

    /// Image tool `--failpercent` threshold.
    pub diff_failpercent: f64,

    /// Image tool `--warnpercent` threshold.
    pub diff_warnpercent: f64,

    /// Environment variables set for every command, in order.
    pub environment: IndexMap<String, String>,

    /// The expected result. Anything but `OK` marks a negative test.
    pub force_result: TestStatus,

    /// Passes this test doesn't run.
    pub skip_passes: Vec<String>,

    /// Generate PNG thumbnails of the output and reference images.
    pub make_thumbnails: bool,
}

impl Default for TestParams {
    fn default() -> Self {
        let thresholds = DiffThresholds::default();
        Self {
            script: None,
            plugin_sources: "*.c *.cc *.cpp *.cxx".to_owned(),
            program_sources: String::new(),
            program_name: "test".to_owned(),
            output_image: "testrender.tif".to_owned(),
            reference_image: String::new(),
            progressive: false,
            kick_params: KickParams::default(),
            resaved: Resaved::default(),
            forceexpand: false,
            scene: "test.ass".to_owned(),
            diff_hardfail: thresholds.hardfail,
            diff_fail: thresholds.fail,
            diff_failpercent: thresholds.failpercent,
            diff_warnpercent: thresholds.warnpercent,
            environment: IndexMap::new(),
            force_result: TestStatus::Ok,
            skip_passes: Vec::new(),
            make_thumbnails: true,
        }
    }
}

impl TestParams {
    /// Parses the parameters out of README contents. A README without a `PARAMS:` line uses the
    /// defaults.
    pub fn from_readme(
        readme_path: &Utf8Path,
        contents: &str,
        symbols: &IndexMap<String, String>,
    ) -> Result<Self, ParamsParseError> {
        let Some(block) = params_block(contents) else {
            return Ok(Self::default());
        };
        let mut params: TestParams = toml::from_str(block)
            .map_err(|error| ParamsParseError::new(readme_path, error))?;

        if let Some(script) = &mut params.script {
            *script = substitute_symbols(script, symbols);
        }
        params.kick_params = match params.kick_params {
            KickParams::Line(line) => KickParams::Line(substitute_symbols(&line, symbols)),
            KickParams::List(list) => KickParams::List(
                list.iter()
                    .map(|arg| substitute_symbols(arg, symbols))
                    .collect(),
            ),
        };
        Ok(params)
    }

    /// Returns the image comparison thresholds.
    pub fn thresholds(&self) -> DiffThresholds {
        DiffThresholds {
            hardfail: self.diff_hardfail,
            fail: self.diff_fail,
            failpercent: self.diff_failpercent,
            warnpercent: self.diff_warnpercent,
        }
    }

    /// Returns the extra `kick` arguments, if any.
    pub fn kick_params_line(&self) -> Option<String> {
        (!self.kick_params.is_empty()).then(|| self.kick_params.to_line())
    }
}

/// Returns the first line of a README, the human-readable summary of the test.
pub fn readme_summary(contents: &str) -> &str {
    contents.lines().next().unwrap_or_default().trim_end()
}

fn params_block(contents: &str) -> Option<&str> {
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        if let Some(rest) = line.strip_prefix(PARAMS_MARKER) {
            // Anything on the marker line itself is part of the block.
            let start = offset + PARAMS_MARKER.len();
            return Some(if rest.trim().is_empty() {
                &contents[offset + line.len()..]
            } else {
                &contents[start..]
            });
        }
        offset += line.len();
    }
    None
}

fn substitute_symbols(input: &str, symbols: &IndexMap<String, String>) -> String {
    let mut output = input.to_owned();
    for (name, value) in symbols {
        let placeholder = format!("{{{name}}}");
        if output.contains(&placeholder) {
            output = output.replace(&placeholder, value);
        }
    }
    output
}
