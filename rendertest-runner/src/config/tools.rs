// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;

/// Locations of the external tools used while running a suite.
///
/// Tools that aren't configured explicitly are looked up in the `bin` directory of the renderer
/// SDK, or on `PATH` if no SDK root is known.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolPaths {
    /// The root directory of the renderer SDK (containing `bin` and `python`).
    #[serde(default)]
    pub sdk_root: Option<Utf8PathBuf>,

    /// The image info, diff and thumbnail tool.
    #[serde(default)]
    pub image_tool: Option<Utf8PathBuf>,

    /// The texture conversion tool.
    #[serde(default)]
    pub texture_tool: Option<Utf8PathBuf>,

    /// The Python interpreter placed in front of `.py` commands.
    #[serde(default)]
    pub python: Option<Utf8PathBuf>,

    /// Other named tools, available to README parameters as `{<name>_path}`.
    #[serde(default)]
    pub extra: IndexMap<String, Utf8PathBuf>,
}

impl ToolPaths {
    /// Overlays `other` on top of `self`: any tool set in `other` wins.
    pub fn merge(&mut self, other: ToolPaths) {
        if other.sdk_root.is_some() {
            self.sdk_root = other.sdk_root;
        }
        if other.image_tool.is_some() {
            self.image_tool = other.image_tool;
        }
        if other.texture_tool.is_some() {
            self.texture_tool = other.texture_tool;
        }
        if other.python.is_some() {
            self.python = other.python;
        }
        self.extra.extend(other.extra);
    }

    /// Returns the path to the image tool.
    pub fn image_tool(&self) -> Utf8PathBuf {
        self.resolve(self.image_tool.as_deref(), "oiiotool")
    }

    /// Returns the path to the texture tool.
    pub fn texture_tool(&self) -> Utf8PathBuf {
        self.resolve(self.texture_tool.as_deref(), "maketx")
    }

    /// Returns the Python interpreter.
    pub fn python(&self) -> Utf8PathBuf {
        match &self.python {
            Some(python) => python.clone(),
            None if cfg!(windows) => "python".into(),
            None => "python3".into(),
        }
    }

    /// Returns the SDK directory `subdir` (e.g. `bin`), if an SDK root is configured.
    pub fn sdk_dir(&self, subdir: &str) -> Option<Utf8PathBuf> {
        self.sdk_root.as_ref().map(|root| root.join(subdir))
    }

    /// Returns the symbols that README parameters may refer to as `{name}`.
    pub fn symbols(&self, common_dir: Option<&Utf8Path>) -> IndexMap<String, String> {
        let mut symbols = IndexMap::new();
        if let Some(common_dir) = common_dir {
            symbols.insert("testsuite_common".to_owned(), common_dir.to_string());
        }
        symbols.insert("oiiotool_path".to_owned(), self.image_tool().into_string());
        symbols.insert("maketx_path".to_owned(), self.texture_tool().into_string());
        symbols.insert("python_path".to_owned(), self.python().into_string());
        for (name, path) in &self.extra {
            symbols.insert(format!("{name}_path"), path.to_string());
        }
        symbols
    }

    fn resolve(&self, explicit: Option<&Utf8Path>, name: &str) -> Utf8PathBuf {
        if let Some(explicit) = explicit {
            return explicit.to_owned();
        }
        let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);
        match self.sdk_dir("bin") {
            Some(bin) => bin.join(file_name),
            None => file_name.into(),
        }
    }
}
