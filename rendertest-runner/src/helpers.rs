// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for rendertest-runner.

use camino::{Utf8Path, Utf8PathBuf};
use std::io;

/// The prefix that marks a directory or a group token as a test name.
pub const TEST_PREFIX: &str = "test_";

/// Returns true if `token` names a test rather than a group.
#[inline]
pub fn is_test_name(token: &str) -> bool {
    token.starts_with(TEST_PREFIX)
}

/// Returns the number a test is sorted by: `test_0012` sorts as `12.0`.
///
/// Names whose suffix isn't a number sort as `0.0`.
pub fn test_sort_key(name: &str) -> f64 {
    name.get(TEST_PREFIX.len()..)
        .and_then(|suffix| suffix.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }
}

/// Returns the name of the environment variable used for searching for
/// dynamic libraries.
pub(crate) fn dylib_path_envvar() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        // DYLD_LIBRARY_PATH is searched before the install path and has a significant performance
        // penalty, so use the fallback variable.
        "DYLD_FALLBACK_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// The separator between entries of `PATH`-like variables.
pub(crate) const PATH_LIST_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// Returns `dir` followed by the entries of `existing`, if any.
pub(crate) fn prepend_path_list(dir: &Utf8Path, existing: Option<&str>) -> String {
    match existing {
        Some(existing) if !existing.is_empty() => {
            format!("{dir}{PATH_LIST_SEPARATOR}{existing}")
        }
        _ => dir.to_string(),
    }
}

/// Returns `path` with `.<infix>` inserted before its extension: `ref/reference.tif` becomes
/// `ref/reference.usd.tif`.
pub(crate) fn insert_before_extension(path: &Utf8Path, infix: &str) -> Utf8PathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path.with_file_name(format!("{stem}.{infix}.{ext}")),
        (Some(stem), None) => path.with_file_name(format!("{stem}.{infix}")),
        _ => Utf8PathBuf::from(format!("{path}.{infix}")),
    }
}

/// Removes a file, ignoring it if it doesn't exist.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Escapes text for inclusion in HTML element content and attribute values.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("test_0012", 12.0 ; "numbered")]
    #[test_case("test_0000", 0.0 ; "zero")]
    #[test_case("test_abc", 0.0 ; "not a number")]
    #[test_case("test_", 0.0 ; "empty suffix")]
    #[test_case("test", 0.0 ; "short")]
    fn sort_key(name: &str, expected: f64) {
        assert_eq!(test_sort_key(name), expected);
    }

    #[test_case("ref/reference.tif", "usd", "ref/reference.usd.tif" ; "with extension")]
    #[test_case("testrender", "hydra", "testrender.hydra" ; "without extension")]
    #[test_case("/abs/out.v2.exr", "usd", "/abs/out.v2.usd.exr" ; "dotted stem")]
    fn pass_infix(path: &str, pass: &str, expected: &str) {
        assert_eq!(
            insert_before_extension(Utf8Path::new(path), pass),
            Utf8PathBuf::from(expected)
        );
    }

    #[test]
    fn prepend() {
        let dir = Utf8Path::new("/opt/sdk/bin");
        assert_eq!(prepend_path_list(dir, None), "/opt/sdk/bin");
        assert_eq!(prepend_path_list(dir, Some("")), "/opt/sdk/bin");
        assert_eq!(
            prepend_path_list(dir, Some("/usr/bin")),
            format!("/opt/sdk/bin{PATH_LIST_SEPARATOR}/usr/bin")
        );
    }

    #[test]
    fn escape() {
        assert_eq!(
            html_escape(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }
}
