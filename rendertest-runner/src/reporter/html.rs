// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTML reports: a detail page per test and a suite index.
//!
//! Both are produced by filling `{{key}}` placeholders in the templates under `templates/`.
//! Placeholders without a value are left empty.

use super::suite_records;
use crate::{
    config::DiffCheck,
    diff::{diff_log_excerpts, out_slot, ref_slot, thumbnail_name},
    errors::WriteReportError,
    helpers::html_escape,
    params::readme_summary,
    suite::{IgnoreReason, TestSuite},
    test_case::TestCase,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rendertest_metadata::TestStatus;
use std::io;
use swrite::{SWrite, swrite};
use tracing::debug;

const TEST_TEMPLATE: &str = include_str!("../../templates/test.html.template");
const SUITE_TEMPLATE: &str = include_str!("../../templates/testsuite.html.template");

/// The file name of the suite index.
pub const INDEX_FILE: &str = "index.html";

/// Report parameters shown in the index header, unless overridden with `--report-param`.
pub const REPORT_PARAMS: [&str; 12] = [
    "project",
    "arnold_version",
    "revision",
    "repo_url",
    "custom1_name",
    "custom1_value",
    "custom2_name",
    "custom2_value",
    "custom3_name",
    "custom3_value",
    "patterns",
    "tags",
];

/// Writes `<name>.html` to the working directory of `test`, showing the images of
/// `primary_pass`.
pub fn write_test_page(test: &TestCase, target: &Utf8Path, primary_pass: &str) -> io::Result<()> {
    let thumbnail = |file: &str, title: &str| {
        target.join(file).exists().then(|| thumbnail_html(file, title))
    };
    let new_image = thumbnail(&thumbnail_name(&out_slot(primary_pass)), "new image");
    let ref_image = thumbnail(&thumbnail_name(&ref_slot(primary_pass)), "ref image");
    let diff_image = thumbnail(
        &DiffCheck::same_pass(primary_pass).diff_image_name(),
        "difference image",
    );

    let mut values = IndexMap::new();
    values.insert("name", html_escape(test.name()));
    values.insert("status", test.status().label().to_owned());
    values.insert("readme", html_escape(test.readme()));
    values.insert("new_image", new_image.unwrap_or_else(|| "&nbsp;".to_owned()));
    values.insert("ref_image", ref_image.unwrap_or_else(|| "&nbsp;".to_owned()));
    values.insert(
        "diff_image",
        diff_image.unwrap_or_else(|| "&nbsp;<b>no difference</b>&nbsp;".to_owned()),
    );

    let path = target.join(format!("{}.html", test.name()));
    std::fs::write(path, fill_template(TEST_TEMPLATE, &values))
}

fn thumbnail_html(file: &str, title: &str) -> String {
    let file = html_escape(file);
    format!(
        "<div id=\"thumbnail\"><a href=\"{file}\" target=\"_blank\"><img src=\"{file}\" \
         width=\"160\" height=\"120\" alt=\"{title}\" title=\"{title} (opens in a new tab)\"/>\
         </a></div><img id=\"previewImage\" src=\"{file}\"/>"
    )
}

/// Options for [`write_index`].
#[derive(Clone, Debug)]
pub struct IndexOptions<'a> {
    /// The image comparisons shown for every test.
    pub diff_checks: &'a [DiffCheck],

    /// Values for the report parameters, e.g. `revision`.
    pub report_params: &'a IndexMap<String, String>,

    /// Only list tests that didn't pass, and delete the working directories of the others.
    pub only_failed: bool,
}

/// Writes `index.html` to `output_dir`.
pub fn write_index(
    suite: &TestSuite,
    output_dir: &Utf8Path,
    opts: &IndexOptions<'_>,
) -> Result<Utf8PathBuf, WriteReportError> {
    let report = suite.report();
    let mut values: IndexMap<&str, String> =
        REPORT_PARAMS.iter().map(|key| (*key, String::new())).collect();
    for (key, value) in opts.report_params {
        values.insert(key.as_str(), html_escape(value));
    }
    let counts = [
        ("total", report.total),
        ("passed", report.passed),
        ("failed", report.failed),
        ("crashed", report.crashed),
        ("timedout", report.timedout),
        ("unstable", report.unstable),
        ("skipped", report.skipped),
        ("skipped_ignored", report.skipped_for(IgnoreReason::Ignore)),
        ("skipped_os", report.skipped_for(IgnoreReason::Os)),
        (
            "skipped_other",
            report.skipped - report.skipped_for(IgnoreReason::Ignore)
                - report.skipped_for(IgnoreReason::Os),
        ),
    ];
    for (key, count) in counts {
        values.insert(key, count.to_string());
    }
    values.insert(
        "total_time",
        format!("{:.1}s", report.total_time.as_secs_f64()),
    );

    let mut pass_headers = String::new();
    for check in opts.diff_checks {
        swrite!(pass_headers, "<th>{}</th>", html_escape(&check.to_string()));
    }
    values.insert("pass_headers", pass_headers);

    let mut rows = String::new();
    for (test, record) in suite_records(suite) {
        let status = record.as_ref().map(|record| record.result);
        if opts.only_failed && matches!(status, Some(TestStatus::Ok | TestStatus::Skipped)) {
            if let Some(target) = test.target() {
                debug!("{}: passed, removing {target}", test.name());
                std::fs::remove_dir_all(target).map_err(|error| WriteReportError::Fs {
                    path: target.to_owned(),
                    error,
                })?;
            }
            continue;
        }
        let duration = record.as_ref().map_or(0.0, |record| record.duration);
        write_row(&mut rows, test, status, duration, opts.diff_checks);
    }
    values.insert("tests", rows);

    let path = output_dir.join(INDEX_FILE);
    std::fs::write(&path, fill_template(SUITE_TEMPLATE, &values)).map_err(|error| {
        WriteReportError::Fs {
            path: path.clone(),
            error,
        }
    })?;
    Ok(path)
}

fn write_row(
    rows: &mut String,
    test: &TestCase,
    status: Option<TestStatus>,
    duration: f64,
    diff_checks: &[DiffCheck],
) {
    let name = html_escape(test.name());
    let summary = readme_summary(test.readme());
    let details = test
        .readme()
        .split_once('\n')
        .map_or("", |(_, details)| details.trim());
    let status = status.map_or("unknown", TestStatus::summary_word);

    swrite!(rows, "<tr>");
    swrite!(rows, "<td><a href=\"{name}/{name}.html\">{name}</a></td>");
    swrite!(
        rows,
        "<td><b>{}</b><pre>{}</pre></td>",
        html_escape(summary),
        html_escape(details)
    );
    swrite!(rows, "<td class=\"{status}\">{status}</td>");
    swrite!(rows, "<td>{duration:.2}s</td>");

    let target = test.target();
    let excerpts = target
        .map(|target| target.join(format!("{}.diff.log", test.name())))
        .and_then(|log| std::fs::read_to_string(log).ok())
        .map(|contents| diff_log_excerpts(&contents))
        .unwrap_or_default();
    for check in diff_checks {
        swrite!(rows, "<td>");
        let images = [
            thumbnail_name(&check.out),
            thumbnail_name(&check.reference),
            check.diff_image_name(),
        ];
        for image in images {
            if target.is_some_and(|target| target.join(&image).exists()) {
                let href = format!("{name}/{}", html_escape(&image));
                swrite!(
                    rows,
                    "<a href=\"{href}\" target=\"_blank\"><img src=\"{href}\" width=\"160\" \
                     height=\"120\"/></a>"
                );
            }
        }
        if let Some(excerpt) = excerpts.get(&check.log_key()) {
            swrite!(rows, "<pre>{}</pre>", html_escape(excerpt));
        }
        swrite!(rows, "</td>");
    }
    swrite!(rows, "</tr>\n");
}

/// Replaces every `{{key}}` in `template` with its value.
pub fn fill_template(template: &str, values: &IndexMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = values.get(key) {
                    out.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;

    #[test]
    fn template_placeholders() {
        let values = indexmap! {
            "name" => "test_0001".to_owned(),
            "status" => "OK".to_owned(),
        };
        assert_eq!(
            fill_template("<h1>{{name}}</h1> {{ status }} {{missing}}!", &values),
            "<h1>test_0001</h1> OK !"
        );
        assert_eq!(fill_template("unterminated {{name", &values), "unterminated {{name");
    }

    #[test]
    fn test_page() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("suite");
        std::fs::create_dir_all(source.join("test_0001")).unwrap();
        std::fs::write(
            source.join("test_0001/README"),
            "Sphere <toon>\n\nLonger description.\n",
        )
        .unwrap();
        let test = TestCase::load(&source, "test_0001", &IndexMap::new()).unwrap();

        let target = dir.path().join("out");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("out.usd.png"), "").unwrap();
        write_test_page(&test, &target, "usd").unwrap();

        let page = std::fs::read_to_string(target.join("test_0001.html")).unwrap();
        assert!(page.contains("<title>test_0001 - SKIPPED</title>"), "{page}");
        assert!(page.contains("Sphere &lt;toon&gt;"), "{page}");
        assert!(page.contains(r#"<img src="out.usd.png""#), "{page}");
        assert!(!page.contains("ref.usd.png"), "{page}");
        assert!(page.contains("&nbsp;<b>no difference</b>&nbsp;"), "{page}");
    }
}
