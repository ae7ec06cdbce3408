// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use rendertest_runner::{
    config::{DiffCheck, JunitSettings},
    reporter::{
        html::{IndexOptions, write_index},
        write_json_report, write_junit_report,
    },
};

#[test]
fn suite_reports() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", GOOD_RENDER, "")?;
    fixture.add_test("test_0002", BAD_RENDER, "")?;
    fixture.add_test("test_0003", "$exit 2", "")?;

    let opts = RunOptions {
        passes: vec!["usd".to_owned()],
        ..RunOptions::default()
    };
    let suite = run_suite(&fixture, &opts)?;
    let output_dir = fixture.output_dir();

    let json_path = write_json_report(&suite, &output_dir)?;
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path)?)?;
    let results: Vec<(&str, &str)> = json
        .as_array()
        .expect("report is an array")
        .iter()
        .map(|entry| {
            (
                entry["name"].as_str().unwrap_or_default(),
                entry["result"].as_str().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        results,
        [
            ("test_0001", "OK"),
            ("test_0002", "FAILED"),
            ("test_0003", "FAILED"),
        ]
    );

    let settings = JunitSettings {
        name: "arnold-usd".to_owned(),
        url: Some("https://ci.example.com/42".to_owned()),
    };
    let junit_path = write_junit_report(&suite, &settings, &output_dir)?;
    assert_eq!(junit_path, output_dir.join("arnold-usd.xml"));
    let xml = std::fs::read_to_string(&junit_path)?;
    ensure!(xml.contains(r#"tests="3""#), "{xml}");
    ensure!(xml.contains(r#"failures="2""#), "{xml}");
    ensure!(
        xml.contains("https://ci.example.com/42/index.html"),
        "{xml}"
    );
    ensure!(
        xml.contains("https://ci.example.com/42/test_0002/test_0002.html"),
        "{xml}"
    );

    let mut report_params = IndexMap::new();
    report_params.insert("revision".to_owned(), "abc123 <main>".to_owned());
    let diff_checks = [DiffCheck::same_pass("usd")];
    let index_path = write_index(
        &suite,
        &output_dir,
        &IndexOptions {
            diff_checks: &diff_checks,
            report_params: &report_params,
            only_failed: true,
        },
    )?;
    let index = std::fs::read_to_string(&index_path)?;
    ensure!(index.contains("abc123 &lt;main&gt;"), "{index}");
    ensure!(index.contains(r#"<a href="test_0002/test_0002.html">"#), "{index}");
    ensure!(index.contains(r#"<img src="test_0002/dif.ousd-rusd.png""#), "{index}");
    ensure!(index.contains("FAILURE"), "diff excerpt is shown: {index}");
    ensure!(!index.contains("test_0001/test_0001.html"), "{index}");
    ensure!(!fixture.target("test_0001").exists(), "passing test dir is kept");
    ensure!(fixture.target("test_0002").exists());
    Ok(())
}
