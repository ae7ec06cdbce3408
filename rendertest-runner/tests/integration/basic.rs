// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use rendertest_metadata::TestStatus;
use rendertest_runner::{suite::IgnoreReason, test_case::TestCase};
use std::time::Duration;

fn statuses(suite: &rendertest_runner::suite::TestSuite) -> Vec<(&str, TestStatus)> {
    suite
        .prepared_tests()
        .iter()
        .map(|test| (test.name(), test.status()))
        .collect()
}

#[test]
fn passing_test_leaves_artifacts() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", GOOD_RENDER, "")?;

    let suite = run_suite(&fixture, &RunOptions::default())?;
    assert_eq!(statuses(&suite), [("test_0001", TestStatus::Ok)]);

    let target = fixture.target("test_0001");
    for file in [
        "README",
        "test_0001.usd.log",
        "test_0001.hydra.log",
        "testrender.usd.tif",
        "testrender.hydra.tif",
        "test_0001.diff.log",
        "out.usd.png",
        "ref.hydra.png",
        "dif.ousd-rusd.png",
        "test_0001.html",
    ] {
        ensure!(target.join(file).exists(), "{file} is missing");
    }
    ensure!(!target.join("testrender.tif").exists(), "output was not renamed");

    let log = std::fs::read_to_string(target.join("test_0001.usd.log"))?;
    ensure!(log.starts_with("Executing echo good > testrender.tif"), "{log}");
    let diff_log = std::fs::read_to_string(target.join("test_0001.diff.log"))?;
    ensure!(diff_log.contains("DIFF usd_out-usd_ref\n"), "{diff_log}");
    ensure!(diff_log.contains("DIFF hydra_out-hydra_ref\n"), "{diff_log}");

    let record = fixture.record("test_0001").expect("record is written");
    assert_eq!(record.result, TestStatus::Ok);
    assert_eq!(record.name, "test_0001");
    Ok(())
}

#[test]
fn skip_pass_group() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", GOOD_RENDER, "")?;
    fixture.add_test("test_0002", GOOD_RENDER, "")?;
    fixture.write_groups("skip_hydra: test_0002\n")?;

    let suite = run_suite(&fixture, &RunOptions::default())?;
    assert_eq!(
        statuses(&suite),
        [("test_0001", TestStatus::Ok), ("test_0002", TestStatus::Ok)]
    );

    let target = fixture.target("test_0002");
    ensure!(target.join("test_0002.usd.log").exists());
    ensure!(!target.join("test_0002.hydra.log").exists());
    let diff_log = std::fs::read_to_string(target.join("test_0002.diff.log"))?;
    ensure!(diff_log.contains("DIFF usd_out-usd_ref"), "{diff_log}");
    ensure!(!diff_log.contains("hydra"), "{diff_log}");
    Ok(())
}

#[test]
fn failures_are_classified() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", BAD_RENDER, "")?;
    fixture.add_test("test_0002", "$echo rendering; exit 3", "")?;
    fixture.add_test("test_0003", "$kill -SEGV $$", "")?;
    // The command succeeds but produces no image while a reference exists.
    fixture.add_test("test_0004", "$echo no image", "")?;

    let suite = run_suite(&fixture, &RunOptions::default())?;
    assert_eq!(
        statuses(&suite),
        [
            ("test_0001", TestStatus::Failed),
            ("test_0002", TestStatus::Failed),
            ("test_0003", TestStatus::Crashed),
            ("test_0004", TestStatus::Failed),
        ]
    );

    // Images are only compared when the passes producing them succeeded.
    let diff_log = fixture.target("test_0002").join("test_0002.diff.log");
    ensure!(!diff_log.exists(), "no comparison expected");
    let log = std::fs::read_to_string(fixture.target("test_0002").join("test_0002.usd.log"))?;
    ensure!(log.contains("rendering"), "{log}");
    Ok(())
}

#[test]
fn negative_test() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", "$exit 1", "force_result = \"FAILED\"")?;
    fixture.add_test("test_0002", GOOD_RENDER, "force_result = \"FAILED\"")?;

    let suite = run_suite(&fixture, &RunOptions::default())?;
    assert_eq!(
        statuses(&suite),
        [("test_0001", TestStatus::Ok), ("test_0002", TestStatus::Failed)]
    );
    Ok(())
}

#[test]
fn timeout() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    fixture.add_test("test_0001", "$sleep 10", "")?;

    let opts = RunOptions {
        timeout: Some(Duration::from_millis(300)),
        ..RunOptions::default()
    };
    let suite = run_suite(&fixture, &opts)?;
    assert_eq!(statuses(&suite), [("test_0001", TestStatus::TimedOut)]);
    let record = fixture.record("test_0001").expect("record is written");
    assert_eq!(record.result, TestStatus::TimedOut);
    ensure!(
        record.duration < 5.0,
        "command was not stopped: {}",
        record.duration
    );

    // The hydra pass is skipped once the usd pass times out.
    let target = fixture.target("test_0001");
    ensure!(target.join("test_0001.usd.log").exists());
    ensure!(
        !target.join("test_0001.hydra.log").exists(),
        "hydra pass ran after the usd pass timed out"
    );
    let pass_status = suite.prepared_tests()[0].state().pass_status.clone();
    assert_eq!(
        pass_status.keys().map(String::as_str).collect::<Vec<_>>(),
        ["usd"]
    );
    Ok(())
}

#[test]
fn run_error_is_a_failure() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    // The working directory disappears, so the pass log can't be written.
    fixture.add_test("test_0001", "$rm -rf \"$(pwd)\"", "")?;
    fixture.add_test("test_0002", GOOD_RENDER, "")?;

    let suite = run_suite(&fixture, &RunOptions::default())?;
    assert_eq!(
        statuses(&suite),
        [("test_0001", TestStatus::Failed), ("test_0002", TestStatus::Ok)]
    );
    let report = suite.report();
    assert_eq!(report.failed, 1);
    ensure!(report.failed(0.0), "a run error must fail the suite");
    Ok(())
}

#[test]
fn flaky_test_is_unstable() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    // Fails the first time each pass runs, then renders a good image.
    let marker = fixture.state_dir().join("attempted.$ARNOLD_TESTSUITE_PASS");
    let script = format!(
        "$if [ -f {marker} ]; then echo good > testrender.tif; else touch {marker}; exit 1; fi"
    );
    fixture.add_test("test_0001", &script, "")?;
    fixture.add_test("test_0002", BAD_RENDER, "")?;

    let opts = RunOptions {
        reruns: 2,
        ..RunOptions::default()
    };
    let suite = run_suite(&fixture, &opts)?;
    assert_eq!(
        statuses(&suite),
        [
            ("test_0001", TestStatus::Unstable),
            ("test_0002", TestStatus::Failed),
        ]
    );

    // The working directory shows the first, failing attempt.
    let target = fixture.target("test_0001");
    ensure!(!target.join("testrender.usd.tif").exists(), "rerun artifacts were kept");
    ensure!(target.join("test_0001.usd.log").exists());
    let record = fixture.record("test_0001").expect("record is written");
    assert_eq!(record.result, TestStatus::Unstable);

    let report = suite.report();
    assert_eq!((report.unstable, report.failed), (1, 1));
    Ok(())
}

#[test]
fn parallel_run() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    let names: Vec<String> = (1..=5).map(|i| format!("test_{i:04}")).collect();
    for name in &names {
        fixture.add_test(name, &format!("$sleep 0.2; {}", &GOOD_RENDER[1..]), "")?;
    }

    let opts = RunOptions {
        threads: 2,
        ..RunOptions::default()
    };
    let suite = run_suite(&fixture, &opts)?;
    let report = suite.report();
    assert_eq!((report.total, report.passed), (5, 5));
    for name in &names {
        let record = fixture.record(name).expect("record is written");
        assert_eq!(record.result, TestStatus::Ok, "{name}");
    }
    ensure!(!report.failed(0.0));
    Ok(())
}

#[test]
fn group_selection() -> Result<()> {
    let fixture = SuiteFixture::new()?;
    for name in ["test_0001", "test_0002", "test_0003", "test_0004"] {
        fixture.add_test(name, GOOD_RENDER, "")?;
    }
    // test_0005 has no README and can't be loaded.
    std::fs::create_dir_all(fixture.suite_root().join("test_0005"))?;
    fixture.write_groups("fast: test_0001 test_0003 test_0005\nignore: test_0003\n")?;

    let opts = RunOptions {
        patterns: vec![":fast".to_owned()],
        passes: vec!["usd".to_owned()],
        ..RunOptions::default()
    };
    let suite = run_suite(&fixture, &opts)?;
    let names: Vec<&str> = suite.prepared_tests().iter().map(TestCase::name).collect();
    assert_eq!(names, ["test_0001"]);
    assert_eq!(
        suite.ignored().reason("test_0003"),
        Some(IgnoreReason::Ignore)
    );
    assert_eq!(suite.ignored().reason("test_0005"), Some(IgnoreReason::Load));
    ensure!(!fixture.target("test_0002").exists());
    ensure!(!fixture.target("test_0003").exists());

    let report = suite.report();
    assert_eq!(
        report.summary_text(),
        "Ran 1 regression tests (2 skipped) - ALL TESTS OK"
    );
    Ok(())
}
