// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::suite_records;
use crate::{config::JunitSettings, errors::WriteReportError, suite::TestSuite};
use camino::{Utf8Path, Utf8PathBuf};
use quick_junit::{
    NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite as JunitSuite,
};
use rendertest_metadata::{TestRecord, TestStatus};
use std::{fs::File, time::Duration};

/// Writes `<name>.xml` to `output_dir`, with one test case per prepared test.
pub fn write_junit_report(
    suite: &TestSuite,
    settings: &JunitSettings,
    output_dir: &Utf8Path,
) -> Result<Utf8PathBuf, WriteReportError> {
    let mut junit_suite = JunitSuite::new(settings.name.as_str());
    if let Some(url) = &settings.url {
        junit_suite.add_property(Property::new("link", format!("{url}/index.html")));
    }
    for (test, record) in suite_records(suite) {
        junit_suite.add_test_case(junit_test_case(
            test.name(),
            test.summary(),
            record.as_ref(),
            settings,
        ));
    }

    let mut report = Report::new(settings.name.as_str());
    report.add_test_suite(junit_suite);

    let path = output_dir.join(format!("{}.xml", settings.name));
    let file = File::create(&path).map_err(|error| WriteReportError::Fs {
        path: path.clone(),
        error,
    })?;
    report
        .serialize(file)
        .map_err(|error| WriteReportError::Junit {
            path: path.clone(),
            error,
        })?;
    Ok(path)
}

fn junit_test_case(
    name: &str,
    summary: &str,
    record: Option<&TestRecord>,
    settings: &JunitSettings,
) -> TestCase {
    // A test that left no record is reported as a failure.
    let status = record.map_or(TestStatus::Failed, |record| record.result);
    let mut testcase_status = match status {
        TestStatus::Ok => TestCaseStatus::success(),
        TestStatus::Skipped => TestCaseStatus::skipped(),
        TestStatus::Failed => non_success(NonSuccessKind::Failure, "failure"),
        TestStatus::Crashed | TestStatus::TimedOut | TestStatus::Unstable => {
            non_success(NonSuccessKind::Error, "error")
        }
    };
    if !matches!(status, TestStatus::Ok | TestStatus::Skipped) {
        let title = format!("{name} - {summary}");
        let message = match &settings.url {
            Some(url) => format!("{url}/{name}/{name}.html"),
            None => title.clone(),
        };
        testcase_status
            .set_message(message)
            .set_description(format!("{title} [{}]", status.label()));
    }

    let mut test_case = TestCase::new(name, testcase_status);
    test_case
        .set_classname(settings.name.as_str())
        .set_time(Duration::from_secs_f64(
            record.map_or(0.0, |record| record.duration.max(0.0)),
        ));
    test_case
}

fn non_success(kind: NonSuccessKind, ty: &'static str) -> TestCaseStatus {
    let mut status = TestCaseStatus::non_success(kind);
    status.set_type(ty);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn record(result: TestStatus) -> TestRecord {
        TestRecord {
            name: "test_0001".to_owned(),
            epoch: "20240102030405.000006".to_owned(),
            duration: 2.5,
            result,
        }
    }

    fn render(test_case: TestCase) -> String {
        let mut suite = JunitSuite::new("arnold-usd");
        suite.add_test_case(test_case);
        let mut report = Report::new("arnold-usd");
        report.add_test_suite(suite);
        report.to_string().unwrap()
    }

    #[test_case(Some(TestStatus::Ok), None; "passed")]
    #[test_case(Some(TestStatus::Failed), Some("<failure"); "failed")]
    #[test_case(Some(TestStatus::Crashed), Some("<error"); "crashed")]
    #[test_case(Some(TestStatus::TimedOut), Some("<error"); "timed out")]
    #[test_case(Some(TestStatus::Unstable), Some("<error"); "unstable")]
    #[test_case(Some(TestStatus::Skipped), Some("<skipped"); "skipped")]
    #[test_case(None, Some("<failure"); "no record")]
    fn status_mapping(result: Option<TestStatus>, element: Option<&str>) {
        let settings = JunitSettings {
            name: "arnold-usd".to_owned(),
            url: None,
        };
        let record = result.map(record);
        let xml = render(junit_test_case(
            "test_0001",
            "Sphere",
            record.as_ref(),
            &settings,
        ));
        assert!(xml.contains(r#"classname="arnold-usd""#), "{xml}");
        for candidate in ["<failure", "<error", "<skipped"] {
            assert_eq!(
                xml.contains(candidate),
                element == Some(candidate),
                "{candidate} in {xml}"
            );
        }
    }

    #[test]
    fn failure_links_to_test_page() {
        let settings = JunitSettings {
            name: "arnold-usd".to_owned(),
            url: Some("https://ci.example.com/run/12".to_owned()),
        };
        let xml = render(junit_test_case(
            "test_0001",
            "Sphere",
            Some(&record(TestStatus::Failed)),
            &settings,
        ));
        assert!(
            xml.contains(r#"message="https://ci.example.com/run/12/test_0001/test_0001.html""#),
            "{xml}"
        );
        assert!(xml.contains("test_0001 - Sphere [FAILED]"), "{xml}");
    }
}
