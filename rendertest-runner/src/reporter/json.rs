// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::suite_records;
use crate::{errors::WriteReportError, suite::TestSuite};
use camino::{Utf8Path, Utf8PathBuf};
use rendertest_metadata::{TestRecord, TestSummaryRecord};
use std::{fs::File, io::BufWriter};

/// The file name of the JSON report.
pub const JSON_REPORT_FILE: &str = "report.json";

/// Writes `report.json` to `output_dir`: the record of every test that left one, with statuses
/// spelled out.
pub fn write_json_report(
    suite: &TestSuite,
    output_dir: &Utf8Path,
) -> Result<Utf8PathBuf, WriteReportError> {
    let records = suite_records(suite).filter_map(|(_, record)| record);
    write_records(records, &output_dir.join(JSON_REPORT_FILE))
}

fn write_records(
    records: impl IntoIterator<Item = TestRecord>,
    path: &Utf8Path,
) -> Result<Utf8PathBuf, WriteReportError> {
    let summaries: Vec<TestSummaryRecord> =
        records.into_iter().map(TestRecord::into_summary).collect();
    let file = File::create(path).map_err(|error| WriteReportError::Fs {
        path: path.to_owned(),
        error,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summaries).map_err(|error| {
        WriteReportError::Json {
            path: path.to_owned(),
            error,
        }
    })?;
    Ok(path.to_owned())
}
