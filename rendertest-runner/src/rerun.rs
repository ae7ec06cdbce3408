// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rerunning failed tests to detect instability.
//!
//! A test that fails its first attempt is rerun. If any rerun passes, the test is unstable: its
//! working directory is restored to the state left by the first attempt, so that the report shows
//! the failure, and its record is amended with the `UNSTABLE` status.

use crate::{
    errors::{RerunError, RunTestError, SnapshotError},
    test_case::{RunContext, TestCase, record_path},
};
use camino::{Utf8Path, Utf8PathBuf};
use rendertest_metadata::{TestRecord, TestStatus};
use tracing::{debug, info};

/// An in-memory archive of a directory.
#[derive(Clone, Debug)]
pub struct DirSnapshot {
    dir: Utf8PathBuf,
    archive: Vec<u8>,
}

impl DirSnapshot {
    /// Archives the contents of `dir`.
    pub fn capture(dir: &Utf8Path) -> Result<Self, SnapshotError> {
        let capture_error = |error| SnapshotError::Capture {
            dir: dir.to_owned(),
            error,
        };
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder.append_dir_all(".", dir).map_err(capture_error)?;
        let archive = builder.into_inner().map_err(capture_error)?;
        Ok(Self {
            dir: dir.to_owned(),
            archive,
        })
    }

    /// Returns the directory this snapshot was taken of.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Replaces the directory with the snapshot.
    pub fn restore(&self) -> Result<(), SnapshotError> {
        let restore_error = |error| SnapshotError::Restore {
            dir: self.dir.clone(),
            error,
        };
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).map_err(restore_error)?;
        }
        std::fs::create_dir_all(&self.dir).map_err(restore_error)?;
        let mut archive = tar::Archive::new(self.archive.as_slice());
        archive.set_preserve_mtime(true);
        archive.unpack(&self.dir).map_err(restore_error)
    }
}

/// Details about one attempt at running a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AttemptInfo {
    /// The attempt number, starting at 1.
    pub attempt: usize,

    /// The maximum number of attempts.
    pub total_attempts: usize,

    /// The status of this attempt.
    pub status: TestStatus,
}

/// Runs a prepared test, rerunning it up to `reruns` times if the first attempt fails.
///
/// Reruns stop at the first attempt that passes. `on_attempt` is called after every attempt.
pub fn run_with_reruns(
    test: &mut TestCase,
    cx: &RunContext<'_>,
    reruns: usize,
    mut on_attempt: impl FnMut(&TestCase, AttemptInfo),
) -> Result<TestStatus, RerunError> {
    let total_attempts = reruns + 1;
    let status = test.run(cx)?;
    on_attempt(
        test,
        AttemptInfo {
            attempt: 1,
            total_attempts,
            status,
        },
    );
    if status.is_final_on_first_attempt() || reruns == 0 {
        return Ok(status);
    }

    let target = test
        .target()
        .map(Utf8Path::to_owned)
        .ok_or_else(|| RunTestError::NotPrepared {
            test: test.name().to_owned(),
        })?;
    let snapshot = DirSnapshot::capture(&target)?;

    for attempt in 2..=total_attempts {
        debug!("{}: rerun {} of {reruns}", test.name(), attempt - 1);
        let rerun_status = test.run(cx)?;
        on_attempt(
            test,
            AttemptInfo {
                attempt,
                total_attempts,
                status: rerun_status,
            },
        );
        if rerun_status.is_ok() {
            info!("{}: passed on attempt {attempt}, marking unstable", test.name());
            snapshot.restore()?;
            amend_record(&record_path(&target, test.name()), TestStatus::Unstable)?;
            test.set_status(TestStatus::Unstable);
            return Ok(TestStatus::Unstable);
        }
    }

    // Every rerun failed: the last attempt's working directory is kept.
    Ok(test.status())
}

/// Rewrites the status stored in a test record.
fn amend_record(path: &Utf8Path, status: TestStatus) -> Result<(), RunTestError> {
    let fs_error = |error| RunTestError::Fs {
        path: path.to_owned(),
        error,
    };
    let record_error = |error| RunTestError::Record {
        path: path.to_owned(),
        error,
    };
    let contents = std::fs::read(path).map_err(fs_error)?;
    let mut record: TestRecord = serde_json::from_slice(&contents).map_err(record_error)?;
    record.result = status;
    let contents = serde_json::to_vec(&record).map_err(record_error)?;
    std::fs::write(path, contents).map_err(fs_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("test_0001");
        std::fs::create_dir_all(target.join("sub")).unwrap();
        std::fs::write(target.join("test_0001.usd.log"), "first attempt").unwrap();
        std::fs::write(target.join("sub/data.txt"), "data").unwrap();

        let snapshot = DirSnapshot::capture(&target).unwrap();
        assert_eq!(snapshot.dir(), target);

        std::fs::write(target.join("test_0001.usd.log"), "second attempt").unwrap();
        std::fs::write(target.join("extra.png"), "").unwrap();
        std::fs::remove_dir_all(target.join("sub")).unwrap();

        snapshot.restore().unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("test_0001.usd.log")).unwrap(),
            "first attempt"
        );
        assert_eq!(
            std::fs::read_to_string(target.join("sub/data.txt")).unwrap(),
            "data"
        );
        assert!(!target.join("extra.png").exists());
    }

    #[test]
    fn amend_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_0001.json");
        std::fs::write(
            &path,
            r#"{"name": "test_0001", "epoch": "20240102030405.000006", "duration": 1.5, "result": 1}"#,
        )
        .unwrap();
        amend_record(&path, TestStatus::Unstable).unwrap();

        let record: TestRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(record.result, TestStatus::Unstable);
        assert_eq!(record.duration, 1.5);
        assert_eq!(record.name, "test_0001");

        let error = amend_record(&dir.path().join("missing.json"), TestStatus::Unstable)
            .unwrap_err();
        assert!(matches!(error, RunTestError::Fs { .. }), "{error}");
    }
}
