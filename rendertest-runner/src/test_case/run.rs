// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{PreparedTest, RunState, TestCase, record_path};
use crate::{
    command::{CommandContext, ExecOptions, ExitAbi, PreparedCommand, run_command},
    config::DiffCheck,
    diff::{ImageInfo, ImageTool, out_slot, ref_slot, thumbnail_name},
    environment::{RLM_DIAGNOSTICS_FILE, SuiteEnvironment, for_pass},
    errors::RunTestError,
    helpers::{insert_before_extension, remove_file_if_exists},
    redact::redact_file,
    reporter::html::write_test_page,
    stopwatch::StopwatchStart,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rendertest_metadata::{TestRecord, TestStatus};
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a test run needs from the suite.
#[derive(Clone, Debug)]
pub struct RunContext<'a> {
    /// The passes to run, in order. The first one is the primary pass.
    pub passes: &'a [String],

    /// The suite environment.
    pub environment: &'a SuiteEnvironment,

    /// The image info, diff and thumbnail tool.
    pub image_tool: &'a Utf8Path,

    /// The interpreter placed in front of `.py` commands.
    pub python: &'a Utf8Path,

    /// Extra parameters appended to `kick` commands.
    pub kick_params: Option<&'a str>,

    /// Per-command timeout.
    pub timeout: Option<Duration>,

    /// How long a timed out command may take to exit after being interrupted.
    pub grace_period: Duration,

    /// The image comparisons to perform.
    pub diff_checks: &'a [DiffCheck],

    /// Passes whose output images replace their references when they succeed.
    pub update_passes: &'a [String],

    /// Echo command output to stdout.
    pub echo: bool,

    /// The exit code conventions of the host.
    pub abi: ExitAbi,
}

impl TestCase {
    /// Runs the test once and returns its final status.
    ///
    /// Every active pass runs the whole script, then images are compared and the record, the
    /// thumbnails and the HTML page are written to the working directory. Passes after one that
    /// timed out don't run.
    pub fn run(&mut self, cx: &RunContext<'_>) -> Result<TestStatus, RunTestError> {
        let prepared = self
            .prepared
            .clone()
            .ok_or_else(|| RunTestError::NotPrepared {
                test: self.name.clone(),
            })?;
        let target = prepared.target.as_path();
        let passes: Vec<&str> = cx
            .passes
            .iter()
            .map(String::as_str)
            .filter(|pass| !prepared.skip_passes.contains(*pass))
            .collect();
        remove_stale_outputs(target, &passes)?;

        let run_env = cx
            .environment
            .for_run(target, &self.params.environment, cx.abi);
        let command_cx = CommandContext {
            python: cx.python,
            kick_params: cx.kick_params,
            abi: cx.abi,
        };

        let mut state = RunState::default();
        let stopwatch = StopwatchStart::now();
        for pass in &passes {
            let pass_env = for_pass(&run_env, pass);
            let exec = ExecOptions {
                cwd: target,
                env: &pass_env,
                timeout: cx.timeout,
                grace_period: cx.grace_period,
                echo: cx.echo,
            };
            let status = self.run_pass(pass, &prepared, &command_cx, &exec, &mut state)?;
            state.pass_status.insert((*pass).to_owned(), status);
            // Later passes are skipped for this run.
            if status == TestStatus::TimedOut {
                debug!("{}: pass {pass} timed out, skipping later passes", self.name);
                break;
            }
        }
        let end = stopwatch.end();
        state.duration = end.duration;
        state.status = state
            .pass_status
            .values()
            .copied()
            .max()
            .unwrap_or(TestStatus::Skipped);

        self.update_references(cx, target, &passes, &state)?;

        let run_env_tool = ExecOptions {
            cwd: target,
            env: &run_env,
            timeout: None,
            grace_period: cx.grace_period,
            echo: false,
        };
        let image_tool = ImageTool {
            path: cx.image_tool,
            exec: run_env_tool,
        };
        let infos: IndexMap<String, ImageInfo> = passes
            .iter()
            .map(|pass| {
                let info = match state.images.get(&ref_slot(pass)) {
                    Some(reference) => image_tool.image_info(reference),
                    None => ImageInfo::default(),
                };
                ((*pass).to_owned(), info)
            })
            .collect();

        let thresholds = self.params.thresholds();
        let diff_log = target.join(format!("{}.diff.log", self.name));
        for check in cx.diff_checks {
            let decision = image_tool
                .compare(
                    check,
                    &state.images,
                    &infos,
                    &state.pass_status,
                    &thresholds,
                    &diff_log,
                )
                .map_err(fs_error(&diff_log))?;
            debug!("{}: diff {check}: {decision:?}", self.name);
            if decision.fails_test() {
                state.status = state.status.max(TestStatus::Failed);
            }
        }
        state.status = apply_force_result(state.status, self.params.force_result);

        let record = TestRecord {
            name: self.name.clone(),
            epoch: end.epoch(),
            duration: end.duration.as_secs_f64(),
            result: state.status,
        };
        write_record(&record_path(target, &self.name), &record)?;

        if self.params.make_thumbnails {
            for (slot, image) in &state.images {
                let info = infos.get(&slot.pass).cloned().unwrap_or_default();
                if !image_tool.thumbnail(image, &info, &thumbnail_name(slot)) {
                    warn!("{}: failed to write thumbnail of {image}", self.name);
                }
            }
        }

        let status = state.status;
        self.state = state;
        let primary = cx.passes.first().map(String::as_str).unwrap_or_default();
        write_test_page(self, target, primary).map_err(|error| RunTestError::Fs {
            path: target.join(format!("{}.html", self.name)),
            error,
        })?;
        Ok(status)
    }

    /// Runs the script for one pass and collects its images. Returns the pass status.
    fn run_pass(
        &self,
        pass: &str,
        prepared: &PreparedTest,
        command_cx: &CommandContext<'_>,
        exec: &ExecOptions<'_>,
        state: &mut RunState,
    ) -> Result<TestStatus, RunTestError> {
        let target = prepared.target.as_path();
        // A pass-specific reference, `<ref>.<pass>.<ext>`, wins over the shared one.
        let reference = prepared
            .ref_image
            .as_deref()
            .filter(|reference| reference.is_file())
            .map(|reference| {
                let specific = insert_before_extension(reference, pass);
                if specific.is_file() {
                    specific
                } else {
                    reference.to_owned()
                }
            });

        let mut status = TestStatus::Ok;
        let mut log = Vec::new();
        for line in prepared.script.lines().filter(|line| !line.trim().is_empty()) {
            let command = match PreparedCommand::new(line, command_cx) {
                Ok(command) => command,
                Err(error) => {
                    warn!("{}: invalid command `{line}`: {error}", self.name);
                    log.push(format!("Invalid command {line}: {error}"));
                    status = TestStatus::Failed;
                    break;
                }
            };
            let outcome = run_command(&command.argv, exec);
            let diagnostics = target.join(RLM_DIAGNOSTICS_FILE);
            redact_file(&diagnostics).map_err(fs_error(&diagnostics))?;

            log.push(format!("Executing {}", command.display));
            log.extend(outcome.output);
            log.push(String::new());
            status = outcome.status;
            if !status.is_ok() {
                break;
            }
        }

        let log_path = pass_log_path(target, &self.name, pass);
        std::fs::write(&log_path, log.join("\n")).map_err(fs_error(&log_path))?;
        redact_file(&log_path).map_err(fs_error(&log_path))?;

        let mut produced = false;
        if let Some(out) = prepared.out_image.as_deref().filter(|out| out.is_file()) {
            let dest = insert_before_extension(out, pass);
            move_file(out, &dest)?;
            state.images.insert(out_slot(pass), dest);
            produced = true;
        }
        if let Some(reference) = reference {
            if !produced && status.is_ok() {
                debug!("{}: pass {pass} produced no image", self.name);
                status = TestStatus::Failed;
            }
            state.images.insert(ref_slot(pass), reference);
        }
        Ok(status)
    }

    /// Replaces reference images with the output of the passes in `update_passes` that succeeded.
    /// The log of the primary pass becomes the reference log.
    fn update_references(
        &self,
        cx: &RunContext<'_>,
        target: &Utf8Path,
        passes: &[&str],
        state: &RunState,
    ) -> Result<(), RunTestError> {
        let primary = cx.passes.first().map(String::as_str);
        for pass in cx.update_passes {
            if !passes.contains(&pass.as_str())
                || !state.pass_status.get(pass).is_some_and(|s| s.is_ok())
            {
                continue;
            }
            let (Some(out), Some(reference)) = (
                state.images.get(&out_slot(pass)),
                state.images.get(&ref_slot(pass)),
            ) else {
                debug!("{}: pass {pass} has no image to update", self.name);
                continue;
            };
            std::fs::copy(out, reference).map_err(fs_error(reference))?;
            debug!("{}: updated {reference}", self.name);

            if primary == Some(pass.as_str()) {
                let log = pass_log_path(target, &self.name, pass);
                let reference_log = self.source.join("ref").join("reference.log");
                std::fs::copy(&log, &reference_log).map_err(fs_error(&reference_log))?;
            }
        }
        Ok(())
    }
}

/// Applies the expected result of a negative test: the expected status counts as a pass, and a
/// pass counts as a failure. Tests expecting `OK` are unaffected.
pub fn apply_force_result(status: TestStatus, expected: TestStatus) -> TestStatus {
    if expected.is_ok() {
        status
    } else if status == expected {
        TestStatus::Ok
    } else if status.is_ok() {
        TestStatus::Failed
    } else {
        status
    }
}

/// Returns the path of the log of `pass`, `<name>.<pass>.log`.
pub fn pass_log_path(target: &Utf8Path, name: &str, pass: &str) -> Utf8PathBuf {
    target.join(format!("{name}.{pass}.log"))
}

/// Removes the images, logs, records and pages left in `target` by a previous run.
fn remove_stale_outputs(target: &Utf8Path, passes: &[&str]) -> Result<(), RunTestError> {
    for pass in passes {
        for name in [
            format!("testrender.{pass}.tif"),
            format!("ref.{pass}.png"),
            format!("out.{pass}.png"),
        ] {
            let path = target.join(name);
            remove_file_if_exists(&path).map_err(fs_error(&path))?;
        }
    }

    let entries = std::fs::read_dir(target).map_err(fs_error(target))?;
    for entry in entries {
        let entry = entry.map_err(fs_error(target))?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if is_stale_output(&file_name) {
            let path = target.join(&file_name);
            remove_file_if_exists(&path).map_err(fs_error(&path))?;
        }
    }
    Ok(())
}

fn is_stale_output(file_name: &str) -> bool {
    if file_name.starts_with("dif.") && file_name.ends_with(".png") {
        return true;
    }
    file_name.starts_with(crate::helpers::TEST_PREFIX)
        && [".log", ".json", ".html"]
            .iter()
            .any(|ext| file_name.ends_with(ext))
}

fn write_record(path: &Utf8Path, record: &TestRecord) -> Result<(), RunTestError> {
    let contents = serde_json::to_vec(record).map_err(|error| RunTestError::Record {
        path: path.to_owned(),
        error,
    })?;
    std::fs::write(path, contents).map_err(fs_error(path))
}

/// Moves a file, falling back to copying when renaming isn't possible.
fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), RunTestError> {
    remove_file_if_exists(to).map_err(fs_error(to))?;
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(fs_error(to))?;
    std::fs::remove_file(from).map_err(fs_error(from))
}

fn fs_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> RunTestError + '_ {
    move |error| RunTestError::Fs {
        path: path.to_owned(),
        error,
    }
}
