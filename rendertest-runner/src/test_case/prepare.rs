// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{PreparedTest, README_FILE, ScriptKind, TestCase};
use crate::{command::ExitAbi, errors::PrepareError, params::TestParams};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use tracing::debug;

/// The base name of default reference images in `ref/`.
pub const DEFAULT_REF_STEM: &str = "reference";

/// The base name of default output images.
pub const DEFAULT_OUT_STEM: &str = "testrender";

const PROGRAM_SOURCE: &str = "test.cpp";
const PYTHON_SCRIPT: &str = "test.py";

/// The result of preparing a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrepareOutcome {
    /// The working directory is ready and the test can run.
    Prepared,

    /// The test has sources to compile but no prebuilt `dist/` directory.
    NeedsBuild,
}

impl TestCase {
    /// Prepares the test to run in `target`.
    ///
    /// The working directory is recreated from the README, the contents of `data/` (except C and
    /// C++ sources) and the prebuilt binaries in `dist/`. `skip_passes` is added to the passes
    /// the README skips.
    pub fn prepare(
        &mut self,
        target: &Utf8Path,
        skip_passes: &BTreeSet<String>,
        abi: ExitAbi,
    ) -> Result<PrepareOutcome, PrepareError> {
        self.prepared = None;
        let source_data = self.source.join("data");
        let source_dist = self.source.join("dist");
        let source_ref = self.source.join("ref");

        let mut program_sources = self.params.program_sources.clone();
        let mut script = self.params.script.clone().map(|script| (script, ScriptKind::Custom));
        if source_data.join(PROGRAM_SOURCE).is_file() {
            if script.is_none() {
                let program = program_command(&target.join("test"), abi);
                script = Some((program, ScriptKind::Program));
            }
            program_sources = PROGRAM_SOURCE.to_owned();
        }
        if source_data.join(PYTHON_SCRIPT).is_file() && script.is_none() {
            script = Some((format!("./{PYTHON_SCRIPT}"), ScriptKind::Python));
        }

        let (out_image, ref_image) = default_images(
            &self.params.output_image,
            &self.params.reference_image,
            &source_ref,
        );
        let (script, script_kind) = match script {
            Some(script) => script,
            None => (
                kick_script(&self.params, out_image.as_deref(), abi),
                ScriptKind::Kick,
            ),
        };

        let has_to_build = !program_sources.trim().is_empty()
            || !plugin_sources(&source_data, &self.params.plugin_sources)?.is_empty();
        if has_to_build && !source_dist.is_dir() {
            debug!("{}: needs building and has no dist/ directory", self.name);
            return Ok(PrepareOutcome::NeedsBuild);
        }

        recreate_dir(target, &self.source)?;
        copy_file(&self.source.join(README_FILE), &target.join(README_FILE))?;
        copy_tree(&source_data, target, |path| {
            !matches!(path.extension(), Some("c" | "cpp"))
        })?;
        copy_tree(&source_dist, target, |_| true)?;

        let mut all_skips: BTreeSet<String> = self.params.skip_passes.iter().cloned().collect();
        all_skips.extend(skip_passes.iter().cloned());

        self.prepared = Some(PreparedTest {
            target: target.to_owned(),
            script,
            script_kind,
            out_image: out_image.map(|out| target.join(out)),
            ref_image: ref_image.map(|reference| self.source.join(reference)),
            skip_passes: all_skips,
        });
        Ok(PrepareOutcome::Prepared)
    }
}

/// Resolves the output and reference image names, relative to the working directory and the test
/// source directory respectively.
///
/// If only one of the two is configured, the reference defaults to `ref/reference.exr` or
/// `ref/reference.tif`, whichever exists, and the output to `testrender` with the extension of
/// the reference. Without a reference, the test doesn't check images.
pub fn default_images(
    output_image: &str,
    reference_image: &str,
    source_ref: &Utf8Path,
) -> (Option<String>, Option<String>) {
    let mut out = (!output_image.is_empty()).then(|| output_image.to_owned());
    let mut reference = (!reference_image.is_empty()).then(|| reference_image.to_owned());

    if out.is_none() != reference.is_none() {
        if reference.is_none() {
            reference = ["exr", "tif"].into_iter().find_map(|ext| {
                let file_name = format!("{DEFAULT_REF_STEM}.{ext}");
                source_ref
                    .join(&file_name)
                    .is_file()
                    .then(|| format!("ref/{file_name}"))
            });
        }
        let default_out = format!("{DEFAULT_OUT_STEM}.tif");
        if out.is_none() || out.as_deref() == Some(default_out.as_str()) {
            out = reference.as_deref().map(|reference| {
                let ext = Utf8Path::new(reference).extension().unwrap_or_default();
                format!("{DEFAULT_OUT_STEM}.{ext}")
            });
        }
    }
    (out, reference)
}

/// Generates the `kick` command line for a test without a script.
pub fn kick_script(params: &TestParams, out_image: Option<&str>, abi: ExitAbi) -> String {
    let mut args: Vec<String> = ["-dw", "-r 160 120", "-bs 16", "-sm lambert", "-sl"]
        .map(str::to_owned)
        .into();

    let default_out = format!("{DEFAULT_OUT_STEM}.tif");
    let out_image = out_image.unwrap_or(&default_out);
    match Utf8Path::new(out_image).extension() {
        Some("exr") => args.push(format!("-o {out_image}")),
        Some("tif") => {
            args.push(format!("-o {out_image}"));
            args.push("-set driver_tiff.dither false".to_owned());
        }
        _ => {}
    }
    if abi == ExitAbi::Windows {
        args.push("-nocrashpopup".to_owned());
    }
    if !params.progressive {
        args.push("-dp".to_owned());
    }
    if let Some(kick_params) = params.kick_params_line() {
        args.push(kick_params);
    }

    match params.resaved.extension() {
        Some(ext) => {
            let forceexpand = if params.forceexpand { " -forceexpand" } else { "" };
            format!(
                "kick {}{forceexpand} -resave test_resaved.{ext}\nkick test_resaved.{ext} {}",
                params.scene,
                args.join(" ")
            )
        }
        None => format!("kick {} {}", params.scene, args.join(" ")),
    }
}

/// Returns the plugin source files of a test.
///
/// `patterns` is a space-separated list of file names in `data/`, or of glob patterns matched
/// against file names anywhere below `data/`. The program source `test.cpp` is never a plugin
/// source.
fn plugin_sources(source_data: &Utf8Path, patterns: &str) -> Result<Vec<Utf8PathBuf>, PrepareError> {
    let patterns: Vec<&str> = patterns.split_whitespace().collect();
    if !patterns.iter().any(|pattern| pattern.contains('*')) {
        return Ok(patterns
            .into_iter()
            .filter(|name| *name != PROGRAM_SOURCE)
            .map(|name| source_data.join(name))
            .collect());
    }
    if !source_data.is_dir() {
        return Ok(Vec::new());
    }

    let glob_set = build_glob_set(&patterns)?;
    let mut sources = Vec::new();
    for entry in walkdir::WalkDir::new(source_data) {
        let entry = entry.map_err(|error| PrepareError::Walk {
            path: source_data.to_owned(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name != PROGRAM_SOURCE && glob_set.is_match(file_name) {
            sources.push(path.to_owned());
        }
    }
    Ok(sources)
}

fn build_glob_set(patterns: &[&str]) -> Result<GlobSet, PrepareError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| PrepareError::InvalidPattern {
            pattern: (*pattern).to_owned(),
            error,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|error| PrepareError::InvalidPattern {
        pattern: patterns.join(" "),
        error,
    })
}

fn fs_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> PrepareError + '_ {
    move |error| PrepareError::Fs {
        path: path.to_owned(),
        error,
    }
}

/// Empties `target`, unless it is the source directory itself.
fn recreate_dir(target: &Utf8Path, source: &Utf8Path) -> Result<(), PrepareError> {
    let same_dir = match (target.canonicalize_utf8(), source.canonicalize_utf8()) {
        (Ok(target), Ok(source)) => target == source,
        _ => false,
    };
    if same_dir {
        return Ok(());
    }
    if target.exists() {
        std::fs::remove_dir_all(target).map_err(fs_error(target))?;
    }
    std::fs::create_dir_all(target).map_err(fs_error(target))
}

fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), PrepareError> {
    std::fs::copy(from, to).map_err(fs_error(from))?;
    Ok(())
}

/// Copies the files below `from` into `to`, keeping the directory structure.
fn copy_tree(
    from: &Utf8Path,
    to: &Utf8Path,
    filter: impl Fn(&Utf8Path) -> bool,
) -> Result<(), PrepareError> {
    if !from.is_dir() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|error| PrepareError::Walk {
            path: from.to_owned(),
            error,
        })?;
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            debug!("skipping non-UTF-8 path {}", entry.path().display());
            continue;
        };
        let Ok(relative) = path.strip_prefix(from) else {
            continue;
        };
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(fs_error(&dest))?;
        } else if filter(path) {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(fs_error(parent))?;
            }
            copy_file(path, &dest)?;
        }
    }
    Ok(())
}

/// Spells the path of a compiled test program as a command line, quoted so that it stays one
/// argument.
fn program_command(program: &Utf8Path, abi: ExitAbi) -> String {
    match abi {
        ExitAbi::Windows => format!("\"{program}\""),
        ExitAbi::Posix => shell_words::quote(program.as_str()).into_owned(),
    }
}
