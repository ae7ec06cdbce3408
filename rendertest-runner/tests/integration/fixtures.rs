// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::{Utf8TempDir, tempdir};
use color_eyre::eyre::Result;
use indoc::indoc;
use rendertest_metadata::TestRecord;
use rendertest_runner::{
    command::ExitAbi,
    config::{DiffCheck, TestOrder, ToolPaths},
    environment::SuiteEnvironment,
    partition::Chunk,
    pool::WorkerPool,
    reporter::ProgressReporter,
    suite::{PrepareOptions, SelectOptions, TestSuite, host_os},
    test_case::{RunContext, read_record, record_path},
};
use std::{os::unix::fs::PermissionsExt, time::Duration};

/// A stand-in for the image tool.
///
/// * `--info` describes an RGBA image.
/// * `--diff A B` fails if either image contains `bad`.
/// * Anything else writes its `-o` argument.
const FAKE_IMAGE_TOOL: &str = indoc! {r#"
    #!/bin/sh
    mode=convert
    out=
    while [ $# -gt 0 ]; do
        case "$1" in
            --info) mode=info ;;
            --diff) mode=diff; a="$2"; b="$3"; shift 2 ;;
            -o) out="$2"; shift ;;
        esac
        shift
    done
    case "$mode" in
        info)
            echo "Reading image"
            echo "image :  160 x  120, 4 channel, half tiff"
            echo "    channel list: R, G, B, A"
            ;;
        diff)
            echo "Computing diff of \"$a\" vs \"$b\""
            [ -n "$out" ] && echo diff > "$out"
            if grep -q bad "$a" "$b"; then echo "FAILURE"; exit 1; fi
            echo "PASS"
            ;;
        *)
            [ -n "$out" ] && echo thumbnail > "$out"
            ;;
    esac
    exit 0
"#};

/// A script line rendering a good image.
pub(crate) const GOOD_RENDER: &str = "$echo good > testrender.tif";

/// A script line rendering an image that doesn't match the reference.
pub(crate) const BAD_RENDER: &str = "$echo bad > testrender.tif";

/// A test suite on disk, with the image tool it runs against.
pub(crate) struct SuiteFixture {
    dir: Utf8TempDir,
}

impl SuiteFixture {
    pub(crate) fn new() -> Result<Self> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("suite"))?;
        std::fs::create_dir_all(dir.path().join("state"))?;
        std::fs::create_dir_all(dir.path().join("bin"))?;
        let tool = dir.path().join("bin/oiiotool");
        std::fs::write(&tool, FAKE_IMAGE_TOOL)?;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir })
    }

    pub(crate) fn suite_root(&self) -> Utf8PathBuf {
        self.dir.path().join("suite")
    }

    pub(crate) fn output_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("out")
    }

    /// A scratch directory that survives across runs and attempts.
    pub(crate) fn state_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("state")
    }

    pub(crate) fn image_tool(&self) -> Utf8PathBuf {
        self.dir.path().join("bin/oiiotool")
    }

    /// Adds a test running `script`, with a reference image. `params` are extra README
    /// parameters.
    pub(crate) fn add_test(&self, name: &str, script: &str, params: &str) -> Result<()> {
        let test_dir = self.suite_root().join(name);
        std::fs::create_dir_all(test_dir.join("ref"))?;
        std::fs::write(test_dir.join("ref/reference.tif"), "good")?;
        let readme = format!(
            "{name} summary\n\nSome details.\n\nPARAMS:\nscript = \"\"\"\n{script}\n\"\"\"\n{params}\n"
        );
        std::fs::write(test_dir.join("README"), readme)?;
        Ok(())
    }

    pub(crate) fn write_groups(&self, contents: &str) -> Result<()> {
        std::fs::write(self.suite_root().join("groups"), contents)?;
        Ok(())
    }

    pub(crate) fn target(&self, name: &str) -> Utf8PathBuf {
        self.output_dir().join(name)
    }

    pub(crate) fn record(&self, name: &str) -> Option<TestRecord> {
        read_record(&record_path(&self.target(name), name))
    }
}

pub(crate) struct RunOptions {
    pub(crate) patterns: Vec<String>,
    pub(crate) passes: Vec<String>,
    pub(crate) reruns: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) threads: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            passes: vec!["usd".to_owned(), "hydra".to_owned()],
            reruns: 0,
            timeout: None,
            threads: 1,
        }
    }
}

/// Loads, prepares and runs the suite of `fixture`.
pub(crate) fn run_suite(fixture: &SuiteFixture, opts: &RunOptions) -> Result<TestSuite> {
    let output_dir = fixture.output_dir();
    let mut suite = TestSuite::load(fixture.suite_root(), &ToolPaths::default())?;
    let selection = suite.select(&SelectOptions {
        patterns: &opts.patterns,
        previous_output: Some(&output_dir),
        order: TestOrder::Forward,
        chunk: Chunk::ALL,
        host_os: host_os(),
    })?;
    suite.prepare(
        selection,
        &PrepareOptions {
            output_dir: &output_dir,
            passes: &opts.passes,
            abi: ExitAbi::HOST,
        },
    )?;

    let base = [("PATH".to_owned(), std::env::var("PATH").unwrap_or_default())];
    let environment = SuiteEnvironment::new(base, &ToolPaths::default(), &output_dir, ExitAbi::HOST);
    let diff_checks: Vec<DiffCheck> = opts
        .passes
        .iter()
        .map(|pass| DiffCheck::same_pass(pass))
        .collect();
    let image_tool = fixture.image_tool();
    let cx = RunContext {
        passes: &opts.passes,
        environment: &environment,
        image_tool: &image_tool,
        python: Utf8Path::new("python3"),
        kick_params: None,
        timeout: opts.timeout,
        grace_period: Duration::from_millis(200),
        diff_checks: &diff_checks,
        update_passes: &[],
        echo: false,
        abi: ExitAbi::HOST,
    };
    let progress = ProgressReporter::new(Box::new(std::io::sink()));
    suite.run(&cx, WorkerPool::new(opts.threads, 0), opts.reruns, &progress)?;
    Ok(suite)
}
