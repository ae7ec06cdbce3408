// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use rendertest_metadata::RendertestExitCode;
use rendertest_runner::{
    command::ExitAbi,
    config::{DiffCheck, JunitSettings, RendertestConfig, RendertestProfile, TestOrder, TestThreads},
    environment::SuiteEnvironment,
    helpers::plural,
    partition::Chunk,
    pool::WorkerPool,
    reporter::{
        ProgressReporter,
        html::{IndexOptions, REPORT_PARAMS, write_index},
        write_json_report, write_junit_report,
    },
    suite::{IgnoreReason, PrepareOptions, SelectOptions, Selection, TestSuite, host_os},
    test_case::RunContext,
};
use std::{
    io::{self, Write},
    time::Duration,
};
use swrite::{SWrite, swrite};
use tracing::{info, warn};

/// A regression test runner for renderer plugins.
///
/// Every test of a suite is a directory holding a README, scene data and reference images. Tests
/// are rendered once per configured pass and the resulting images are compared with the
/// references.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct RendertestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl RendertestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::List(opts) => opts.exec(),
            Command::Groups(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render and compare the selected tests, then write reports
    Run(Box<RunOpts>),

    /// List the tests a run would select, and those it would ignore
    List(ListOpts),

    /// Show the groups a test belongs to
    Groups(GroupsOpts),
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Suite options")]
struct SuiteOpts {
    /// Root directory of the test suite
    #[arg(
        long,
        value_name = "DIR",
        default_value = "testsuite",
        env = "RENDERTEST_SUITE"
    )]
    suite: Utf8PathBuf,

    /// Config file [default: rendertest.toml in the suite root]
    #[arg(long, value_name = "PATH", env = "RENDERTEST_CONFIG")]
    config_file: Option<Utf8PathBuf>,

    /// Configuration profile to use
    #[arg(long, short = 'P', env = "RENDERTEST_PROFILE")]
    profile: Option<String>,
}

impl SuiteOpts {
    fn read_config(&self) -> Result<RendertestConfig> {
        Ok(RendertestConfig::from_sources(
            self.suite.clone(),
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Selection options")]
struct SelectOpts {
    /// Test patterns, as `<expressions>:<groups>`
    ///
    /// Expressions are comma-separated test names, with `*` and `?` wildcards. Groups are
    /// comma-separated group names. `test_00*`, `:fast` and `test_0001,test_0002:hydra` are valid
    /// patterns. Tests matching any pattern are selected; no pattern selects every test.
    #[arg(value_name = "PATTERNS")]
    patterns: Vec<String>,

    /// Run a chunk of the selected tests, e.g. 2/4
    #[arg(long, value_name = "I/N")]
    chunk: Option<Chunk>,

    /// Order tests by number: forward or reverse [default: from profile]
    #[arg(long, value_name = "ORDER")]
    order: Option<TestOrder>,

    /// Directory holding the working directories and reports of a run
    #[arg(
        long,
        short = 'o',
        value_name = "DIR",
        default_value = "build/testsuite",
        env = "RENDERTEST_OUTPUT_DIR"
    )]
    output_dir: Utf8PathBuf,
}

impl SelectOpts {
    fn select(&self, suite: &TestSuite, profile: &RendertestProfile<'_>) -> Result<Selection> {
        let selection = suite.select(&SelectOptions {
            patterns: &self.patterns,
            previous_output: Some(&self.output_dir),
            order: self.order.unwrap_or_else(|| profile.order()),
            chunk: self.chunk.unwrap_or(Chunk::ALL),
            host_os: host_os(),
        })?;
        Ok(selection)
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    suite: SuiteOpts,

    #[clap(flatten)]
    select: SelectOpts,

    #[clap(flatten)]
    runner: RunnerOpts,

    #[clap(flatten)]
    reports: ReportOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of tests to run simultaneously [possible values: integer or "num-cpus"]
    #[arg(long, short = 'j', visible_alias = "jobs", value_name = "N")]
    test_threads: Option<TestThreads>,

    /// Kill commands running longer than this, e.g. 10m [default: from profile]
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Number of times to rerun failing tests [default: from profile]
    #[arg(long, value_name = "N")]
    reruns: Option<usize>,

    /// Extra arguments appended to every kick command
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    kick_params: Option<String>,

    /// Image comparisons, as `<pass>:<out|ref>-<pass>:<out|ref>` [default: from profile]
    #[arg(long = "diff-check", value_name = "CHECK")]
    diff_checks: Vec<DiffCheck>,

    /// Copy the output images of passing tests over the references of these passes
    #[arg(long, value_name = "PASS", value_delimiter = ',')]
    update_reference: Vec<String>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Report options")]
struct ReportOpts {
    /// Name of the JUnit report, written as <NAME>.xml [default: from profile]
    #[arg(long, value_name = "NAME")]
    junit_name: Option<String>,

    /// Base URL the HTML reports are published at, linked from the JUnit report
    #[arg(long, value_name = "URL")]
    junit_url: Option<String>,

    /// Only list tests that didn't pass in the HTML report, deleting the others' directories
    #[arg(long)]
    report_only_failed: bool,

    /// A parameter shown in the HTML report header, e.g. revision=abc123
    #[arg(long = "report-param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    report_params: Vec<(String, String)>,
}

impl ReportOpts {
    fn junit(&self, profile: &RendertestProfile<'_>) -> Option<JunitSettings> {
        let from_profile = profile.junit();
        let name = self
            .junit_name
            .clone()
            .or_else(|| from_profile.as_ref().map(|junit| junit.name.clone()))?;
        let url = self
            .junit_url
            .clone()
            .or_else(|| from_profile.and_then(|junit| junit.url));
        Some(JunitSettings { name, url })
    }

    fn report_params(&self, patterns: &[String]) -> IndexMap<String, String> {
        let mut params: IndexMap<String, String> = REPORT_PARAMS
            .iter()
            .map(|key| ((*key).to_owned(), String::new()))
            .collect();
        params.insert("patterns".to_owned(), patterns.join(" "));
        params.extend(self.report_params.iter().cloned());
        params
    }
}

fn parse_key_value(input: &str) -> std::result::Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, found `{input}`")),
    }
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.suite.read_config()?;
        let profile = config.profile(self.suite.profile.as_deref())?;
        let passes = profile.passes();
        if let Some(pass) = self
            .runner
            .update_reference
            .iter()
            .find(|pass| !passes.contains(pass))
        {
            return Err(ExpectedError::UnknownPass {
                pass: pass.clone(),
                passes: passes.to_vec(),
            });
        }

        let output_dir = &self.select.output_dir;
        let mut suite = TestSuite::load(&self.suite.suite, profile.tools())?;
        let selection = self.select.select(&suite, &profile)?;
        suite.prepare(
            selection,
            &PrepareOptions {
                output_dir,
                passes,
                abi: ExitAbi::HOST,
            },
        )?;
        if suite.prepared_tests().is_empty() {
            warn!("no tests to run");
            return Ok(RendertestExitCode::NO_TESTS_RUN);
        }

        let environment =
            SuiteEnvironment::from_process(profile.tools(), output_dir, ExitAbi::HOST);
        let diff_checks = if self.runner.diff_checks.is_empty() {
            profile.diff_checks()
        } else {
            self.runner.diff_checks.clone()
        };
        let image_tool = profile.tools().image_tool();
        let python = profile.tools().python();
        let kick_params = self
            .runner
            .kick_params
            .as_deref()
            .unwrap_or_else(|| profile.kick_params());
        let timeout = match self.runner.timeout {
            Some(timeout) => (!timeout.is_zero()).then_some(timeout),
            None => profile.timeout(),
        };
        let cx = RunContext {
            passes,
            environment: &environment,
            image_tool: &image_tool,
            python: &python,
            kick_params: (!kick_params.is_empty()).then_some(kick_params),
            timeout,
            grace_period: profile.termination_grace_period(),
            diff_checks: &diff_checks,
            update_passes: &self.runner.update_reference,
            echo: suite.echo_output(),
            abi: ExitAbi::HOST,
        };

        let threads = self
            .runner
            .test_threads
            .unwrap_or_else(|| profile.test_threads())
            .compute();
        let pool = WorkerPool::new(threads, profile.queue_capacity());
        let mut progress = ProgressReporter::stdout();
        if output.colorize_stdout() {
            progress.colorize();
        }
        let reruns = self.runner.reruns.unwrap_or_else(|| profile.reruns());
        suite.run(&cx, pool, reruns, &progress)?;

        let report = suite.report();
        let failed = report.failed(profile.instability_threshold());
        progress.run_finished(&report, failed);

        let json = write_json_report(&suite, output_dir)?;
        info!("wrote {json}");
        if let Some(junit) = self.reports.junit(&profile) {
            let path = write_junit_report(&suite, &junit, output_dir)?;
            info!("wrote {path}");
        }
        let report_params = self.reports.report_params(&self.select.patterns);
        let index = write_index(
            &suite,
            output_dir,
            &IndexOptions {
                diff_checks: &diff_checks,
                report_params: &report_params,
                only_failed: self.reports.report_only_failed || profile.report_only_failed(),
            },
        )?;
        info!("wrote {index}");

        if failed {
            Err(ExpectedError::TestRunFailed)
        } else {
            Ok(RendertestExitCode::OK)
        }
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    #[clap(flatten)]
    suite: SuiteOpts,

    #[clap(flatten)]
    select: SelectOpts,
}

impl ListOpts {
    fn exec(self) -> Result<i32> {
        let config = self.suite.read_config()?;
        let profile = config.profile(self.suite.profile.as_deref())?;
        let suite = TestSuite::load(&self.suite.suite, profile.tools())?;
        let selection = self.select.select(&suite, &profile)?;

        let mut out = String::new();
        for test in &selection.scheduled {
            swrite!(out, "{test}\n");
        }
        for reason in IgnoreReason::ALL {
            for test in selection.ignored.get(reason) {
                swrite!(out, "{test} (ignored: {})\n", reason.description());
            }
        }
        io::stdout()
            .lock()
            .write_all(out.as_bytes())
            .map_err(ExpectedError::write_output_error)?;

        let count = selection.scheduled.len();
        info!(
            "{count} {} selected, {} ignored",
            plural::tests_str(count),
            selection.ignored.total()
        );
        Ok(RendertestExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct GroupsOpts {
    #[clap(flatten)]
    suite: SuiteOpts,

    /// The test to look up, e.g. test_0001
    #[arg(value_name = "TEST")]
    test: String,
}

impl GroupsOpts {
    fn exec(self) -> Result<i32> {
        let config = self.suite.read_config()?;
        let profile = config.profile(self.suite.profile.as_deref())?;
        let suite = TestSuite::load(&self.suite.suite, profile.tools())?;
        if !suite.tests_found().contains(&self.test) {
            return Err(ExpectedError::UnknownTest {
                test: self.test,
                suite: self.suite.suite,
            });
        }

        let mut out = String::new();
        for group in suite.groups().get_groups(&self.test) {
            swrite!(out, "{group}\n");
        }
        io::stdout()
            .lock()
            .write_all(out.as_bytes())
            .map_err(ExpectedError::write_output_error)?;
        Ok(RendertestExitCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn verify_app() {
        RendertestApp::command().debug_assert();
    }

    #[test_case(&["rendertest", "run"] ; "defaults")]
    #[test_case(&["rendertest", "run", "test_00*", ":fast", "--chunk", "2/4", "-j", "num-cpus"] ; "selection")]
    #[test_case(&["rendertest", "run", "--order", "forward", "--timeout", "10m", "--reruns", "2"] ; "runner")]
    #[test_case(&["rendertest", "run", "--kick-params", "-v 2", "--diff-check", "hydra:out-usd:ref"] ; "kick params")]
    #[test_case(&["rendertest", "run", "--update-reference", "usd,hydra", "--report-param", "revision=abc"] ; "references")]
    #[test_case(&["rendertest", "-v", "list", "--suite", "suite", "-P", "ci", ":linux"] ; "list")]
    #[test_case(&["rendertest", "groups", "test_0001"] ; "groups")]
    fn valid_args(args: &[&str]) {
        if let Err(error) = RendertestApp::try_parse_from(args) {
            panic!("{args:?} should parse: {error}");
        }
    }

    #[test_case(&["rendertest", "run", "--chunk", "5/4"] ; "chunk out of range")]
    #[test_case(&["rendertest", "run", "--order", "sideways"] ; "unknown order")]
    #[test_case(&["rendertest", "run", "-j", "0"] ; "zero threads")]
    #[test_case(&["rendertest", "run", "--timeout", "soon"] ; "bad timeout")]
    #[test_case(&["rendertest", "run", "--report-param", "revision"] ; "param without value")]
    #[test_case(&["rendertest", "run", "--diff-check", "usd-hydra"] ; "bad diff check")]
    #[test_case(&["rendertest", "groups"] ; "groups without test")]
    fn invalid_args(args: &[&str]) {
        assert!(
            RendertestApp::try_parse_from(args).is_err(),
            "{args:?} should not parse"
        );
    }

    #[test]
    fn report_params() {
        let reports = ReportOpts {
            junit_name: None,
            junit_url: None,
            report_only_failed: false,
            report_params: vec![
                ("revision".to_owned(), "abc123".to_owned()),
                ("branch".to_owned(), "main".to_owned()),
            ],
        };
        let params = reports.report_params(&["test_00*".to_owned(), ":fast".to_owned()]);
        assert_eq!(params.len(), REPORT_PARAMS.len() + 1);
        assert_eq!(params["patterns"], "test_00* :fast");
        assert_eq!(params["revision"], "abc123");
        assert_eq!(params["project"], "");
        assert_eq!(params["branch"], "main");
    }

    #[test]
    fn key_values() {
        assert_eq!(
            parse_key_value("repo_url=https://example.com/?a=b"),
            Ok(("repo_url".to_owned(), "https://example.com/?a=b".to_owned()))
        );
        assert_eq!(parse_key_value("tags="), Ok(("tags".to_owned(), String::new())));
        assert!(parse_key_value("=value").is_err());
    }
}
