// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DiffCheck, TestThreads, ToolPaths};
use crate::errors::{ConfigReadError, ProfileNotFound, TestOrderParseError};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{fmt, str::FromStr, sync::LazyLock, time::Duration};
use tracing::{debug, warn};

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for rendertest.
///
/// This is the root data structure for rendertest configuration. Runner settings are grouped in
/// named profiles; a profile is selected with [`Self::profile`].
#[derive(Clone, Debug)]
pub struct RendertestConfig {
    suite_root: Utf8PathBuf,
    default_profile_name: String,
    tools: ToolPaths,
    default_profile: DefaultProfileImpl,
    other_profiles: IndexMap<String, CustomProfileImpl>,
}

impl RendertestConfig {
    /// The default location of the config within the test suite: `rendertest.toml`.
    pub const CONFIG_FILE: &'static str = "rendertest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the profile every other profile inherits from.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the rendertest config from the given file, or if not specified from
    /// `rendertest.toml` in the test suite root.
    ///
    /// If the file isn't specified and `rendertest.toml` doesn't exist, the default config is
    /// used.
    pub fn from_sources(
        suite_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigReadError> {
        let suite_root = suite_root.into();
        let mut config = Self::default_config(suite_root.clone());

        let file = match config_file {
            Some(file) => Some(file.to_owned()),
            None => {
                let file = suite_root.join(Self::CONFIG_FILE);
                file.is_file().then_some(file)
            }
        };
        if let Some(file) = file {
            debug!("reading config from {file}");
            let contents =
                std::fs::read_to_string(&file).map_err(|error| ConfigReadError::Read {
                    file: file.clone(),
                    error,
                })?;
            let deserialized: ConfigDeserialize =
                toml::from_str(&contents).map_err(|error| ConfigReadError::Toml {
                    file: file.clone(),
                    error: Box::new(error),
                })?;
            config.apply(deserialized);
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns the default config, without reading any files.
    pub fn default_config(suite_root: impl Into<Utf8PathBuf>) -> Self {
        let mut deserialized: ConfigDeserialize = toml::from_str(Self::DEFAULT_CONFIG)
            .expect("default config should always deserialize");
        let default_profile = deserialized
            .profiles
            .shift_remove(Self::DEFAULT_PROFILE)
            .expect("default profile should exist");

        Self {
            suite_root: suite_root.into(),
            default_profile_name: deserialized
                .default_profile
                .unwrap_or_else(|| Self::DEFAULT_PROFILE.to_owned()),
            tools: deserialized.tools,
            default_profile: DefaultProfileImpl::new(default_profile),
            other_profiles: deserialized.profiles,
        }
    }

    /// Returns the test suite root this config was read for.
    pub fn suite_root(&self) -> &Utf8Path {
        &self.suite_root
    }

    /// Returns the configured tool locations.
    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Returns the profile with the given name, or the configured default profile if `name` is
    /// `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<RendertestProfile<'_>, ProfileNotFound> {
        let name = name.unwrap_or(&self.default_profile_name);
        let custom_profile = if name == Self::DEFAULT_PROFILE {
            None
        } else {
            Some(
                self.other_profiles
                    .get(name)
                    .ok_or_else(|| ProfileNotFound::new(name, self.all_profiles()))?,
            )
        };

        Ok(RendertestProfile {
            name: name.to_owned(),
            tools: &self.tools,
            custom_profile,
            default_profile: &self.default_profile,
        })
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Self::DEFAULT_PROFILE).chain(self.other_profiles.keys().map(|k| k.as_str()))
    }

    fn apply(&mut self, deserialized: ConfigDeserialize) {
        let ConfigDeserialize {
            default_profile,
            tools,
            mut profiles,
        } = deserialized;

        if let Some(default_profile) = default_profile {
            self.default_profile_name = default_profile;
        }
        self.tools.merge(tools);
        if let Some(custom_default) = profiles.shift_remove(Self::DEFAULT_PROFILE) {
            self.default_profile.apply(custom_default);
        }
        self.other_profiles.extend(profiles);
    }

    fn validate(&self) -> Result<(), ConfigReadError> {
        if self.default_profile_name != Self::DEFAULT_PROFILE
            && !self.other_profiles.contains_key(&self.default_profile_name)
        {
            return Err(ConfigReadError::DefaultProfileNotFound {
                profile: self.default_profile_name.clone(),
                known: self.all_profiles().map(str::to_owned).collect(),
            });
        }

        let all_passes = std::iter::once((Self::DEFAULT_PROFILE, &self.default_profile.passes))
            .chain(
                self.other_profiles
                    .iter()
                    .filter_map(|(name, p)| Some((name.as_str(), p.passes.as_ref()?))),
            );
        for (profile, passes) in all_passes {
            if passes.is_empty() {
                return Err(ConfigReadError::NoPasses {
                    profile: profile.to_owned(),
                });
            }
        }

        Ok(())
    }
}

/// The order in which filtered tests are scheduled.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum TestOrder {
    /// Ascending test number.
    Forward,

    /// Descending test number: newest tests run first.
    #[default]
    Reverse,
}

impl FromStr for TestOrder {
    type Err = TestOrderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(TestOrder::Forward),
            "reverse" => Ok(TestOrder::Reverse),
            other => Err(TestOrderParseError::new(other)),
        }
    }
}

impl fmt::Display for TestOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOrder::Forward => f.write_str("forward"),
            TestOrder::Reverse => f.write_str("reverse"),
        }
    }
}

/// JUnit settings within a profile. Present only if a report name is configured.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JunitSettings {
    /// The name of the JUnit test suite, also used as the file name of the report.
    pub name: String,

    /// The base URL the HTML reports are published at.
    pub url: Option<String>,
}

/// A configuration profile for rendertest: a named set of runner settings.
#[derive(Clone, Debug)]
pub struct RendertestProfile<'cfg> {
    name: String,
    tools: &'cfg ToolPaths,
    custom_profile: Option<&'cfg CustomProfileImpl>,
    default_profile: &'cfg DefaultProfileImpl,
}

impl<'cfg> RendertestProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured tool locations.
    pub fn tools(&self) -> &'cfg ToolPaths {
        self.tools
    }

    /// Returns the passes every test runs, in order. The first pass is the primary one.
    pub fn passes(&self) -> &'cfg [String] {
        self.custom_profile
            .and_then(|profile| profile.passes.as_deref())
            .unwrap_or(&self.default_profile.passes)
    }

    /// Returns the number of workers to run tests with.
    pub fn test_threads(&self) -> TestThreads {
        self.custom_profile
            .and_then(|profile| profile.test_threads)
            .unwrap_or(self.default_profile.test_threads)
    }

    /// Returns the capacity of the task queue. `0` means one slot per worker.
    pub fn queue_capacity(&self) -> usize {
        self.custom_profile
            .and_then(|profile| profile.queue_capacity)
            .unwrap_or(self.default_profile.queue_capacity)
    }

    /// Returns the per-command timeout, or `None` if commands may run forever.
    pub fn timeout(&self) -> Option<Duration> {
        let timeout = self
            .custom_profile
            .and_then(|profile| profile.timeout)
            .unwrap_or(self.default_profile.timeout);
        (!timeout.is_zero()).then_some(timeout)
    }

    /// Returns how long a timed out command may take to exit after being interrupted.
    pub fn termination_grace_period(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.termination_grace_period)
            .unwrap_or(self.default_profile.termination_grace_period)
    }

    /// Returns the number of times a failing test is rerun.
    pub fn reruns(&self) -> usize {
        self.custom_profile
            .and_then(|profile| profile.reruns)
            .unwrap_or(self.default_profile.reruns)
    }

    /// Returns the percentage of unstable tests tolerated before the run fails.
    pub fn instability_threshold(&self) -> f64 {
        self.custom_profile
            .and_then(|profile| profile.instability_threshold)
            .unwrap_or(self.default_profile.instability_threshold)
    }

    /// Returns the scheduling order.
    pub fn order(&self) -> TestOrder {
        self.custom_profile
            .and_then(|profile| profile.order)
            .unwrap_or(self.default_profile.order)
    }

    /// Returns extra parameters appended to every `kick` command.
    pub fn kick_params(&self) -> &'cfg str {
        self.custom_profile
            .and_then(|profile| profile.kick_params.as_deref())
            .unwrap_or(&self.default_profile.kick_params)
    }

    /// Returns true if the HTML report only lists tests that didn't pass.
    pub fn report_only_failed(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.report_only_failed)
            .unwrap_or(self.default_profile.report_only_failed)
    }

    /// Returns the image comparisons to perform after every run.
    ///
    /// If none are configured, each pass's output is compared against its own reference.
    pub fn diff_checks(&self) -> Vec<DiffCheck> {
        let configured = self
            .custom_profile
            .and_then(|profile| profile.diff_checks.as_deref())
            .unwrap_or(&self.default_profile.diff_checks);
        if configured.is_empty() {
            self.passes()
                .iter()
                .map(|pass| DiffCheck::same_pass(pass))
                .collect()
        } else {
            configured.to_vec()
        }
    }

    /// Returns the JUnit settings, if a JUnit report should be written.
    pub fn junit(&self) -> Option<JunitSettings> {
        let custom = self.custom_profile.map(|profile| &profile.junit);
        let name = custom
            .and_then(|junit| junit.name.clone())
            .or_else(|| self.default_profile.junit.name.clone())?;
        let url = custom
            .and_then(|junit| junit.url.clone())
            .or_else(|| self.default_profile.junit.url.clone());
        Some(JunitSettings { name, url })
    }
}

// This is the form of `RendertestConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigDeserialize {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    tools: ToolPaths,
    #[serde(default, rename = "profile")]
    profiles: IndexMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    passes: Vec<String>,
    test_threads: TestThreads,
    queue_capacity: usize,
    timeout: Duration,
    termination_grace_period: Duration,
    reruns: usize,
    instability_threshold: f64,
    order: TestOrder,
    kick_params: String,
    report_only_failed: bool,
    diff_checks: Vec<DiffCheck>,
    junit: JunitImpl,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            passes: p.passes.expect("passes present in default profile"),
            test_threads: p
                .test_threads
                .expect("test-threads present in default profile"),
            queue_capacity: p
                .queue_capacity
                .expect("queue-capacity present in default profile"),
            timeout: p.timeout.expect("timeout present in default profile"),
            termination_grace_period: p
                .termination_grace_period
                .expect("termination-grace-period present in default profile"),
            reruns: p.reruns.expect("reruns present in default profile"),
            instability_threshold: p
                .instability_threshold
                .expect("instability-threshold present in default profile"),
            order: p.order.expect("order present in default profile"),
            kick_params: p
                .kick_params
                .expect("kick-params present in default profile"),
            report_only_failed: p
                .report_only_failed
                .expect("report-only-failed present in default profile"),
            diff_checks: p
                .diff_checks
                .expect("diff-checks present in default profile"),
            junit: p.junit,
        }
    }

    // Applies the `[profile.default]` section of a user config.
    fn apply(&mut self, p: CustomProfileImpl) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = p.$field {
                    self.$field = value;
                })*
            };
        }
        overlay!(
            passes,
            test_threads,
            queue_capacity,
            timeout,
            termination_grace_period,
            reruns,
            instability_threshold,
            order,
            kick_params,
            report_only_failed,
            diff_checks,
        );
        if p.junit.name.is_some() {
            self.junit.name = p.junit.name;
        }
        if p.junit.url.is_some() {
            self.junit.url = p.junit.url;
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct CustomProfileImpl {
    #[serde(default)]
    passes: Option<Vec<String>>,
    #[serde(default)]
    test_threads: Option<TestThreads>,
    #[serde(default)]
    queue_capacity: Option<usize>,
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    termination_grace_period: Option<Duration>,
    #[serde(default)]
    reruns: Option<usize>,
    #[serde(default)]
    instability_threshold: Option<f64>,
    #[serde(default)]
    order: Option<TestOrder>,
    #[serde(default)]
    kick_params: Option<String>,
    #[serde(default)]
    report_only_failed: Option<bool>,
    #[serde(default)]
    diff_checks: Option<Vec<DiffCheck>>,
    #[serde(default)]
    junit: JunitImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct JunitImpl {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::{Utf8TempDir, tempdir};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn config_with(contents: &str) -> (Utf8TempDir, Result<RendertestConfig, ConfigReadError>) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(RendertestConfig::CONFIG_FILE), contents).unwrap();
        let config = RendertestConfig::from_sources(dir.path(), None);
        (dir, config)
    }

    #[test]
    fn default_config_is_valid() {
        let config = RendertestConfig::default_config("/suite");
        let profile = config.profile(None).unwrap();
        assert_eq!(profile.name(), "default");
        assert_eq!(profile.passes(), ["usd", "hydra"]);
        assert_eq!(profile.test_threads(), TestThreads::NumCpus);
        assert_eq!(profile.timeout(), None);
        assert_eq!(profile.termination_grace_period(), Duration::from_secs(2));
        assert_eq!(profile.reruns(), 0);
        assert_eq!(profile.order(), TestOrder::Reverse);
        assert_eq!(
            profile.diff_checks(),
            vec![DiffCheck::same_pass("usd"), DiffCheck::same_pass("hydra")]
        );
        assert_eq!(profile.junit(), None);
    }

    #[test]
    fn custom_profile_inherits_from_default() {
        let (_dir, config) = config_with(indoc! {r#"
            default-profile = "ci"

            [tools]
            sdk-root = "/opt/sdk"

            [profile.default]
            reruns = 1
            timeout = "10m"

            [profile.ci]
            test-threads = 4
            instability-threshold = 5.0
            diff-checks = ["usd:out-usd:ref", "hydra:out-usd:ref"]

            [profile.ci.junit]
            name = "rendertest"
            url = "https://ci.example.com/job/42"
        "#});
        let config = config.unwrap();
        assert_eq!(
            config.tools().sdk_root.as_deref(),
            Some(Utf8Path::new("/opt/sdk"))
        );

        let profile = config.profile(None).unwrap();
        assert_eq!(profile.name(), "ci");
        assert_eq!(profile.test_threads(), TestThreads::Count(4));
        assert_eq!(profile.reruns(), 1);
        assert_eq!(profile.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(profile.instability_threshold(), 5.0);
        assert_eq!(profile.diff_checks().len(), 2);
        assert_eq!(
            profile.junit(),
            Some(JunitSettings {
                name: "rendertest".to_owned(),
                url: Some("https://ci.example.com/job/42".to_owned()),
            })
        );

        let default = config.profile(Some("default")).unwrap();
        assert_eq!(default.test_threads(), TestThreads::NumCpus);
        assert_eq!(default.reruns(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let (_dir, config) = config_with(indoc! {r#"
            [profile.default]
            retries = 3
        "#});
        assert!(matches!(config, Err(ConfigReadError::Toml { .. })));
    }

    #[test]
    fn missing_profiles() {
        let (_dir, config) = config_with("default-profile = \"nightly\"\n");
        assert!(matches!(
            config,
            Err(ConfigReadError::DefaultProfileNotFound { .. })
        ));

        let config = RendertestConfig::default_config("/suite");
        let error = config.profile(Some("nightly")).unwrap_err();
        assert!(error.to_string().contains("nightly"), "{error}");
    }

    #[test]
    fn empty_passes_are_rejected() {
        let (_dir, config) = config_with(indoc! {r#"
            [profile.broken]
            passes = []
        "#});
        assert!(matches!(config, Err(ConfigReadError::NoPasses { profile }) if profile == "broken"));
    }

    #[test]
    fn invalid_diff_check() {
        let (_dir, config) = config_with(indoc! {r#"
            [profile.default]
            diff-checks = ["usd-hydra"]
        "#});
        assert!(matches!(config, Err(ConfigReadError::Toml { .. })));
    }
}
