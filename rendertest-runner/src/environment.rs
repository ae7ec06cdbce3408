// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Environment variables passed to test commands.
//!
//! The suite environment is computed once, from a base environment (normally the process
//! environment) and the configured tool locations. Every run and every pass then works on its own
//! copy: the process environment is never modified.

use crate::{
    command::ExitAbi,
    config::ToolPaths,
    helpers::{dylib_path_envvar, prepend_path_list},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use tracing::debug;

/// Names the pass a command runs in.
pub const PASS_VAR: &str = "ARNOLD_TESTSUITE_PASS";

/// Set to `1` in the Hydra pass and `0` otherwise.
pub const HYDRA_VAR: &str = "PROCEDURAL_USE_HYDRA";

/// The pass that renders through the Hydra render delegate.
pub const HYDRA_PASS: &str = "hydra";

/// License diagnostics are written to this file in the test directory.
pub const RLM_DIAGNOSTICS_FILE: &str = "rlm.diag";

/// The directory under the output directory holding the OptiX shader cache.
pub const OPTIX_CACHE_DIR: &str = ".nv";

/// The environment shared by every test of a suite.
#[derive(Clone, Debug, Default)]
pub struct SuiteEnvironment {
    vars: IndexMap<String, String>,
}

impl SuiteEnvironment {
    /// Builds the suite environment on top of the current process environment.
    pub fn from_process(tools: &ToolPaths, output_dir: &Utf8Path, abi: ExitAbi) -> Self {
        // Variables that aren't valid Unicode can't be passed on faithfully; drop them.
        let base = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Self::new(base, tools, output_dir, abi)
    }

    /// Builds the suite environment on top of `base`.
    ///
    /// Windows environment names are case-insensitive, so with [`ExitAbi::Windows`] names are
    /// upper-cased: `Path` and `PATH` name the same variable.
    pub fn new(
        base: impl IntoIterator<Item = (String, String)>,
        tools: &ToolPaths,
        output_dir: &Utf8Path,
        abi: ExitAbi,
    ) -> Self {
        let mut vars: IndexMap<String, String> = base
            .into_iter()
            .map(|(key, value)| (normalize_key(key, abi), value))
            .collect();

        if let Some(bin) = tools.sdk_dir("bin") {
            for var in ["PATH", dylib_path_envvar()] {
                let value = prepend_path_list(&bin, vars.get(var).map(String::as_str));
                vars.insert(var.to_owned(), value);
            }
        }
        if let Some(python) = tools.sdk_dir("python") {
            let value = prepend_path_list(&python, vars.get("PYTHONPATH").map(String::as_str));
            vars.insert("PYTHONPATH".to_owned(), value);
        }

        // Inherited plugin paths would load plugins the suite doesn't control.
        vars.shift_remove("ARNOLD_PLUGIN_PATH");
        if let Some(sdk_root) = &tools.sdk_root {
            vars.insert("ARNOLD_SDK_PATH".to_owned(), sdk_root.to_string());
        }

        let plugin_path = match vars.get("TESTSUITE_ARNOLD_PLUGIN_PATH") {
            Some(path) => Some(path.clone()),
            None => vars
                .get("USD_PROCEDURAL_PATH")
                .and_then(|path| Utf8Path::new(path).parent())
                .map(|dir| dir.to_string()),
        };
        match plugin_path {
            Some(path) => {
                vars.insert("ARNOLD_PLUGIN_PATH".to_owned(), path);
            }
            None => debug!("neither TESTSUITE_ARNOLD_PLUGIN_PATH nor USD_PROCEDURAL_PATH is set"),
        }

        let pxr_plugin_path = vars
            .get("TESTSUITE_PXR_PLUGINPATH_NAME")
            .or_else(|| vars.get("PREFIX_RENDER_DELEGATE"))
            .cloned();
        match pxr_plugin_path {
            Some(path) => {
                vars.insert("PXR_PLUGINPATH_NAME".to_owned(), path);
            }
            None => {
                debug!("neither TESTSUITE_PXR_PLUGINPATH_NAME nor PREFIX_RENDER_DELEGATE is set")
            }
        }

        // Telemetry slows down every renderer exit.
        vars.insert("ARNOLD_ADP_DISABLE".to_owned(), "1".to_owned());
        vars.insert(
            "OPTIX_CACHE_PATH".to_owned(),
            output_dir.join(OPTIX_CACHE_DIR).into_string(),
        );

        Self { vars }
    }

    /// Returns the variables.
    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Returns the environment for one run of a test whose working directory is `test_dir`.
    ///
    /// License diagnostics are redirected into the test directory, then `overrides` are applied in
    /// order. Windows environment names are case-insensitive, so overrides are upper-cased there.
    pub fn for_run(
        &self,
        test_dir: &Utf8Path,
        overrides: &IndexMap<String, String>,
        abi: ExitAbi,
    ) -> IndexMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert(
            "RLM_DIAGNOSTICS".to_owned(),
            test_dir.join(RLM_DIAGNOSTICS_FILE).into_string(),
        );
        vars.insert("RLM_DEBUG".to_owned(), String::new());
        for prefix in ["ADCLMHUB", "ADLSDK"] {
            vars.insert(format!("{prefix}_LOG_DIR"), test_dir.to_string());
            vars.insert(format!("{prefix}_LOG_LEVEL"), "T".to_owned());
        }

        for (key, value) in overrides {
            vars.insert(normalize_key(key.clone(), abi), value.clone());
        }
        vars
    }
}

fn normalize_key(key: String, abi: ExitAbi) -> String {
    match abi {
        ExitAbi::Windows => key.to_uppercase(),
        ExitAbi::Posix => key,
    }
}

/// Returns the environment for running `pass`, derived from a run environment.
pub fn for_pass(run_env: &IndexMap<String, String>, pass: &str) -> IndexMap<String, String> {
    let mut vars = run_env.clone();
    vars.insert(PASS_VAR.to_owned(), pass.to_owned());
    let hydra = if pass == HYDRA_PASS { "1" } else { "0" };
    vars.insert(HYDRA_VAR.to_owned(), hydra.to_owned());
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::PATH_LIST_SEPARATOR;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;

    fn base(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn tools() -> ToolPaths {
        ToolPaths {
            sdk_root: Some(Utf8PathBuf::from("/opt/arnold")),
            ..ToolPaths::default()
        }
    }

    #[test]
    fn suite_environment() {
        let env = SuiteEnvironment::new(
            base(&[
                ("PATH", "/usr/bin"),
                ("ARNOLD_PLUGIN_PATH", "/home/me/plugins"),
                ("USD_PROCEDURAL_PATH", "/build/procedural/usd_proc.so"),
                ("PREFIX_RENDER_DELEGATE", "/build/delegate"),
            ]),
            &tools(),
            Utf8Path::new("/out"),
            ExitAbi::Posix,
        );
        let vars = env.vars();
        assert_eq!(
            vars["PATH"],
            format!("/opt/arnold/bin{PATH_LIST_SEPARATOR}/usr/bin")
        );
        assert_eq!(vars["PYTHONPATH"], "/opt/arnold/python");
        assert_eq!(vars["ARNOLD_SDK_PATH"], "/opt/arnold");
        assert_eq!(vars["ARNOLD_PLUGIN_PATH"], "/build/procedural");
        assert_eq!(vars["PXR_PLUGINPATH_NAME"], "/build/delegate");
        assert_eq!(vars["ARNOLD_ADP_DISABLE"], "1");
        assert_eq!(vars["OPTIX_CACHE_PATH"], "/out/.nv");
    }

    #[test]
    fn explicit_plugin_paths_win() {
        let env = SuiteEnvironment::new(
            base(&[
                ("TESTSUITE_ARNOLD_PLUGIN_PATH", "/suite/plugins"),
                ("USD_PROCEDURAL_PATH", "/build/procedural/usd_proc.so"),
                ("TESTSUITE_PXR_PLUGINPATH_NAME", "/suite/pxr"),
                ("PREFIX_RENDER_DELEGATE", "/build/delegate"),
            ]),
            &ToolPaths::default(),
            Utf8Path::new("/out"),
            ExitAbi::Posix,
        );
        assert_eq!(env.vars()["ARNOLD_PLUGIN_PATH"], "/suite/plugins");
        assert_eq!(env.vars()["PXR_PLUGINPATH_NAME"], "/suite/pxr");
        assert!(!env.vars().contains_key("ARNOLD_SDK_PATH"));
    }

    #[test]
    fn run_and_pass_environments() {
        let env = SuiteEnvironment::new(
            base(&[]),
            &ToolPaths::default(),
            Utf8Path::new("/out"),
            ExitAbi::Posix,
        );
        let overrides: IndexMap<String, String> = [("my_var".to_owned(), "1".to_owned())]
            .into_iter()
            .collect();

        let posix = env.for_run(Utf8Path::new("/out/test_0001"), &overrides, ExitAbi::Posix);
        assert_eq!(posix["RLM_DIAGNOSTICS"], "/out/test_0001/rlm.diag");
        assert_eq!(posix["ADLSDK_LOG_LEVEL"], "T");
        assert_eq!(posix["my_var"], "1");

        let windows = env.for_run(Utf8Path::new("/out/test_0001"), &overrides, ExitAbi::Windows);
        assert_eq!(windows["MY_VAR"], "1");
        assert!(!windows.contains_key("my_var"));

        let hydra = for_pass(&posix, "hydra");
        assert_eq!(hydra[PASS_VAR], "hydra");
        assert_eq!(hydra[HYDRA_VAR], "1");
        let usd = for_pass(&posix, "usd");
        assert_eq!(usd[HYDRA_VAR], "0");
        // The run environment is left alone.
        assert!(!posix.contains_key(PASS_VAR));
    }

    #[test]
    fn windows_names_are_case_insensitive() {
        let env = SuiteEnvironment::new(
            base(&[("Path", r"C:\Windows"), ("SystemRoot", r"C:\Windows")]),
            &tools(),
            Utf8Path::new("/out"),
            ExitAbi::Windows,
        );
        let path_keys: Vec<&str> = env
            .vars()
            .keys()
            .map(String::as_str)
            .filter(|key| key.eq_ignore_ascii_case("path"))
            .collect();
        assert_eq!(path_keys, ["PATH"]);
        assert_eq!(
            env.vars()["PATH"],
            format!(r"/opt/arnold/bin{PATH_LIST_SEPARATOR}C:\Windows")
        );
        assert!(env.vars().contains_key("SYSTEMROOT"));

        let overrides: IndexMap<String, String> =
            [("path".to_owned(), r"C:\override".to_owned())]
                .into_iter()
                .collect();
        let run = env.for_run(Utf8Path::new("/out/test_0001"), &overrides, ExitAbi::Windows);
        let path_keys: Vec<&str> = run
            .keys()
            .map(String::as_str)
            .filter(|key| key.eq_ignore_ascii_case("path"))
            .collect();
        assert_eq!(path_keys, ["PATH"]);
        assert_eq!(run["PATH"], r"C:\override");
    }
}
