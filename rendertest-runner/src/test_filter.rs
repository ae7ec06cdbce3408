// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests by name and group.
//!
//! Each pattern has the form `expression[,expression...][:group[,group...]]`. An expression is a
//! test name with optional `*` and `?` wildcards, or `testsuite` for every test. A pattern selects
//! the tests matching any of its expressions that also belong to any of its groups. The result of
//! several patterns is their union. No patterns at all select every test.
//!
//! Groups are looked up in the [`GroupIndex`]. The special group `failed` selects the tests whose
//! previous run didn't pass, and a group unknown to the index selects the tests whose scene data
//! uses a node of that name.

use crate::{errors::TestFilterError, groups::GroupIndex, helpers::is_test_name};
use camino::Utf8Path;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// The expression that selects every test.
pub const ALL_TESTS: &str = "testsuite";

/// The group that selects tests which didn't pass in the previous run.
pub const FAILED_GROUP: &str = "failed";

#[derive(Clone, Debug)]
enum Expressions {
    All,
    Names(Vec<Regex>),
}

#[derive(Clone, Debug)]
struct FilterTerm {
    expressions: Expressions,
    // None if the pattern has no group qualifier.
    groups: Option<Vec<String>>,
}

/// A parsed list of filter patterns.
#[derive(Clone, Debug)]
pub struct TestFilter {
    terms: Vec<FilterTerm>,
}

/// What a [`TestFilter`] is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct FilterContext<'a> {
    /// Every test found in the suite.
    pub tests: &'a BTreeSet<String>,

    /// The suite's groups.
    pub groups: &'a GroupIndex,

    /// The tests whose previous run didn't pass.
    pub failed: &'a BTreeSet<String>,

    /// The suite source root, for looking up node usage.
    pub source_root: &'a Utf8Path,
}

impl TestFilter {
    /// Parses a list of patterns.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, TestFilterError> {
        let mut terms = Vec::with_capacity(patterns.len().max(1));
        for pattern in patterns {
            terms.push(parse_term(pattern.as_ref())?);
        }
        if terms.is_empty() {
            terms.push(parse_term(ALL_TESTS)?);
        }
        Ok(Self { terms })
    }

    /// Returns true if evaluating this filter needs the results of the previous run.
    pub fn uses_failed_group(&self) -> bool {
        self.terms.iter().any(|term| {
            term.groups
                .as_ref()
                .is_some_and(|groups| groups.iter().any(|g| g == FAILED_GROUP))
        })
    }

    /// Returns the tests selected by this filter.
    pub fn apply(&self, cx: &FilterContext<'_>) -> BTreeSet<String> {
        let mut selected = BTreeSet::new();
        for term in &self.terms {
            let by_name: BTreeSet<&String> = match &term.expressions {
                Expressions::All => cx.tests.iter().collect(),
                Expressions::Names(regexes) => cx
                    .tests
                    .iter()
                    .filter(|test| regexes.iter().any(|regex| regex.is_match(test)))
                    .collect(),
            };

            match &term.groups {
                None => selected.extend(by_name.into_iter().cloned()),
                Some(groups) => {
                    let mut by_group = BTreeSet::new();
                    for group in groups {
                        by_group.extend(resolve_group(cx, group));
                    }
                    selected.extend(
                        by_name
                            .into_iter()
                            .filter(|test| by_group.contains(*test))
                            .cloned(),
                    );
                }
            }
        }
        selected
    }
}

fn parse_term(pattern: &str) -> Result<FilterTerm, TestFilterError> {
    let (expressions, groups) = match pattern.split_once(':') {
        Some((expressions, groups)) => (expressions, Some(groups)),
        None => (pattern, None),
    };

    let expressions: Vec<&str> = if expressions.is_empty() {
        vec![ALL_TESTS]
    } else {
        expressions.split(',').collect()
    };
    let expressions = if expressions.contains(&ALL_TESTS) {
        Expressions::All
    } else {
        let mut regexes = Vec::new();
        for expression in expressions {
            if !is_test_name(expression) {
                warn!("ignoring expression `{expression}`: test expressions start with `test_`");
                continue;
            }
            regexes.push(glob_to_regex(expression)?);
        }
        Expressions::Names(regexes)
    };

    let groups = groups
        .filter(|groups| !groups.is_empty())
        .map(|groups| groups.split(',').map(str::to_owned).collect());

    Ok(FilterTerm {
        expressions,
        groups,
    })
}

/// Converts a name with `*` and `?` wildcards into an anchored regular expression.
fn glob_to_regex(expression: &str) -> Result<Regex, TestFilterError> {
    let mut pattern = String::with_capacity(expression.len() + 8);
    pattern.push('^');
    for c in expression.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|error| TestFilterError::InvalidExpression {
        expression: expression.to_owned(),
        error: Box::new(error),
    })
}

fn resolve_group(cx: &FilterContext<'_>, group: &str) -> BTreeSet<String> {
    if group == FAILED_GROUP {
        return cx.failed.clone();
    }
    let tests = cx.groups.get_tests(group);
    if !tests.is_empty() {
        return tests;
    }
    debug!("group `{group}` is not defined, looking for tests using a node of that name");
    let tests = tests_using_node(cx.source_root, cx.tests, group);
    if tests.is_empty() {
        warn!("group `{group}` is not defined and no test uses a node of that name");
    }
    tests
}

/// Returns the tests whose `data` directory has a scene or script creating a `node` node.
pub fn tests_using_node(
    source_root: &Utf8Path,
    tests: &BTreeSet<String>,
    node: &str,
) -> BTreeSet<String> {
    let node = regex::escape(node);
    let patterns = [
        ("ass", format!(r"(?m)^[ \t]*{node}[ \t]*\r?\n[ \t]*\{{")),
        ("py", format!(r#"AiNode\s*\(\s*["']{node}["']"#)),
        ("cpp", format!(r#"AiNode\s*\(\s*"{node}""#)),
    ];
    let regexes: Vec<(&str, Regex)> = patterns
        .into_iter()
        .filter_map(|(ext, pattern)| Some((ext, Regex::new(&pattern).ok()?)))
        .collect();

    tests
        .iter()
        .filter(|test| {
            let data_dir = source_root.join(test).join("data");
            let Ok(entries) = data_dir.read_dir_utf8() else {
                return false;
            };
            entries.flatten().any(|entry| {
                let path = entry.path();
                let Some((_, regex)) = regexes
                    .iter()
                    .find(|(ext, _)| path.extension() == Some(*ext))
                else {
                    return false;
                };
                // Some scenes are deliberately corrupted, so decode lossily.
                std::fs::read(path)
                    .is_ok_and(|bytes| regex.is_match(&String::from_utf8_lossy(&bytes)))
            })
        })
        .cloned()
        .collect()
}
