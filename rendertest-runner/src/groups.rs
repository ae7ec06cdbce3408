// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named groups of tests.
//!
//! A test suite has a `groups` file, optionally followed by a `groups.local` file with the same
//! syntax:
//!
//! ```text
//! # comment
//! smoke: test_0001 test_0002
//! nightly+: smoke test_0003
//! ```
//!
//! Tokens starting with `test_` are test names, other tokens refer to groups. A group name
//! suffixed with `+` adds to an earlier definition; a plain name adds to definitions from the
//! same file and replaces definitions from earlier files.

use crate::{errors::GroupIndexError, helpers::is_test_name};
use camino::Utf8Path;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::debug;

/// The group files of a suite, in load order.
pub const GROUP_FILES: [&str; 2] = ["groups", "groups.local"];

#[derive(Clone, Debug, Default)]
struct GroupDef {
    tokens: BTreeSet<String>,
    // Index of the group file the current definition started in.
    origin: usize,
}

/// An index of group definitions.
#[derive(Clone, Debug, Default)]
pub struct GroupIndex {
    groups: IndexMap<String, GroupDef>,
}

impl GroupIndex {
    /// Loads the group files of the suite at `suite_root`. Missing files are skipped.
    pub fn load(suite_root: &Utf8Path) -> Result<Self, GroupIndexError> {
        let mut index = Self::default();
        for (origin, file) in GROUP_FILES.iter().enumerate() {
            let path = suite_root.join(file);
            if !path.is_file() {
                continue;
            }
            debug!("loading group file {path}");
            let contents = std::fs::read_to_string(&path)
                .map_err(|error| GroupIndexError::Read { path, error })?;
            index.add_source(origin, &contents);
        }
        index.check_cycles()?;
        Ok(index)
    }

    /// Builds an index from the contents of group files, in load order.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, GroupIndexError> {
        let mut index = Self::default();
        for (origin, contents) in sources.into_iter().enumerate() {
            index.add_source(origin, contents);
        }
        index.check_cycles()?;
        Ok(index)
    }

    fn add_source(&mut self, origin: usize, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((name, tokens)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            let (name, merge) = match name.strip_suffix('+') {
                Some(name) => (name.trim_end(), true),
                None => (name, false),
            };
            if name.is_empty() {
                continue;
            }

            let tokens = tokens.split_whitespace().map(str::to_owned);
            let extends = self
                .groups
                .get(name)
                .is_some_and(|def| merge || def.origin == origin);
            if extends {
                if let Some(def) = self.groups.get_mut(name) {
                    def.tokens.extend(tokens);
                }
            } else {
                self.groups.insert(
                    name.to_owned(),
                    GroupDef {
                        tokens: tokens.collect(),
                        origin,
                    },
                );
            }
        }
    }

    fn check_cycles(&self) -> Result<(), GroupIndexError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit<'a>(
            index: &'a GroupIndex,
            group: &'a str,
            marks: &mut IndexMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), GroupIndexError> {
            match marks.get(group) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|g| *g == group).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|g| (*g).to_owned()).collect();
                    cycle.push(group.to_owned());
                    return Err(GroupIndexError::Cycle { cycle });
                }
                None => {}
            }

            marks.insert(group, Mark::InProgress);
            stack.push(group);
            if let Some(def) = index.groups.get(group) {
                for token in def.tokens.iter().filter(|token| !is_test_name(token)) {
                    visit(index, token, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(group, Mark::Done);
            Ok(())
        }

        let mut marks = IndexMap::new();
        let mut stack = Vec::new();
        for group in self.groups.keys() {
            visit(self, group, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Returns true if a group with this name is defined.
    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Returns the names of all defined groups, in definition order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(|name| name.as_str())
    }

    /// Returns every test reachable from `group`, expanding nested groups recursively.
    ///
    /// Unknown groups expand to nothing.
    pub fn get_tests(&self, group: &str) -> BTreeSet<String> {
        let mut tests = BTreeSet::new();
        self.collect_tests(group, &mut tests);
        tests
    }

    fn collect_tests(&self, group: &str, tests: &mut BTreeSet<String>) {
        let Some(def) = self.groups.get(group) else {
            return;
        };
        for token in &def.tokens {
            if is_test_name(token) {
                tests.insert(token.clone());
            } else {
                // The index is acyclic, so this terminates.
                self.collect_tests(token, tests);
            }
        }
    }

    /// Returns every group whose expansion contains `test`.
    pub fn get_groups(&self, test: &str) -> BTreeSet<String> {
        self.groups
            .keys()
            .filter(|group| self.get_tests(group).contains(test))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn nested_merge() {
        let index = GroupIndex::from_sources([indoc! {"
            # smoke tests
            smoke: test_0001 test_0002
            nightly+: smoke test_0003
        "}])
        .unwrap();
        assert_eq!(
            index.get_tests("nightly"),
            btreeset! {
                "test_0001".to_owned(),
                "test_0002".to_owned(),
                "test_0003".to_owned(),
            }
        );
        assert_eq!(index.get_tests("unknown"), BTreeSet::new());
    }

    #[test]
    fn redefinitions() {
        let index = GroupIndex::from_sources([
            indoc! {"
                a: test_0001
                a: test_0002
                b: test_0003
                c: test_0004
            "},
            indoc! {"
                a+: test_0005
                b: test_0006
                   # indented comment
                not a group line
            "},
        ])
        .unwrap();
        // Same file: union. Merge suffix: union. Plain name in a later file: replace.
        assert_eq!(
            index.get_tests("a"),
            set(&["test_0001", "test_0002", "test_0005"])
        );
        assert_eq!(index.get_tests("b"), set(&["test_0006"]));
        assert_eq!(index.get_tests("c"), set(&["test_0004"]));
        assert_eq!(index.group_names().collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn merge_twice_is_union() {
        let index = GroupIndex::from_sources([indoc! {"
            g+: test_0001 other
            g+: test_0002
            other: test_0009
        "}])
        .unwrap();
        assert_eq!(
            index.get_tests("g"),
            set(&["test_0001", "test_0002", "test_0009"])
        );
    }

    #[test]
    fn groups_of_a_test() {
        let index = GroupIndex::from_sources([indoc! {"
            smoke: test_0001 test_0002
            nightly+: smoke test_0003
            linux: test_0003
        "}])
        .unwrap();
        assert_eq!(index.get_groups("test_0001"), set(&["nightly", "smoke"]));
        assert_eq!(index.get_groups("test_0003"), set(&["linux", "nightly"]));
        assert_eq!(index.get_groups("test_9999"), BTreeSet::new());

        for group in index.group_names() {
            for test in index.get_tests(group) {
                assert!(index.get_groups(&test).contains(group));
            }
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let error = GroupIndex::from_sources([indoc! {"
            a: b test_0001
            b: c
            c: a
        "}])
        .unwrap_err();
        match error {
            GroupIndexError::Cycle { cycle } => assert_eq!(cycle, ["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }

        GroupIndex::from_sources(["self: self"]).unwrap_err();
    }

    #[test]
    fn load_local_overrides() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("groups"), "ignore: test_0001\n").unwrap();
        std::fs::write(dir.path().join("groups.local"), "ignore+: test_0002\n").unwrap();
        let index = GroupIndex::load(dir.path()).unwrap();
        assert_eq!(index.get_tests("ignore"), set(&["test_0001", "test_0002"]));

        let empty = tempdir().unwrap();
        let index = GroupIndex::load(empty.path()).unwrap();
        assert!(!index.contains("ignore"));
    }
}
