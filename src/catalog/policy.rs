//! Selection and suite policies.
//!
//! Every policy field accepts a single string or a list in YAML. The shape is
//! normalized once here, so nothing downstream ever asks "is this a string?".

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::{err_msg, SimParityError};

/// Either `tag` or `[tag, tag]` in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Normalized, ordered set of names. Blank entries are dropped.
pub type TagSet = BTreeSet<String>;

impl From<OneOrMany> for TagSet {
    fn from(value: OneOrMany) -> Self {
        let items = match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

fn normalize(field: Option<OneOrMany>) -> TagSet {
    field.map(TagSet::from).unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct RawSelectionPolicy {
    #[serde(default)]
    suites: Option<OneOrMany>,
    #[serde(default)]
    tags: Option<OneOrMany>,
    #[serde(default)]
    tests: Option<OneOrMany>,
}

/// Which tests to take from one document. Empty fields count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSelectionPolicy")]
pub struct SelectionPolicy {
    pub suites: TagSet,
    pub tags: TagSet,
    pub tests: TagSet,
}

impl From<RawSelectionPolicy> for SelectionPolicy {
    fn from(raw: RawSelectionPolicy) -> Self {
        Self {
            suites: normalize(raw.suites),
            tags: normalize(raw.tags),
            tests: normalize(raw.tests),
        }
    }
}

impl SelectionPolicy {
    pub fn new(
        suites: impl IntoIterator<Item = String>,
        tags: impl IntoIterator<Item = String>,
        tests: impl IntoIterator<Item = String>,
    ) -> Self {
        let clean = |items: Vec<String>| TagSet::from(OneOrMany::Many(items));
        Self {
            suites: clean(suites.into_iter().collect()),
            tags: clean(tags.into_iter().collect()),
            tests: clean(tests.into_iter().collect()),
        }
    }

    /// True when nothing narrows the selection, meaning "take every test".
    pub fn selects_all(&self) -> bool {
        self.suites.is_empty() && self.tags.is_empty() && self.tests.is_empty()
    }
}

// ============================================================================
// SUITE POLICY
// ============================================================================

#[derive(Debug, Deserialize)]
struct SuiteEntry {
    #[serde(rename = "suite-name")]
    name: String,
    #[serde(default)]
    tags: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    suites: Option<Vec<SuiteEntry>>,
}

/// Suite name to tag set, read from the project document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuitePolicy {
    suites: BTreeMap<String, TagSet>,
}

impl SuitePolicy {
    /// Parses the project document. A document without a `suites` key is a
    /// configuration error.
    pub fn parse(text: &str, origin: &str) -> Result<Self, SimParityError> {
        let project: ProjectDocument = serde_yaml::from_str(text).map_err(|e| {
            SimParityError::Catalog {
                message: format!("failed to parse project document {origin}"),
                source: Some(Box::new(e)),
            }
        })?;
        let entries = project
            .suites
            .ok_or_else(|| err_msg!(Catalog, "no suites found in project document {origin}"))?;

        let mut suites = BTreeMap::new();
        for entry in entries {
            let tags = normalize(entry.tags);
            if suites.insert(entry.name.clone(), tags).is_some() {
                warn!(suite = %entry.name, document = origin, "duplicate suite name, keeping the last one");
            }
        }
        Ok(Self { suites })
    }

    pub fn from_map(suites: BTreeMap<String, TagSet>) -> Self {
        Self { suites }
    }

    pub fn tags_of(&self, suite: &str) -> Option<&TagSet> {
        self.suites.get(suite)
    }

    /// `tags(suites) ∪ tags`. Unknown suite names are warned and skipped.
    pub fn expand(&self, policy: &SelectionPolicy) -> TagSet {
        let mut tag_set = TagSet::new();
        for suite in &policy.suites {
            match self.suites.get(suite) {
                Some(tags) => tag_set.extend(tags.iter().cloned()),
                None => warn!(suite = %suite, "suite is not present in the project document, skipping"),
            }
        }
        tag_set.extend(policy.tags.iter().cloned());
        tag_set
    }
}

// ============================================================================
// TAG MATCHING
// ============================================================================

/// Compiled tag patterns. A record tag matches when some pattern matches at
/// its start, so `elw` selects `elwadd` but `add` does not.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    patterns: Vec<Regex>,
}

impl TagMatcher {
    pub fn compile(tag_set: &TagSet) -> Result<Self, SimParityError> {
        let patterns = tag_set
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| SimParityError::Config {
                    message: format!("invalid tag pattern '{pattern}'"),
                    source: Some(Box::new(e)),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches_any<'a>(&self, record_tags: impl IntoIterator<Item = &'a String>) -> bool {
        record_tags
            .into_iter()
            .any(|tag| self.patterns.iter().any(|pattern| pattern.is_match(tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> TagSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_policy_accepts_string_or_list() {
        let policy: SelectionPolicy =
            serde_yaml::from_str("suites: sanity\ntags: [matmul, ' ', upk]\n").unwrap();
        assert_eq!(policy.suites, set(&["sanity"]));
        assert_eq!(policy.tags, set(&["matmul", "upk"]));
        assert!(policy.tests.is_empty());
        assert!(!policy.selects_all());
    }

    #[test]
    fn test_empty_fields_select_all() {
        let policy: SelectionPolicy = serde_yaml::from_str("suites: []\ntags: ''\ntests: ~\n").unwrap();
        assert!(policy.selects_all());
    }

    #[test]
    fn test_suite_policy_requires_suites_key() {
        let err = SuitePolicy::parse("name: proj\n", "project.yaml").unwrap_err();
        assert!(err.to_string().contains("no suites found"));
    }

    #[test]
    fn test_expand_skips_unknown_suites() {
        let suites = SuitePolicy::parse(
            "suites:\n  - suite-name: sanity\n    tags: [matmul, upk]\n",
            "project.yaml",
        )
        .unwrap();
        let policy = SelectionPolicy::new(
            ["sanity".to_string(), "nightly".to_string()],
            ["pck".to_string()],
            [],
        );
        assert_eq!(suites.expand(&policy), set(&["matmul", "pck", "upk"]));
    }

    #[test]
    fn test_matcher_is_anchored_prefix() {
        let matcher = TagMatcher::compile(&set(&["elw", "sfpu_.*"])).unwrap();
        assert!(matcher.matches_any(&set(&["elwadd"])));
        assert!(matcher.matches_any(&set(&["x", "sfpu_tanh"])));
        assert!(!matcher.matches_any(&set(&["add_elw"])));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = TagMatcher::compile(&set(&["(unclosed"])).unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Config);
    }
}
