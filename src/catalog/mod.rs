//! Resolves the working set of test ids from suite, tag, and explicit-name
//! policy across one or more test-definition documents.
//!
//! Resolution is all-or-nothing: every document is located and parsed before
//! anything is selected, so a missing document never yields a partial set.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{config::CatalogConfig, err_msg, SimParityError};

pub mod document;
pub mod policy;

pub use document::{locate_document, TestDocument, TestRecord};
pub use policy::{OneOrMany, SelectionPolicy, SuitePolicy, TagMatcher, TagSet};

/// A document name paired with the policy applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSelection {
    pub name: String,
    pub policy: SelectionPolicy,
}

#[derive(Debug, Clone)]
pub struct TestCatalog {
    root: PathBuf,
    project_document: String,
    documents: Vec<DocumentSelection>,
    require_substring: Option<String>,
}

impl TestCatalog {
    pub fn new(root: impl Into<PathBuf>, project_document: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            project_document: project_document.into(),
            documents: Vec::new(),
            require_substring: None,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut catalog = Self::new(&config.root, &config.project_document);
        catalog.documents = config
            .documents
            .iter()
            .map(|(name, policy)| DocumentSelection {
                name: name.clone(),
                policy: policy.clone().unwrap_or_default(),
            })
            .collect();
        catalog.require_substring = config.require_substring.clone();
        catalog
    }

    pub fn with_document(mut self, name: impl Into<String>, policy: SelectionPolicy) -> Self {
        self.documents.push(DocumentSelection {
            name: name.into(),
            policy,
        });
        self
    }

    pub fn with_required_substring(mut self, needle: Option<String>) -> Self {
        self.require_substring = needle;
        self
    }

    /// Replaces every document's policy, as the CLI selection flags do.
    pub fn with_policy_override(mut self, policy: SelectionPolicy) -> Self {
        for document in &mut self.documents {
            document.policy = policy.clone();
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents(&self) -> &[DocumentSelection] {
        &self.documents
    }

    /// Locates, parses, and selects from every configured document.
    pub fn resolve(&self) -> Result<BTreeSet<String>, SimParityError> {
        if self.documents.is_empty() {
            return Err(err_msg!(Config, "no test documents configured"));
        }

        let project_path = locate_document(&self.root, &self.project_document)?;
        let project_text = std::fs::read_to_string(&project_path)
            .map_err(|e| crate::err_io!(e, "failed to read {}", project_path.display()))?;
        let suites = SuitePolicy::parse(&project_text, &project_path.display().to_string())?;

        let loaded = self
            .documents
            .iter()
            .map(|selection| {
                let path = locate_document(&self.root, &selection.name)?;
                let document = TestDocument::load(&selection.name, &path)?;
                Ok((document, selection.policy.clone()))
            })
            .collect::<Result<Vec<_>, SimParityError>>()?;

        let selected = resolve(&loaded, &suites)?;
        self.apply_required_substring(selected)
    }

    fn apply_required_substring(
        &self,
        selected: BTreeSet<String>,
    ) -> Result<BTreeSet<String>, SimParityError> {
        let Some(needle) = &self.require_substring else {
            return Ok(selected);
        };
        let (kept, dropped): (BTreeSet<String>, BTreeSet<String>) =
            selected.into_iter().partition(|id| id.contains(needle.as_str()));
        if !dropped.is_empty() {
            info!(count = dropped.len(), needle = %needle, "excluding tests without required substring");
            for id in &dropped {
                debug!(test = %id, "excluded");
            }
        }
        if kept.is_empty() && !dropped.is_empty() {
            return Err(err_msg!(
                Config,
                "no selected test contains required substring '{}'",
                needle
            ));
        }
        Ok(kept)
    }
}

/// Union of [`select_from_document`] over every document.
pub fn resolve(
    documents: &[(TestDocument, SelectionPolicy)],
    suites: &SuitePolicy,
) -> Result<BTreeSet<String>, SimParityError> {
    let mut selected = BTreeSet::new();
    for (document, policy) in documents {
        selected.extend(select_from_document(document, policy, suites)?);
    }
    info!(count = selected.len(), "resolved test selection");
    Ok(selected)
}

/// Applies one policy to one document.
pub fn select_from_document(
    document: &TestDocument,
    policy: &SelectionPolicy,
    suites: &SuitePolicy,
) -> Result<BTreeSet<String>, SimParityError> {
    if !document.has_tests() {
        warn!(document = %document.name, "document has no tests key, contributes nothing");
        return Ok(BTreeSet::new());
    }

    if policy.selects_all() {
        let all = document.all_ids();
        info!(document = %document.name, count = all.len(), "selected all tests");
        return Ok(all);
    }

    let tag_set = suites.expand(policy);
    let matcher = TagMatcher::compile(&tag_set)?;
    let mut selected: BTreeSet<String> = document
        .records()
        .filter(|record| matcher.matches_any(&record.tags))
        .map(|record| record.id.clone())
        .collect();

    for id in &policy.tests {
        if document.contains(id) {
            selected.insert(id.clone());
        } else {
            warn!(test = %id, document = %document.name, "test not present in document");
        }
    }

    info!(document = %document.name, count = selected.len(), "selected tests");
    Ok(selected)
}
