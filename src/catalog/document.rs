//! Test-definition documents and how they are found on disk.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use walkdir::WalkDir;

use super::policy::{OneOrMany, TagSet};
use crate::{err_io, err_msg, SimParityError};

/// One test as declared in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub id: String,
    pub tags: TagSet,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "test-name")]
    name: String,
    #[serde(default)]
    tags: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    tests: Option<Vec<RawRecord>>,
}

/// A parsed test-definition document. `records` is `None` when the document
/// has no `tests` key at all.
#[derive(Debug, Clone)]
pub struct TestDocument {
    pub name: String,
    pub path: PathBuf,
    records: Option<BTreeMap<String, TestRecord>>,
}

impl TestDocument {
    pub fn load(name: &str, path: &Path) -> Result<Self, SimParityError> {
        let text = fs::read_to_string(path)
            .map_err(|e| err_io!(e, "failed to read test document {}", path.display()))?;
        Self::parse(name, path, &text)
    }

    pub fn parse(name: &str, path: &Path, text: &str) -> Result<Self, SimParityError> {
        let raw: RawDocument = serde_yaml::from_str(text).map_err(|e| SimParityError::Catalog {
            message: format!("failed to parse test document {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        let records = raw.tests.map(|tests| {
            tests
                .into_iter()
                .map(|record| {
                    let tags = record.tags.map(TagSet::from).unwrap_or_default();
                    (record.name.clone(), TestRecord { id: record.name, tags })
                })
                .collect()
        });
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn has_tests(&self) -> bool {
        self.records.is_some()
    }

    pub fn records(&self) -> impl Iterator<Item = &TestRecord> {
        self.records.iter().flat_map(|records| records.values())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records
            .as_ref()
            .is_some_and(|records| records.contains_key(id))
    }

    pub fn all_ids(&self) -> BTreeSet<String> {
        self.records().map(|record| record.id.clone()).collect()
    }
}

/// Finds the single file called `name` anywhere under `root`.
///
/// Zero matches and more than one match are both configuration errors.
pub fn locate_document(root: &Path, name: &str) -> Result<PathBuf, SimParityError> {
    if !root.is_dir() {
        return Err(err_msg!(
            Catalog,
            "catalog root {} either doesn't exist or is not a directory",
            root.display()
        ));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| err_msg!(Catalog, "failed to walk {}: {}", root.display(), e))?;
        if entry.file_type().is_file() && entry.file_name() == name {
            found.push(entry.into_path());
        }
    }
    found.sort();

    match found.len() {
        0 => Err(err_msg!(
            Catalog,
            "could not find {} under {}",
            name,
            root.display()
        )),
        1 => Ok(found.remove(0)),
        _ => {
            let listing = found
                .iter()
                .map(|path| format!("  - {}", path.display()))
                .collect::<Vec<_>>()
                .join("\n");
            Err(err_msg!(
                Catalog,
                "multiple files named {} found:\n{}",
                name,
                listing
            ))
        }
    }
}
