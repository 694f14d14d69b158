//! The revision tree persisted for each recipe, and the get-or-create
//! resolver that walks it.
//!
//! The persisted JSON shape is
//! `{revisions: [{id, time, release?, files?, packages: [...]}]}`; the
//! `release` pointer appears only once a file has been uploaded for that
//! revision, and `files` records the digests captured on upload.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reference::Level;

/// Pointer to the platform release that stores a revision's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub id: u64,
    /// Scheme and host of the platform's upload endpoint for this release.
    pub origin: String,
}

/// Digest and download location recorded when a file is uploaded through
/// the registry. Files uploaded out-of-band have no record and report
/// empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSum {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub md5: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileSum>,
}

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            time: now_string(),
            release: None,
            files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRevision {
    #[serde(flatten)]
    pub revision: Revision,
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl RecipeRevision {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            revision: Revision::new(id),
            packages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    #[serde(default)]
    pub revisions: Vec<PackageRevision>,
}

impl Package {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revisions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRevision {
    #[serde(flatten)]
    pub revision: Revision,
}

impl PackageRevision {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            revision: Revision::new(id),
        }
    }
}

/// The root aggregate: exactly one per (name, version, user, channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub revisions: Vec<RecipeRevision>,
}

/// Current time in the RFC 3339 form stored in metadata documents.
pub fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// A child addressable by id within its parent's ordered collection.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for RecipeRevision {
    fn id(&self) -> &str {
        &self.revision.id
    }
}

impl Identified for Package {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for PackageRevision {
    fn id(&self) -> &str {
        &self.revision.id
    }
}

/// Anything carrying a [`Revision`] record.
pub trait Revised: Identified {
    fn revision(&self) -> &Revision;
    fn revision_mut(&mut self) -> &mut Revision;
}

impl Revised for RecipeRevision {
    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn revision_mut(&mut self) -> &mut Revision {
        &mut self.revision
    }
}

impl Revised for PackageRevision {
    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn revision_mut(&mut self) -> &mut Revision {
        &mut self.revision
    }
}

/// A resolved child: where it sits in its parent and the level that
/// names it.
#[derive(Debug)]
pub struct Found<'a, T> {
    pub level: Level,
    pub index: usize,
    pub value: &'a mut T,
}

/// Get-or-create over an ordered child collection.
///
/// A linear scan is plenty: revision lists are short and order is part of
/// the persisted document. Without `force`, an absent id is the level's
/// NotFound; with it, a fresh child is appended and returned.
pub fn resolve<'a, T, F>(
    level: Level,
    children: &'a mut Vec<T>,
    id: &str,
    force: bool,
    make: F,
) -> Result<Found<'a, T>>
where
    T: Identified,
    F: FnOnce() -> T,
{
    let index = match children.iter().position(|child| child.id() == id) {
        Some(index) => index,
        None => {
            if !force {
                return Err(level.missing());
            }
            children.push(make());
            children.len() - 1
        }
    };
    Ok(Found {
        level,
        index,
        value: &mut children[index],
    })
}

/// The latest entry of a revision collection.
#[derive(Debug)]
pub struct Latest<'a, T> {
    pub level: Level,
    pub index: usize,
    pub value: &'a T,
}

/// The entry with the greatest `time`.
///
/// Scans left to right with a strict comparison, so the first of equal
/// timestamps wins. Empty collections are the level's NotFound.
pub fn latest<'a, T: Revised>(level: &Level, revisions: &'a [T]) -> Result<Latest<'a, T>> {
    let mut entries = revisions.iter().enumerate();
    let (mut index, mut best) = entries.next().ok_or_else(|| level.missing())?;
    for (i, candidate) in entries {
        if candidate.revision().time > best.revision().time {
            index = i;
            best = candidate;
        }
    }
    Ok(Latest {
        level: level.revised(best.id()),
        index,
        value: best,
    })
}

/// One row of a revision listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionSummary {
    pub revision: String,
    pub time: String,
}

/// The `{revision, time}` rows for a revision listing, in storage order.
pub fn revision_summaries<T: Revised>(level: &Level, revisions: &[T]) -> Result<Vec<RevisionSummary>> {
    if revisions.is_empty() {
        return Err(level.missing());
    }
    Ok(revisions
        .iter()
        .map(|entry| {
            RevisionSummary {
                revision: entry.revision().id.clone(),
                time: entry.revision().time.clone(),
            }
        })
        .collect())
}
