//! Addressing for the four-level recipe hierarchy.
//!
//! A reference like `zlib/1.2.13@github/alice#rrev:pkgid#prev` maps onto a
//! Git tag in the backing repository. Tags cannot nest (`1.0` and
//! `1.0/foo` cannot coexist as refs), so the hierarchy is flattened with
//! separators Git allows: `#` for revision suffixes and `@` where the
//! reference uses `:` for package ids.

use std::fmt;

use crate::error::{RegistryError, Result};
use crate::host::RepoId;

/// The account marker this registry serves. References naming any other
/// host are rejected before a single platform call is made.
pub const HOST_USER: &str = "github";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    Recipe,
    Package,
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recipe => "Recipe",
            Self::Package => "Package",
        })
    }
}

/// One level of the hierarchy: the platform tag it maps to and the
/// human-readable reference used in error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub kind: LevelKind,
    pub tag: String,
    pub reference: String,
}

impl Level {
    /// Addresses a recipe, validating the account marker before anything
    /// touches the backing platform.
    ///
    /// The channel segment is the repository owner and the name segment is
    /// the repository, so `zlib/1.2.13@github/alice` lives in
    /// `alice/zlib`.
    pub fn recipe(name: &str, version: &str, user: &str, channel: &str) -> Result<(RepoId, Level)> {
        let reference = format!("{name}/{version}@{user}/{channel}");
        if user != HOST_USER {
            return Err(RegistryError::Forbidden(format!(
                "Not a GitHub package: '{reference}'"
            )));
        }
        let repo = RepoId {
            owner: channel.to_string(),
            name: name.to_string(),
        };
        let level = Level {
            kind: LevelKind::Recipe,
            tag: version.to_string(),
            reference,
        };
        Ok((repo, level))
    }

    /// Narrows to a revision. The reserved id `0` means "no revision
    /// recorded yet" and leaves the tag untouched.
    pub fn revised(&self, id: &str) -> Level {
        let mut level = self.clone();
        if id != "0" {
            level.tag = format!("{}#{id}", level.tag);
            level.reference = format!("{}#{id}", level.reference);
        }
        level
    }

    /// Narrows to a package. `:` is not valid in a Git tag name, so the
    /// tag takes `@` where the reference takes `:`.
    pub fn package(&self, id: &str) -> Result<Level> {
        if id == "0" {
            return Err(RegistryError::BadRequest(format!(
                "invalid package ID: {id}"
            )));
        }
        Ok(Level {
            kind: LevelKind::Package,
            tag: format!("{}@{id}", self.tag),
            reference: format!("{}:{id}", self.reference),
        })
    }

    /// The NotFound error for this level.
    pub fn missing(&self) -> RegistryError {
        RegistryError::NotFound(format!("{} missing: {}", self.kind, self.reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> (RepoId, Level) {
        Level::recipe("zlib", "1.2.13", "github", "alice").unwrap()
    }

    #[test]
    fn test_recipe_level() {
        let (repo, level) = recipe();
        assert_eq!(repo.owner, "alice");
        assert_eq!(repo.name, "zlib");
        assert_eq!(level.tag, "1.2.13");
        assert_eq!(level.reference, "zlib/1.2.13@github/alice");
    }

    #[test]
    fn test_foreign_host_is_forbidden() {
        let err = Level::recipe("zlib", "1.2.13", "gitlab", "alice").unwrap_err();
        assert_eq!(err.status(), 403);
        assert!(format!("{err}").contains("zlib/1.2.13@gitlab/alice"));
    }

    #[test]
    fn test_revision_zero_is_elided() {
        let (_, level) = recipe();
        let rrev = level.revised("0");
        assert_eq!(rrev.tag, "1.2.13");
        assert_eq!(rrev.reference, "zlib/1.2.13@github/alice");
    }

    #[test]
    fn test_full_depth_tags() {
        let (_, level) = recipe();
        let rrev = level.revised("abc123");
        assert_eq!(rrev.tag, "1.2.13#abc123");
        assert_eq!(rrev.reference, "zlib/1.2.13@github/alice#abc123");

        let package = rrev.package("fedcba").unwrap();
        assert_eq!(package.kind, LevelKind::Package);
        assert_eq!(package.tag, "1.2.13#abc123@fedcba");
        assert_eq!(package.reference, "zlib/1.2.13@github/alice#abc123:fedcba");

        let prev = package.revised("9f8e");
        assert_eq!(prev.tag, "1.2.13#abc123@fedcba#9f8e");
        assert_eq!(
            prev.reference,
            "zlib/1.2.13@github/alice#abc123:fedcba#9f8e"
        );
    }

    #[test]
    fn test_package_zero_is_rejected() {
        let (_, level) = recipe();
        let err = level.revised("abc123").package("0").unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_missing_message_names_the_level() {
        let (_, level) = recipe();
        let err = level.missing();
        assert_eq!(format!("{err}"), "Recipe missing: zlib/1.2.13@github/alice");

        let package = level.revised("r1").package("p1").unwrap();
        let err = package.missing();
        assert_eq!(
            format!("{err}"),
            "Package missing: zlib/1.2.13@github/alice#r1:p1"
        );
    }
}
