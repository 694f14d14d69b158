//! Loads and saves the metadata document that lives in a recipe's root
//! release.
//!
//! The root release sits at the bare version tag and doubles as storage
//! for the whole revision tree. Every request re-reads it; mutations are
//! applied in memory and written back with one update before the response
//! goes out.

use tracing::debug;

use crate::codec::{self, Decoded, HIDDEN_PREFIX};
use crate::error::{RegistryError, Result};
use crate::host::{ReleaseData, ReleaseHost, RepoId};
use crate::model::{Recipe, RecipeRevision};
use crate::reference::Level;

/// The unit of persistence: one recipe, one root release.
#[derive(Debug)]
pub struct Root {
    pub repo: RepoId,
    pub level: Level,
    pub release: ReleaseData,
    pub recipe: Recipe,
    pub prefix: String,
    pub suffix: String,
    /// Body snapshot taken at load time, the precondition for [`Root::save`].
    loaded_body: String,
}

impl Root {
    /// Fetches and decodes the root release at the bare version tag.
    ///
    /// With `force`, a missing root is created from a fresh document,
    /// which implicitly creates the version tag at the tip of the default
    /// branch. Losing the creation race to a concurrent request falls back
    /// to reading what the winner wrote.
    pub async fn open(
        host: &dyn ReleaseHost,
        repo: &RepoId,
        level: &Level,
        force: bool,
    ) -> Result<Root> {
        match host.release_by_tag(repo, &level.tag).await {
            Ok(release) => Self::decode(repo, level, release),
            Err(err) if err.is_not_found() => {
                if !force {
                    return Err(level.missing());
                }
                let recipe = Recipe {
                    revisions: vec![RecipeRevision::new("0")],
                };
                let body = format!("{HIDDEN_PREFIX}{}", codec::serialize(&recipe));
                match host.create_release(repo, &level.tag, Some(&body)).await {
                    Ok(release) => {
                        let loaded_body = release.body.clone().unwrap_or_default();
                        Ok(Root {
                            repo: repo.clone(),
                            level: level.clone(),
                            release,
                            recipe,
                            prefix: HIDDEN_PREFIX.to_string(),
                            suffix: String::new(),
                            loaded_body,
                        })
                    }
                    Err(err) if err.is_tag_conflict() => {
                        debug!("lost the root creation race for {}", level.reference);
                        let release = host.release_by_tag(repo, &level.tag).await.map_err(|err| {
                            RegistryError::BadGateway(format!(
                                "Cannot create release: {}: {err}",
                                level.reference
                            ))
                        })?;
                        Self::decode(repo, level, release)
                    }
                    Err(err) => {
                        Err(RegistryError::BadGateway(format!(
                            "Cannot create release: {}: {err}",
                            level.reference
                        )))
                    }
                }
            }
            Err(err) => {
                Err(RegistryError::BadGateway(format!(
                    "Cannot read release: {}: {err}",
                    level.reference
                )))
            }
        }
    }

    fn decode(repo: &RepoId, level: &Level, release: ReleaseData) -> Result<Root> {
        let loaded_body = release.body.clone().unwrap_or_default();
        // An empty body still needs the hiding token once we write it back.
        let body = if loaded_body.is_empty() {
            HIDDEN_PREFIX.to_string()
        } else {
            loaded_body.clone()
        };
        let Decoded {
            prefix,
            recipe,
            suffix,
        } = codec::deserialize(&body, &level.reference)?;
        Ok(Root {
            repo: repo.clone(),
            level: level.clone(),
            release,
            recipe,
            prefix,
            suffix,
            loaded_body,
        })
    }

    /// Writes the document back in a single release update.
    ///
    /// Guards the lost-update window with a precondition: the release body
    /// must still match what this root loaded, otherwise a concurrent
    /// writer got there first and the caller must re-open and re-apply.
    pub async fn save(&mut self, host: &dyn ReleaseHost) -> Result<()> {
        let current = host
            .release_by_id(&self.repo, self.release.id)
            .await
            .map_err(|err| {
                RegistryError::BadGateway(format!(
                    "Failed to update metadata: {}: {err}",
                    self.level.reference
                ))
            })?;
        if current.body.unwrap_or_default() != self.loaded_body {
            return Err(RegistryError::Conflict(format!(
                "Metadata changed concurrently: {}",
                self.level.reference
            )));
        }
        let body = format!(
            "{}{}{}",
            self.prefix,
            codec::serialize(&self.recipe),
            self.suffix
        );
        host.update_release_body(&self.repo, self.release.id, &body)
            .await
            .map_err(|_| {
                RegistryError::BadGateway(format!(
                    "Failed to update metadata: {}",
                    self.level.reference
                ))
            })?;
        self.loaded_body = body;
        Ok(())
    }
}
