//! Physical relocation of train images between registry projects.
//!
//! A move is the paired copy of the `base` and `latest` tags followed by a
//! best-effort delete of the source repository. The copy pair is not
//! transactional; callers commit their own state only after the copies have
//! succeeded.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use harbor_client::HarborClient;

use crate::error::RouterError;
use crate::types::{Project, TAG_BASE, TAG_LATEST};

/// The registry operations the router needs. Implemented by `HarborClient`
/// and by the recording fake in tests.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Copy the artifact identified by `source` (`<project>/<repo>:<tag>`)
    /// into `dest_project/repository`. Copying an artifact that already
    /// exists at the destination is success.
    async fn copy_artifact(
        &self,
        dest_project: &str,
        repository: &str,
        source: &str,
    ) -> Result<()>;

    /// Delete a whole repository from a project.
    async fn delete_repository(&self, project: &str, repository: &str) -> Result<()>;

    /// Names of the projects that currently hold `repository`.
    async fn locate_repository(&self, repository: &str) -> Result<Vec<String>>;

    /// Attach `tag` to the artifact currently identified by `reference`.
    async fn retag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()>;

    /// Remove `tag` from the artifact identified by `reference`. Removing a
    /// tag that does not exist is success.
    async fn remove_tag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()>;

    /// Names of the tags attached to the artifact identified by `reference`.
    async fn list_tags(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
    ) -> Result<Vec<String>>;
}

#[async_trait]
impl ImageRegistry for HarborClient {
    async fn copy_artifact(
        &self,
        dest_project: &str,
        repository: &str,
        source: &str,
    ) -> Result<()> {
        // HarborClient already folds the 409 conflict into AlreadyExists.
        HarborClient::copy_artifact(self, dest_project, repository, source).await?;
        Ok(())
    }

    async fn delete_repository(&self, project: &str, repository: &str) -> Result<()> {
        HarborClient::delete_repository(self, project, repository).await?;
        Ok(())
    }

    async fn locate_repository(&self, repository: &str) -> Result<Vec<String>> {
        let result = HarborClient::search(self, repository).await?;
        Ok(result
            .repository
            .into_iter()
            .filter(|hit| {
                hit.repository_name.is_empty()
                    || hit.repository_name == format!("{}/{}", hit.project_name, repository)
            })
            .map(|hit| hit.project_name)
            .collect())
    }

    async fn retag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        HarborClient::create_tag(self, project, repository, reference, tag).await?;
        Ok(())
    }

    async fn remove_tag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        match HarborClient::delete_tag(self, project, repository, reference, tag).await {
            Ok(()) => Ok(()),
            Err(e) if e.status() == Some(404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tags(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
    ) -> Result<Vec<String>> {
        let tags = HarborClient::list_tags(self, project, repository, reference).await?;
        Ok(tags.into_iter().map(|t| t.name).collect())
    }
}

/// Moves trains between projects and locates them for resets.
#[derive(Clone)]
pub struct RegistryMover {
    registry: Arc<dyn ImageRegistry>,
}

impl RegistryMover {
    pub fn new(registry: Arc<dyn ImageRegistry>) -> Self {
        Self { registry }
    }

    /// Move the image pair for `train_id` from `origin` to `dest`.
    ///
    /// Order matters: `base` first (skipped on outgoing moves, where only the
    /// finished working image is preserved), then `latest`, then the source
    /// repository delete. The delete is best-effort: once both copies have
    /// landed the train has arrived, and a dangling source repository is only
    /// worth a warning.
    pub async fn move_train(
        &self,
        train_id: &str,
        origin: &Project,
        dest: &Project,
        delete_source: bool,
        outgoing: bool,
    ) -> Result<(), RouterError> {
        let outgoing = outgoing || *dest == Project::Outgoing;
        let dest_project = dest.project_name();
        let origin_project = origin.project_name();

        tracing::info!(
            train_id,
            origin = %origin_project,
            destination = %dest_project,
            outgoing,
            "Moving train images"
        );

        if !outgoing {
            let source = format!("{origin_project}/{train_id}:{TAG_BASE}");
            self.registry
                .copy_artifact(&dest_project, train_id, &source)
                .await
                .map_err(|e| {
                    tracing::error!(train_id, error = %e, "Error moving base image");
                    RouterError::MoveFailed {
                        tag: TAG_BASE.into(),
                        message: e.to_string(),
                    }
                })?;
        }

        let source = format!("{origin_project}/{train_id}:{TAG_LATEST}");
        self.registry
            .copy_artifact(&dest_project, train_id, &source)
            .await
            .map_err(|e| {
                tracing::error!(train_id, error = %e, "Error moving latest image");
                RouterError::MoveFailed {
                    tag: TAG_LATEST.into(),
                    message: e.to_string(),
                }
            })?;

        if delete_source {
            if let Err(e) = self
                .registry
                .delete_repository(&origin_project, train_id)
                .await
            {
                tracing::warn!(
                    train_id,
                    origin = %origin_project,
                    error = %e,
                    "Failed to delete source repository after move"
                );
            }
        }

        Ok(())
    }

    /// Every project that currently holds the train, via the registry's
    /// search endpoint.
    pub async fn locate(&self, train_id: &str) -> Result<Vec<Project>, RouterError> {
        let projects = self
            .registry
            .locate_repository(train_id)
            .await
            .map_err(|e| RouterError::MoveFailed {
                tag: "search".into(),
                message: e.to_string(),
            })?;
        Ok(projects
            .iter()
            .map(|name| Project::from_project_name(name))
            .collect())
    }

    /// Re-point `latest` at the immutable `base` artifact in `pht_incoming`,
    /// discarding whatever the stations produced.
    pub async fn restore_latest(&self, train_id: &str) -> Result<(), RouterError> {
        let incoming = Project::Incoming.project_name();
        let base_tags = self
            .registry
            .list_tags(&incoming, train_id, TAG_BASE)
            .await
            .map_err(|e| RouterError::MoveFailed {
                tag: TAG_BASE.into(),
                message: e.to_string(),
            })?;
        if base_tags.iter().any(|t| t == TAG_LATEST) {
            tracing::debug!(train_id, "Latest tag already on the base artifact");
            return Ok(());
        }
        self.registry
            .remove_tag(&incoming, train_id, TAG_LATEST, TAG_LATEST)
            .await
            .map_err(|e| RouterError::MoveFailed {
                tag: TAG_LATEST.into(),
                message: e.to_string(),
            })?;
        self.registry
            .retag(&incoming, train_id, TAG_BASE, TAG_LATEST)
            .await
            .map_err(|e| RouterError::MoveFailed {
                tag: TAG_LATEST.into(),
                message: e.to_string(),
            })?;
        tracing::info!(train_id, "Restored latest tag from base");
        Ok(())
    }
}
