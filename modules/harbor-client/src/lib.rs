pub mod error;
pub mod types;

pub use error::{HarborError, Result};
pub use types::{RepositoryHit, SearchResult, Tag};

use std::time::Duration;

use serde_json::json;

/// Outcome of an artifact copy request.
///
/// Harbor answers a copy whose digest already exists at the destination with
/// a conflict; callers that retry moves want to distinguish that from a
/// fresh copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    AlreadyExists,
}

pub struct HarborClient {
    client: reqwest::Client,
    api_url: String,
    username: String,
    password: String,
}

impl HarborClient {
    /// Build a client for a Harbor instance. `base_url` is the registry root
    /// (without `/api/v2.0`, which is appended here).
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_url: format!("{}/api/v2.0", base_url.trim_end_matches('/')),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Verify the connection and credentials by listing projects.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/projects", self.api_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Copy an artifact into `dest_project/repository`. `source` is a
    /// `<project>/<repository>:<reference>` string.
    pub async fn copy_artifact(
        &self,
        dest_project: &str,
        repository: &str,
        source: &str,
    ) -> Result<CopyOutcome> {
        let url = format!(
            "{}/projects/{}/repositories/{}/artifacts",
            self.api_url, dest_project, repository
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("from", source)])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 409 {
            tracing::debug!(source, dest_project, "Artifact already present at destination");
            return Ok(CopyOutcome::AlreadyExists);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(CopyOutcome::Copied)
    }

    /// Delete a whole repository (all artifacts and tags) from a project.
    pub async fn delete_repository(&self, project: &str, repository: &str) -> Result<()> {
        let url = format!(
            "{}/projects/{}/repositories/{}",
            self.api_url, project, repository
        );
        let resp = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Search the registry for repositories matching `query`.
    pub async fn search(&self, query: &str) -> Result<SearchResult> {
        let url = format!("{}/search", self.api_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("q", query)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Attach a new tag to the artifact identified by `reference`.
    pub async fn create_tag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/projects/{}/repositories/{}/artifacts/{}/tags",
            self.api_url, project, repository, reference
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "name": tag }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Remove a tag from the artifact identified by `reference`.
    pub async fn delete_tag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/projects/{}/repositories/{}/artifacts/{}/tags/{}",
            self.api_url, project, repository, reference, tag
        );
        let resp = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// List tags on the artifact identified by `reference`.
    pub async fn list_tags(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
    ) -> Result<Vec<Tag>> {
        let url = format!(
            "{}/projects/{}/repositories/{}/artifacts/{}/tags",
            self.api_url, project, repository, reference
        );
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HarborError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_parses_harbor_payload() {
        let result: SearchResult = serde_json::from_str(
            r#"{"repository":[{"project_name":"station_a","repository_name":"station_a/t1"}],"project":[]}"#,
        )
        .unwrap();
        assert_eq!(result.repository.len(), 1);
        assert_eq!(result.repository[0].project_name, "station_a");
    }

    #[test]
    fn empty_search_result_defaults_to_no_hits() {
        let result: SearchResult = serde_json::from_str(r#"{"project":[]}"#).unwrap();
        assert!(result.repository.is_empty());
    }
}
