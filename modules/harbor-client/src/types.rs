use serde::Deserialize;

/// Top-level payload of `GET /search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub repository: Vec<RepositoryHit>,
}

/// One repository entry in a search result.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryHit {
    pub project_name: String,
    #[serde(default)]
    pub repository_name: String,
}

/// A tag attached to an artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}
