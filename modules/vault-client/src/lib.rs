pub mod error;

pub use error::{Result, VaultError};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Minimal client for Vault's KV v1 and v2 secret engines.
///
/// Covers exactly the operations the router needs: read, list, and delete
/// keys under a mount. Auth is the plain token header.
#[derive(Clone)]
pub struct VaultClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl VaultClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Read a secret from a KV v1 mount and deserialize its `data` payload.
    pub async fn read_kv1<T: DeserializeOwned>(&self, mount: &str, path: &str) -> Result<T> {
        let url = format!("{}/v1/{}/{}", self.base_url, mount, path);
        let value = self.get_json(&url).await?;
        let data = value
            .get("data")
            .cloned()
            .ok_or_else(|| VaultError::Parse("missing data field in secret".into()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// List the keys stored directly under a KV v1 mount.
    pub async fn list_kv1(&self, mount: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/{}", self.base_url, mount);
        self.list_keys(&url).await
    }

    /// Delete a secret from a KV v1 mount.
    pub async fn delete_kv1(&self, mount: &str, path: &str) -> Result<()> {
        let url = format!("{}/v1/{}/{}", self.base_url, mount, path);
        let resp = self
            .client
            .delete(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(VaultError::NotFound);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VaultError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Read a secret from a KV v2 mount (payload nested under `data.data`).
    pub async fn read_kv2<T: DeserializeOwned>(&self, mount: &str, path: &str) -> Result<T> {
        let url = format!("{}/v1/{}/data/{}", self.base_url, mount, path);
        let value = self.get_json(&url).await?;
        let data = value
            .pointer("/data/data")
            .cloned()
            .ok_or_else(|| VaultError::Parse("missing data.data field in secret".into()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// List the keys stored under a KV v2 mount.
    pub async fn list_kv2(&self, mount: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/{}/metadata", self.base_url, mount);
        self.list_keys(&url).await
    }

    async fn list_keys(&self, url: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .query(&[("list", "true")])
            .send()
            .await?;

        let status = resp.status();
        // An empty mount lists as 404.
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VaultError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = resp.json().await?;
        let keys = value
            .pointer("/data/keys")
            .cloned()
            .ok_or_else(|| VaultError::Parse("missing data.keys field in list response".into()))?;
        Ok(serde_json::from_value(keys)?)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(VaultError::NotFound);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VaultError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}
