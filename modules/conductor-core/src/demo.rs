//! Demonstration mode: after a train lands at a station, trigger that
//! station's workflow engine to execute it immediately instead of waiting
//! for the site to notice the push.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use vault_client::VaultClient;

/// Mount holding one credential secret per demo station.
const DEMO_STATIONS_MOUNT: &str = "demo-stations";

/// Airflow credentials and endpoint for one demo station.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoStation {
    pub id: String,
    pub airflow_api_url: String,
    pub username: String,
    pub password: String,
}

impl DemoStation {
    fn dag_runs_url(&self) -> String {
        format!(
            "{}/api/v1/dags/run_pht_train/dagRuns",
            self.airflow_api_url.trim_end_matches('/')
        )
    }
}

/// Triggers station-side DAG runs when demonstration mode is enabled.
pub struct DemoRunner {
    client: reqwest::Client,
    stations: HashMap<String, DemoStation>,
    /// Registry host (no scheme) used to build the repository reference the
    /// DAG pulls from.
    registry_host: String,
}

impl DemoRunner {
    /// Load demo-station credentials from the secret store.
    pub async fn load(vault: &VaultClient, registry_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        let mut stations = HashMap::new();
        for key in vault.list_kv2(DEMO_STATIONS_MOUNT).await? {
            let station: DemoStation = vault.read_kv2(DEMO_STATIONS_MOUNT, &key).await?;
            tracing::info!(station_id = %station.id, "Loaded demo station");
            stations.insert(station.id.clone(), station);
        }

        let registry_host = registry_url
            .trim_end_matches('/')
            .split("//")
            .last()
            .unwrap_or(registry_url)
            .to_string();

        Ok(Self {
            client,
            stations,
            registry_host,
        })
    }

    /// Trigger the train DAG on a station. Failures are logged, never
    /// surfaced: demo execution must not disturb routing.
    pub async fn trigger(&self, train_id: &str, station_id: &str) {
        let station = match self.stations.get(station_id) {
            Some(s) => s,
            None => {
                tracing::warn!(train_id, station_id, "No demo station configured, skipping");
                return;
            }
        };

        let repository = format!("{}/station_{}/{}", self.registry_host, station_id, train_id);
        let body = json!({
            "conf": {
                "repository": repository,
                "tag": "latest",
            }
        });

        let result = self
            .client
            .post(station.dag_runs_url())
            .basic_auth(&station.username, Some(&station.password))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(train_id, station_id, "Triggered demo DAG run");
            }
            Ok(resp) => {
                tracing::error!(
                    train_id,
                    station_id,
                    status = resp.status().as_u16(),
                    "Demo DAG trigger rejected"
                );
            }
            Err(e) => {
                tracing::error!(train_id, station_id, error = %e, "Demo DAG trigger failed");
            }
        }
    }
}
