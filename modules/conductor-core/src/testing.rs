//! Test doubles for the registry seam.
//!
//! `RecordingRegistry` implements `ImageRegistry` without any network: it
//! records every call, serves configurable repository locations for the
//! reset path, and can be told to fail copies to exercise move-failure
//! handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::mover::ImageRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Copy {
        dest_project: String,
        repository: String,
        source: String,
    },
    DeleteRepository {
        project: String,
        repository: String,
    },
    Locate {
        repository: String,
    },
    Retag {
        project: String,
        repository: String,
        reference: String,
        tag: String,
    },
    RemoveTag {
        project: String,
        repository: String,
        reference: String,
        tag: String,
    },
    ListTags {
        project: String,
        repository: String,
        reference: String,
    },
}

#[derive(Default)]
pub struct RecordingRegistry {
    pub calls: Mutex<Vec<RegistryCall>>,
    /// Project names returned by `locate_repository`.
    pub locations: Mutex<Vec<String>>,
    /// Tag names returned by `list_tags`.
    pub tags: Mutex<Vec<String>>,
    fail_copies: AtomicBool,
    fail_deletes: AtomicBool,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_locations(&self, projects: &[&str]) {
        *self.locations.lock().unwrap() = projects.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_tags(&self, tags: &[&str]) {
        *self.tags.lock().unwrap() = tags.iter().map(|t| t.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The copy calls only, as (dest_project, source) pairs.
    pub fn copies(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RegistryCall::Copy {
                    dest_project,
                    source,
                    ..
                } => Some((dest_project, source)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RegistryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ImageRegistry for RecordingRegistry {
    async fn copy_artifact(
        &self,
        dest_project: &str,
        repository: &str,
        source: &str,
    ) -> Result<()> {
        self.record(RegistryCall::Copy {
            dest_project: dest_project.into(),
            repository: repository.into(),
            source: source.into(),
        });
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(anyhow!("copy refused by test registry"));
        }
        Ok(())
    }

    async fn delete_repository(&self, project: &str, repository: &str) -> Result<()> {
        self.record(RegistryCall::DeleteRepository {
            project: project.into(),
            repository: repository.into(),
        });
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("delete refused by test registry"));
        }
        Ok(())
    }

    async fn locate_repository(&self, repository: &str) -> Result<Vec<String>> {
        self.record(RegistryCall::Locate {
            repository: repository.into(),
        });
        Ok(self.locations.lock().unwrap().clone())
    }

    async fn retag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        self.record(RegistryCall::Retag {
            project: project.into(),
            repository: repository.into(),
            reference: reference.into(),
            tag: tag.into(),
        });
        Ok(())
    }

    async fn remove_tag(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
        tag: &str,
    ) -> Result<()> {
        self.record(RegistryCall::RemoveTag {
            project: project.into(),
            repository: repository.into(),
            reference: reference.into(),
            tag: tag.into(),
        });
        Ok(())
    }

    async fn list_tags(
        &self,
        project: &str,
        repository: &str,
        reference: &str,
    ) -> Result<Vec<String>> {
        self.record(RegistryCall::ListTags {
            project: project.into(),
            repository: repository.into(),
            reference: reference.into(),
        });
        Ok(self.tags.lock().unwrap().clone())
    }
}
