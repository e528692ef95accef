//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{BridgeError, MetadataPage, MetadataSource, RemoteFileMetadata};
use core_store::{DatabaseConfig, SqliteStore};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One scripted answer of [`ScriptedSource`].
pub enum Step {
    Page(Vec<&'static str>, Option<&'static str>),
    Transient(&'static str),
    Permanent(&'static str),
}

/// Metadata source that replays a fixed list of answers in order.
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    /// Page tokens received so far, in call order.
    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn remote_file(id: &str) -> RemoteFileMetadata {
    RemoteFileMetadata {
        id: id.to_string(),
        name: format!("{id}.txt"),
        mime_type: "text/plain".to_string(),
        modified_time: "2024-03-01T10:00:00.000Z".to_string(),
    }
}

#[async_trait]
impl MetadataSource for ScriptedSource {
    async fn list_page(
        &self,
        _page_size: u32,
        page_token: Option<String>,
    ) -> bridge_traits::error::Result<MetadataPage> {
        self.requests.lock().unwrap().push(page_token);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Page(ids, next)) => Ok(MetadataPage {
                files: ids.into_iter().map(remote_file).collect(),
                next_page_token: next.map(String::from),
            }),
            Some(Step::Transient(msg)) => Err(BridgeError::Transient(msg.to_string())),
            Some(Step::Permanent(msg)) => Err(BridgeError::Permanent(msg.to_string())),
            None => Err(BridgeError::Permanent("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// SQLite file under the temp dir, removed with its WAL files on drop.
pub struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("drive-sync-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh pool on the same file, as a restarted process would open it.
    pub async fn open(&self) -> SqliteStore {
        SqliteStore::open(DatabaseConfig::new(self.path.clone()))
            .await
            .unwrap()
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
