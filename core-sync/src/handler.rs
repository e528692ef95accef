//! # Job Handlers
//!
//! The runner dispatches on `Job::job_type` through a [`HandlerRegistry`].
//! Supporting a new kind of job means registering another [`JobHandler`];
//! the runner loop does not change.

use crate::engine::MetadataSyncEngine;
use crate::Result;
use async_trait::async_trait;
use core_store::Job;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Job type string for [`MetadataSyncHandler`].
pub const METADATA_SYNC_JOB_TYPE: &str = "metadata_sync";

/// Executes one attempt of a job.
///
/// The job passed in is already RUNNING with the attempt counted. Errors are
/// recorded by the runner; handlers never touch the job row themselves.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered for `job_type`, if any.
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Option<Arc<dyn JobHandler>> {
        self.handlers.insert(job_type.into(), handler)
    }

    pub fn with_handler(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register(job_type, handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// Runs [`MetadataSyncEngine::sync`] for `metadata_sync` jobs.
#[derive(Debug, Clone)]
pub struct MetadataSyncHandler {
    engine: Arc<MetadataSyncEngine>,
}

impl MetadataSyncHandler {
    pub fn new(engine: Arc<MetadataSyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for MetadataSyncHandler {
    async fn execute(&self, job: &Job) -> Result<()> {
        let report = self.engine.sync().await?;
        debug!(
            job_id = %job.id,
            pages = report.pages,
            records = report.records,
            resumed = report.resumed_from_checkpoint,
            "Metadata sync handler finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _job: &Job) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::new()
            .with_handler(METADATA_SYNC_JOB_TYPE, Arc::new(Noop))
            .with_handler("thumbnail", Arc::new(Noop));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(METADATA_SYNC_JOB_TYPE));
        assert!(registry.get("thumbnail").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.job_types(), vec!["metadata_sync", "thumbnail"]);
    }

    #[test]
    fn test_register_replaces_previous() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register("a", Arc::new(Noop)).is_none());
        assert!(registry.register("a", Arc::new(Noop)).is_some());
        assert_eq!(registry.len(), 1);
    }
}
