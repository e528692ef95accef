//! # Metadata Sync Engine
//!
//! Mirrors a paginated remote listing into the [`DurableStore`], one page at
//! a time, resuming from the last committed page after any interruption.
//!
//! ## Commit order
//!
//! For every page the engine writes the records first and the continuation
//! token second, each in its own transaction:
//!
//! ```text
//! get_checkpoint ─▶ list_page(token) ─▶ upsert_files(page) ─▶ set_checkpoint(next)
//!                        ▲                                           │
//!                        └───────────── next is Some ────────────────┘
//! ```
//!
//! The checkpoint therefore never points past data that is not yet stored.
//! A crash between the two writes replays exactly one page on the next run,
//! which is harmless because upserts overwrite by id.
//!
//! Source and store errors are returned unchanged in kind; deciding whether to
//! retry belongs to the job runner.

use crate::{Result, SyncError};
use bridge_traits::{MetadataPage, MetadataSource};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_store::{DurableStore, FileRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// `sync_state` key holding the Drive continuation token.
pub const CHECKPOINT_KEY: &str = "drive_metadata_page_token";

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Totals for one `sync` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u64,
    pub records: u64,
    /// The run continued from a stored continuation token instead of the
    /// first page.
    pub resumed_from_checkpoint: bool,
}

pub struct MetadataSyncEngine {
    source: Arc<dyn MetadataSource>,
    store: Arc<dyn DurableStore>,
    events: Arc<EventBus>,
    page_size: u32,
    source_timeout: Option<Duration>,
}

impl std::fmt::Debug for MetadataSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataSyncEngine")
            .field("source", &self.source.name())
            .field("page_size", &self.page_size)
            .field("source_timeout", &self.source_timeout)
            .finish()
    }
}

impl MetadataSyncEngine {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        store: Arc<dyn DurableStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            source,
            store,
            events,
            page_size: DEFAULT_PAGE_SIZE,
            source_timeout: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Deadline applied to each `list_page` call. Expiry fails the sync with
    /// [`SyncError::SourceTimeout`] and leaves the checkpoint untouched.
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Pull every remaining page into the store, starting at the stored
    /// checkpoint.
    #[instrument(skip(self), fields(source = %self.source.name(), page_size = self.page_size))]
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut token = self.store.get_checkpoint(CHECKPOINT_KEY).await?;
        let mut report = SyncReport {
            resumed_from_checkpoint: token.is_some(),
            ..SyncReport::default()
        };

        info!(
            resumed = report.resumed_from_checkpoint,
            "Starting metadata sync"
        );
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Started {
                source: self.source.name().to_string(),
                resumed: report.resumed_from_checkpoint,
            }))
            .ok();

        loop {
            let MetadataPage {
                files,
                next_page_token,
            } = self.fetch_page(token.take()).await?;

            let records: Vec<FileRecord> = files.into_iter().map(FileRecord::from).collect();
            self.store.upsert_files(&records).await?;
            self.store
                .set_checkpoint(CHECKPOINT_KEY, next_page_token.as_deref())
                .await?;

            report.pages += 1;
            report.records += records.len() as u64;
            let has_more = next_page_token.is_some();

            debug!(
                page = report.pages,
                records = records.len(),
                has_more,
                "Page committed"
            );
            self.events
                .emit(CoreEvent::Sync(SyncEvent::PageCommitted {
                    page: report.pages,
                    records: records.len() as u64,
                    has_more,
                }))
                .ok();

            match next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(
            pages = report.pages,
            records = report.records,
            "Metadata sync completed"
        );
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                pages: report.pages,
                records: report.records,
            }))
            .ok();

        Ok(report)
    }

    /// Drop the checkpoint so the next `sync` re-lists from the first page.
    pub async fn reset(&self) -> Result<()> {
        request_full_resync(self.store.as_ref(), &self.events).await
    }

    async fn fetch_page(&self, token: Option<String>) -> Result<MetadataPage> {
        let request = self.source.list_page(self.page_size, token);

        let page = match self.source_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| SyncError::SourceTimeout(limit))??,
            None => request.await?,
        };

        Ok(page)
    }
}

/// Clear the sync checkpoint without an engine, for callers that hold only
/// the store. The next `sync` starts over from the first page.
pub async fn request_full_resync(store: &dyn DurableStore, events: &EventBus) -> Result<()> {
    store.clear_checkpoint(CHECKPOINT_KEY).await?;

    warn!(
        checkpoint_key = CHECKPOINT_KEY,
        "Sync checkpoint cleared; next sync will re-fetch the entire listing"
    );
    events
        .emit(CoreEvent::Sync(SyncEvent::ResyncRequested {
            checkpoint_key: CHECKPOINT_KEY.to_string(),
        }))
        .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, RemoteFileMetadata};
    use core_store::{create_test_pool, SqliteStore};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Page(Vec<&'static str>, Option<&'static str>),
        Transient,
        Permanent,
        Hang,
    }

    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        tokens_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                tokens_seen: Mutex::new(Vec::new()),
            }
        }

        fn tokens_seen(&self) -> Vec<Option<String>> {
            self.tokens_seen.lock().unwrap().clone()
        }
    }

    fn file(id: &str) -> RemoteFileMetadata {
        RemoteFileMetadata {
            id: id.to_string(),
            name: format!("{id}.txt"),
            mime_type: "text/plain".to_string(),
            modified_time: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[async_trait]
    impl MetadataSource for ScriptedSource {
        async fn list_page(
            &self,
            _page_size: u32,
            page_token: Option<String>,
        ) -> bridge_traits::error::Result<MetadataPage> {
            self.tokens_seen.lock().unwrap().push(page_token);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Page(ids, next)) => Ok(MetadataPage {
                    files: ids.into_iter().map(file).collect(),
                    next_page_token: next.map(String::from),
                }),
                Some(Step::Transient) => Err(BridgeError::Transient("503".into())),
                Some(Step::Permanent) => Err(BridgeError::Permanent("403".into())),
                Some(Step::Hang) => std::future::pending().await,
                None => panic!("source called more often than scripted"),
            }
        }
    }

    async fn setup(steps: Vec<Step>) -> (MetadataSyncEngine, Arc<ScriptedSource>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
        let source = Arc::new(ScriptedSource::new(steps));
        let engine = MetadataSyncEngine::new(
            source.clone(),
            store.clone(),
            Arc::new(EventBus::default()),
        );
        (engine, source, store)
    }

    #[tokio::test]
    async fn test_sync_all_pages() {
        let (engine, source, store) = setup(vec![
            Step::Page(vec!["1", "2"], Some("token-1")),
            Step::Page(vec!["3"], None),
        ])
        .await;

        let report = engine.sync().await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.records, 3);
        assert!(!report.resumed_from_checkpoint);
        assert_eq!(store.file_count().await.unwrap(), 3);
        assert_eq!(store.get_checkpoint(CHECKPOINT_KEY).await.unwrap(), None);
        assert_eq!(
            source.tokens_seen(),
            vec![None, Some("token-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_page_keeps_previous_checkpoint() {
        let (engine, source, store) = setup(vec![
            Step::Page(vec!["1"], Some("token-1")),
            Step::Transient,
            Step::Page(vec!["2"], None),
        ])
        .await;

        let err = engine.sync().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.file_count().await.unwrap(), 1);
        assert_eq!(
            store.get_checkpoint(CHECKPOINT_KEY).await.unwrap().as_deref(),
            Some("token-1")
        );

        let report = engine.sync().await.unwrap();
        assert!(report.resumed_from_checkpoint);
        assert_eq!(report.pages, 1);
        assert_eq!(store.file_count().await.unwrap(), 2);
        assert_eq!(
            source.tokens_seen(),
            vec![
                None,
                Some("token-1".to_string()),
                Some("token-1".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_error_identity_survives() {
        let (engine, _source, store) = setup(vec![Step::Permanent]).await;

        let err = engine.sync().await.unwrap_err();
        assert!(err.is_permanent_source());
        assert_eq!(store.file_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_checkpoint_behind_data() {
        let (engine, _source, store) = setup(vec![
            Step::Page(vec!["1"], Some("token-1")),
            Step::Page(vec!["2", "bad"], Some("token-2")),
        ])
        .await;
        sqlx::query(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON files WHEN NEW.id = 'bad' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = engine.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(!err.is_transient());
        assert_eq!(store.file_count().await.unwrap(), 1);
        assert_eq!(
            store.get_checkpoint(CHECKPOINT_KEY).await.unwrap().as_deref(),
            Some("token-1")
        );
    }

    #[tokio::test]
    async fn test_empty_page_with_token_is_followed() {
        let (engine, _source, store) = setup(vec![
            Step::Page(vec![], Some("token-1")),
            Step::Page(vec!["1"], None),
        ])
        .await;

        let report = engine.sync().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.records, 1);
        assert_eq!(store.file_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_source_timeout() {
        let (engine, _source, store) = setup(vec![
            Step::Page(vec!["1"], Some("token-1")),
            Step::Hang,
        ])
        .await;
        let engine = engine.with_source_timeout(Duration::from_millis(50));

        let err = engine.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::SourceTimeout(d) if d == Duration::from_millis(50)));
        assert!(err.is_transient());
        assert_eq!(
            store.get_checkpoint(CHECKPOINT_KEY).await.unwrap().as_deref(),
            Some("token-1")
        );
    }

    #[tokio::test]
    async fn test_reset_clears_checkpoint_and_announces_it() {
        let (engine, source, store) = setup(vec![Step::Page(vec!["1"], None)]).await;
        let mut events = engine.events.subscribe();
        store
            .set_checkpoint(CHECKPOINT_KEY, Some("token-9"))
            .await
            .unwrap();

        engine.reset().await.unwrap();
        assert_eq!(store.get_checkpoint(CHECKPOINT_KEY).await.unwrap(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Sync(SyncEvent::ResyncRequested {
                checkpoint_key: CHECKPOINT_KEY.to_string()
            })
        );

        engine.sync().await.unwrap();
        assert_eq!(source.tokens_seen(), vec![None]);
    }

    #[tokio::test]
    async fn test_page_size_is_at_least_one() {
        let (engine, _source, _store) = setup(vec![]).await;
        assert_eq!(engine.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(engine.with_page_size(0).page_size(), 1);
    }
}
