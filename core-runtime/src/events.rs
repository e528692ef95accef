//! # Event Bus
//!
//! Typed notifications published by the job runner and the sync engine over a
//! `tokio::sync::broadcast` channel. The bus is the injected observer of the
//! daemon: components receive an `Arc<EventBus>` at construction instead of
//! reaching for global state.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::ResyncRequested {
//!     checkpoint_key: "drive_metadata_page_token".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Sync(_))));
//! # }
//! ```
//!
//! `emit` fails only when nobody is subscribed; publishers ignore that.
//! Slow subscribers see `RecvError::Lagged(n)` once they fall more than the
//! buffer size behind.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError, Receiver};

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Job(JobEvent),
    Sync(SyncEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Job(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Job(JobEvent::Dead { .. }) => EventSeverity::Error,
            CoreEvent::Job(JobEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Job(JobEvent::Recovered { exhausted, .. }) if *exhausted > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::ResyncRequested { .. }) => EventSeverity::Warning,
            CoreEvent::Job(JobEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Job queue lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JobEvent {
    /// Startup sweep reclaimed RUNNING jobs left by a previous process.
    Recovered { recovered: u64, exhausted: u64 },
    Started {
        job_id: i64,
        job_type: String,
        attempt: u32,
        max_attempts: u32,
    },
    Completed {
        job_id: i64,
        job_type: String,
        attempts: u32,
    },
    /// Attempt failed; the job stays eligible for another attempt.
    Failed {
        job_id: i64,
        job_type: String,
        attempts: u32,
        max_attempts: u32,
        message: String,
        transient: bool,
    },
    /// Attempt failed and the job will not be retried automatically.
    Dead {
        job_id: i64,
        job_type: String,
        attempts: u32,
        message: String,
    },
}

impl JobEvent {
    fn description(&self) -> &str {
        match self {
            JobEvent::Recovered { .. } => "Stuck jobs recovered",
            JobEvent::Started { .. } => "Job started",
            JobEvent::Completed { .. } => "Job completed",
            JobEvent::Failed { .. } => "Job failed, will retry",
            JobEvent::Dead { .. } => "Job dead",
        }
    }
}

/// Metadata sync progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started { source: String, resumed: bool },
    /// A page of records and the checkpoint after it were persisted.
    PageCommitted {
        page: u64,
        records: u64,
        has_more: bool,
    },
    Completed { pages: u64, records: u64 },
    /// The checkpoint was cleared; the next sync re-lists everything.
    ResyncRequested { checkpoint_key: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::PageCommitted { .. } => "Sync page committed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::ResyncRequested { .. } => "Full resync requested",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the number of events buffered per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receiver for events emitted from now on. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is
    /// queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain everything currently queued that passes the filter.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
