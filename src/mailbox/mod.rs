//! Mailbox store contract
//!
//! The mailbox is the only channel the two sides share before the direct
//! connection exists. It stores records addressed by slash-separated paths
//! (`calls/{id}`), append-only sub-collections under a record
//! (`calls/{id}/offerCandidates`), and delivers change events to
//! subscribers.
//!
//! Delivery is at-least-once and ordered only within one subscription.

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

pub use memory::MemoryMailbox;

/// Path of a single record, e.g. `calls/abc`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPath(String);

impl RecordPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, id)| id)
    }

    /// Collection the record lives in
    pub fn parent(&self) -> CollectionPath {
        CollectionPath(
            self.0
                .rsplit_once('/')
                .map_or_else(String::new, |(parent, _)| parent.to_string()),
        )
    }

    /// Sub-collection scoped to this record
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection, e.g. `calls` or `calls/abc/answerCandidates`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn record(&self, id: &str) -> RecordPath {
        RecordPath(format!("{}/{}", self.0, id))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Record the change applies to
    pub path: RecordPath,
    /// Full record contents after the change (before it, for `Removed`)
    pub data: Value,
}

/// What a subscription watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    Record(RecordPath),
    Collection(CollectionPath),
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Record(path) => write!(f, "record {path}"),
            SubscriptionTarget::Collection(path) => write!(f, "collection {path}"),
        }
    }
}

/// Live change stream; dropping it unsubscribes
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Next change, or `None` once the store stops delivering
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Document store used for signaling
#[async_trait]
pub trait MailboxStore: Send + Sync + 'static {
    /// Create an empty record with a store-generated id
    async fn create_record(&self, collection: &CollectionPath) -> Result<RecordPath>;

    /// Read a record once; `None` if it does not exist
    async fn get_record(&self, record: &RecordPath) -> Result<Option<Value>>;

    /// Set one top-level field of an existing record
    async fn set_field(&self, record: &RecordPath, field: &str, value: Value) -> Result<()>;

    /// Append a new record to a collection
    async fn append(&self, collection: &CollectionPath, value: Value) -> Result<RecordPath>;

    /// Start watching a record or a collection
    async fn subscribe(&self, target: SubscriptionTarget) -> Result<Subscription>;
}
