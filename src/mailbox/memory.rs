//! In-process mailbox
//!
//! Mirrors the delivery rules of a hosted document store: a new record
//! subscriber first receives the current snapshot, a new collection
//! subscriber first receives every existing record as `Added` in append
//! order. Also exposes hooks to redeliver events and to reject writes, so
//! at-least-once delivery and store failures can be exercised.

use super::{
    ChangeEvent, ChangeKind, CollectionPath, MailboxStore, RecordPath, Subscription,
    SubscriptionTarget,
};
use crate::error::{Result, SignalingError};
use crate::utils::random_id;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, trace};

type Subscribers = Vec<(u64, UnboundedSender<ChangeEvent>)>;

#[derive(Default)]
struct Inner {
    records: HashMap<RecordPath, Value>,
    /// Record paths per collection, in append order
    collections: HashMap<CollectionPath, Vec<RecordPath>>,
    record_subs: HashMap<RecordPath, Subscribers>,
    collection_subs: HashMap<CollectionPath, Subscribers>,
    /// `(record, field)` for every accepted `set_field`
    field_writes: Vec<(RecordPath, String)>,
    next_sub: u64,
    reject_writes: Option<String>,
    fail_reads: Option<String>,
}

impl Inner {
    fn check_writable(&self, path: &dyn std::fmt::Display) -> Result<()> {
        match &self.reject_writes {
            Some(reason) => Err(SignalingError::StoreWrite {
                path: path.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_readable(&self, path: &RecordPath) -> Result<()> {
        match &self.fail_reads {
            Some(reason) => Err(SignalingError::StoreRead {
                path: path.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, path: RecordPath, data: Value) {
        self.collections
            .entry(path.parent())
            .or_default()
            .push(path.clone());
        self.records.insert(path.clone(), data.clone());
        self.notify_collection(ChangeKind::Added, &path, &data);
    }

    fn notify_record(&mut self, kind: ChangeKind, path: &RecordPath, data: &Value) {
        if let Some(subs) = self.record_subs.get_mut(path) {
            deliver(subs, kind, path, data);
        }
    }

    fn notify_collection(&mut self, kind: ChangeKind, path: &RecordPath, data: &Value) {
        if let Some(subs) = self.collection_subs.get_mut(&path.parent()) {
            deliver(subs, kind, path, data);
        }
    }

    fn remove_subscriber(&mut self, target: &SubscriptionTarget, id: u64) {
        let subs = match target {
            SubscriptionTarget::Record(path) => self.record_subs.get_mut(path),
            SubscriptionTarget::Collection(path) => self.collection_subs.get_mut(path),
        };
        if let Some(subs) = subs {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

fn deliver(subs: &mut Subscribers, kind: ChangeKind, path: &RecordPath, data: &Value) {
    subs.retain(|(_, tx)| {
        tx.send(ChangeEvent {
            kind,
            path: path.clone(),
            data: data.clone(),
        })
        .is_ok()
    });
}

fn live<K>(subs: &HashMap<K, Subscribers>) -> usize {
    subs.values()
        .flatten()
        .filter(|(_, tx)| !tx.is_closed())
        .count()
}

/// Shared in-memory mailbox; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every following write fail with `StoreWrite`; `None` accepts writes again
    pub fn reject_writes(&self, reason: Option<&str>) {
        self.lock().reject_writes = reason.map(str::to_string);
    }

    /// Make every following `get_record` fail with `StoreRead`; `None` heals
    pub fn fail_reads(&self, reason: Option<&str>) {
        self.lock().fail_reads = reason.map(str::to_string);
    }

    /// Current contents of a record
    pub fn snapshot(&self, record: &RecordPath) -> Option<Value> {
        self.lock().records.get(record).cloned()
    }

    /// Records of a collection in append order
    pub fn list(&self, collection: &CollectionPath) -> Vec<Value> {
        let inner = self.lock();
        inner
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter_map(|path| inner.records.get(path).cloned())
            .collect()
    }

    /// Record paths of a collection in append order
    pub fn record_paths(&self, collection: &CollectionPath) -> Vec<RecordPath> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times `field` of `record` was written
    pub fn field_writes(&self, record: &RecordPath, field: &str) -> usize {
        self.lock()
            .field_writes
            .iter()
            .filter(|(path, f)| path == record && f == field)
            .count()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let inner = self.lock();
        live(&inner.record_subs) + live(&inner.collection_subs)
    }

    /// Deliver the current snapshot of `record` to its subscribers again
    pub fn redeliver_snapshot(&self, record: &RecordPath) {
        let mut inner = self.lock();
        if let Some(data) = inner.records.get(record).cloned() {
            debug!("Redelivering snapshot of {}", record);
            inner.notify_record(ChangeKind::Modified, record, &data);
        }
    }

    /// Deliver `record` as `Added` to its collection's subscribers again
    pub fn redeliver_added(&self, record: &RecordPath) {
        let mut inner = self.lock();
        if let Some(data) = inner.records.get(record).cloned() {
            debug!("Redelivering added {}", record);
            inner.notify_collection(ChangeKind::Added, record, &data);
        }
    }

    /// Cleanup outside the signaling flow; subscribers see `Removed`
    pub fn remove_record(&self, record: &RecordPath) -> Option<Value> {
        let mut inner = self.lock();
        let data = inner.records.remove(record)?;
        if let Some(paths) = inner.collections.get_mut(&record.parent()) {
            paths.retain(|p| p != record);
        }
        inner.notify_record(ChangeKind::Removed, record, &data);
        inner.notify_collection(ChangeKind::Removed, record, &data);
        Some(data)
    }
}

#[async_trait]
impl MailboxStore for MemoryMailbox {
    async fn create_record(&self, collection: &CollectionPath) -> Result<RecordPath> {
        let mut inner = self.lock();
        inner.check_writable(collection)?;
        let path = collection.record(&random_id());
        inner.insert(path.clone(), Value::Object(Map::new()));
        debug!("Created record {}", path);
        Ok(path)
    }

    async fn get_record(&self, record: &RecordPath) -> Result<Option<Value>> {
        let inner = self.lock();
        inner.check_readable(record)?;
        Ok(inner.records.get(record).cloned())
    }

    async fn set_field(&self, record: &RecordPath, field: &str, value: Value) -> Result<()> {
        let mut inner = self.lock();
        inner.check_writable(record)?;
        let data = {
            let Some(existing) = inner.records.get_mut(record) else {
                return Err(SignalingError::StoreWrite {
                    path: record.to_string(),
                    reason: "no such record".into(),
                });
            };
            let Some(fields) = existing.as_object_mut() else {
                return Err(SignalingError::malformed(record, "record is not an object"));
            };
            fields.insert(field.to_string(), value);
            existing.clone()
        };
        inner.field_writes.push((record.clone(), field.to_string()));
        trace!("Set {}.{}", record, field);
        inner.notify_record(ChangeKind::Modified, record, &data);
        inner.notify_collection(ChangeKind::Modified, record, &data);
        Ok(())
    }

    async fn append(&self, collection: &CollectionPath, value: Value) -> Result<RecordPath> {
        let mut inner = self.lock();
        inner.check_writable(collection)?;
        let path = collection.record(&random_id());
        inner.insert(path.clone(), value);
        trace!("Appended {}", path);
        Ok(path)
    }

    async fn subscribe(&self, target: SubscriptionTarget) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_sub;
        inner.next_sub += 1;

        match &target {
            SubscriptionTarget::Record(path) => {
                if let Some(data) = inner.records.get(path) {
                    let _ = tx.send(ChangeEvent {
                        kind: ChangeKind::Added,
                        path: path.clone(),
                        data: data.clone(),
                    });
                }
                inner
                    .record_subs
                    .entry(path.clone())
                    .or_default()
                    .push((id, tx));
            }
            SubscriptionTarget::Collection(path) => {
                for record in inner.collections.get(path).into_iter().flatten() {
                    if let Some(data) = inner.records.get(record) {
                        let _ = tx.send(ChangeEvent {
                            kind: ChangeKind::Added,
                            path: record.clone(),
                            data: data.clone(),
                        });
                    }
                }
                inner
                    .collection_subs
                    .entry(path.clone())
                    .or_default()
                    .push((id, tx));
            }
        }
        debug!("Subscribed to {} (#{})", target, id);

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.remove_subscriber(&target, id);
                trace!("Unsubscribed from {} (#{})", target, id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn next_kind(sub: &mut Subscription) -> (ChangeKind, Value) {
        let ev = sub.next().await.expect("event");
        (ev.kind, ev.data)
    }

    #[tokio::test]
    async fn late_collection_subscriber_gets_backlog_in_order() {
        let mailbox = MemoryMailbox::new();
        let candidates = CollectionPath::new("calls/S1/offerCandidates");
        mailbox.append(&candidates, json!({ "candidate": "c1" })).await.unwrap();
        mailbox.append(&candidates, json!({ "candidate": "c2" })).await.unwrap();

        let mut sub = mailbox
            .subscribe(SubscriptionTarget::Collection(candidates.clone()))
            .await
            .unwrap();
        assert_eq!(next_kind(&mut sub).await, (ChangeKind::Added, json!({ "candidate": "c1" })));
        assert_eq!(next_kind(&mut sub).await, (ChangeKind::Added, json!({ "candidate": "c2" })));

        mailbox.append(&candidates, json!({ "candidate": "c3" })).await.unwrap();
        assert_eq!(next_kind(&mut sub).await, (ChangeKind::Added, json!({ "candidate": "c3" })));
    }

    #[tokio::test]
    async fn record_subscriber_sees_snapshot_then_modifications() {
        let mailbox = MemoryMailbox::new();
        let record = mailbox.create_record(&CollectionPath::new("calls")).await.unwrap();
        let mut sub = mailbox
            .subscribe(SubscriptionTarget::Record(record.clone()))
            .await
            .unwrap();
        assert_eq!(next_kind(&mut sub).await, (ChangeKind::Added, json!({})));

        mailbox.set_field(&record, "answer", json!("A")).await.unwrap();
        assert_eq!(
            next_kind(&mut sub).await,
            (ChangeKind::Modified, json!({ "answer": "A" }))
        );
        assert_eq!(mailbox.field_writes(&record, "answer"), 1);
    }

    #[tokio::test]
    async fn set_field_on_missing_record_fails() {
        let mailbox = MemoryMailbox::new();
        let err = mailbox
            .set_field(&RecordPath::new("calls/nope"), "answer", json!("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::StoreWrite { .. }));
    }

    #[tokio::test]
    async fn rejected_writes_surface_store_write() {
        let mailbox = MemoryMailbox::new();
        mailbox.reject_writes(Some("quota exceeded"));
        let err = mailbox
            .create_record(&CollectionPath::new("calls"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::StoreWrite { reason, .. } if reason == "quota exceeded"));

        mailbox.reject_writes(None);
        assert!(mailbox.create_record(&CollectionPath::new("calls")).await.is_ok());
    }

    #[tokio::test]
    async fn failed_reads_surface_store_read() {
        let mailbox = MemoryMailbox::new();
        let record = mailbox.create_record(&CollectionPath::new("calls")).await.unwrap();
        mailbox.fail_reads(Some("unavailable"));
        let err = mailbox.get_record(&record).await.unwrap_err();
        assert!(matches!(err, SignalingError::StoreRead { reason, .. } if reason == "unavailable"));

        mailbox.fail_reads(None);
        assert_eq!(mailbox.get_record(&record).await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn dropped_subscription_is_unregistered() {
        let mailbox = MemoryMailbox::new();
        let sub = mailbox
            .subscribe(SubscriptionTarget::Collection(CollectionPath::new("c")))
            .await
            .unwrap();
        assert_eq!(mailbox.subscriber_count(), 1);
        drop(sub);
        assert_eq!(mailbox.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn removal_is_delivered_to_collection_subscribers() {
        let mailbox = MemoryMailbox::new();
        let candidates = CollectionPath::new("calls/S1/answerCandidates");
        let c1 = mailbox.append(&candidates, json!({ "candidate": "c1" })).await.unwrap();
        let mut sub = mailbox
            .subscribe(SubscriptionTarget::Collection(candidates.clone()))
            .await
            .unwrap();
        let _ = sub.next().await;

        mailbox.remove_record(&c1);
        assert_eq!(next_kind(&mut sub).await.0, ChangeKind::Removed);
        assert!(mailbox.list(&candidates).is_empty());
    }
}
