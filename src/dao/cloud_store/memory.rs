//! In-process cloud store. Used when no remote database is configured and as
//! the fake backend of the test suite.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::{
    dao::cloud_store::{
        ChangeListener, CloudDocument, CloudError, CloudResult, CloudStore, DeliveryGate, PushAck,
        Subscription,
    },
    state::game::GameCode,
};

struct ListenerEntry {
    id: u64,
    gate: DeliveryGate,
    listener: ChangeListener,
}

#[derive(Default)]
struct Inner {
    documents: DashMap<GameCode, CloudDocument>,
    listeners: DashMap<GameCode, Vec<ListenerEntry>>,
    next_listener: AtomicU64,
}

impl Inner {
    fn upsert(&self, document: CloudDocument) -> CloudResult<PushAck> {
        {
            let mut slot = self
                .documents
                .entry(document.code.clone())
                .or_insert_with(|| document.clone());
            if slot.last_update > document.last_update {
                return Err(CloudError::Stale {
                    remote_last_update: slot.last_update,
                });
            }
            *slot = document.clone();
        }

        let ack = PushAck {
            last_update: document.last_update,
        };
        let code = document.code.clone();
        self.notify(&code, Some(document));
        Ok(ack)
    }

    fn notify(&self, code: &GameCode, document: Option<CloudDocument>) {
        // Collect first so listeners may call back into the store.
        let targets: Vec<(DeliveryGate, ChangeListener)> = self
            .listeners
            .get(code)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.gate.clone(), entry.listener.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (gate, listener) in targets {
            gate.deliver(&listener, document.clone());
        }
    }
}

/// Cloud store keeping documents in memory, shared by every clone.
#[derive(Clone, Default)]
pub struct MemoryCloudStore {
    inner: Arc<Inner>,
}

impl MemoryCloudStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document for `code`.
    pub fn document(&self, code: &GameCode) -> Option<CloudDocument> {
        self.inner
            .documents
            .get(code)
            .map(|entry| entry.value().clone())
    }

    /// Write as another device would, notifying subscribers.
    pub fn write_remote(&self, document: CloudDocument) -> CloudResult<PushAck> {
        self.inner.upsert(document)
    }

    /// Number of live subscriptions for `code`.
    pub fn subscriber_count(&self, code: &GameCode) -> usize {
        self.inner
            .listeners
            .get(code)
            .map_or(0, |entries| entries.len())
    }
}

impl CloudStore for MemoryCloudStore {
    fn push(&self, document: CloudDocument) -> BoxFuture<'static, CloudResult<PushAck>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.upsert(document) })
    }

    fn pull(&self, code: GameCode) -> BoxFuture<'static, CloudResult<Option<CloudDocument>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.documents.get(&code).map(|entry| entry.value().clone())) })
    }

    fn subscribe(&self, code: GameCode, listener: ChangeListener) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        let gate = DeliveryGate::new();

        self.inner
            .listeners
            .entry(code.clone())
            .or_default()
            .push(ListenerEntry {
                id,
                gate: gate.clone(),
                listener: listener.clone(),
            });

        let initial = self.document(&code);
        gate.deliver(&listener, initial);

        let inner = self.inner.clone();
        Subscription::new(gate, move || {
            if let Some(mut entries) = inner.listeners.get_mut(&code) {
                entries.retain(|entry| entry.id != id);
            }
            inner
                .listeners
                .remove_if(&code, |_, entries| entries.is_empty());
        })
    }

    fn health_check(&self) -> BoxFuture<'static, CloudResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::state::game::{RuleSet, Scoreboard, TeamState};

    fn document(code: &GameCode, last_update: i64) -> CloudDocument {
        CloudDocument {
            code: code.clone(),
            scoreboard: Scoreboard::new(
                TeamState::new("Hawks", "#aa0000", 0),
                TeamState::new("Owls", "#0000aa", 0),
                RuleSet::default(),
            ),
            created_at: 1,
            last_update,
        }
    }

    fn recorder() -> (ChangeListener, Arc<Mutex<Vec<Option<i64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: ChangeListener = Arc::new(move |doc: Option<CloudDocument>| {
            sink.lock().unwrap().push(doc.map(|d| d.last_update));
        });
        (listener, seen)
    }

    #[tokio::test]
    async fn subscribing_before_the_document_exists_delivers_absent() {
        let store = MemoryCloudStore::new();
        let code = GameCode::parse("AB12C3").unwrap();
        let (listener, seen) = recorder();

        let subscription = store.subscribe(code.clone(), listener);
        store.push(document(&code, 10)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(10)]);
        drop(subscription);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_even_when_resubscribed() {
        let store = MemoryCloudStore::new();
        let code = GameCode::parse("AB12C3").unwrap();
        let (first_listener, first) = recorder();
        let (second_listener, second) = recorder();

        let first_sub = store.subscribe(code.clone(), first_listener);
        let second_sub = store.subscribe(code.clone(), second_listener);
        first_sub.unsubscribe();
        first_sub.unsubscribe();
        assert_eq!(store.subscriber_count(&code), 1);

        store.push(document(&code, 20)).await.unwrap();

        assert_eq!(*first.lock().unwrap(), vec![None]);
        assert_eq!(*second.lock().unwrap(), vec![None, Some(20)]);
        drop(second_sub);
        assert_eq!(store.subscriber_count(&code), 0);
    }

    #[tokio::test]
    async fn push_is_idempotent_and_never_regresses() {
        let store = MemoryCloudStore::new();
        let code = GameCode::parse("LOCAL-AB12C3").unwrap();

        store.push(document(&code, 30)).await.unwrap();
        let once = store.document(&code).unwrap();
        let ack = store.push(document(&code, 30)).await.unwrap();
        assert_eq!(ack.last_update, 30);
        assert_eq!(store.document(&code).unwrap(), once);

        let err = store.push(document(&code, 25)).await.unwrap_err();
        assert_eq!(
            err,
            CloudError::Stale {
                remote_last_update: 30
            }
        );
        assert_eq!(store.document(&code).unwrap().last_update, 30);
    }
}
