//! Reconciler (spec.md §4.2): single-writer owner of the worker table,
//! turning lifecycle events into start/stop/restart decisions. Grounded on
//! `original_source/pod_event_processor.go`'s map+mutex shape, generalized
//! from its single global mutex into an injected `tokio::sync::Mutex`
//! collaborator owned by one `Reconciler` value (spec.md §9 — no global
//! mutable state).

use std::collections::HashMap;
use std::sync::Arc;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::http_client::BoxBody;
use crate::observability::ScrapeMetrics;
use crate::scrape;
use crate::types::{AnnotationPatch, LifecycleEvent, PushRecord, ReplicaRef, ScrapeSpec, WorkerEntry};

/// Single-writer owner of the worker table. All mutation happens inside
/// [`Reconciler::apply`], serialized by `table`'s mutex — the Watch Adapter
/// and any test harness call it from a single task, but the mutex is what
/// the design actually depends on, not single-task discipline.
pub struct Reconciler {
    table: Mutex<HashMap<String, WorkerEntry>>,
    http_client: HyperClient<HttpConnector, BoxBody>,
    push_tx: async_channel::Sender<PushRecord>,
    annotate_tx: mpsc::Sender<AnnotationPatch>,
    metrics: Arc<ScrapeMetrics>,
    host_ip: String,
}

impl Reconciler {
    pub fn new(
        http_client: HyperClient<HttpConnector, BoxBody>,
        push_tx: async_channel::Sender<PushRecord>,
        annotate_tx: mpsc::Sender<AnnotationPatch>,
        metrics: Arc<ScrapeMetrics>,
        host_ip: String,
    ) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            http_client,
            push_tx,
            annotate_tx,
            metrics,
            host_ip,
        }
    }

    /// Apply one [`LifecycleEvent`], implementing spec.md §4.2's decision
    /// table exactly. The table lock is held for lookups and mutations but
    /// released before any push-queue send, per spec.md §5's "lock released
    /// before the Reconciler blocks on the push queue" rule.
    pub async fn apply(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Added { replica, spec } | LifecycleEvent::Updated { replica, spec } => {
                self.apply_upsert(replica, spec).await;
            }
            LifecycleEvent::Deleted { replica } => {
                self.apply_delete(replica).await;
            }
        }
    }

    async fn apply_upsert(&self, replica: ReplicaRef, spec: Option<ScrapeSpec>) {
        let uid = replica.uid.clone();
        let mut table = self.table.lock().await;

        match (table.get(&uid), spec) {
            // present=no, has_spec=no -> ignore.
            (None, None) => {}
            // present=no, has_spec=yes, ip=no -> ignore (log at debug).
            (None, Some(_)) if replica.ip.is_none() => {
                tracing::debug!(pod = %replica.name, "replica has a spec but no ip yet, not starting");
            }
            // present=no, has_spec=yes, ip=yes -> start worker; insert entry.
            (None, Some(spec)) => {
                let entry = self.start_worker(replica, spec, 0);
                table.insert(uid, entry);
            }
            // present=yes, has_spec=no -> cancel; remove; enqueue tombstone.
            (Some(_), None) => {
                let entry = table.remove(&uid).expect("checked present above");
                entry.cancel.cancel();
                drop(table);
                self.enqueue_tombstone(entry.replica).await;
            }
            // present=yes, has_spec=yes -> restart iff the spec changed.
            (Some(existing), Some(new_spec)) => {
                if existing.spec == new_spec {
                    return;
                }
                let generation = existing.generation + 1;
                let old = table.remove(&uid).expect("checked present above");
                old.cancel.cancel();
                let entry = self.start_worker(replica, new_spec, generation);
                table.insert(uid, entry);
            }
        }
    }

    async fn apply_delete(&self, replica: ReplicaRef) {
        let mut table = self.table.lock().await;
        let Some(entry) = table.remove(&replica.uid) else {
            return;
        };
        drop(table);
        entry.cancel.cancel();
        self.enqueue_tombstone(entry.replica).await;
    }

    fn start_worker(&self, replica: ReplicaRef, spec: ScrapeSpec, generation: u64) -> WorkerEntry {
        let cancel = CancellationToken::new();
        tokio::spawn(scrape::run(
            self.http_client.clone(),
            replica.clone(),
            spec.clone(),
            self.host_ip.clone(),
            self.push_tx.clone(),
            self.annotate_tx.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));
        WorkerEntry {
            uid: replica.uid.clone(),
            spec,
            replica,
            generation,
            cancel,
        }
    }

    async fn enqueue_tombstone(&self, replica: ReplicaRef) {
        let record = PushRecord {
            resource_name: replica.resource_name(),
            pod_name: replica.name,
            pod_ip: replica.ip.unwrap_or_default(),
            host_ip: self.host_ip.clone(),
            namespace: replica.namespace,
            payload: bytes::Bytes::new(),
            fetched_at: chrono::Utc::now(),
            tombstone: true,
        };
        if self.push_tx.send(record).await.is_err() {
            tracing::warn!("push queue closed, dropping tombstone");
        }
    }
}
