//! Scrape Worker (spec.md §4.3): one task per monitored replica, polling its
//! Prometheus endpoint on a fixed interval and forwarding the payload to the
//! push queue. Grounded on `original_source/pod_event_processor.go`'s
//! per-pod ticker loop, translated into a cancellable `tokio` task.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ScrapeError;
use crate::http_client::BoxBody;
use crate::observability::ScrapeMetrics;
use crate::shape::canonical_shape;
use crate::types::{AnnotationPatch, PushRecord, ReplicaRef, ScrapeSpec, SHAPE_ANNOTATION_KEY};

/// Run one replica's scrape loop until `cancel` fires. Every tick that
/// succeeds or fails is counted; failures are logged and simply skipped
/// (spec.md §4.3 — no retry before the next tick).
pub async fn run(
    client: HyperClient<HttpConnector, BoxBody>,
    replica: ReplicaRef,
    spec: ScrapeSpec,
    host_ip: String,
    push_tx: async_channel::Sender<PushRecord>,
    annotate_tx: tokio::sync::mpsc::Sender<AnnotationPatch>,
    metrics: Arc<ScrapeMetrics>,
    cancel: CancellationToken,
) {
    let Some(ip) = replica.ip.clone() else {
        tracing::warn!(pod = %replica.name, "scrape worker started without a pod ip, exiting");
        return;
    };

    let mut ticker = interval_at(Instant::now() + spec.interval, spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_applied_shape = replica
        .annotations
        .get(SHAPE_ANNOTATION_KEY)
        .cloned()
        .unwrap_or_default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(pod = %replica.name, "scrape worker cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let url = format!("http://{ip}{}", spec.endpoint_path);
        let scrape_result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(pod = %replica.name, "scrape worker cancelled mid-scrape, dropping result");
                return;
            }
            result = scrape_once(&client, &url, spec.timeout) => result,
        };

        match scrape_result {
            Ok(payload) => {
                metrics.fetch_succeed.inc();

                // A cancellation that landed while the scrape was in flight
                // must drop this result rather than enqueue it (spec.md
                // §4.3): otherwise a push could overtake the tombstone the
                // Reconciler already enqueued for this replica.
                if cancel.is_cancelled() {
                    tracing::debug!(pod = %replica.name, "scrape worker cancelled, dropping result");
                    return;
                }

                let shape = canonical_shape(&payload);
                if shape != last_applied_shape {
                    let patch = AnnotationPatch {
                        namespace: replica.namespace.clone(),
                        pod_name: replica.name.clone(),
                        shape: shape.clone(),
                    };
                    // Best-effort: a full annotate channel just means this
                    // round's feedback is skipped, never that the push stalls.
                    let _ = annotate_tx.try_send(patch);
                    last_applied_shape = shape;
                }

                let record = PushRecord {
                    resource_name: replica.resource_name(),
                    pod_name: replica.name.clone(),
                    pod_ip: ip.clone(),
                    host_ip: host_ip.clone(),
                    namespace: replica.namespace.clone(),
                    payload,
                    fetched_at: chrono::Utc::now(),
                    tombstone: false,
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(pod = %replica.name, "scrape worker cancelled, dropping result");
                        return;
                    }
                    sent = push_tx.send(record) => {
                        if sent.is_err() {
                            tracing::warn!(pod = %replica.name, "push queue closed, stopping scrape worker");
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                metrics.fetch_failed.inc();
                tracing::warn!(pod = %replica.name, %url, %err, "scrape failed");
            }
        }
    }
}

async fn scrape_once(
    client: &HyperClient<HttpConnector, BoxBody>,
    url: &str,
    timeout: Duration,
) -> Result<Bytes, ScrapeError> {
    let request = Request::get(url)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .map_err(ScrapeError::Request)?;

    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| ScrapeError::BadStatus(http::StatusCode::REQUEST_TIMEOUT))?
        .map_err(ScrapeError::Transport)?;

    if !response.status().is_success() {
        return Err(ScrapeError::BadStatus(response.status()));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(ScrapeError::Body)?
        .to_bytes();
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hyper_util::rt::TokioExecutor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::owner::OwnerDescriptor;
    use crate::types::MetricKind;

    async fn spawn_metrics_server(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 1024];
                let _ = socket.read(&mut buf).await;
                hits2.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (addr, hits)
    }

    fn replica(ip: &str) -> ReplicaRef {
        ReplicaRef {
            uid: "u1".into(),
            name: "A".into(),
            namespace: "ns1".into(),
            ip: Some(ip.into()),
            owner: OwnerDescriptor {
                kind: "Deployment".into(),
                name: "svcA".into(),
                namespace: "ns1".into(),
            },
            annotations: BTreeMap::new(),
        }
    }

    fn spec() -> ScrapeSpec {
        ScrapeSpec {
            metric_kind: MetricKind::Prometheus,
            endpoint_path: "/metrics".into(),
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(1),
            labeled_namespace: String::new(),
        }
    }

    #[tokio::test]
    async fn successful_ticks_enqueue_push_records() {
        let (addr, hits) = spawn_metrics_server("# TYPE up gauge\nup 1\n").await;
        let client = HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new());
        let (push_tx, push_rx) = async_channel::bounded(8);
        let (annotate_tx, mut annotate_rx) = tokio::sync::mpsc::channel(8);
        let metrics = ScrapeMetrics::new().0;
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(
            client,
            replica(&addr),
            spec(),
            "10.0.0.1".into(),
            push_tx,
            annotate_tx,
            metrics.clone(),
            cancel.clone(),
        ));

        let record = push_rx.recv().await.unwrap();
        assert!(!record.tombstone);
        assert_eq!(record.payload.as_ref(), b"# TYPE up gauge\nup 1\n");
        assert!(hits.load(Ordering::SeqCst) >= 1);

        let patch = annotate_rx.recv().await.unwrap();
        assert_eq!(patch.shape, "up,gauge");

        cancel.cancel();
        let _ = handle.await;
        assert!(metrics.fetch_succeed.get() >= 1);
    }

    #[tokio::test]
    async fn missing_ip_exits_without_scraping() {
        let client = HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new());
        let (push_tx, push_rx) = async_channel::bounded(1);
        let (annotate_tx, _annotate_rx) = tokio::sync::mpsc::channel(1);
        let metrics = ScrapeMetrics::new().0;
        let mut r = replica("127.0.0.1:0");
        r.ip = None;

        run(
            client,
            r,
            spec(),
            "10.0.0.1".into(),
            push_tx,
            annotate_tx,
            metrics,
            CancellationToken::new(),
        )
        .await;

        assert!(push_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let (addr, _hits) = spawn_metrics_server("up 1\n").await;
        let client = HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new());
        let (push_tx, _push_rx) = async_channel::bounded(8);
        let (annotate_tx, _annotate_rx) = tokio::sync::mpsc::channel(8);
        let metrics = ScrapeMetrics::new().0;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            run(client, replica(&addr), spec(), "10.0.0.1".into(), push_tx, annotate_tx, metrics, cancel),
        )
        .await;
        assert!(result.is_ok(), "worker should exit promptly once cancelled");
    }
}
