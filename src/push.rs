//! Push Forwarder (spec.md §4.4): single consumer draining the push queue,
//! forwarding each record (or tombstone) to the remote gateway. Grounded on
//! `original_source/prometheus_pusher.go`'s `pushDataToGW`/
//! `deletePrometheusMetric` pair — a 202 is the only success status, and
//! anything else is counted as a failure, never retried.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;

use crate::error::PushError;
use crate::http_client::BoxBody;
use crate::observability::ScrapeMetrics;
use crate::types::PushRecord;

/// Drain `rx` until the channel is closed, forwarding every record to
/// `gateway_addr`. Runs as the sole push-forwarder task (spec.md §4.4: "the
/// gateway sees pushes in the order the queue delivers them").
pub async fn run(
    client: HyperClient<HttpConnector, BoxBody>,
    gateway_addr: String,
    rx: async_channel::Receiver<PushRecord>,
    metrics: Arc<ScrapeMetrics>,
    timeout: std::time::Duration,
) {
    while let Ok(record) = rx.recv().await {
        let pod_name = record.pod_name.clone();
        let tombstone = record.tombstone;
        let result = if tombstone {
            delete_once(&client, &gateway_addr, &record, timeout).await
        } else {
            push_once(&client, &gateway_addr, &record, timeout).await
        };

        match result {
            Ok(()) => metrics.push_succeed.inc(),
            Err(err) => {
                metrics.push_failed.inc();
                tracing::warn!(pod = %pod_name, tombstone, %err, "push to gateway failed");
            }
        }
    }
}

async fn push_once(
    client: &HyperClient<HttpConnector, BoxBody>,
    gateway_addr: &str,
    record: &PushRecord,
    timeout: std::time::Duration,
) -> Result<(), PushError> {
    let url = format!("http://{gateway_addr}{}", record.gateway_path());
    let request = Request::builder()
        .method(Method::POST)
        .uri(url)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Full::new(record.payload.clone()).map_err(|never| match never {}).boxed())
        .map_err(PushError::Request)?;

    send_expecting_202(client, request, timeout).await
}

async fn delete_once(
    client: &HyperClient<HttpConnector, BoxBody>,
    gateway_addr: &str,
    record: &PushRecord,
    timeout: std::time::Duration,
) -> Result<(), PushError> {
    let url = format!("http://{gateway_addr}{}", record.gateway_path());
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(url)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .map_err(PushError::Request)?;

    send_expecting_202(client, request, timeout).await
}

async fn send_expecting_202(
    client: &HyperClient<HttpConnector, BoxBody>,
    request: Request<BoxBody>,
    timeout: std::time::Duration,
) -> Result<(), PushError> {
    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| PushError::BadStatus(http::StatusCode::REQUEST_TIMEOUT))?
        .map_err(PushError::Transport)?;

    if response.status() != http::StatusCode::ACCEPTED {
        return Err(PushError::BadStatus(response.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hyper_util::rt::TokioExecutor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::observability::ScrapeMetrics;

    fn record(tombstone: bool) -> PushRecord {
        PushRecord {
            resource_name: "ns1_Deployment_svcA".into(),
            pod_name: "A".into(),
            pod_ip: "10.0.0.5".into(),
            host_ip: "10.0.0.1".into(),
            namespace: "ns1".into(),
            payload: if tombstone { Bytes::new() } else { Bytes::from_static(b"up 1\n") },
            fetched_at: chrono::Utc::now(),
            tombstone,
        }
    }

    /// Spawn a one-shot in-process responder that always answers `status`
    /// and records how many requests it has seen and their method.
    async fn spawn_responder(status: u16) -> (String, Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let hits = Arc::new(AtomicUsize::new(0));
        let methods = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hits2 = hits.clone();
        let methods2 = methods.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request_line = String::from_utf8_lossy(&buf[..n]);
                let method = request_line.split_whitespace().next().unwrap_or("").to_string();
                methods2.lock().unwrap().push(method);
                hits2.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    if status == 202 { "Accepted" } else { "Error" }
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (addr, hits, methods)
    }

    fn client() -> HyperClient<HttpConnector, BoxBody> {
        HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new())
    }

    #[tokio::test]
    async fn accepted_push_counts_as_success() {
        let (addr, hits, methods) = spawn_responder(202).await;
        let metrics = ScrapeMetrics::new().0;
        let (tx, rx) = async_channel::bounded(1);
        tx.send(record(false)).await.unwrap();
        drop(tx);

        run(client(), addr, rx, metrics.clone(), std::time::Duration::from_secs(1)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(methods.lock().unwrap()[0], "POST");
        assert_eq!(metrics.push_succeed.get(), 1);
        assert_eq!(metrics.push_failed.get(), 0);
    }

    #[tokio::test]
    async fn tombstone_issues_a_delete() {
        let (addr, hits, methods) = spawn_responder(202).await;
        let metrics = ScrapeMetrics::new().0;
        let (tx, rx) = async_channel::bounded(1);
        tx.send(record(true)).await.unwrap();
        drop(tx);

        run(client(), addr, rx, metrics.clone(), std::time::Duration::from_secs(1)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(methods.lock().unwrap()[0], "DELETE");
        assert_eq!(metrics.push_succeed.get(), 1);
    }

    #[tokio::test]
    async fn non_202_counts_as_failure_and_is_not_retried() {
        let (addr, hits, _methods) = spawn_responder(500).await;
        let metrics = ScrapeMetrics::new().0;
        let (tx, rx) = async_channel::bounded(1);
        tx.send(record(false)).await.unwrap();
        drop(tx);

        run(client(), addr, rx, metrics.clone(), std::time::Duration::from_secs(1)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.push_failed.get(), 1);
        assert_eq!(metrics.push_succeed.get(), 0);
    }
}
