//! Shared HTTP client construction for the scrape worker and push
//! forwarder. Grounded in `kube-client/src/client/builder.rs`'s connector
//! construction, adapted from the teacher's hyper 0.14-era `hyper::Client`
//! to the `hyper-util` legacy client its current workspace depends on.

use std::time::Duration;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Bounded idle-connection pool cap from spec.md §4.3.
const MAX_IDLE_PER_HOST: usize = 10;

pub type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, std::convert::Infallible>;

/// Build a plain-HTTP client with a bounded idle pool. Per-request timeouts
/// are applied by the caller (via [`tokio::time::timeout`]) rather than at
/// the connector, since the legacy client doesn't expose a request-level
/// deadline the way the teacher's old `hyper-timeout`-wrapped connector did.
pub fn build(_timeout: Duration) -> Client<HttpConnector, BoxBody> {
    let mut connector = HttpConnector::new();
    connector.enforce_http(true);
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build(connector)
}
