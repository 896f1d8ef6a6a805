//! Data model shared across the watch adapter, reconciler, scrape workers,
//! and push forwarder.

use std::collections::BTreeMap;
use std::str::FromStr;

use bytes::Bytes;
use k8s_openapi::api::core::v1::Pod;
use kube::core::Duration as GoDuration;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::error::SpecError;
use crate::owner::{resolve_owner_best_effort, OwnerDescriptor};

/// The annotation key this crate writes back onto a monitored Pod, reporting
/// the shape of the metrics it currently emits.
pub const SHAPE_ANNOTATION_KEY: &str = "io.auto-tagged.metrics-info";

/// Defaults used to fill in a [`ScrapeSpec`] when the Pod's annotations omit
/// the corresponding key.
#[derive(Debug, Clone)]
pub struct ScrapeDefaults {
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub labeled_namespace: String,
}

/// The kind of metric endpoint a Pod exposes. Only `Prometheus` is
/// supported; any other `/type` value is a parse failure, not a variant,
/// because it must be logged and treated as "no spec" rather than carried
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Prometheus,
}

/// A narrowed, immutable snapshot of a Kubernetes Pod assigned to this node.
/// Nothing downstream of [`ReplicaRef::from_pod`] ever sees a raw [`Pod`]
/// again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRef {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub ip: Option<String>,
    pub owner: OwnerDescriptor,
    pub annotations: BTreeMap<String, String>,
}

impl ReplicaRef {
    /// Build a [`ReplicaRef`] from a watched Pod. Fails only if the Pod is
    /// missing fields Kubernetes guarantees for a scheduled, named,
    /// namespaced, uid-bearing object.
    pub fn from_pod(pod: &Pod) -> Result<Self, SpecError> {
        let uid = pod.uid().ok_or(SpecError::MissingUid)?;
        let name = pod.name_any();
        let namespace = pod.namespace().ok_or(SpecError::MissingNamespace)?;
        let ip = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty());
        let annotations = pod
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let owner = resolve_owner_best_effort(pod, &namespace);
        Ok(Self {
            uid,
            name,
            namespace,
            ip,
            owner,
            annotations,
        })
    }

    /// A replica is monitorable iff it carries a valid [`ScrapeSpec`] and a
    /// non-empty `ip`.
    pub fn scrape_spec(&self, prefix: &str, defaults: &ScrapeDefaults) -> Option<ScrapeSpec> {
        ScrapeSpec::from_annotations(prefix, &self.annotations, defaults)
    }

    /// `"{namespace}_{kind}_{ownerName}"`, the gateway job identity
    /// (spec.md §6).
    pub fn resource_name(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.owner.kind, self.owner.name)
    }
}

/// Parsed, validated annotation bundle that makes a replica monitorable.
#[derive(Debug, Clone)]
pub struct ScrapeSpec {
    pub metric_kind: MetricKind,
    pub endpoint_path: String,
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub labeled_namespace: String,
}

impl PartialEq for ScrapeSpec {
    /// Equality is defined strictly over the fields spec.md names as
    /// restart-significant; adding a field to this struct later must not
    /// silently make it restart-significant too.
    fn eq(&self, other: &Self) -> bool {
        self.metric_kind == other.metric_kind
            && self.endpoint_path == other.endpoint_path
            && self.interval == other.interval
            && self.timeout == other.timeout
            && self.labeled_namespace == other.labeled_namespace
    }
}

impl ScrapeSpec {
    /// Parse a `ScrapeSpec` out of a Pod's annotations under `prefix`.
    ///
    /// Returns `None` whenever spec.md's decision tree says "no spec":
    /// missing `{prefix}/type`, an unsupported type (logged at warn), or a
    /// missing `{prefix}/endpoints`.
    pub fn from_annotations(
        prefix: &str,
        annotations: &BTreeMap<String, String>,
        defaults: &ScrapeDefaults,
    ) -> Option<Self> {
        if annotations.is_empty() {
            return None;
        }
        let type_key = format!("{prefix}/type");
        let metric_type = annotations.get(&type_key)?;
        if !metric_type.eq_ignore_ascii_case("prometheus") {
            tracing::warn!(
                metric_type = %metric_type,
                "unsupported metric type annotation, skipping replica"
            );
            return None;
        }

        let endpoints_key = format!("{prefix}/endpoints");
        let endpoint_path = annotations.get(&endpoints_key)?.clone();

        let interval = annotations
            .get(&format!("{prefix}/interval"))
            .and_then(|v| GoDuration::from_str(v).ok())
            .map(std::time::Duration::from)
            .unwrap_or(defaults.interval);
        let timeout = annotations
            .get(&format!("{prefix}/timeout"))
            .and_then(|v| GoDuration::from_str(v).ok())
            .map(std::time::Duration::from)
            .unwrap_or(defaults.timeout);
        let labeled_namespace = annotations
            .get(&format!("{prefix}/namespace"))
            .cloned()
            .unwrap_or_else(|| defaults.labeled_namespace.clone());

        Some(Self {
            metric_kind: MetricKind::Prometheus,
            endpoint_path,
            interval,
            timeout,
            labeled_namespace,
        })
    }
}

/// The reconciler's in-memory record for one actively-monitored replica.
pub struct WorkerEntry {
    pub uid: String,
    pub spec: ScrapeSpec,
    pub replica: ReplicaRef,
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// What the reconciler emits to the push forwarder.
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub resource_name: String,
    pub pod_name: String,
    pub pod_ip: String,
    pub host_ip: String,
    pub namespace: String,
    pub payload: Bytes,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub tombstone: bool,
}

impl PushRecord {
    pub fn gateway_path(&self) -> String {
        format!("/metrics/job/{}/instance/{}", self.resource_name, self.pod_name)
    }
}

/// A scheduled best-effort write of the shape-feedback annotation, produced
/// by a Scrape Worker when a payload's canonical shape no longer matches
/// what's on the replica (spec.md §4.2 "Annotation feedback").
#[derive(Debug, Clone)]
pub struct AnnotationPatch {
    pub namespace: String,
    pub pod_name: String,
    pub shape: String,
}

/// A normalized lifecycle event for a replica assigned to this host.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Added {
        replica: ReplicaRef,
        spec: Option<ScrapeSpec>,
    },
    Updated {
        replica: ReplicaRef,
        spec: Option<ScrapeSpec>,
    },
    Deleted {
        replica: ReplicaRef,
    },
}

impl LifecycleEvent {
    pub fn uid(&self) -> &str {
        match self {
            LifecycleEvent::Added { replica, .. }
            | LifecycleEvent::Updated { replica, .. }
            | LifecycleEvent::Deleted { replica } => &replica.uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ScrapeDefaults {
        ScrapeDefaults {
            interval: std::time::Duration::from_secs(60),
            timeout: std::time::Duration::from_secs(3),
            labeled_namespace: "default-ns".into(),
        }
    }

    #[test]
    fn missing_type_key_is_no_spec() {
        let annotations = BTreeMap::new();
        assert!(ScrapeSpec::from_annotations("tag", &annotations, &defaults()).is_none());
    }

    #[test]
    fn unsupported_type_is_no_spec() {
        let mut annotations = BTreeMap::new();
        annotations.insert("tag/type".into(), "statsd".into());
        annotations.insert("tag/endpoints".into(), "/m".into());
        assert!(ScrapeSpec::from_annotations("tag", &annotations, &defaults()).is_none());
    }

    #[test]
    fn missing_endpoints_is_no_spec() {
        let mut annotations = BTreeMap::new();
        annotations.insert("tag/type".into(), "prometheus".into());
        assert!(ScrapeSpec::from_annotations("tag", &annotations, &defaults()).is_none());
    }

    #[test]
    fn valid_spec_uses_overrides_and_defaults() {
        let mut annotations = BTreeMap::new();
        annotations.insert("tag/type".into(), "Prometheus".into());
        annotations.insert("tag/endpoints".into(), "/metrics".into());
        annotations.insert("tag/interval".into(), "2s".into());
        let spec = ScrapeSpec::from_annotations("tag", &annotations, &defaults()).unwrap();
        assert_eq!(spec.endpoint_path, "/metrics");
        assert_eq!(spec.interval, std::time::Duration::from_secs(2));
        assert_eq!(spec.timeout, std::time::Duration::from_secs(3));
        assert_eq!(spec.labeled_namespace, "default-ns");
    }

    #[test]
    fn equality_ignores_nothing_but_the_five_fields() {
        let mut a = BTreeMap::new();
        a.insert("tag/type".into(), "prometheus".into());
        a.insert("tag/endpoints".into(), "/m".into());
        let s1 = ScrapeSpec::from_annotations("tag", &a, &defaults()).unwrap();
        let s2 = ScrapeSpec::from_annotations("tag", &a, &defaults()).unwrap();
        assert_eq!(s1, s2);
    }
}
