//! Owner resolution (spec.md §4.1) and the best-effort shape-annotation
//! patch task (spec.md §4.2).

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;

use crate::error::{AnnotationError, SpecError};
use crate::types::{AnnotationPatch, SHAPE_ANNOTATION_KEY};

const CREATED_BY_KEY: &str = "kubernetes.io/created-by";

/// `(kind, name, namespace)` of the workload that owns a replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerDescriptor {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Resolve a Pod's owning workload per spec.md §4.1: prefer the modern
/// `ownerReferences` array, falling back to the legacy
/// `kubernetes.io/created-by` annotation only when present.
pub fn resolve_owner(pod: &Pod, namespace: &str) -> Result<OwnerDescriptor, SpecError> {
    let annotations = pod.metadata.annotations.as_ref();
    if let Some(created_by) = annotations.and_then(|a| a.get(CREATED_BY_KEY)) {
        return resolve_from_created_by(created_by);
    }

    let owner_refs = pod.metadata.owner_references.as_deref().unwrap_or_default();
    let first = owner_refs.first().ok_or(SpecError::NoOwnerFound)?;
    Ok(OwnerDescriptor {
        kind: first.kind.clone(),
        name: first.name.clone(),
        namespace: namespace.to_string(),
    })
}

/// Resolve a Pod's owner, falling back to best-effort identity fields and a
/// logged warning when resolution fails. Per spec.md §4.2, owner-resolution
/// failure must not prevent a tombstone (or any other `PushRecord`) from
/// being enqueued — only the identity fields degrade.
pub fn resolve_owner_best_effort(pod: &Pod, namespace: &str) -> OwnerDescriptor {
    match resolve_owner(pod, namespace) {
        Ok(owner) => owner,
        Err(err) => {
            let name = pod.metadata.name.clone().unwrap_or_default();
            tracing::warn!(%err, pod = %name, "owner resolution failed, using best-effort identity");
            OwnerDescriptor {
                kind: "Unknown".to_string(),
                name,
                namespace: namespace.to_string(),
            }
        }
    }
}

fn resolve_from_created_by(raw: &str) -> Result<OwnerDescriptor, SpecError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(SpecError::CreatedByNotJson)?;
    let reference = value
        .get("reference")
        .ok_or(SpecError::CreatedByMissingReference)?;
    let field = |name: &str| {
        reference
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(SpecError::CreatedByMissingReference)
    };
    Ok(OwnerDescriptor {
        kind: field("kind")?,
        name: field("name")?,
        namespace: field("namespace")?,
    })
}

/// Best-effort patch of the shape-feedback annotation onto the source Pod.
/// Failure is logged and dropped; it never blocks a push (spec.md §4.2).
pub async fn apply_shape_annotation(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    shape: &str,
) -> Result<(), AnnotationError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let patch = json!({
        "metadata": {
            "annotations": {
                SHAPE_ANNOTATION_KEY: shape,
            }
        }
    });
    api.patch(
        pod_name,
        &PatchParams::apply("scrape-forwarder").force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(AnnotationError::Kube)?;
    Ok(())
}

/// Drain scheduled shape-annotation patches until the sender side is
/// dropped. Runs as its own task so a slow or failing patch never blocks
/// the Scrape Worker that requested it (spec.md §4.2).
pub async fn run_annotator(client: Client, mut rx: tokio::sync::mpsc::Receiver<AnnotationPatch>) {
    while let Some(patch) = rx.recv().await {
        if let Err(err) =
            apply_shape_annotation(&client, &patch.namespace, &patch.pod_name, &patch.shape).await
        {
            tracing::warn!(
                pod = %patch.pod_name,
                namespace = %patch.namespace,
                %err,
                "failed to patch shape annotation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_by_decodes_reference() {
        let raw = r#"{"reference":{"kind":"ReplicaSet","name":"svcA-abcde","namespace":"ns1"}}"#;
        let owner = resolve_from_created_by(raw).unwrap();
        assert_eq!(owner.kind, "ReplicaSet");
        assert_eq!(owner.name, "svcA-abcde");
        assert_eq!(owner.namespace, "ns1");
    }

    #[test]
    fn created_by_missing_reference_errors() {
        let raw = r#"{"foo":"bar"}"#;
        assert!(matches!(
            resolve_from_created_by(raw),
            Err(SpecError::CreatedByMissingReference)
        ));
    }
}
