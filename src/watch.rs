//! Watch Adapter (spec.md §4.1): subscribes to the Kubernetes API for Pods
//! scheduled on this host and emits a normalized stream of
//! [`LifecycleEvent`]s, isolating the reconciler from `kube`'s watch
//! vocabulary and from the raw `Pod` type.

use std::collections::{HashMap, HashSet};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::{self, Config as WatchConfig};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::types::{LifecycleEvent, ReplicaRef, ScrapeDefaults};

/// Build a [`Client`] either from the ambient environment (in-cluster
/// service account or local kubeconfig — the common case) or from an
/// explicit `-k8saddr`/`-k8sbt` pair, grounded in `examples/custom_client.rs`'s
/// pattern of going through `kube::Config` rather than `Client::try_default`
/// whenever the caller supplies its own cluster coordinates.
pub async fn build_client(cfg: &Config) -> anyhow::Result<Client> {
    if cfg.k8s_addr.is_empty() {
        return Ok(Client::try_default().await?);
    }

    let mut kubeconfig = Kubeconfig::default();
    kubeconfig.clusters.push(kube::config::NamedCluster {
        name: "scrape-forwarder".into(),
        cluster: Some(kube::config::Cluster {
            server: Some(cfg.k8s_addr.clone()),
            insecure_skip_tls_verify: Some(true),
            ..Default::default()
        }),
    });
    kubeconfig.auth_infos.push(kube::config::NamedAuthInfo {
        name: "scrape-forwarder".into(),
        auth_info: Some(kube::config::AuthInfo {
            token: (!cfg.k8s_bearer_token.is_empty())
                .then(|| cfg.k8s_bearer_token.clone().into()),
            ..Default::default()
        }),
    });
    kubeconfig.contexts.push(kube::config::NamedContext {
        name: "scrape-forwarder".into(),
        context: Some(kube::config::Context {
            cluster: "scrape-forwarder".into(),
            user: "scrape-forwarder".into(),
            namespace: None,
            extensions: None,
        }),
    });
    kubeconfig.current_context = Some("scrape-forwarder".into());

    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(client_config)?)
}

/// Run the watch loop until the process is cancelled, sending a normalized
/// [`LifecycleEvent`] for every ADD/UPDATE/DELETE. Connection loss is
/// retried with backoff by `.default_backoff()` (spec.md §4.1 failure
/// semantics); this function only returns once the event channel's
/// receiver is dropped.
pub async fn run(
    client: Client,
    host: &str,
    annotation_prefix: &str,
    defaults: &ScrapeDefaults,
    tx: mpsc::Sender<LifecycleEvent>,
) {
    let api: Api<Pod> = Api::all(client);
    let watch_config = WatchConfig::default().fields(&format!("spec.nodeName={host}"));

    let mut known_uids: HashSet<String> = HashSet::new();
    let mut last_snapshot: HashMap<String, String> = HashMap::new();

    let stream = watcher(api, watch_config).default_backoff();
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        let pod = match event {
            Ok(watcher::Event::InitApply(pod)) | Ok(watcher::Event::Apply(pod)) => pod,
            Ok(watcher::Event::Delete(pod)) => {
                match ReplicaRef::from_pod(&pod) {
                    Ok(replica) => {
                        known_uids.remove(&replica.uid);
                        last_snapshot.remove(&replica.uid);
                        if tx.send(LifecycleEvent::Deleted { replica }).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "could not narrow deleted pod, dropping event"),
                }
                continue;
            }
            Ok(watcher::Event::Init | watcher::Event::InitDone) => continue,
            Err(err) => {
                tracing::warn!(%err, "watch stream error, retrying with backoff");
                continue;
            }
        };

        let replica = match ReplicaRef::from_pod(&pod) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(%err, "could not narrow watched pod, dropping event");
                continue;
            }
        };

        let snapshot = format!("{:?}|{:?}", replica.ip, replica.annotations);
        let is_new = !known_uids.contains(&replica.uid);
        if !is_new {
            if last_snapshot.get(&replica.uid) == Some(&snapshot) {
                continue; // bitwise-unchanged UPDATE, suppressed per spec.md §4.1
            }
        }
        known_uids.insert(replica.uid.clone());
        last_snapshot.insert(replica.uid.clone(), snapshot);

        let spec = replica.scrape_spec(annotation_prefix, defaults);

        let lifecycle = if is_new {
            LifecycleEvent::Added { replica, spec }
        } else {
            LifecycleEvent::Updated { replica, spec }
        };
        if tx.send(lifecycle).await.is_err() {
            return;
        }
    }
}
