//! Read-only access to the cluster API: pods, claims, volumes, nodes.

#![allow(missing_docs)]

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::Api;
use tokio::runtime::{Builder, Runtime};

use crate::core::config::ClusterConfig;
use crate::core::errors::{Result, VrlError};

/// Get-by-name calls the resolver makes against the orchestrator.
pub trait ClusterApi: Send + Sync {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;
    fn get_volume(&self, name: &str) -> Result<PersistentVolume>;
    fn get_node(&self, name: &str) -> Result<Node>;
}

// ──────────────────── kube client ────────────────────

/// Cluster client on inferred credentials: the pod's service account
/// in-cluster, a kubeconfig otherwise.
///
/// Requests are driven to completion on a private single-threaded runtime,
/// so callers stay synchronous.
pub struct KubeClient {
    client: kube::Client,
    runtime: Runtime,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("default_namespace", &self.client.default_namespace())
            .finish_non_exhaustive()
    }
}

impl KubeClient {
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let explicit = config
            .api_server_override()
            .map(|server| {
                server
                    .parse()
                    .map(kube::Config::new)
                    .map_err(|error| VrlError::InvalidConfig {
                        details: format!("cluster.api_server {server:?}: {error}"),
                    })
            })
            .transpose()?;

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| VrlError::Runtime {
                details: format!("cluster client runtime: {source}"),
            })?;

        let client = runtime.block_on(async {
            let mut inferred = kube::Config::infer().await.map_err(|error| {
                VrlError::InvalidConfig {
                    details: format!("no cluster credentials found: {error}"),
                }
            })?;
            if let Some(explicit) = explicit {
                inferred.cluster_url = explicit.cluster_url;
            }
            kube::Client::try_from(inferred).map_err(|error| VrlError::InvalidConfig {
                details: format!("cluster client: {error}"),
            })
        })?;

        Ok(Self { client, runtime })
    }

    fn get<K>(&self, api: Api<K>, name: &str, resource: String) -> Result<K>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.runtime
            .block_on(api.get(name))
            .map_err(|error| VrlError::ClusterApi {
                resource,
                details: error.to_string(),
            })
    }
}

impl ClusterApi for KubeClient {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get(
            Api::namespaced(self.client.clone(), namespace),
            name,
            format!("namespaces/{namespace}/pods/{name}"),
        )
    }

    fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.get(
            Api::namespaced(self.client.clone(), namespace),
            name,
            format!("namespaces/{namespace}/persistentvolumeclaims/{name}"),
        )
    }

    fn get_volume(&self, name: &str) -> Result<PersistentVolume> {
        self.get(
            Api::all(self.client.clone()),
            name,
            format!("persistentvolumes/{name}"),
        )
    }

    fn get_node(&self, name: &str) -> Result<Node> {
        self.get(
            Api::all(self.client.clone()),
            name,
            format!("nodes/{name}"),
        )
    }
}

// ──────────────────── mock ────────────────────

/// In-memory cluster for deterministic tests. Unknown names behave like a 404.
#[derive(Debug, Clone, Default)]
pub struct MockClusterApi {
    pods: HashMap<(String, String), Pod>,
    claims: HashMap<(String, String), PersistentVolumeClaim>,
    volumes: HashMap<String, PersistentVolume>,
    nodes: HashMap<String, Node>,
}

fn object_name(meta: &kube::api::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

impl MockClusterApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pod(mut self, namespace: &str, pod: Pod) -> Self {
        self.pods
            .insert((namespace.to_string(), object_name(&pod.metadata)), pod);
        self
    }

    #[must_use]
    pub fn with_claim(mut self, namespace: &str, claim: PersistentVolumeClaim) -> Self {
        self.claims
            .insert((namespace.to_string(), object_name(&claim.metadata)), claim);
        self
    }

    #[must_use]
    pub fn with_volume(mut self, volume: PersistentVolume) -> Self {
        self.volumes.insert(object_name(&volume.metadata), volume);
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(object_name(&node.metadata), node);
        self
    }
}

fn not_found(resource: String) -> VrlError {
    VrlError::ClusterApi {
        resource,
        details: "HTTP 404: not found".to_string(),
    }
}

impl ClusterApi for MockClusterApi {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(format!("namespaces/{namespace}/pods/{name}")))
    }

    fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                not_found(format!(
                    "namespaces/{namespace}/persistentvolumeclaims/{name}"
                ))
            })
    }

    fn get_volume(&self, name: &str) -> Result<PersistentVolume> {
        self.volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(format!("persistentvolumes/{name}")))
    }

    fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(format!("nodes/{name}")))
    }
}
