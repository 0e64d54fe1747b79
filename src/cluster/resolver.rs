//! Startup resolution of volume names to validated, cloud-backed mounts.
//!
//! Resolution is all-or-nothing: either every requested name yields a
//! [`MountedVolume`] or the whole call fails with the first violation found.
//! Nothing here is re-checked after startup.

#![allow(missing_docs)]

use std::path::PathBuf;

use k8s_openapi::api::core::v1::{
    Container, GCEPersistentDiskVolumeSource, PersistentVolume, PersistentVolumeClaim, Pod,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::cluster::client::ClusterApi;
use crate::core::errors::{Result, VrlError};
use crate::platform::pal::{Platform, resolve_device_path};

const GCE_PROVIDER_SCHEME: &str = "gce://";
const SUPPORTED_FS_TYPE: &str = "ext4";
const PHASE_BOUND: &str = "Bound";

const REGION_LABELS: [&str; 2] = [
    "failure-domain.beta.kubernetes.io/region",
    "topology.kubernetes.io/region",
];
const ZONE_LABELS: [&str; 2] = [
    "failure-domain.beta.kubernetes.io/zone",
    "topology.kubernetes.io/zone",
];

/// A validated volume the relief loop may grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedVolume {
    pub name: String,
    pub mounted_path: PathBuf,
    pub device_path: PathBuf,
    pub disk_name: String,
    pub region: String,
    pub zone: String,
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// First non-empty label among `keys`, in order.
fn label_any<'m>(meta: &'m ObjectMeta, keys: &[&str]) -> Option<&'m str> {
    let labels = meta.labels.as_ref()?;
    keys.iter()
        .find_map(|key| labels.get(*key))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn phase_or_unset(phase: Option<&String>) -> &str {
    match phase {
        Some(phase) if !phase.is_empty() => phase,
        _ => "<unset>",
    }
}

fn claim_phase(claim: &PersistentVolumeClaim) -> &str {
    phase_or_unset(claim.status.as_ref().and_then(|s| s.phase.as_ref()))
}

fn volume_phase(pv: &PersistentVolume) -> &str {
    phase_or_unset(pv.status.as_ref().and_then(|s| s.phase.as_ref()))
}

/// Locate the target container by name within the pod.
pub fn find_container<'a>(pod: &'a Pod, container_name: &str) -> Result<&'a Container> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .find(|container| container.name == container_name)
        .ok_or_else(|| VrlError::ContainerNotFound {
            container: container_name.to_string(),
            pod: name_of(&pod.metadata).to_string(),
        })
}

/// Extract the project from a node provider ID of the form
/// `gce://<project>/<zone>/<instance>`.
pub fn project_from_provider_id(provider_id: &str) -> Result<String> {
    let unsupported = || VrlError::UnsupportedPlatform {
        details: format!("not running on a GCE node (providerID {provider_id:?})"),
    };
    let rest = provider_id
        .strip_prefix(GCE_PROVIDER_SCHEME)
        .ok_or_else(unsupported)?;
    match rest.split('/').next() {
        Some(project) if !project.is_empty() => Ok(project.to_string()),
        _ => Err(unsupported()),
    }
}

/// Validates requested volumes against the pod spec, the claim/volume
/// objects, and the host mount table.
pub struct VolumeResolver<'a> {
    cluster: &'a dyn ClusterApi,
    platform: &'a dyn Platform,
    namespace: &'a str,
}

impl<'a> VolumeResolver<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, platform: &'a dyn Platform, namespace: &'a str) -> Self {
        Self {
            cluster,
            platform,
            namespace,
        }
    }

    /// Look up the pod this sidecar runs in.
    pub fn fetch_pod(&self, pod_name: &str) -> Result<Pod> {
        self.cluster.get_pod(self.namespace, pod_name)
    }

    /// Project that owns the disks, read from the node the pod is scheduled on.
    pub fn discover_project(&self, pod: &Pod) -> Result<String> {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
            .filter(|node| !node.is_empty())
            .ok_or_else(|| VrlError::UnsupportedPlatform {
                details: format!("pod {} is not scheduled on a node", name_of(&pod.metadata)),
            })?;
        let node = self.cluster.get_node(node_name)?;
        let provider_id = node
            .spec
            .as_ref()
            .and_then(|spec| spec.provider_id.as_deref())
            .unwrap_or_default();
        project_from_provider_id(provider_id)
    }

    /// Resolve `names` in order; any failure fails the whole call.
    pub fn resolve(
        &self,
        pod: &Pod,
        container_name: &str,
        names: &[String],
    ) -> Result<Vec<MountedVolume>> {
        let container = find_container(pod, container_name)?;
        names
            .iter()
            .map(|name| self.resolve_one(pod, container, name))
            .collect()
    }

    fn resolve_one(&self, pod: &Pod, container: &Container, name: &str) -> Result<MountedVolume> {
        let pod_name = name_of(&pod.metadata);
        let volume = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_ref())
            .into_iter()
            .flatten()
            .find(|volume| volume.name == name)
            .ok_or_else(|| VrlError::NotDeclared {
                volume: name.to_string(),
                pod: pod_name.to_string(),
            })?;
        let mount = find_mount(container, name)?;
        if mount.read_only == Some(true) {
            return Err(VrlError::ineligible(
                name,
                format!("mounted read-only in container {}", container.name),
            ));
        }

        if volume.gce_persistent_disk.is_some() {
            return Err(VrlError::ineligible(
                name,
                "inline gcePersistentDisk volumes are not supported; bind the disk through a claim",
            ));
        }
        let Some(source) = &volume.persistent_volume_claim else {
            return Err(VrlError::ineligible(
                name,
                "not backed by a persistent volume claim",
            ));
        };
        if source.read_only == Some(true) {
            return Err(VrlError::ineligible(name, "claim is mounted read-only"));
        }

        let claim = self.cluster.get_claim(self.namespace, &source.claim_name)?;
        if claim_phase(&claim) != PHASE_BOUND {
            return Err(VrlError::ineligible(
                name,
                format!(
                    "claim {} is in phase {}, expected Bound",
                    source.claim_name,
                    claim_phase(&claim)
                ),
            ));
        }
        let Some(volume_name) = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_name.as_deref())
            .filter(|volume_name| !volume_name.is_empty())
        else {
            return Err(VrlError::ineligible(
                name,
                format!("claim {} names no persistent volume", source.claim_name),
            ));
        };

        let pv = self.cluster.get_volume(volume_name)?;
        let pv_name = name_of(&pv.metadata);
        if volume_phase(&pv) != PHASE_BOUND {
            return Err(VrlError::ineligible(
                name,
                format!(
                    "persistent volume {pv_name} is in phase {}, expected Bound",
                    volume_phase(&pv)
                ),
            ));
        }
        let Some(disk) = pv
            .spec
            .as_ref()
            .and_then(|spec| spec.gce_persistent_disk.as_ref())
        else {
            return Err(VrlError::ineligible(
                name,
                format!("persistent volume {pv_name} is not a GCE persistent disk"),
            ));
        };
        check_disk(name, disk)?;

        let region = label_any(&pv.metadata, &REGION_LABELS)
            .ok_or_else(|| {
                VrlError::ineligible(
                    name,
                    format!("persistent volume {pv_name} has no region label"),
                )
            })?
            .to_string();
        let zone = label_any(&pv.metadata, &ZONE_LABELS)
            .ok_or_else(|| {
                VrlError::ineligible(name, format!("persistent volume {pv_name} has no zone label"))
            })?
            .to_string();

        let mounted_path = PathBuf::from(&mount.mount_path);
        let device_path = resolve_device_path(self.platform, &mounted_path)?;

        Ok(MountedVolume {
            name: name.to_string(),
            mounted_path,
            device_path,
            disk_name: disk.pd_name.clone(),
            region,
            zone,
        })
    }
}

fn find_mount<'c>(container: &'c Container, name: &str) -> Result<&'c VolumeMount> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .find(|mount| mount.name == name)
        .ok_or_else(|| VrlError::NotMounted {
            volume: name.to_string(),
            container: container.name.clone(),
        })
}

fn check_disk(name: &str, disk: &GCEPersistentDiskVolumeSource) -> Result<()> {
    if disk.pd_name.is_empty() {
        return Err(VrlError::ineligible(name, "GCE persistent disk has no pdName"));
    }
    let partition = disk.partition.unwrap_or(0);
    if partition != 0 {
        return Err(VrlError::ineligible(
            name,
            format!("partition {partition} requested; only whole-disk volumes can be grown"),
        ));
    }
    if disk.read_only == Some(true) {
        return Err(VrlError::ineligible(name, "disk is attached read-only"));
    }
    match disk.fs_type.as_deref() {
        None | Some("" | SUPPORTED_FS_TYPE) => Ok(()),
        Some(other) => Err(VrlError::ineligible(
            name,
            format!("filesystem type {other} is not supported (only {SUPPORTED_FS_TYPE})"),
        )),
    }
}
