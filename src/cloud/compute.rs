//! Compute disk API: fetch disk size, submit resizes, poll zonal operations.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::cloud::operation::ProviderOperation;
use crate::core::config::ProviderConfig;
use crate::core::errors::{Result, VrlError};
use crate::platform::curl::{CurlTransport, HttpError, bearer_header};
use crate::platform::pal::CallJournal;

/// Tokens are refreshed this long before the metadata server says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a compute disk the resizer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_int64")]
    pub size_gb: u64,
}

/// Provider disk API used by the block device resizer.
pub trait DiskApi: Send + Sync {
    fn get_disk(&self, project: &str, zone: &str, disk: &str) -> Result<DiskInfo>;
    fn resize_disk(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        new_size_gb: u64,
    ) -> Result<ProviderOperation>;
    fn get_operation(&self, project: &str, zone: &str, operation: &str)
    -> Result<ProviderOperation>;
}

/// int64 fields arrive as JSON strings; accept bare numbers too.
fn deserialize_int64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Text(String),
        Number(u64),
    }
    match Int64::deserialize(deserializer)? {
        Int64::Number(value) => Ok(value),
        Int64::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ──────────────────── REST client ────────────────────

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeRequest {
    size_gb: String,
}

/// Compute REST client authenticated through the instance metadata server.
#[derive(Debug)]
pub struct ComputeRestClient {
    compute_endpoint: String,
    metadata_endpoint: String,
    transport: CurlTransport,
    token: Mutex<Option<CachedToken>>,
}

impl ComputeRestClient {
    #[must_use]
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            compute_endpoint: config.compute_endpoint.trim_end_matches('/').to_string(),
            metadata_endpoint: config.metadata_endpoint.trim_end_matches('/').to_string(),
            transport: CurlTransport::new(),
            token: Mutex::new(None),
        }
    }

    fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }
        let url = format!(
            "{}/instance/service-accounts/default/token",
            self.metadata_endpoint
        );
        let fresh: MetadataToken = self
            .transport
            .get_json(&url, &["Metadata-Flavor: Google".to_string()])
            .map_err(|error| provider_error("metadata token", error))?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }

    fn headers(&self) -> Result<Vec<String>> {
        Ok(vec![
            bearer_header(&self.access_token()?),
            "Accept: application/json".to_string(),
        ])
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{project}/zones/{zone}", self.compute_endpoint)
    }
}

impl DiskApi for ComputeRestClient {
    fn get_disk(&self, project: &str, zone: &str, disk: &str) -> Result<DiskInfo> {
        let url = format!("{}/disks/{disk}", self.zone_url(project, zone));
        self.transport
            .get_json(&url, &self.headers()?)
            .map_err(|error| provider_error("get disk", error))
    }

    fn resize_disk(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        new_size_gb: u64,
    ) -> Result<ProviderOperation> {
        let url = format!("{}/disks/{disk}/resize", self.zone_url(project, zone));
        let body = ResizeRequest {
            size_gb: new_size_gb.to_string(),
        };
        self.transport
            .post_json(&url, &self.headers()?, &body)
            .map_err(|error| provider_error("resize disk", error))
    }

    fn get_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<ProviderOperation> {
        let url = format!("{}/operations/{operation}", self.zone_url(project, zone));
        self.transport
            .get_json(&url, &self.headers()?)
            .map_err(|error| provider_error("get operation", error))
    }
}

/// Undecodable bodies are protocol violations; everything else is a request failure.
fn provider_error(context: &'static str, error: HttpError) -> VrlError {
    match error {
        HttpError::Decode { details } => VrlError::ProviderProtocol { context, details },
        other => VrlError::ProviderRequest {
            context,
            details: other.to_string(),
        },
    }
}

// ──────────────────── mock ────────────────────

/// In-memory disk API for deterministic tests.
///
/// A resize returns the scripted handle (by default a pending `op-1`) and
/// updates the stored disk size. Polls return the scripted operation states
/// in order; the last state repeats.
#[derive(Debug)]
pub struct MockDiskApi {
    sizes: Mutex<HashMap<String, u64>>,
    resize_handle: Mutex<ProviderOperation>,
    poll_script: Mutex<VecDeque<ProviderOperation>>,
    failing: Mutex<HashSet<&'static str>>,
    resizes: Mutex<Vec<(String, u64)>>,
    journal: CallJournal,
}

impl Default for MockDiskApi {
    fn default() -> Self {
        Self {
            sizes: Mutex::new(HashMap::new()),
            resize_handle: Mutex::new(ProviderOperation::pending("op-1")),
            poll_script: Mutex::new(VecDeque::from([ProviderOperation::done("op-1")])),
            failing: Mutex::new(HashSet::new()),
            resizes: Mutex::new(Vec::new()),
            journal: CallJournal::default(),
        }
    }
}

impl MockDiskApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = journal;
        self
    }

    #[must_use]
    pub fn with_disk(self, disk: &str, size_gb: u64) -> Self {
        self.sizes.lock().insert(disk.to_string(), size_gb);
        self
    }

    /// Handle returned from the next resize submissions.
    #[must_use]
    pub fn with_resize_handle(self, handle: ProviderOperation) -> Self {
        *self.resize_handle.lock() = handle;
        self
    }

    /// Operation states returned by successive polls.
    #[must_use]
    pub fn with_poll_script(self, states: Vec<ProviderOperation>) -> Self {
        *self.poll_script.lock() = states.into();
        self
    }

    /// Make one call fail with a request error: `"get_disk"`, `"resize"` or `"poll"`.
    pub fn fail(&self, call: &'static str) {
        self.failing.lock().insert(call);
    }

    #[must_use]
    pub fn size_of(&self, disk: &str) -> Option<u64> {
        self.sizes.lock().get(disk).copied()
    }

    /// Every resize submitted so far as `(disk, new_size_gb)`.
    #[must_use]
    pub fn resizes(&self) -> Vec<(String, u64)> {
        self.resizes.lock().clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn check(&self, call: &'static str, context: &'static str) -> Result<()> {
        if self.failing.lock().contains(call) {
            return Err(VrlError::ProviderRequest {
                context,
                details: "HTTP 503: mock backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl DiskApi for MockDiskApi {
    fn get_disk(&self, _project: &str, _zone: &str, disk: &str) -> Result<DiskInfo> {
        self.journal.lock().push(format!("get_disk {disk}"));
        self.check("get_disk", "get disk")?;
        let size_gb = self
            .size_of(disk)
            .ok_or_else(|| VrlError::ProviderRequest {
                context: "get disk",
                details: format!("HTTP 404: disk {disk} not found"),
            })?;
        Ok(DiskInfo {
            name: disk.to_string(),
            size_gb,
        })
    }

    fn resize_disk(
        &self,
        _project: &str,
        _zone: &str,
        disk: &str,
        new_size_gb: u64,
    ) -> Result<ProviderOperation> {
        self.journal
            .lock()
            .push(format!("resize {disk} {new_size_gb}"));
        self.check("resize", "resize disk")?;
        self.resizes.lock().push((disk.to_string(), new_size_gb));
        self.sizes.lock().insert(disk.to_string(), new_size_gb);
        Ok(self.resize_handle.lock().clone())
    }

    fn get_operation(
        &self,
        _project: &str,
        _zone: &str,
        operation: &str,
    ) -> Result<ProviderOperation> {
        self.journal.lock().push(format!("poll {operation}"));
        self.check("poll", "get operation")?;
        let mut script = self.poll_script.lock();
        let state = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        state.ok_or_else(|| VrlError::ProviderProtocol {
            context: "get operation",
            details: "mock poll script is empty".to_string(),
        })
    }
}
