//! VRL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cloud::operation::AggregatedOperationError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, VrlError>;

/// Top-level error type for volume relief.
#[derive(Debug, Error)]
pub enum VrlError {
    #[error("[VRL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[VRL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[VRL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[VRL-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[VRL-2001] filesystem stats failure for {path}: {details}")]
    Stat { path: PathBuf, details: String },

    #[error("[VRL-2002] mount table failure: {details}")]
    MountTable { details: String },

    #[error("[VRL-2003] mount target {mount_path} yielded no existent device {device}")]
    DeviceNotFound { mount_path: PathBuf, device: PathBuf },

    #[error("[VRL-2101] filesystem resize of {device} failed: {details}")]
    ResizeTool { device: PathBuf, details: String },

    #[error("[VRL-3001] provider request failed in {context}: {details}")]
    ProviderRequest {
        context: &'static str,
        details: String,
    },

    #[error("[VRL-3002] provider protocol violation in {context}: {details}")]
    ProviderProtocol {
        context: &'static str,
        details: String,
    },

    #[error("[VRL-3003] provider operation {operation} still pending after {waited_secs}s")]
    ProviderTimeout { operation: String, waited_secs: u64 },

    #[error("[VRL-3201] provider operation {operation} failed: {source}")]
    ProviderOperation {
        operation: String,
        #[source]
        source: AggregatedOperationError,
    },

    #[error("[VRL-4001] volume {volume} does not exist in pod {pod}")]
    NotDeclared { volume: String, pod: String },

    #[error("[VRL-4002] volume {volume} is not mounted to container {container}")]
    NotMounted { volume: String, container: String },

    #[error("[VRL-4003] container {container} not found in pod {pod}")]
    ContainerNotFound { container: String, pod: String },

    #[error("[VRL-4004] volume {volume}: {reason}")]
    IneligibleVolume { volume: String, reason: String },

    #[error("[VRL-4101] cluster API request for {resource} failed: {details}")]
    ClusterApi { resource: String, details: String },

    #[error("[VRL-5001] failed to relieve pressure on volume {volume}: usage {usage_pct}% >= {threshold_pct}%")]
    PressureNotRelieved {
        volume: String,
        usage_pct: u8,
        threshold_pct: u8,
    },

    #[error("[VRL-6101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[VRL-6201] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VRL-6900] runtime failure: {details}")]
    Runtime { details: String },
}

impl VrlError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "VRL-1001",
            Self::MissingConfig { .. } => "VRL-1002",
            Self::ConfigParse { .. } => "VRL-1003",
            Self::UnsupportedPlatform { .. } => "VRL-1101",
            Self::Stat { .. } => "VRL-2001",
            Self::MountTable { .. } => "VRL-2002",
            Self::DeviceNotFound { .. } => "VRL-2003",
            Self::ResizeTool { .. } => "VRL-2101",
            Self::ProviderRequest { .. } => "VRL-3001",
            Self::ProviderProtocol { .. } => "VRL-3002",
            Self::ProviderTimeout { .. } => "VRL-3003",
            Self::ProviderOperation { .. } => "VRL-3201",
            Self::NotDeclared { .. } => "VRL-4001",
            Self::NotMounted { .. } => "VRL-4002",
            Self::ContainerNotFound { .. } => "VRL-4003",
            Self::IneligibleVolume { .. } => "VRL-4004",
            Self::ClusterApi { .. } => "VRL-4101",
            Self::PressureNotRelieved { .. } => "VRL-5001",
            Self::Serialization { .. } => "VRL-6101",
            Self::Io { .. } => "VRL-6201",
            Self::Runtime { .. } => "VRL-6900",
        }
    }

    /// Whether the next poll tick might succeed where this attempt failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Stat { .. }
                | Self::ResizeTool { .. }
                | Self::ProviderRequest { .. }
                | Self::ProviderProtocol { .. }
                | Self::ProviderTimeout { .. }
                | Self::ProviderOperation { .. }
                | Self::PressureNotRelieved { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error belongs to the one-time volume resolution phase.
    #[must_use]
    pub const fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::MountTable { .. }
                | Self::DeviceNotFound { .. }
                | Self::NotDeclared { .. }
                | Self::NotMounted { .. }
                | Self::ContainerNotFound { .. }
                | Self::IneligibleVolume { .. }
                | Self::ClusterApi { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for an ineligible volume.
    #[must_use]
    pub fn ineligible(volume: &str, reason: impl Into<String>) -> Self {
        Self::IneligibleVolume {
            volume: volume.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for VrlError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for VrlError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::operation::{OperationSubError, aggregate_sub_errors};

    fn one_of_each() -> Vec<VrlError> {
        let aggregated = aggregate_sub_errors(&[Some(OperationSubError::new("X", "boom"))])
            .expect("one message aggregates");
        vec![
            VrlError::InvalidConfig {
                details: String::new(),
            },
            VrlError::MissingConfig {
                path: PathBuf::new(),
            },
            VrlError::ConfigParse {
                context: "",
                details: String::new(),
            },
            VrlError::UnsupportedPlatform {
                details: String::new(),
            },
            VrlError::Stat {
                path: PathBuf::new(),
                details: String::new(),
            },
            VrlError::MountTable {
                details: String::new(),
            },
            VrlError::DeviceNotFound {
                mount_path: PathBuf::new(),
                device: PathBuf::new(),
            },
            VrlError::ResizeTool {
                device: PathBuf::new(),
                details: String::new(),
            },
            VrlError::ProviderRequest {
                context: "",
                details: String::new(),
            },
            VrlError::ProviderProtocol {
                context: "",
                details: String::new(),
            },
            VrlError::ProviderTimeout {
                operation: String::new(),
                waited_secs: 0,
            },
            VrlError::ProviderOperation {
                operation: String::new(),
                source: aggregated,
            },
            VrlError::NotDeclared {
                volume: String::new(),
                pod: String::new(),
            },
            VrlError::NotMounted {
                volume: String::new(),
                container: String::new(),
            },
            VrlError::ContainerNotFound {
                container: String::new(),
                pod: String::new(),
            },
            VrlError::ineligible("", ""),
            VrlError::ClusterApi {
                resource: String::new(),
                details: String::new(),
            },
            VrlError::PressureNotRelieved {
                volume: String::new(),
                usage_pct: 0,
                threshold_pct: 0,
            },
            VrlError::Serialization {
                context: "",
                details: String::new(),
            },
            VrlError::io("", std::io::Error::other("test")),
            VrlError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = one_of_each();
        let codes: Vec<&str> = errors.iter().map(VrlError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_starts_with_code() {
        for err in one_of_each() {
            let msg = err.to_string();
            assert!(
                msg.starts_with(&format!("[{}]", err.code())),
                "display should lead with its code: {msg}"
            );
        }
    }

    #[test]
    fn resolution_and_retryable_are_disjoint() {
        for err in one_of_each() {
            assert!(
                !(err.is_resolution_failure() && err.is_retryable()),
                "{} cannot be both fatal-at-startup and retryable",
                err.code()
            );
        }
    }

    #[test]
    fn steady_state_failures_are_retryable() {
        assert!(
            VrlError::Stat {
                path: PathBuf::from("/data"),
                details: "ENOENT".to_string(),
            }
            .is_retryable()
        );
        assert!(
            VrlError::PressureNotRelieved {
                volume: "data".to_string(),
                usage_pct: 91,
                threshold_pct: 80,
            }
            .is_retryable()
        );
        assert!(
            !VrlError::NotMounted {
                volume: "data".to_string(),
                container: "app".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn exhaustion_message_is_descriptive() {
        let err = VrlError::PressureNotRelieved {
            volume: "data".to_string(),
            usage_pct: 91,
            threshold_pct: 80,
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to relieve pressure"), "{msg}");
        assert!(msg.contains("91%"), "{msg}");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: VrlError = json_err.into();
        assert_eq!(err.code(), "VRL-6101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: VrlError = toml_err.into();
        assert_eq!(err.code(), "VRL-1003");
    }
}
