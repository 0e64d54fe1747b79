//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use volume_relief::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, VrlError};

// Platform
pub use crate::platform::pal::{LinuxPlatform, MockPlatform, Platform};

// Cloud
pub use crate::cloud::compute::{ComputeRestClient, DiskApi, MockDiskApi};
pub use crate::cloud::operation::{AggregatedOperationError, ProviderOperation};
pub use crate::cloud::resizer::{BlockDeviceResizer, ResizerConfig, growth_amount_gb};

// Cluster
pub use crate::cluster::client::{ClusterApi, KubeClient, MockClusterApi};
pub use crate::cluster::resolver::{MountedVolume, VolumeResolver};

// Monitor
pub use crate::monitor::escalation::{
    EscalationController, EscalationPolicy, ReliefContext, ReliefOutcome,
};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
