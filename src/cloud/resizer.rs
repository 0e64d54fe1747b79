//! Block device resizer: grow a persistent disk by a percentage and wait for
//! the provider to finish.
//!
//! The provider answers a resize with an operation handle. Unless the handle
//! is already `DONE`, it is polled on a fixed interval until it is; sub-errors
//! are only read from the finished operation.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cloud::compute::DiskApi;
use crate::cloud::operation::{ProviderOperation, aggregate_sub_errors};
use crate::core::config::ProviderConfig;
use crate::core::errors::{Result, VrlError};

/// Additional whole GB for a disk of `size_gb` grown by `expand_by_pct`.
///
/// Rounds up, and never returns less than 1 so every resize makes progress.
#[must_use]
pub fn growth_amount_gb(size_gb: u64, expand_by_pct: u32) -> u64 {
    let scaled = u128::from(size_gb) * u128::from(expand_by_pct);
    let growth = scaled.div_ceil(100);
    u64::try_from(growth).unwrap_or(u64::MAX).max(1)
}

/// Operation polling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizerConfig {
    pub poll_interval: Duration,
    /// `None` waits for as long as the provider takes.
    pub max_wait: Option<Duration>,
}

impl ResizerConfig {
    #[must_use]
    pub fn from_provider(config: &ProviderConfig) -> Self {
        Self {
            poll_interval: config.operation_poll_interval(),
            max_wait: config.operation_max_wait(),
        }
    }
}

/// Sizes computed before a resize is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizePlan {
    pub from_gb: u64,
    pub to_gb: u64,
}

/// A completed resize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResizeReport {
    pub from_gb: u64,
    pub to_gb: u64,
    pub operation: String,
    pub polls: u32,
}

pub struct BlockDeviceResizer<'a> {
    disks: &'a dyn DiskApi,
    config: ResizerConfig,
}

impl<'a> BlockDeviceResizer<'a> {
    #[must_use]
    pub fn new(disks: &'a dyn DiskApi, config: ResizerConfig) -> Self {
        Self { disks, config }
    }

    /// Read the current size and work out the target.
    pub fn plan(&self, project: &str, zone: &str, disk: &str, expand_by_pct: u32) -> Result<ResizePlan> {
        let current = self.disks.get_disk(project, zone, disk)?;
        let growth = growth_amount_gb(current.size_gb, expand_by_pct);
        Ok(ResizePlan {
            from_gb: current.size_gb,
            to_gb: current.size_gb.saturating_add(growth),
        })
    }

    /// Submit `plan` and block until the provider reports the operation done.
    pub fn apply(&self, project: &str, zone: &str, disk: &str, plan: ResizePlan) -> Result<ResizeReport> {
        let handle = self.disks.resize_disk(project, zone, disk, plan.to_gb)?;
        check_handle(&handle, "resize disk")?;
        let operation = handle.name.clone();

        let started = Instant::now();
        let mut polls = 0_u32;
        // A handle can come back already finished; it is then the final state.
        let finished = if handle.status.is_terminal() {
            handle
        } else {
            loop {
                thread::sleep(self.config.poll_interval);
                let state = self.disks.get_operation(project, zone, &operation)?;
                polls = polls.saturating_add(1);
                check_handle(&state, "get operation")?;
                if state.status.is_terminal() {
                    break state;
                }
                if let Some(max_wait) = self.config.max_wait {
                    let waited = started.elapsed();
                    if waited >= max_wait {
                        return Err(VrlError::ProviderTimeout {
                            operation,
                            waited_secs: waited.as_secs(),
                        });
                    }
                }
            }
        };

        if let Some(source) = aggregate_sub_errors(finished.sub_errors()) {
            return Err(VrlError::ProviderOperation { operation, source });
        }
        Ok(ResizeReport {
            from_gb: plan.from_gb,
            to_gb: plan.to_gb,
            operation,
            polls,
        })
    }

    /// [`Self::plan`] followed by [`Self::apply`].
    pub fn resize(&self, project: &str, zone: &str, disk: &str, expand_by_pct: u32) -> Result<ResizeReport> {
        let plan = self.plan(project, zone, disk, expand_by_pct)?;
        self.apply(project, zone, disk, plan)
    }
}

fn check_handle(operation: &ProviderOperation, context: &'static str) -> Result<()> {
    if operation.is_well_formed() {
        Ok(())
    } else {
        Err(VrlError::ProviderProtocol {
            context,
            details: "operation handle has no name".to_string(),
        })
    }
}
