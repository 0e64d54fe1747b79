//! Per-volume pressure relief: measure, grow the filesystem, grow the disk.
//!
//! Each tick walks the escalation ladder from the bottom:
//!
//! ```text
//! Measure ──< threshold──────────────────────────────▶ BelowThreshold
//!    │
//!    ▼
//! GrowFilesystem ──grow, sample, < threshold─────────▶ RelievedByFilesystemGrow
//!    │
//!    ▼
//! GrowDisk ──resize by expand_by %, settle
//!    │
//!    ▼
//! GrowFilesystemAfterResize ──grow, sample, < ───────▶ RelievedByDiskResize
//!    │
//!    ▼
//! Exhausted (VRL-5001)
//! ```
//!
//! Any failed step ends the tick with that step's error. Nothing carries over
//! between ticks; the next one starts again at `Measure`.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cloud::compute::DiskApi;
use crate::cloud::resizer::{BlockDeviceResizer, ResizerConfig};
use crate::cluster::resolver::MountedVolume;
use crate::core::config::Config;
use crate::core::errors::{Result, VrlError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::Platform;

/// Host and provider handles shared by every volume, built once at startup.
#[derive(Clone)]
pub struct ReliefContext {
    pub platform: Arc<dyn Platform>,
    pub disks: Arc<dyn DiskApi>,
    pub project: String,
}

/// Thresholds and timings that drive the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub threshold_pct: u8,
    pub expand_by_pct: u32,
    /// Pause between a finished disk resize and the second filesystem grow.
    pub settle_delay: Duration,
    pub resizer: ResizerConfig,
}

impl EscalationPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold_pct: config.relief.threshold_pct,
            expand_by_pct: config.relief.expand_by_pct,
            settle_delay: config.relief.settle_delay(),
            resizer: ResizerConfig::from_provider(&config.provider),
        }
    }
}

/// Rungs of the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    Measure,
    GrowFilesystem,
    GrowDisk,
    GrowFilesystemAfterResize,
}

impl fmt::Display for EscalationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Measure => "measure",
            Self::GrowFilesystem => "grow_filesystem",
            Self::GrowDisk => "grow_disk",
            Self::GrowFilesystemAfterResize => "grow_filesystem_after_resize",
        };
        f.write_str(label)
    }
}

/// How a tick ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReliefOutcome {
    BelowThreshold { usage_pct: u8 },
    RelievedByFilesystemGrow { usage_pct: u8 },
    RelievedByDiskResize { usage_pct: u8, from_gb: u64, to_gb: u64 },
}

impl ReliefOutcome {
    /// The last rung the tick needed.
    #[must_use]
    pub const fn stage(&self) -> EscalationStage {
        match self {
            Self::BelowThreshold { .. } => EscalationStage::Measure,
            Self::RelievedByFilesystemGrow { .. } => EscalationStage::GrowFilesystem,
            Self::RelievedByDiskResize { .. } => EscalationStage::GrowFilesystemAfterResize,
        }
    }

    #[must_use]
    pub const fn usage_pct(&self) -> u8 {
        match self {
            Self::BelowThreshold { usage_pct }
            | Self::RelievedByFilesystemGrow { usage_pct }
            | Self::RelievedByDiskResize { usage_pct, .. } => *usage_pct,
        }
    }
}

pub struct EscalationController<'a> {
    ctx: &'a ReliefContext,
    policy: EscalationPolicy,
    logger: &'a ActivityLoggerHandle,
}

impl<'a> EscalationController<'a> {
    #[must_use]
    pub fn new(
        ctx: &'a ReliefContext,
        policy: EscalationPolicy,
        logger: &'a ActivityLoggerHandle,
    ) -> Self {
        Self {
            ctx,
            policy,
            logger,
        }
    }

    /// Run one tick of the ladder for `volume`.
    pub fn relieve(&self, volume: &MountedVolume) -> Result<ReliefOutcome> {
        let usage = self.sample(volume)?;
        if usage < self.policy.threshold_pct {
            return Ok(ReliefOutcome::BelowThreshold { usage_pct: usage });
        }
        self.logger.send(ActivityEvent::ThresholdCrossed {
            volume: volume.name.clone(),
            usage_pct: usage,
            threshold_pct: self.policy.threshold_pct,
        });

        // The filesystem may lag behind a disk that was already grown.
        self.grow_filesystem(volume)?;
        let usage = self.sample(volume)?;
        if usage < self.policy.threshold_pct {
            let outcome = ReliefOutcome::RelievedByFilesystemGrow { usage_pct: usage };
            self.report_relieved(volume, outcome);
            return Ok(outcome);
        }

        let (from_gb, to_gb) = self.grow_disk(volume)?;
        if !self.policy.settle_delay.is_zero() {
            thread::sleep(self.policy.settle_delay);
        }

        self.grow_filesystem(volume)?;
        let usage = self.sample(volume)?;
        if usage < self.policy.threshold_pct {
            let outcome = ReliefOutcome::RelievedByDiskResize {
                usage_pct: usage,
                from_gb,
                to_gb,
            };
            self.report_relieved(volume, outcome);
            return Ok(outcome);
        }

        Err(VrlError::PressureNotRelieved {
            volume: volume.name.clone(),
            usage_pct: usage,
            threshold_pct: self.policy.threshold_pct,
        })
    }

    fn sample(&self, volume: &MountedVolume) -> Result<u8> {
        self.ctx.platform.usage_pct(&volume.mounted_path)
    }

    fn grow_filesystem(&self, volume: &MountedVolume) -> Result<()> {
        let started = Instant::now();
        self.ctx.platform.grow_filesystem(&volume.device_path)?;
        self.logger.send(ActivityEvent::FilesystemGrown {
            volume: volume.name.clone(),
            device: volume.device_path.display().to_string(),
            duration_ms: elapsed_ms(started),
        });
        Ok(())
    }

    fn grow_disk(&self, volume: &MountedVolume) -> Result<(u64, u64)> {
        let resizer = BlockDeviceResizer::new(self.ctx.disks.as_ref(), self.policy.resizer);
        let plan = resizer.plan(
            &self.ctx.project,
            &volume.zone,
            &volume.disk_name,
            self.policy.expand_by_pct,
        )?;
        self.logger.send(ActivityEvent::DiskResizeRequested {
            volume: volume.name.clone(),
            disk: volume.disk_name.clone(),
            zone: volume.zone.clone(),
            from_gb: plan.from_gb,
            to_gb: plan.to_gb,
        });

        let started = Instant::now();
        let report = resizer.apply(&self.ctx.project, &volume.zone, &volume.disk_name, plan)?;
        self.logger.send(ActivityEvent::DiskResized {
            volume: volume.name.clone(),
            disk: volume.disk_name.clone(),
            from_gb: report.from_gb,
            to_gb: report.to_gb,
            operation: report.operation,
            duration_ms: elapsed_ms(started),
        });
        Ok((report.from_gb, report.to_gb))
    }

    fn report_relieved(&self, volume: &MountedVolume, outcome: ReliefOutcome) {
        self.logger.send(ActivityEvent::PressureRelieved {
            volume: volume.name.clone(),
            usage_pct: outcome.usage_pct(),
            remedy: outcome.stage().to_string(),
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
