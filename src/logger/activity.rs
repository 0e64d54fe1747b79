//! Activity logger: a dedicated thread owns the [`JsonlWriter`]; everything
//! else sends [`ActivityEvent`]s through a bounded crossbeam channel.
//!
//! `try_send()` keeps the relief loop from ever blocking on logging
//! back-pressure. Events that do not fit are counted and reported on the next
//! line the logger thread writes.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, VrlError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        project: String,
        volumes: usize,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    VolumeResolved {
        volume: String,
        mount_point: String,
        device: String,
        disk: String,
        zone: String,
    },
    ThresholdCrossed {
        volume: String,
        usage_pct: u8,
        threshold_pct: u8,
    },
    FilesystemGrown {
        volume: String,
        device: String,
        duration_ms: u64,
    },
    DiskResizeRequested {
        volume: String,
        disk: String,
        zone: String,
        from_gb: u64,
        to_gb: u64,
    },
    DiskResized {
        volume: String,
        disk: String,
        from_gb: u64,
        to_gb: u64,
        operation: String,
        duration_ms: u64,
    },
    PressureRelieved {
        volume: String,
        usage_pct: u8,
        /// Which remedy brought usage back under the threshold.
        remedy: String,
    },
    ReliefFailed {
        volume: String,
        error_code: String,
        error_message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    #[must_use]
    pub fn relief_failed(volume: &str, error: &VrlError) -> Self {
        Self::ReliefFailed {
            volume: volume.to_string(),
            error_code: error.code().to_string(),
            error_message: error.to_string(),
        }
    }

    #[must_use]
    pub fn error(error: &VrlError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle connected to nothing; every event is discarded.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle whose events are kept in memory for inspection.
    #[must_use]
    pub fn in_memory() -> (Self, EventCapture) {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let handle = Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        };
        (handle, EventCapture { rx })
    }

    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Receiving side of [`ActivityLoggerHandle::in_memory`].
pub struct EventCapture {
    rx: Receiver<ActivityEvent>,
}

impl EventCapture {
    /// Every event sent so far, in order.
    #[must_use]
    pub fn drain(&self) -> Vec<ActivityEvent> {
        self.rx.try_iter().collect()
    }
}

// ──────────────────── spawn ────────────────────

pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread.
///
/// The thread runs until [`ActivityLoggerHandle::shutdown`] is called or every
/// handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("vrelief-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped_clone))
        .map_err(|e| VrlError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        if let Some(entry) = event_to_log_entry(&event) {
            jsonl.write_entry(&entry);
        }
    }

    jsonl.flush();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            project,
            volumes,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} project={project} volumes={volumes}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::VolumeResolved {
            volume,
            mount_point,
            device,
            disk,
            zone,
        } => {
            let mut e = LogEntry::new(EventType::VolumeResolved, Severity::Info);
            e.volume = Some(volume.clone());
            e.mount_point = Some(mount_point.clone());
            e.device = Some(device.clone());
            e.disk = Some(disk.clone());
            e.zone = Some(zone.clone());
            e
        }
        ActivityEvent::ThresholdCrossed {
            volume,
            usage_pct,
            threshold_pct,
        } => {
            let mut e = LogEntry::new(EventType::ThresholdCrossed, Severity::Warning);
            e.volume = Some(volume.clone());
            e.usage_pct = Some(*usage_pct);
            e.threshold_pct = Some(*threshold_pct);
            e
        }
        ActivityEvent::FilesystemGrown {
            volume,
            device,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::FilesystemGrown, Severity::Info);
            e.volume = Some(volume.clone());
            e.device = Some(device.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DiskResizeRequested {
            volume,
            disk,
            zone,
            from_gb,
            to_gb,
        } => {
            let mut e = LogEntry::new(EventType::DiskResizeRequested, Severity::Warning);
            e.volume = Some(volume.clone());
            e.disk = Some(disk.clone());
            e.zone = Some(zone.clone());
            e.from_gb = Some(*from_gb);
            e.to_gb = Some(*to_gb);
            e
        }
        ActivityEvent::DiskResized {
            volume,
            disk,
            from_gb,
            to_gb,
            operation,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::DiskResized, Severity::Info);
            e.volume = Some(volume.clone());
            e.disk = Some(disk.clone());
            e.from_gb = Some(*from_gb);
            e.to_gb = Some(*to_gb);
            e.operation = Some(operation.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::PressureRelieved {
            volume,
            usage_pct,
            remedy,
        } => {
            let mut e = LogEntry::new(EventType::PressureRelieved, Severity::Info);
            e.volume = Some(volume.clone());
            e.usage_pct = Some(*usage_pct);
            e.details = Some(format!("remedy={remedy}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ReliefFailed {
            volume,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ReliefFailed, Severity::Critical);
            e.volume = Some(volume.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}
