//! Relief loop: one-time volume resolution, then a sequential pass over every
//! volume each poll period until shutdown.
//!
//! Startup fails fast: any resolution error aborts before the loop starts.
//! Inside the loop every failure is logged against its volume and the next
//! pass tries again.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;

use crate::cloud::compute::ComputeRestClient;
use crate::cluster::client::{ClusterApi, KubeClient};
use crate::cluster::resolver::{MountedVolume, VolumeResolver};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::escalation::{
    EscalationController, EscalationPolicy, ReliefContext, ReliefOutcome,
};
use crate::platform::pal::{LinuxPlatform, Platform};

/// Arguments for `vrelief run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonArgs {
    /// Make a single pass over the volumes and return.
    pub once: bool,
}

/// Everything resolution produces before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Startup {
    pub project: String,
    pub volumes: Vec<MountedVolume>,
}

/// Look up the pod, work out the project, and validate every requested volume.
pub fn resolve_startup(
    config: &Config,
    cluster: &dyn ClusterApi,
    platform: &dyn Platform,
) -> Result<Startup> {
    let resolver = VolumeResolver::new(cluster, platform, &config.target.namespace);
    let pod = resolver.fetch_pod(&config.target.pod_name)?;
    let project = match &config.provider.project_id {
        Some(project) => project.clone(),
        None => resolver.discover_project(&pod)?,
    };
    let volumes = resolver.resolve(&pod, &config.target.container_name, &config.target.volumes)?;
    Ok(Startup { project, volumes })
}

/// Tally of one pass over all volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub below_threshold: usize,
    pub relieved: usize,
    pub failed: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &Result<ReliefOutcome>) {
        match outcome {
            Ok(ReliefOutcome::BelowThreshold { .. }) => self.below_threshold += 1,
            Ok(_) => self.relieved += 1,
            Err(_) => self.failed += 1,
        }
    }
}

// ──────────────────── main daemon struct ────────────────────

pub struct ReliefDaemon {
    config: Config,
    ctx: ReliefContext,
    volumes: Vec<MountedVolume>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    start_time: Instant,
}

impl ReliefDaemon {
    /// Wire up the real clients, resolve volumes, and start the logger thread.
    pub fn init(config: Config) -> Result<Self> {
        let cluster = KubeClient::from_config(&config.cluster)?;
        let platform: Arc<dyn Platform> = Arc::new(LinuxPlatform::new(&config.host));
        let startup = resolve_startup(&config, &cluster, platform.as_ref())?;

        let logger_config = ActivityLoggerConfig::new(JsonlConfig::from(&config.logging));
        let (logger_handle, logger_join) = spawn_logger(logger_config)?;

        let ctx = ReliefContext {
            platform,
            disks: Arc::new(ComputeRestClient::from_config(&config.provider)),
            project: startup.project,
        };
        let mut daemon = Self::with_parts(
            config,
            ctx,
            startup.volumes,
            logger_handle,
            SignalHandler::new(),
        );
        daemon.logger_join = Some(logger_join);
        Ok(daemon)
    }

    /// Assemble a daemon from already-resolved pieces.
    #[must_use]
    pub fn with_parts(
        config: Config,
        ctx: ReliefContext,
        volumes: Vec<MountedVolume>,
        logger_handle: ActivityLoggerHandle,
        signal_handler: SignalHandler,
    ) -> Self {
        Self {
            config,
            ctx,
            volumes,
            logger_handle,
            logger_join: None,
            signal_handler,
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn volumes(&self) -> &[MountedVolume] {
        &self.volumes
    }

    /// Run passes until shutdown (or once). Returns the last pass's tally.
    pub fn run(&mut self, args: DaemonArgs) -> PassSummary {
        let config_hash = self.config.stable_hash().unwrap_or_else(|e| {
            self.logger_handle.send(ActivityEvent::error(&e));
            String::new()
        });
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            project: self.ctx.project.clone(),
            volumes: self.volumes.len(),
        });
        for volume in &self.volumes {
            self.logger_handle.send(ActivityEvent::VolumeResolved {
                volume: volume.name.clone(),
                mount_point: volume.mounted_path.display().to_string(),
                device: volume.device_path.display().to_string(),
                disk: volume.disk_name.clone(),
                zone: volume.zone.clone(),
            });
        }

        let mut last = PassSummary::default();
        let reason = loop {
            if self.signal_handler.should_shutdown() {
                break "shutdown requested";
            }
            last = self.run_pass();
            if args.once {
                break "single pass complete";
            }
            if !self.signal_handler.sleep(self.config.relief.poll_period()) {
                break "shutdown requested";
            }
        };

        self.shutdown(reason);
        last
    }

    /// One sequential pass over every volume.
    pub fn run_pass(&self) -> PassSummary {
        let controller = EscalationController::new(
            &self.ctx,
            EscalationPolicy::from_config(&self.config),
            &self.logger_handle,
        );
        let mut summary = PassSummary::default();
        for volume in &self.volumes {
            if self.signal_handler.should_shutdown() {
                break;
            }
            let outcome = controller.relieve(volume);
            if let Err(e) = &outcome {
                self.logger_handle
                    .send(ActivityEvent::relief_failed(&volume.name, e));
            }
            summary.record(&outcome);
        }
        summary
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        if let Some(logger_join) = self.logger_join.take() {
            self.logger_handle.shutdown();
            let _ = logger_join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::cloud::compute::MockDiskApi;
    use crate::cluster::client::MockClusterApi;
    use k8s_openapi::api::core::v1::{Container, Node, NodeSpec, Pod, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use crate::logger::activity::EventCapture;
    use crate::platform::pal::MockPlatform;

    fn volume(name: &str) -> MountedVolume {
        MountedVolume {
            name: name.to_string(),
            mounted_path: PathBuf::from(format!("/mnt/{name}")),
            device_path: PathBuf::from(format!("/dev/disk/{name}")),
            disk_name: format!("pd-{name}"),
            region: "us-central1".to_string(),
            zone: "us-central1-a".to_string(),
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.relief.poll_period_ms = 1;
        config.relief.settle_delay_ms = 0;
        config.provider.operation_poll_interval_ms = 0;
        config
    }

    fn daemon(platform: MockPlatform, names: &[&str]) -> (ReliefDaemon, EventCapture) {
        let disks = names
            .iter()
            .fold(MockDiskApi::new(), |api, n| api.with_disk(&format!("pd-{n}"), 10));
        let ctx = ReliefContext {
            platform: Arc::new(platform),
            disks: Arc::new(disks),
            project: "acme".to_string(),
        };
        let (logger, capture) = ActivityLoggerHandle::in_memory();
        let daemon = ReliefDaemon::with_parts(
            fast_config(),
            ctx,
            names.iter().map(|n| volume(n)).collect(),
            logger,
            SignalHandler::detached(),
        );
        (daemon, capture)
    }

    #[test]
    fn failure_on_one_volume_does_not_stop_the_next() {
        let platform = MockPlatform::new()
            .with_usage("/mnt/a", &[95])
            .with_usage("/mnt/b", &[40]);
        let (d, capture) = daemon(platform, &["a", "b"]);
        let summary = d.run_pass();
        assert_eq!(
            summary,
            PassSummary {
                below_threshold: 1,
                relieved: 0,
                failed: 1
            }
        );
        let failed: Vec<ActivityEvent> = capture
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ActivityEvent::ReliefFailed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn once_mode_runs_a_single_pass_and_logs_lifecycle() {
        let platform = MockPlatform::new().with_usage("/mnt/a", &[85, 70]);
        let (mut d, capture) = daemon(platform, &["a"]);
        let summary = d.run(DaemonArgs { once: true });
        assert_eq!(summary.relieved, 1);
        let events = capture.drain();
        assert!(matches!(
            events.first(),
            Some(ActivityEvent::DaemonStarted { volumes: 1, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(ActivityEvent::DaemonStopped { reason, .. }) if reason == "single pass complete"
        ));
    }

    #[test]
    fn shutdown_before_first_pass_skips_work() {
        let platform = MockPlatform::new().with_usage("/mnt/a", &[99]);
        let (mut d, capture) = daemon(platform, &["a"]);
        d.signal_handler.request_shutdown();
        assert_eq!(d.run(DaemonArgs::default()), PassSummary::default());
        assert!(
            !capture
                .drain()
                .iter()
                .any(|e| matches!(e, ActivityEvent::ThresholdCrossed { .. }))
        );
    }

    #[test]
    fn loop_keeps_running_after_exhaustion_until_shutdown() {
        let platform = MockPlatform::new().with_usage("/mnt/a", &[99]);
        let (mut d, capture) = daemon(platform, &["a"]);
        let remote = d.signal_handler.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(100));
            remote.request_shutdown();
        });
        let last = d.run(DaemonArgs::default());
        stopper.join().expect("stopper thread");
        assert_eq!(last.failed, 1);
        let failures = capture
            .drain()
            .iter()
            .filter(|e| matches!(e, ActivityEvent::ReliefFailed { .. }))
            .count();
        assert!(failures >= 1);
    }

    #[test]
    fn startup_discovers_project_from_node() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("app-0".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                containers: vec![Container {
                    name: "app".to_string(),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..Pod::default()
        };
        let cluster = MockClusterApi::new().with_pod("default", pod).with_node(Node {
            metadata: ObjectMeta {
                name: Some("node-a".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some("gce://from-node/us-central1-a/node-a".to_string()),
                ..NodeSpec::default()
            }),
            ..Node::default()
        });
        let platform = MockPlatform::new();
        let mut config = Config::default();
        config.target.namespace = "default".to_string();
        config.target.pod_name = "app-0".to_string();
        config.target.container_name = "app".to_string();

        let startup = resolve_startup(&config, &cluster, &platform).expect("startup");
        assert_eq!(startup.project, "from-node");
        assert!(startup.volumes.is_empty());

        config.provider.project_id = Some("explicit".to_string());
        let startup = resolve_startup(&config, &cluster, &platform).expect("startup");
        assert_eq!(startup.project, "explicit");
    }

    #[test]
    fn startup_fails_when_pod_is_missing() {
        let mut config = Config::default();
        config.target.namespace = "default".to_string();
        config.target.pod_name = "ghost".to_string();
        let err = resolve_startup(&config, &MockClusterApi::new(), &MockPlatform::new())
            .expect_err("pod missing");
        assert_eq!(err.code(), "VRL-4101");
        assert!(err.is_resolution_failure());
    }
}
