#![forbid(unsafe_code)]

//! Volume relief: a sidecar that keeps cloud-backed volumes from filling up.
//!
//! Escalation per volume, on every poll tick:
//! 1. **Filesystem grow**: the filesystem may lag behind its block device
//! 2. **Disk resize**: grow the persistent disk by a percentage, then grow
//!    the filesystem again
//!
//! Volumes are resolved and validated once at startup; afterwards every
//! failure is logged and retried on the next tick.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use volume_relief::prelude::*;
//! ```

pub mod prelude;

pub mod cloud;
pub mod cluster;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
