//! Orchestrator access and startup volume resolution.

pub mod client;
pub mod resolver;
