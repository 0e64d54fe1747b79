//! Pressure relief escalation.

pub mod escalation;
