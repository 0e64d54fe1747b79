//! Cloud provider side: the compute disk API, its asynchronous operations,
//! and the block device resize protocol built on them.

pub mod compute;
pub mod operation;
pub mod resizer;
