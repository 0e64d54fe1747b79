//! Host integration: the `Platform` trait over statvfs, the mount table and
//! the filesystem resize tool, plus the curl-backed HTTPS transport.

pub mod curl;
pub mod pal;
