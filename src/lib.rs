//! Resumable, multi-connection HTTP range downloader.
//!
//! A download is planned from a HEAD probe, split into byte ranges fetched by
//! parallel workers over one shared HTTP client, committed to a seekable sink
//! under a single write lock, and checkpointed to disk so an interrupted run
//! resumes from the last committed offset.

pub mod config;
pub mod downloader;
pub mod error;
pub mod progress;
pub mod types;
