#![warn(missing_docs)]

//! BasaltFS quota subsystem: hierarchical namespace/space/storage-type quota
//! tracking, admission control, snapshot retention, and durable recovery for
//! the metadata service.

pub mod admission;
pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod counts;
pub mod engine;
pub mod journal;
pub mod policy;
pub mod snapshot;
pub mod tree;
pub mod types;
