//! Business logic services.
//!
//! Services orchestrate storage adapters and provide high-level operations.

mod transfer;

pub use transfer::{BUNDLE_TYPE, BUNDLE_VERSION, ExportBundle, ImportStats, TransferService};
