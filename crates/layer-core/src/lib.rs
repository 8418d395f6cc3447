//! Core domain models for the layer pipeline
//!
//! This crate contains:
//! - Domain models (Artifact, SizeReport, ValidatedArtifact, PublishTarget)
//! - The error taxonomy shared by every stage
//! - Stage bounds (timeouts and cancellation)

pub mod artifact;
pub mod error;
pub mod report;
pub mod stage;
pub mod target;

pub use artifact::{Artifact, ValidatedArtifact};
pub use error::{LayerError, Result};
pub use report::{SizeMethod, SizeReport, Verdict};
pub use stage::{CancelHandle, Cancellation, Stage, bounded};
pub use target::{PublishReceipt, PublishTarget};

/// Bytes in one mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Format a byte count as MiB with two decimals.
pub fn format_mib(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / MIB as f64)
}
