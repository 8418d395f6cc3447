//! Size gate for layer artifacts
//!
//! Measures an artifact's compressed size and its size once unpacked, and
//! compares the latter against the configured ceiling.

pub mod archive;
pub mod validator;

pub use archive::ArchiveFormat;
pub use validator::{SizeValidator, gate};
