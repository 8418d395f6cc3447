//! Artifact builder
//!
//! This crate provides:
//! - The `BuildEnvironment` trait and its Docker implementation
//! - `EnvironmentScope`, which tears the environment down on every exit path
//! - `Builder`, which turns a `BuildSpec` into exactly one artifact file

pub mod builder;
pub mod docker;
pub mod environment;
pub mod scope;

pub use builder::{BuildReceipt, Builder};
pub use docker::DockerEnvironment;
pub use environment::{BuildEnvironment, BuildSpec, EnvironmentHandle};
pub use scope::EnvironmentScope;
