//! Publishing of validated layer artifacts to object storage

pub mod publisher;
pub mod store;

pub use publisher::{Publisher, object_location};
pub use store::BucketStore;
