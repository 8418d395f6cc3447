//! Build, size-check and publish pipeline
//!
//! Wires the stage crates together from a [`Config`].

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineOutcome, PipelineState};

use std::sync::Arc;

use layer_build::{BuildSpec, Builder, DockerEnvironment};
use layer_config::Config;
use layer_core::{LayerError, PublishTarget, Result};
use layer_publish::{BucketStore, Publisher};
use layer_size::SizeValidator;
use tracing::debug;

/// Docker-backed builder plus the spec it builds.
pub fn docker_builder(config: &Config) -> Result<(Builder, BuildSpec)> {
    let docker = DockerEnvironment::new(config.build.docker.clone(), config.build.remove_image);
    let binary = docker.locate()?;
    debug!("Using docker at {}", binary.display());

    let builder = Builder::new(Arc::new(docker), config.timeouts.build());
    Ok((builder, BuildSpec::from_config(config)))
}

/// Publisher and destination for the configured bucket and prefix.
pub fn publisher(config: &Config) -> Result<(Publisher, PublishTarget)> {
    let bucket = config
        .publish
        .bucket
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            LayerError::Config(
                "no bucket configured; set publish.bucket, LAYER_BUCKET or --bucket".to_string(),
            )
        })?;

    let target = PublishTarget::from_prefix(bucket, &config.publish.prefix, &config.artifact.name)?;
    layer_publish::object_location(&target)?;
    let store = BucketStore::from_config(&config.publish, bucket)?;
    Ok((Publisher::new(store, config.timeouts.upload()), target))
}

/// Pipeline with only the size check wired.
pub fn check_pipeline(config: &Config) -> Result<Pipeline> {
    config.validate()?;
    Ok(Pipeline::new(SizeValidator::from_config(config)))
}

/// Pipeline able to check and publish.
pub fn push_pipeline(config: &Config) -> Result<Pipeline> {
    let (publisher, target) = publisher(config)?;
    Ok(check_pipeline(config)?.with_publisher(publisher, target))
}

/// Pipeline able to build only.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let (builder, spec) = docker_builder(config)?;
    Ok(check_pipeline(config)?.with_builder(builder, spec))
}

/// Every stage wired.
pub fn full_pipeline(config: &Config) -> Result<Pipeline> {
    let (publisher, target) = publisher(config)?;
    let (builder, spec) = docker_builder(config)?;
    Ok(check_pipeline(config)?
        .with_builder(builder, spec)
        .with_publisher(publisher, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_requires_bucket() {
        let config = Config::default();
        assert!(matches!(publisher(&config), Err(LayerError::Config(_))));
    }

    #[test]
    fn test_publisher_target_from_config() {
        let mut config = Config::default();
        config.publish.bucket = Some("my-bucket".to_string());
        config.publish.prefix = "layers".to_string();
        config.publish.backend = layer_config::StorageBackend::Memory;
        config.artifact.name = "foo.zip".to_string();

        let (_, target) = publisher(&config).unwrap();
        assert_eq!(target.bucket(), "my-bucket");
        assert_eq!(target.key(), "layers/foo.zip");
    }

    #[test]
    fn test_publisher_rejects_keys_the_store_would_rewrite() {
        let mut config = Config::default();
        config.publish.bucket = Some("my-bucket".to_string());
        config.publish.backend = layer_config::StorageBackend::Memory;
        config.artifact.name = "foo.zip".to_string();

        config.publish.prefix = "layers//py".to_string();
        assert!(matches!(publisher(&config), Err(LayerError::Config(_))));
        assert!(matches!(full_pipeline(&config), Err(LayerError::Config(_))));

        config.publish.prefix = "layers".to_string();
        config.artifact.name = "foo#1.zip".to_string();
        assert!(matches!(publisher(&config), Err(LayerError::Config(_))));
    }

    #[test]
    fn test_check_pipeline_rejects_zero_ceiling() {
        let mut config = Config::default();
        config.size.ceiling_bytes = 0;
        assert!(matches!(check_pipeline(&config), Err(LayerError::Config(_))));
    }
}
