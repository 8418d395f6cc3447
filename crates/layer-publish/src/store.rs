//! Object store construction from configuration

use std::sync::Arc;

use layer_config::{PublishConfig, StorageBackend};
use layer_core::{LayerError, Result};
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use tracing::debug;

/// A store bound to one bucket, plus the URL scheme used in addresses.
#[derive(Clone)]
pub struct BucketStore {
    pub store: Arc<dyn ObjectStore>,
    pub scheme: &'static str,
    local: Option<Arc<LocalFileSystem>>,
}

impl BucketStore {
    pub fn new(store: Arc<dyn ObjectStore>, scheme: &'static str) -> Self {
        Self {
            store,
            scheme,
            local: None,
        }
    }

    fn local(store: LocalFileSystem) -> Self {
        let store = Arc::new(store);
        Self {
            store: store.clone(),
            scheme: "file",
            local: Some(store),
        }
    }

    /// Address of `location` in `bucket`. Local stores report the absolute
    /// file URL of the written object.
    pub fn address(&self, bucket: &str, location: &ObjectPath) -> Result<String> {
        match &self.local {
            Some(local) => {
                let path = local.path_to_filesystem(location).map_err(|e| {
                    LayerError::Config(format!("invalid object key '{}': {}", location, e))
                })?;
                Ok(format!("file://{}", path.display()))
            }
            None => Ok(format!("{}://{}/{}", self.scheme, bucket, location)),
        }
    }

    /// In-memory store for testing.
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// Build the store for `bucket` from the publish section of the config.
    pub fn from_config(config: &PublishConfig, bucket: &str) -> Result<Self> {
        match config.backend {
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }

                // Explicit keys only when both halves are present; otherwise
                // the environment or instance role supplies credentials.
                match (&config.access_key_id, &config.secret_access_key) {
                    (Some(key_id), Some(secret)) => {
                        debug!("Using explicitly configured S3 credentials");
                        builder = builder
                            .with_access_key_id(key_id)
                            .with_secret_access_key(secret);
                        if let Some(token) = &config.session_token {
                            builder = builder.with_token(token);
                        }
                    }
                    _ => debug!("Using ambient S3 credentials"),
                }

                let store = builder.build().map_err(|e| {
                    LayerError::Config(format!("failed to create S3 client: {}", e))
                })?;
                Ok(Self::new(Arc::new(store), "s3"))
            }
            StorageBackend::File => {
                let root = config.root.as_ref().ok_or_else(|| {
                    LayerError::Config("publish.root is required for the file backend".to_string())
                })?;
                let bucket_dir = root.join(bucket);
                std::fs::create_dir_all(&bucket_dir).map_err(|e| {
                    LayerError::io(format!("creating store directory {}", bucket_dir.display()), e)
                })?;
                let store = LocalFileSystem::new_with_prefix(&bucket_dir).map_err(|e| {
                    LayerError::Config(format!(
                        "failed to create local store at {}: {}",
                        bucket_dir.display(),
                        e
                    ))
                })?;
                Ok(Self::local(store))
            }
            StorageBackend::Memory => Ok(Self::memory()),
        }
    }
}
