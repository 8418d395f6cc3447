//! Upload of validated artifacts

use std::time::{Duration, Instant};

use bytes::Bytes;
use layer_core::{
    Cancellation, LayerError, PublishReceipt, PublishTarget, Result, Stage, ValidatedArtifact,
    bounded,
};
use object_store::path::Path as ObjectPath;
use object_store::{PutOptions, PutPayload};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::store::BucketStore;

/// Object location for `target`. Keys the store would rewrite on the way in
/// are rejected, so the reported address is always where the bytes land.
pub fn object_location(target: &PublishTarget) -> Result<ObjectPath> {
    let location = ObjectPath::from(target.key());
    if location.as_ref() != target.key() {
        return Err(LayerError::Config(format!(
            "object key '{}' would be stored as '{}'",
            target.key(),
            location
        )));
    }
    Ok(location)
}

/// Uploads artifacts that have passed the size check.
pub struct Publisher {
    store: BucketStore,
    timeout: Duration,
}

impl Publisher {
    pub fn new(store: BucketStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Upload the artifact to `target`. Publishing the same content twice
    /// leaves the stored object unchanged.
    pub async fn publish(
        &self,
        validated: &ValidatedArtifact,
        target: &PublishTarget,
        cancel: &Cancellation,
    ) -> Result<PublishReceipt> {
        let artifact = validated.artifact();
        let location = object_location(target)?;
        let address = self.store.address(target.bucket(), &location)?;
        // The file may have been removed since the check ran.
        artifact.ensure_present()?;

        let data = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| LayerError::io(format!("reading {}", artifact.path.display()), e))?;
        let bytes = data.len() as u64;
        let digest = blake3::hash(&data).to_hex().to_string();

        debug!("Uploading {} ({} bytes) to {}", artifact.path.display(), bytes, address);
        let start = Instant::now();

        let payload = PutPayload::from(Bytes::from(data));
        let upload = async {
            self.store
                .store
                .put_opts(&location, payload, PutOptions::default())
                .await
                .map_err(|e| LayerError::UploadFailure {
                    address: address.clone(),
                    message: e.to_string(),
                })
        };
        let result = bounded(Stage::Publish, self.timeout, cancel, upload).await?;

        info!(
            "Published {} to {} in {:.1}s",
            artifact.name,
            address,
            start.elapsed().as_secs_f64()
        );

        Ok(PublishReceipt {
            address,
            target: target.clone(),
            bytes,
            blake3: digest,
            e_tag: result.e_tag,
            published_at: OffsetDateTime::now_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_core::{Artifact, SizeMethod, SizeReport};
    use object_store::{GetOptions, ObjectStore};
    use std::sync::Arc;

    fn validated_in(dir: &std::path::Path, name: &str, content: &[u8]) -> ValidatedArtifact {
        std::fs::write(dir.join(name), content).unwrap();
        let artifact = Artifact::at(dir, name);
        let report = SizeReport::new(
            &artifact.path,
            content.len() as u64,
            content.len() as u64 * 4,
            10_000,
            1,
            SizeMethod::Extract,
        );
        ValidatedArtifact::new(artifact, report).unwrap()
    }

    async fn stored(store: &Arc<dyn ObjectStore>, key: &str) -> Bytes {
        store
            .get_opts(&ObjectPath::from(key), GetOptions::default())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_reports_s3_address() {
        let dir = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo.zip", b"layer-bytes");
        let backing: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let publisher = Publisher::new(
            BucketStore::new(backing.clone(), "s3"),
            Duration::from_secs(5),
        );

        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo.zip").unwrap();
        let receipt = publisher
            .publish(&validated, &target, &Cancellation::never())
            .await
            .unwrap();

        assert_eq!(receipt.address, "s3://my-bucket/layers/foo.zip");
        assert_eq!(receipt.bytes, 11);
        assert_eq!(receipt.blake3, blake3::hash(b"layer-bytes").to_hex().to_string());
        assert_eq!(stored(&backing, "layers/foo.zip").await.as_ref(), b"layer-bytes");
    }

    #[tokio::test]
    async fn test_publish_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo.zip", b"same content");
        let backing: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let publisher = Publisher::new(
            BucketStore::new(backing.clone(), "s3"),
            Duration::from_secs(5),
        );
        let target = PublishTarget::from_prefix("my-bucket", "", "foo.zip").unwrap();
        let cancel = Cancellation::never();

        let first = publisher.publish(&validated, &target, &cancel).await.unwrap();
        let second = publisher.publish(&validated, &target, &cancel).await.unwrap();

        assert_eq!(first.blake3, second.blake3);
        assert_eq!(stored(&backing, "foo.zip").await.as_ref(), b"same content");
    }

    #[tokio::test]
    async fn test_missing_artifact_makes_no_upload() {
        let dir = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo.zip", b"gone soon");
        std::fs::remove_file(dir.path().join("foo.zip")).unwrap();

        let backing: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let publisher = Publisher::new(
            BucketStore::new(backing.clone(), "s3"),
            Duration::from_secs(5),
        );
        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo.zip").unwrap();

        let err = publisher
            .publish(&validated, &target, &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::ArtifactNotFound(_)));

        let missing = backing
            .get_opts(&ObjectPath::from("layers/foo.zip"), GetOptions::default())
            .await;
        assert!(matches!(missing, Err(object_store::Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_publish() {
        let dir = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo.zip", b"bytes");
        let publisher = Publisher::new(BucketStore::memory(), Duration::from_secs(5));
        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo.zip").unwrap();

        let (handle, cancel) = Cancellation::pair();
        handle.cancel();

        let err = publisher.publish(&validated, &target, &cancel).await.unwrap_err();
        assert!(matches!(err, LayerError::Cancelled(Stage::Publish)));
    }

    #[tokio::test]
    async fn test_file_backend_writes_under_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo.zip", b"on disk");

        let config = layer_config::PublishConfig {
            backend: layer_config::StorageBackend::File,
            root: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let store = BucketStore::from_config(&config, "my-bucket").unwrap();
        let publisher = Publisher::new(store, Duration::from_secs(5));
        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo.zip").unwrap();

        let receipt = publisher
            .publish(&validated, &target, &Cancellation::never())
            .await
            .unwrap();

        let written = std::fs::read(root.path().join("my-bucket/layers/foo.zip")).unwrap();
        assert_eq!(written, b"on disk");

        let path = receipt.address.strip_prefix("file://").unwrap();
        assert!(path.ends_with("my-bucket/layers/foo.zip"), "{}", path);
        assert_eq!(std::fs::read(path).unwrap(), b"on disk");
    }

    #[tokio::test]
    async fn test_rewritten_key_is_rejected_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let validated = validated_in(dir.path(), "foo#1.zip", b"bytes");
        let backing: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let publisher = Publisher::new(
            BucketStore::new(backing.clone(), "s3"),
            Duration::from_secs(5),
        );
        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo#1.zip").unwrap();

        let err = publisher
            .publish(&validated, &target, &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Config(_)));

        let encoded = backing
            .get_opts(&ObjectPath::from("layers/foo#1.zip"), GetOptions::default())
            .await;
        assert!(matches!(encoded, Err(object_store::Error::NotFound { .. })));
    }

    #[test]
    fn test_object_location_matches_key() {
        let target = PublishTarget::from_prefix("my-bucket", "layers/py", "foo.zip").unwrap();
        assert_eq!(object_location(&target).unwrap().as_ref(), "layers/py/foo.zip");
    }
}
