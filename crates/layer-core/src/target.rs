use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{LayerError, Result};

/// Remote destination of a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishTarget {
    bucket: String,
    key: String,
}

impl PublishTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        let key = key.trim_start_matches('/').to_string();

        if bucket.trim().is_empty() {
            return Err(LayerError::Config("publish bucket is not set".to_string()));
        }
        // Every segment must be a real name; stores collapse or reject the rest.
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(LayerError::Config(format!(
                "invalid object key '{}'",
                key
            )));
        }

        Ok(Self { bucket, key })
    }

    /// Key is `prefix/name`, or just `name` when the prefix is empty.
    pub fn from_prefix(bucket: impl Into<String>, prefix: &str, name: &str) -> Result<Self> {
        let prefix = prefix.trim_matches('/');
        let key = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        Self::new(bucket, key)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// What a successful publish reports back.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub address: String,
    pub target: PublishTarget,
    pub bytes: u64,
    pub blake3: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub published_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_prefix() {
        let target = PublishTarget::from_prefix("my-bucket", "layers", "foo.zip").unwrap();
        assert_eq!(target.bucket(), "my-bucket");
        assert_eq!(target.key(), "layers/foo.zip");
    }

    #[test]
    fn test_empty_prefix_uses_bare_name() {
        let target = PublishTarget::from_prefix("my-bucket", "", "foo.zip").unwrap();
        assert_eq!(target.key(), "foo.zip");
    }

    #[test]
    fn test_prefix_slashes_are_trimmed() {
        let target = PublishTarget::from_prefix("my-bucket", "/layers/py/", "foo.zip").unwrap();
        assert_eq!(target.key(), "layers/py/foo.zip");
    }

    #[test]
    fn test_rejects_missing_bucket_and_directory_keys() {
        assert!(PublishTarget::new("", "foo.zip").is_err());
        assert!(PublishTarget::new("b", "layers/").is_err());
        assert!(PublishTarget::new("b", "").is_err());
    }

    #[test]
    fn test_rejects_keys_with_empty_or_relative_segments() {
        for prefix in ["layers//py", "layers/./py", "../layers"] {
            let err = PublishTarget::from_prefix("my-bucket", prefix, "foo.zip").unwrap_err();
            assert!(matches!(err, LayerError::Config(_)), "{}", prefix);
        }
    }
}
