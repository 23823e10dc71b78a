use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};

use crate::config::StoreConfig;

/// Builds the destination bucket client.
pub fn new(config: &StoreConfig) -> Result<ReplayStore, anyhow::Error> {
    let store = AmazonS3Builder::new()
        .with_region(&config.region)
        .with_bucket_name(&config.bucket)
        .with_access_key_id(&config.access_key_id)
        .with_secret_access_key(&config.secret_access_key)
        .with_endpoint(config.endpoint.as_str().trim_end_matches('/'))
        .with_allow_http(config.endpoint.scheme() == "http")
        .build()
        .with_context(|| format!("building S3 client for bucket {}", config.bucket))?;

    Ok(ReplayStore::from_store(Arc::new(store)))
}

#[derive(Clone)]
pub struct ReplayStore {
    store: Arc<dyn ObjectStore>,
}

impl ReplayStore {
    pub fn from_store(store: Arc<dyn ObjectStore>) -> ReplayStore {
        ReplayStore { store }
    }

    /// Best-effort existence check. Errors other than not-found are logged
    /// and reported as absent, so a flaky bucket can only cause a re-upload.
    pub async fn exists(&self, key: &str) -> bool {
        match self.store.head(&join_path(key)).await {
            Ok(_) => true,
            Err(object_store::Error::NotFound { .. }) => false,
            Err(e) => {
                log::debug!("existence check for {} failed: {}", key, e);
                false
            }
        }
    }

    pub async fn put(&self, key: &str, content: Bytes) -> Result<(), object_store::Error> {
        self.store.put(&join_path(key), content).await?;
        Ok(())
    }
}

fn join_path(key: &str) -> Path {
    Path::from(key.trim_start_matches('/'))
}
