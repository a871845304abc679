use std::{env, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    parse_url,
    path::Path,
    ObjectStore, ObjectStoreScheme, WriteMultipart,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

/// Physical blob backend, selected by URL scheme: `file://` for local
/// disk, `s3://` for S3-compatible object storage, `az://` for
/// Azure-compatible blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: String,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: format!("file://{}", path),
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = format!(
            "file://{}",
            env::current_dir()
                .unwrap_or_default()
                .join("asset_storage/blobs")
                .to_str()
                .unwrap_or_default()
        );
        info!("using blob store path: {}", blob_store_path);
        BlobStorageConfig {
            path: blob_store_path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub size_bytes: u64,
}

/// Stores opaque byte streams keyed by asset version id.
#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let (object_store, path) = Self::build_object_store(&config.path)?;
        Ok(Self {
            object_store: Arc::new(object_store),
            path,
        })
    }

    fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path)> {
        let url = &url_str.parse::<Url>()?;
        let (scheme, _) = ObjectStoreScheme::parse(url)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // inject AWS environment variables to prioritize keys over
                // instance metadata credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = std::env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                            if key.starts_with("AWS_") {
                                if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                                    return Some((config_key, String::from(value)));
                                }
                            }
                        }
                        None
                    })
                    .collect();

                let mut s3_builder = AmazonS3Builder::new().with_url(url_str);
                for (key, value) in opts.iter() {
                    s3_builder = s3_builder.with_config(*key, value.clone());
                }
                let s3 = s3_builder
                    .build()
                    .map_err(|e| anyhow!("failed to create s3 object store: {}", e))?;
                let path = Path::from(url.path());
                Ok((Box::new(s3), path))
            }
            _ => Ok(parse_url(url)?),
        }
    }

    /// Streams `data` into the object under `key`. The returned future
    /// resolves only after the backend has acknowledged the whole upload;
    /// any backend rejection surfaces as an error, never as silent
    /// completion.
    pub async fn put(
        &self,
        key: &str,
        data: impl futures::Stream<Item = Result<Bytes>> + Send + Unpin,
    ) -> Result<PutResult> {
        let mut data = data;
        let path = self.path.child(key);
        let m = self.object_store.put_multipart(&path).await?;
        let mut w = WriteMultipart::new(m);
        let mut size_bytes = 0;
        while let Some(chunk) = data.next().await {
            w.wait_for_capacity(1).await?;
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            w.write(&chunk);
        }
        w.finish().await?;
        Ok(PutResult { size_bytes })
    }

    /// Opens a read stream for the object under `key`. Fails before the
    /// first chunk if the object does not exist. The backend is polled
    /// only as the caller reads, so a slow consumer throttles the read
    /// instead of buffering the object.
    pub async fn get(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = self.path.child(key);
        let get_result = self
            .object_store
            .get(&path)
            .await
            .map_err(|e| anyhow!("can't get object {:?}: {:?}", path, e))?;
        Ok(get_result
            .into_stream()
            .map(move |chunk| {
                chunk.map_err(|e| anyhow!("error reading object {:?}: {:?}", path, e))
            })
            .boxed())
    }

    /// Removes the object under `key`. Deleting an absent object is
    /// success, so retrying a partially failed cascade stays safe.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.object_store.delete(&self.path.child(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let mut reader = self.get(key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }
}
