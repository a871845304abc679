use std::sync::Arc;

use anyhow::Result;
use blob_store::BlobStorage;
use data_model::{AssetId, AssetIdGenerator, AssetMetadata};
use state_store::MetadataStore;
use tracing::{error, info};

use crate::pipeline::{self, ByteStream, IngestCounters};

const DELETE_PAGE_SIZE: usize = 100;

/// Coordinates an asset's lifecycle across the metadata store and the
/// blob store: version allocation, the ingestion pipeline, retrieval,
/// and the deletion cascade.
pub struct AssetManager {
    state: Arc<MetadataStore>,
    blob_storage: Arc<BlobStorage>,
    id_generator: AssetIdGenerator,
    encryption_secret: String,
}

impl AssetManager {
    pub fn new(
        state: Arc<MetadataStore>,
        blob_storage: Arc<BlobStorage>,
        encryption_secret: String,
    ) -> Self {
        Self {
            state,
            blob_storage,
            id_generator: AssetIdGenerator::new(),
            encryption_secret,
        }
    }

    /// Stores one new version of `name` in `bucket` and returns its id.
    ///
    /// The version record is written before the blob upload starts, with
    /// sizes unset, and upserted with the observed sizes once the stream
    /// has been fully consumed. A version whose sizes are still zero is
    /// an upload in flight or one that died mid-stream.
    pub async fn upload(
        &self,
        bucket: &str,
        token: &str,
        name: &str,
        stream: ByteStream,
    ) -> Result<AssetId> {
        let id = self.id_generator.next();
        let metadata = AssetMetadata::new(bucket, name, token);
        self.state.put_asset_version(&id, &metadata)?;
        info!(
            "receiving asset {} for file {} in bucket {}",
            id, name, bucket
        );

        let key = pipeline::cipher::derive_key(&self.encryption_secret, id.get(), bucket);
        let counters = IngestCounters::new();
        let encoded = pipeline::ingest_chain(stream, &counters, key);
        if let Err(e) = self.blob_storage.put(id.get(), encoded).await {
            // The version record stays behind with zero sizes; the blob,
            // if partially written, is unreachable under this id.
            error!("failed to store asset {}: {:?}", id, e);
            return Err(e);
        }

        let raw_size = counters.raw.load(std::sync::atomic::Ordering::Relaxed);
        let zipped_size = counters.zipped.load(std::sync::atomic::Ordering::Relaxed);
        self.state
            .put_asset_version(&id, &metadata.finalized(raw_size, zipped_size))?;
        info!(
            "stored asset {} ({} bytes raw, {} compressed)",
            id, raw_size, zipped_size
        );
        Ok(id)
    }

    /// Opens the current version of `name` in `bucket` as a plaintext
    /// stream. `None` when the asset has no current version.
    pub async fn download(&self, bucket: &str, name: &str) -> Result<Option<ByteStream>> {
        let Some(id) = self.state.reader().get_asset_id(bucket, name)? else {
            return Ok(None);
        };
        let stored = self.blob_storage.get(id.get()).await?;
        let key = pipeline::cipher::derive_key(&self.encryption_secret, id.get(), bucket);
        Ok(Some(pipeline::retrieve_chain(stored, key)))
    }

    /// Deletes every version of `name` in `bucket`.
    ///
    /// The current pointer goes first, so no new reads start against the
    /// asset while the cascade runs. Each version then has its metadata
    /// entries and its blob removed independently; a failure on one
    /// version is logged and the cascade moves on, leaving that version
    /// for a retry of the same call.
    pub async fn delete(&self, bucket: &str, name: &str) -> Result<()> {
        self.state.delete_asset_current_pointer(bucket, name)?;

        let reader = self.state.reader();
        let mut restart_key: Option<Vec<u8>> = None;
        loop {
            let (ids, cursor) = reader.list_version_ids(
                bucket,
                name,
                restart_key.as_deref(),
                Some(DELETE_PAGE_SIZE),
            )?;
            for id in ids {
                if let Err(e) = self.state.delete_asset_version_entries(bucket, name, &id) {
                    // Keep the blob while its record exists, so the next
                    // pass can still find it.
                    error!("failed to delete version record {}: {:?}", id, e);
                    continue;
                }
                if let Err(e) = self.blob_storage.delete(id.get()).await {
                    error!("failed to delete blob for version {}: {:?}", id, e);
                    continue;
                }
                info!("deleted asset version {} of {}/{}", id, bucket, name);
            }
            match cursor {
                Some(next) => restart_key = Some(next),
                None => break,
            }
        }
        Ok(())
    }
}
