use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use data_model::{
    asset_key, bucket_asset_key, bucket_asset_version_key, bucket_key, bucket_token_key,
    get_epoch_time_in_ms, token_key, AssetId, AssetMetadata,
};
use rocksdb::{Options, WriteBatch, DB};
use tracing::info;

pub mod scanner;
pub mod serializer;

use scanner::StateReader;
use serializer::{JsonEncode, JsonEncoder};

/// Metadata store over an ordered RocksDB keyspace.
///
/// Records are encoded as composite keys, one kind per prefix:
///
/// ```text
/// bucket!!<name>                               -> bucket document
/// bucket-token!!<bucket>!!<token>              -> creation time (ms)
/// token!!<token>                               -> bucket name
/// asset!!<versionId>                           -> version metadata
/// bucket-asset!!<bucket>!!<name>               -> current version id
/// bucket-asset-version!!<bucket>!!<name>!!<id> -> version metadata
/// ```
///
/// Multi-key mutations go through a single `WriteBatch`, so no reader ever
/// observes a partially written token or asset version.
pub struct MetadataStore {
    pub db: Arc<DB>,
}

impl MetadataStore {
    pub fn open(path: PathBuf) -> Result<Arc<Self>> {
        fs::create_dir_all(&path)
            .map_err(|e| anyhow!("failed to create metadata store dir: {}", e))?;
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        let db = DB::open(&db_opts, &path)
            .map_err(|e| anyhow!("failed to open metadata store: {}", e))?;
        info!("opened metadata store at {:?}", path);
        Ok(Arc::new(Self { db: Arc::new(db) }))
    }

    pub fn reader(&self) -> StateReader {
        StateReader::new(self.db.clone())
    }

    /// Upserts the bucket record; replaces any previous document whole.
    pub fn create_bucket(&self, bucket: &str, doc: &serde_json::Value) -> Result<()> {
        self.db
            .put(bucket_key(bucket).as_bytes(), JsonEncoder::encode(doc)?)?;
        Ok(())
    }

    /// Writes the bucket-membership entry and the reverse token lookup
    /// entry as one atomic batch.
    pub fn create_token(&self, bucket: &str, token: &str) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(
            bucket_token_key(bucket, token).as_bytes(),
            JsonEncoder::encode(&get_epoch_time_in_ms())?,
        );
        batch.put(token_key(token).as_bytes(), JsonEncoder::encode(&bucket)?);
        self.db.write(batch)?;
        Ok(())
    }

    /// Removes both entries written by [`create_token`], atomically.
    ///
    /// [`create_token`]: MetadataStore::create_token
    pub fn delete_token(&self, bucket: &str, token: &str) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(bucket_token_key(bucket, token).as_bytes());
        batch.delete(token_key(token).as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Writes the version record, the version-index entry, and the current
    /// pointer in one atomic batch. Called once when the upload starts and
    /// again at finalization with sizes populated; both calls target the
    /// same keys, so the second write is an idempotent upsert.
    pub fn put_asset_version(&self, id: &AssetId, metadata: &AssetMetadata) -> Result<()> {
        let serialized = JsonEncoder::encode(metadata)?;
        let mut batch = WriteBatch::default();
        batch.put(asset_key(id).as_bytes(), &serialized);
        batch.put(
            bucket_asset_version_key(&metadata.bucket, &metadata.file_name, id).as_bytes(),
            &serialized,
        );
        batch.put(
            bucket_asset_key(&metadata.bucket, &metadata.file_name).as_bytes(),
            JsonEncoder::encode(id)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    /// Removes the current pointer of an asset. First step of the deletion
    /// cascade; the version records stay until deleted per version.
    pub fn delete_asset_current_pointer(&self, bucket: &str, name: &str) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(bucket_asset_key(bucket, name).as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Removes one version's record and its version-index entry as one
    /// atomic batch.
    pub fn delete_asset_version_entries(
        &self,
        bucket: &str,
        name: &str,
        id: &AssetId,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(asset_key(id).as_bytes());
        batch.delete(bucket_asset_version_key(bucket, name, id).as_bytes());
        self.db.write(batch)?;
        Ok(())
    }
}
