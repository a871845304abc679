use std::sync::Arc;

use anyhow::Result;
use data_model::{
    asset_key, asset_prefix, bucket_asset_prefix, bucket_asset_version_prefix, bucket_key,
    bucket_prefix, bucket_token_prefix, token_key, AssetId, AssetMetadata, SCAN_UPPER_SENTINEL,
};
use rocksdb::{Direction, IteratorMode, ReadOptions, DB};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::serializer::{JsonEncode, JsonEncoder};

/// Read side of the metadata store: point lookups and prefix range scans.
///
/// Every listing is a forward iteration over the half-open key range
/// `[prefix, prefix + '~')`. The upper sentinel sorts after any valid
/// identifier byte, so the bound closes the scan without a secondary
/// index. Scans are restartable: a page returns the key to resume from.
pub struct StateReader {
    db: Arc<DB>,
}

impl StateReader {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(JsonEncoder::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw page of key/value pairs under `key_prefix`, resuming at
    /// `restart_key` when set. Returns the next restart key if the range
    /// was not exhausted.
    pub fn scan_prefix(
        &self,
        key_prefix: &[u8],
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Option<Vec<u8>>)> {
        let mut upper_bound = key_prefix.to_vec();
        upper_bound.push(SCAN_UPPER_SENTINEL);
        let mut read_options = ReadOptions::default();
        read_options.set_iterate_upper_bound(upper_bound);

        let start = restart_key.unwrap_or(key_prefix);
        let iter = self
            .db
            .iterator_opt(IteratorMode::From(start, Direction::Forward), read_options);

        let limit = limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut restart_key = None;
        for kv in iter {
            let (key, value) = kv?;
            if !key.starts_with(key_prefix) {
                break;
            }
            if items.len() < limit {
                items.push((key.to_vec(), value.to_vec()));
            } else {
                restart_key.replace(key.into_vec());
                break;
            }
        }
        Ok((items, restart_key))
    }

    pub fn get_bucket(&self, bucket: &str) -> Result<Option<serde_json::Value>> {
        self.get(&bucket_key(bucket))
    }

    pub fn resolve_token(&self, token: &str) -> Result<Option<String>> {
        self.get(&token_key(token))
    }

    pub fn get_asset_id(&self, bucket: &str, name: &str) -> Result<Option<AssetId>> {
        self.get(&data_model::bucket_asset_key(bucket, name))
    }

    pub fn get_asset_metadata(&self, id: &AssetId) -> Result<Option<AssetMetadata>> {
        self.get(&asset_key(id))
    }

    /// Token names under a bucket, in key (ASCII) order.
    pub fn list_tokens(
        &self,
        bucket: &str,
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<String>, Option<Vec<u8>>)> {
        let prefix = bucket_token_prefix(bucket);
        let (rows, cursor) = self.scan_prefix(prefix.as_bytes(), restart_key, limit)?;
        let mut tokens = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let token = String::from_utf8(key[prefix.len()..].to_vec())?;
            tokens.push(token);
        }
        Ok((tokens, cursor))
    }

    /// Version ids of one asset, oldest first. Ids are parsed from the key
    /// tail, so the scan never deserializes the version records.
    pub fn list_version_ids(
        &self,
        bucket: &str,
        name: &str,
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<AssetId>, Option<Vec<u8>>)> {
        let prefix = bucket_asset_version_prefix(bucket, name);
        let (rows, cursor) = self.scan_prefix(prefix.as_bytes(), restart_key, limit)?;
        let mut ids = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let id = std::str::from_utf8(&key[prefix.len()..])?;
            ids.push(AssetId::from(id));
        }
        Ok((ids, cursor))
    }

    pub fn list_buckets(
        &self,
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<(String, serde_json::Value)>, Option<Vec<u8>>)> {
        let prefix = bucket_prefix();
        let (rows, cursor) = self.scan_prefix(prefix.as_bytes(), restart_key, limit)?;
        let mut buckets = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let name = String::from_utf8(key[prefix.len()..].to_vec())?;
            buckets.push((name, JsonEncoder::decode(&value)?));
        }
        Ok((buckets, cursor))
    }

    /// Metadata of the current version of every asset in a bucket: a scan
    /// over the current-pointer keyspace joined against the version
    /// records.
    pub fn list_assets_by_bucket(
        &self,
        bucket: &str,
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<AssetMetadata>, Option<Vec<u8>>)> {
        let prefix = bucket_asset_prefix(bucket);
        let (rows, cursor) = self.scan_prefix(prefix.as_bytes(), restart_key, limit)?;
        let mut assets = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let id: AssetId = JsonEncoder::decode(&value)?;
            match self.get_asset_metadata(&id)? {
                Some(metadata) => assets.push(metadata),
                None => {
                    // Should not happen: every current pointer refers to an
                    // existing version record.
                    warn!(
                        "current pointer {:?} refers to missing asset record {}",
                        String::from_utf8_lossy(&key),
                        id
                    );
                }
            }
        }
        Ok((assets, cursor))
    }

    /// Every version record in the store, across all buckets.
    pub fn list_assets(
        &self,
        restart_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<(Vec<(AssetId, AssetMetadata)>, Option<Vec<u8>>)> {
        let prefix = asset_prefix();
        let (rows, cursor) = self.scan_prefix(prefix.as_bytes(), restart_key, limit)?;
        let mut assets = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let id = std::str::from_utf8(&key[prefix.len()..])?;
            assets.push((AssetId::from(id), JsonEncoder::decode(&value)?));
        }
        Ok((assets, cursor))
    }
}
