use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

pub fn get_epoch_time_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Globally unique, time-ordered identifier of one uploaded asset version.
///
/// Rendered as 16 lowercase hex characters so ids sort the same way as the
/// `u64` values they encode, which keeps version-index keys in creation
/// order under lexicographic iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(String);

impl AssetId {
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AssetId {
    fn from(value: u64) -> Self {
        Self(format!("{:016x}", value))
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Issues time-sortable asset version ids.
///
/// Epoch milliseconds occupy the high 44 bits, a per-process sequence the
/// low 20. The CAS loop keeps ids strictly increasing even when several
/// uploads land in the same millisecond or the clock stalls.
pub struct AssetIdGenerator {
    last: AtomicU64,
}

impl AssetIdGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> AssetId {
        let floor = get_epoch_time_in_ms() << 20;
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(floor.max(prev + 1))
            })
            .unwrap_or(0);
        AssetId::from(floor.max(prev + 1))
    }
}

impl Default for AssetIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata record for one asset version.
///
/// Written twice against the same keys: once when the upload starts (sizes
/// zero) and once when the pipeline completes (sizes populated). Both
/// writes are the same upsert, so finalization is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetMetadata {
    pub bucket: String,
    pub file_name: String,
    pub token: String,
    pub created_at: u64,
    pub raw_size: u64,
    pub zipped_size: u64,
}

impl AssetMetadata {
    pub fn new(bucket: &str, file_name: &str, token: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            file_name: file_name.to_string(),
            token: token.to_string(),
            created_at: get_epoch_time_in_ms(),
            raw_size: 0,
            zipped_size: 0,
        }
    }

    pub fn finalized(mut self, raw_size: u64, zipped_size: u64) -> Self {
        self.raw_size = raw_size;
        self.zipped_size = zipped_size;
        self
    }
}

/// Component delimiter for composite metadata keys. Guaranteed absent from
/// bucket, token, and asset names (see [`valid_identifier`]).
pub const KEY_DELIMITER: &str = "!!";

/// Sorts after every printable identifier character; closes prefix scans.
pub const SCAN_UPPER_SENTINEL: u8 = b'~';

/// Sorts before the delimiter and any identifier character; opens scans.
pub const SCAN_LOWER_SENTINEL: u8 = b'!';

/// Bucket, token, and asset names become key components, so they must not
/// contain the delimiter, and every byte must sort below the upper scan
/// sentinel or the key would fall outside the range its prefix scan
/// covers. Non-ASCII names are rejected for the same reason: their UTF-8
/// bytes sort at or above the sentinel.
pub fn valid_identifier(name: &str) -> bool {
    !name.is_empty() &&
        !name
            .bytes()
            .any(|b| b == SCAN_LOWER_SENTINEL || b >= SCAN_UPPER_SENTINEL)
}

pub fn bucket_key(bucket: &str) -> String {
    format!("bucket{}{}", KEY_DELIMITER, bucket)
}

pub fn token_key(token: &str) -> String {
    format!("token{}{}", KEY_DELIMITER, token)
}

pub fn bucket_token_key(bucket: &str, token: &str) -> String {
    format!(
        "bucket-token{}{}{}{}",
        KEY_DELIMITER, bucket, KEY_DELIMITER, token
    )
}

pub fn bucket_token_prefix(bucket: &str) -> String {
    format!("bucket-token{}{}{}", KEY_DELIMITER, bucket, KEY_DELIMITER)
}

pub fn asset_key(id: &AssetId) -> String {
    format!("asset{}{}", KEY_DELIMITER, id)
}

pub fn asset_prefix() -> String {
    format!("asset{}", KEY_DELIMITER)
}

pub fn bucket_prefix() -> String {
    format!("bucket{}", KEY_DELIMITER)
}

pub fn bucket_asset_key(bucket: &str, name: &str) -> String {
    format!(
        "bucket-asset{}{}{}{}",
        KEY_DELIMITER, bucket, KEY_DELIMITER, name
    )
}

pub fn bucket_asset_prefix(bucket: &str) -> String {
    format!("bucket-asset{}{}{}", KEY_DELIMITER, bucket, KEY_DELIMITER)
}

pub fn bucket_asset_version_key(bucket: &str, name: &str, id: &AssetId) -> String {
    format!(
        "bucket-asset-version{}{}{}{}{}{}",
        KEY_DELIMITER, bucket, KEY_DELIMITER, name, KEY_DELIMITER, id
    )
}

pub fn bucket_asset_version_prefix(bucket: &str, name: &str) -> String {
    format!(
        "bucket-asset-version{}{}{}{}{}",
        KEY_DELIMITER, bucket, KEY_DELIMITER, name, KEY_DELIMITER
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_hex() {
        let gen = AssetIdGenerator::new();
        let mut prev = gen.next();
        assert_eq!(prev.get().len(), 16);
        assert!(prev.get().chars().all(|c| c.is_ascii_hexdigit()));
        for _ in 0..10_000 {
            let next = gen.next();
            assert!(next > prev, "{} !> {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn test_ids_sort_with_time() {
        let gen = AssetIdGenerator::new();
        let early = gen.next();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let late = gen.next();
        assert!(late.get() > early.get());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(valid_identifier("a.txt"));
        assert!(valid_identifier("bucket-1_2"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("a!!b"));
        assert!(!valid_identifier("a!b"));
        assert!(!valid_identifier("a~b"));
        assert!(!valid_identifier("\u{e9}clair"));
        assert!(!valid_identifier("a\u{7f}b"));
    }

    #[test]
    fn test_accepted_identifiers_stay_inside_scan_bound() {
        for name in ["a.txt", "bucket-1_2", "zzz", "}last"] {
            assert!(valid_identifier(name));
            let key = bucket_token_key("foo", name);
            let mut bound = bucket_token_prefix("foo").into_bytes();
            bound.push(SCAN_UPPER_SENTINEL);
            assert!(
                key.as_bytes() < bound.as_slice(),
                "{} sorts past the scan bound",
                name
            );
        }
    }

    #[test]
    fn test_version_keys_scan_in_creation_order() {
        let gen = AssetIdGenerator::new();
        let first = bucket_asset_version_key("b", "n", &gen.next());
        let second = bucket_asset_version_key("b", "n", &gen.next());
        assert!(first < second);
        assert!(first.starts_with(&bucket_asset_version_prefix("b", "n")));
    }
}
