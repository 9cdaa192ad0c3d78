//! Table snapshot persistence
//!
//! The table is written once at clean shutdown and read once at startup.
//! A successfully restored file is deleted immediately, so a crash later in
//! the run cannot replay the same statistics twice.
//!
//! File format (all integers little-endian):
//! ```text
//! +--------+---------+-------+--------------------+--------+
//! | Magic  | Version | Count | Count x Record     | CRC32C |
//! | 4B     | 4B      | 4B    | 96B each           | 4B     |
//! +--------+---------+-------+--------------------+--------+
//!
//! Record:
//! +---------+-------+----------+-----+-------+-----------+
//! | user_id | db_id | query_id | tag | calls | usage f64 |
//! | 4B      | 4B    | 8B       | 64B | 8B    | 8B        |
//! +---------+-------+----------+-----+-------+-----------+
//! ```
//!
//! The checksum covers everything before it. Any mismatch in magic,
//! version, length or checksum rejects the whole file.

use crate::error::{StoreError, StoreResult};
use crate::table::{Counters, StatsTable, UsageRecord};
use colorstat_common::{DbId, Key, QueryId, TAG_LEN, UserId};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Snapshot file magic number
pub const SNAPSHOT_MAGIC: u32 = 0x4353_5441; // "CSTA"

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Header size (magic + version + count)
const HEADER_SIZE: usize = 12;

/// Trailer size (CRC32C)
const TRAILER_SIZE: usize = 4;

/// Size of one encoded record
pub const RECORD_IMAGE_SIZE: usize = 4 + 4 + 8 + TAG_LEN + 8 + 8;

/// Encode every entry of the table, sticky ones included
pub fn save(table: &StatsTable) -> StoreResult<Vec<u8>> {
    let records = table.iterate();
    let count = u32::try_from(records.len())
        .map_err(|_| StoreError::snapshot(format!("too many entries: {}", records.len())))?;

    let mut buf =
        Vec::with_capacity(HEADER_SIZE + records.len() * RECORD_IMAGE_SIZE + TRAILER_SIZE);
    buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    for record in &records {
        encode_record(&mut buf, record);
    }

    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Build a table of the given capacity from an encoded snapshot
pub fn load(bytes: &[u8], capacity: usize) -> StoreResult<StatsTable> {
    let table = StatsTable::new(capacity);
    restore_into(bytes, &table)?;
    Ok(table)
}

/// Decode a snapshot and insert its active entries into `table`
///
/// Sticky entries are skipped. The whole snapshot is validated before the
/// first insert, so on error the table is left untouched.
pub(crate) fn restore_into(bytes: &[u8], table: &StatsTable) -> StoreResult<usize> {
    let decoded = decode(bytes)?;

    let mut restored = 0;
    for (key, counters) in decoded {
        if counters.is_sticky() {
            continue;
        }
        if table.insert_restored(key, counters) {
            restored += 1;
        }
    }

    table
        .stats()
        .restored
        .fetch_add(restored as u64, Ordering::Relaxed);
    Ok(restored)
}

/// Validate the envelope and decode every record
fn decode(bytes: &[u8]) -> StoreResult<Vec<(Key, Counters)>> {
    if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(StoreError::snapshot("snapshot too small"));
    }

    let magic = read_u32(bytes, 0);
    if magic != SNAPSHOT_MAGIC {
        return Err(StoreError::snapshot(format!("invalid magic {magic:#010x}")));
    }

    let version = read_u32(bytes, 4);
    if version != SNAPSHOT_VERSION {
        return Err(StoreError::snapshot(format!(
            "unsupported version: {version}"
        )));
    }

    let count = read_u32(bytes, 8) as usize;
    let expected = count
        .checked_mul(RECORD_IMAGE_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE + TRAILER_SIZE))
        .ok_or_else(|| StoreError::snapshot(format!("entry count {count} overflows")))?;
    if bytes.len() != expected {
        return Err(StoreError::snapshot(format!(
            "length mismatch: {} entries need {} bytes, file has {}",
            count,
            expected,
            bytes.len()
        )));
    }

    let body_end = bytes.len() - TRAILER_SIZE;
    let stored_crc = read_u32(bytes, body_end);
    let computed_crc = crc32c::crc32c(&bytes[..body_end]);
    if stored_crc != computed_crc {
        return Err(StoreError::snapshot("checksum mismatch"));
    }

    bytes[HEADER_SIZE..body_end]
        .chunks_exact(RECORD_IMAGE_SIZE)
        .map(decode_record)
        .collect()
}

fn encode_record(buf: &mut Vec<u8>, record: &UsageRecord) {
    let key = record.key();
    let counters = record.counters();
    buf.extend_from_slice(&key.user_id().get().to_le_bytes());
    buf.extend_from_slice(&key.db_id().get().to_le_bytes());
    buf.extend_from_slice(&key.query_id().get().to_le_bytes());
    buf.extend_from_slice(key.tag_bytes());
    buf.extend_from_slice(&counters.calls.to_le_bytes());
    buf.extend_from_slice(&counters.usage.to_bits().to_le_bytes());
}

fn decode_record(image: &[u8]) -> StoreResult<(Key, Counters)> {
    let user_id = UserId::new(read_u32(image, 0));
    let db_id = DbId::new(read_u32(image, 4));
    let query_id = QueryId::new(read_u64(image, 8));

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&image[16..16 + TAG_LEN]);
    let key = Key::from_raw(user_id, db_id, query_id, tag)?;

    let calls = read_u64(image, 16 + TAG_LEN);
    let usage = f64::from_bits(read_u64(image, 24 + TAG_LEN));
    if !usage.is_finite() {
        return Err(StoreError::snapshot(format!("non-finite usage for {key}")));
    }

    Ok((key, Counters { calls, usage }))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Snapshot file on disk
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the table, replacing any previous snapshot atomically
    ///
    /// Returns the number of entries written.
    pub fn write(&self, table: &StatsTable) -> StoreResult<usize> {
        let bytes = save(table)?;
        let entries = (bytes.len() - HEADER_SIZE - TRAILER_SIZE) / RECORD_IMAGE_SIZE;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e));
        }

        info!("Saved {} entries to {:?}", entries, self.path);
        Ok(entries)
    }

    /// Restore the snapshot into `table` and delete the file
    ///
    /// Never fails: a missing file restores nothing, an unreadable or
    /// corrupt one is logged, deleted and treated as absent.
    pub fn restore(&self, table: &StatsTable) -> usize {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to read snapshot {:?}: {}", self.path, e);
                self.discard();
                return 0;
            }
        };

        match restore_into(&bytes, table) {
            Ok(restored) => {
                info!("Restored {} entries from {:?}", restored, self.path);
                self.discard();
                restored
            }
            Err(e) => {
                warn!("Discarding unreadable snapshot {:?}: {}", self.path, e);
                self.discard();
                0
            }
        }
    }

    fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove snapshot {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(user: u32, query: u64, tag: Option<&str>) -> Key {
        Key::new(UserId::new(user), DbId::new(1), QueryId::new(query), tag)
    }

    fn sample_table() -> StatsTable {
        let table = StatsTable::new(100);
        for (query, calls) in [(1u64, 3u64), (2, 1), (3, 7)] {
            let entry = table.insert_if_absent(key(10, query, Some("(1,2,3)")));
            for _ in 0..calls {
                entry.increment();
            }
        }
        // Reserved, never completed
        table.insert_if_absent(key(11, 4, None));
        table
    }

    fn calls_of(table: &StatsTable, k: &Key) -> Option<u64> {
        table.find(k).map(|r| r.counters().calls)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let table = sample_table();
        let bytes = save(&table).unwrap();
        assert_eq!(
            bytes.len(),
            HEADER_SIZE + 4 * RECORD_IMAGE_SIZE + TRAILER_SIZE
        );

        let loaded = load(&bytes, 100).unwrap();
        assert_eq!(loaded.count(), 3);
        for (query, calls) in [(1u64, 3u64), (2, 1), (3, 7)] {
            let k = key(10, query, Some("(1,2,3)"));
            assert_eq!(calls_of(&loaded, &k), Some(calls));
            assert_eq!(
                loaded.find(&k).unwrap().counters().usage,
                table.find(&k).unwrap().counters().usage
            );
        }
        assert!(loaded.find(&key(11, 4, None)).is_none());
        assert_eq!(loaded.stats().snapshot(0, 0.0).restored, 3);
    }

    #[test]
    fn test_empty_table_roundtrip() {
        let bytes = save(&StatsTable::new(10)).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + TRAILER_SIZE);
        assert!(load(&bytes, 10).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = save(&sample_table()).unwrap();
        bytes[0] ^= 0xFF;
        let err = load(&bytes, 100).err().unwrap();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn test_rejects_other_version() {
        let mut bytes = save(&sample_table()).unwrap();
        bytes[4..8].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());
        let err = load(&bytes, 100).err().unwrap();
        assert!(err.to_string().contains("unsupported version"));
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = save(&sample_table()).unwrap();
        assert!(load(&bytes[..bytes.len() - 10], 100).is_err());
        assert!(load(&bytes[..8], 100).is_err());
    }

    #[test]
    fn test_rejects_checksum_mismatch() {
        let mut bytes = save(&sample_table()).unwrap();
        // Flip a bit inside the first record's calls field
        bytes[HEADER_SIZE + 16 + TAG_LEN] ^= 0x01;
        let err = load(&bytes, 100).err().unwrap();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_load_into_smaller_table_evicts() {
        let table = StatsTable::new(100);
        for query in 0..50 {
            table.insert_if_absent(key(10, query, None)).increment();
        }
        let bytes = save(&table).unwrap();

        let loaded = load(&bytes, 20).unwrap();
        assert!(loaded.count() <= 20);
        assert!(loaded.stats().snapshot(0, 0.0).eviction_passes > 0);
    }

    #[test]
    fn test_file_restore_deletes_file() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("stats").join("colorstat.stat"));

        assert_eq!(file.write(&sample_table()).unwrap(), 4);
        assert!(file.path().exists());
        assert!(!file.temp_path().exists());

        let table = StatsTable::new(100);
        assert_eq!(file.restore(&table), 3);
        assert_eq!(table.count(), 3);
        assert!(!file.path().exists());

        // Nothing left to replay
        let again = StatsTable::new(100);
        assert_eq!(file.restore(&again), 0);
    }

    #[test]
    fn test_file_restore_corrupt_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colorstat.stat");
        fs::write(&path, b"definitely not a snapshot").unwrap();

        let table = StatsTable::new(100);
        assert_eq!(SnapshotFile::new(&path).restore(&table), 0);
        assert!(table.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_file_restore_missing() {
        let dir = tempdir().unwrap();
        let table = StatsTable::new(100);
        assert_eq!(
            SnapshotFile::new(dir.path().join("absent.stat")).restore(&table),
            0
        );
    }
}
