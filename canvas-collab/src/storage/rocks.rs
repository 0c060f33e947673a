//! RocksDB-backed artboard store.
//!
//! Column families:
//! - `artboards` : latest full artboard snapshot (LZ4-compressed bincode)
//! - `operations`: applied-operation journal, keyed by artboard_id:version
//! - `versions`  : named snapshots, keyed by artboard_id:version:snapshot_id
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use std::path::{Path, PathBuf};

use canvas_core::{AppliedOp, ArtboardId, Artboard};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, ReadOptions, SingleThreaded, WriteBatch,
    WriteOptions,
};
use uuid::Uuid;

use super::{decode, encode, ArtboardStore, StoreError};
use crate::snapshot::VersionSnapshot;

const CF_ARTBOARDS: &str = "artboards";
const CF_OPERATIONS: &str = "operations";
const CF_VERSIONS: &str = "versions";

const COLUMN_FAMILIES: &[&str] = &[CF_ARTBOARDS, CF_OPERATIONS, CF_VERSIONS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("canvas_data"),
            block_cache_size: 256 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

pub struct RocksStore {
    /// Single-threaded mode: column families are fixed at open.
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened artboard store at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        // Values are already LZ4-compressed.
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_ARTBOARDS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_OPERATIONS | CF_VERSIONS => {
                // Prefix-scanned by artboard id.
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn compress<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(lz4_flex::compress_prepend_size(&encode(value)?))
    }

    fn decompress<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        decode(&raw)
    }

    /// `artboard_id (16 bytes) ‖ version (8 bytes BE)`.
    fn versioned_key(artboard_id: ArtboardId, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(artboard_id.as_bytes());
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    fn version_of(key: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[16..24]);
        u64::from_be_bytes(buf)
    }

    /// Visit every `(key, value)` under an artboard's prefix, starting at
    /// `from_version`.
    fn scan(
        &self,
        cf_name: &str,
        artboard_id: ArtboardId,
        from_version: u64,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let start = Self::versioned_key(artboard_id, from_version);
        for item in self.db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward)) {
            let (key, value) = item?;
            if key.len() < 24 || &key[..16] != artboard_id.as_bytes() {
                break;
            }
            visit(&key, &value)?;
        }
        Ok(())
    }
}

impl ArtboardStore for RocksStore {
    fn load_artboard(&self, id: ArtboardId) -> Result<Option<Artboard>, StoreError> {
        let cf = self.cf(CF_ARTBOARDS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decompress(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persist(&self, artboard: &Artboard) -> Result<(), StoreError> {
        let cf_boards = self.cf(CF_ARTBOARDS)?;
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let id = artboard.id();

        // Snapshot and journal compaction land atomically.
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_boards, id.as_bytes(), Self::compress(artboard)?);
        let mut compacted = 0u64;
        self.scan(CF_OPERATIONS, id, 0, |key, _| {
            if Self::version_of(key) <= artboard.version() {
                batch.delete_cf(cf_ops, key);
                compacted += 1;
            }
            Ok(())
        })?;
        self.db.write_opt(batch, &self.write_opts())?;

        log::debug!(
            "Persisted artboard {id} at v{} ({compacted} journal entries compacted)",
            artboard.version()
        );
        Ok(())
    }

    fn append_operation(&self, artboard_id: ArtboardId, applied: &AppliedOp) -> Result<(), StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let key = Self::versioned_key(artboard_id, applied.version);
        self.db
            .put_cf_opt(cf, key, Self::compress(applied)?, &self.write_opts())?;
        Ok(())
    }

    fn load_operations_since(
        &self,
        artboard_id: ArtboardId,
        version: u64,
    ) -> Result<Vec<AppliedOp>, StoreError> {
        let mut ops = Vec::new();
        self.scan(CF_OPERATIONS, artboard_id, version.saturating_add(1), |_, value| {
            ops.push(Self::decompress(value)?);
            Ok(())
        })?;
        Ok(ops)
    }

    fn save_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let mut key = Self::versioned_key(snapshot.artboard_id, snapshot.version);
        key.extend_from_slice(snapshot.id.as_bytes());
        self.db
            .put_cf_opt(cf, key, Self::compress(snapshot)?, &self.write_opts())?;
        Ok(())
    }

    fn load_versions(&self, artboard_id: ArtboardId) -> Result<Vec<VersionSnapshot>, StoreError> {
        let mut versions = Vec::new();
        self.scan(CF_VERSIONS, artboard_id, 0, |_, value| {
            versions.push(Self::decompress(value)?);
            Ok(())
        })?;
        Ok(versions)
    }

    fn list_artboards(&self) -> Result<Vec<ArtboardId>, StoreError> {
        let mut ids = Vec::new();

        let cf = self.cf(CF_ARTBOARDS)?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(uuid_key(&key)?);
        }

        // Artboards that were journaled but never persisted. The journal has
        // a prefix extractor, so crossing prefixes needs a total-order scan.
        let cf = self.cf(CF_OPERATIONS)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_total_order_seek(true);
        for item in self.db.iterator_cf_opt(cf, read_opts, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(uuid_key(&key)?);
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn uuid_key(key: &[u8]) -> Result<Uuid, StoreError> {
    let bytes: [u8; 16] = key
        .get(..16)
        .and_then(|k| k.try_into().ok())
        .ok_or_else(|| StoreError::Deserialization("Invalid artboard key".into()))?;
    Ok(Uuid::from_bytes(bytes))
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
