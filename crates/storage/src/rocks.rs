//! Durable [`KvStore`] backed by RocksDB.
//!
//! Every call is blocking I/O; from async code, go through `spawn_blocking`.

use crate::{KvStore, StoreError};
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, WriteOptions, DB};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// RocksDB-backed store.
///
/// Everything lives in the default column family. [`StateStore`] keeps
/// record kinds apart by key prefix, and point lookups are served through
/// the bloom filter.
///
/// [`StateStore`]: crate::StateStore
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Open `path` with [`RocksDbConfig::default`], creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, RocksDbConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: RocksDbConfig,
    ) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_max_background_jobs(config.max_background_jobs);
        if config.bytes_per_sync > 0 {
            opts.set_bytes_per_sync(config.bytes_per_sync as u64);
        }
        opts.set_keep_log_file_num(config.keep_log_file_num);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_write_buffer_size(config.write_buffer_size);

        opts.set_compression_type(config.compression.to_rocksdb());

        let mut block_opts = BlockBasedOptions::default();
        if let Some(cache_size) = config.block_cache_size {
            let cache = Cache::new_lru_cache(cache_size);
            block_opts.set_block_cache(&cache);
        }
        if config.bloom_filter_bits > 0.0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits, false);
        }
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path).map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn set_sync(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_opt(key, value, &write_opts)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .delete(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Block compression, named as in node configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Snappy,
    Zlib,
    #[default]
    Lz4,
    Lz4hc,
    Zstd,
}

impl CompressionType {
    fn to_rocksdb(self) -> DBCompressionType {
        match self {
            Self::None => DBCompressionType::None,
            Self::Snappy => DBCompressionType::Snappy,
            Self::Zlib => DBCompressionType::Zlib,
            Self::Lz4 => DBCompressionType::Lz4,
            Self::Lz4hc => DBCompressionType::Lz4hc,
            Self::Zstd => DBCompressionType::Zstd,
        }
    }
}

/// Tuning for [`RocksDbStore`]. Missing fields in a config file take the
/// defaults below.
///
/// Consensus records are small and written once per height, so the defaults
/// favour a modest memory footprint over write throughput.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    pub max_background_jobs: i32,
    /// Memtable size in bytes.
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// LRU block cache in bytes; `None` disables it.
    pub block_cache_size: Option<usize>,
    pub compression: CompressionType,
    /// Bloom filter bits per key; 0 disables the filter.
    pub bloom_filter_bits: f64,
    /// Incremental fsync interval in bytes; 0 leaves it to the OS.
    pub bytes_per_sync: usize,
    pub keep_log_file_num: usize,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_background_jobs: 2,
            write_buffer_size: 32 << 20,
            max_write_buffer_number: 2,
            block_cache_size: Some(64 << 20),
            compression: CompressionType::Lz4,
            bloom_filter_bits: 10.0,
            bytes_per_sync: 1 << 20,
            keep_log_file_num: 10,
        }
    }
}
