//! Durable block storage
//!
//! The consensus set persists, per accepted block, one [`ChainWrite`]: the
//! blocks it touched, the new shape of the best path and any newly known
//! denial-of-service blocks. A backend must apply the whole write or none
//! of it, so a crash mid-commit never leaves the persisted path and the
//! persisted diffs disagreeing.
//!
//! # Column Families
//!
//! - `blocks` - Processed blocks with their diffs (key: block_id)
//! - `path` - Best path (key: height, big-endian)
//! - `dos` - Known denial-of-service blocks (key: block_id)

use crate::{
    error::{Error, Result},
    types::{BlockHeight, BlockId, ProcessedBlock},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_PATH: &str = "path";
const CF_DOS: &str = "dos";

/// Everything persisted for one accepted block, applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainWrite {
    /// Blocks inserted or updated (e.g. diffs generated)
    pub blocks: Vec<ProcessedBlock>,
    /// Blocks dropped from the tree
    pub removed_blocks: Vec<BlockId>,
    /// New shape of the best path, if it changed
    pub path: Option<PathUpdate>,
    /// Newly recorded denial-of-service blocks
    pub dos_blocks: Vec<BlockId>,
}

/// Rewrite of the best path from some height on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathUpdate {
    /// First height rewritten
    pub start: BlockHeight,
    /// Path from `start` on; anything beyond is truncated
    pub tail: Vec<BlockId>,
}

impl ChainWrite {
    /// Whether the write changes nothing
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.removed_blocks.is_empty()
            && self.path.is_none()
            && self.dos_blocks.is_empty()
    }
}

/// Persisted chain, as loaded on startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredChain {
    /// Every block in the tree
    pub blocks: Vec<ProcessedBlock>,
    /// Best path from genesis
    pub path: Vec<BlockId>,
    /// Known denial-of-service blocks
    pub dos_blocks: Vec<BlockId>,
}

impl StoredChain {
    /// Whether nothing has been persisted yet
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

/// Durable storage collaborator with atomic per-block writes
pub trait BlockStore: Send + Sync {
    /// Load the persisted chain
    fn load(&self) -> Result<StoredChain>;

    /// Apply a write atomically
    fn commit(&self, write: &ChainWrite) -> Result<()>;

    /// Flush buffered data to disk
    fn flush(&self) -> Result<()>;
}

/// RocksDB-backed block store
pub struct RocksStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_PATH, Options::default()),
            ColumnFamilyDescriptor::new(CF_DOS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened block store");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Get a stored block by ID
    pub fn get_block(&self, id: &BlockId) -> Result<ProcessedBlock> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let value = self
            .db
            .get_cf(cf, id.0.as_bytes())?
            .ok_or_else(|| Error::BlockNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    fn decode_block_id(bytes: &[u8]) -> Result<BlockId> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Storage(format!("Malformed block id of {} bytes", bytes.len())))?;
        Ok(BlockId(crate::types::Hash(raw)))
    }
}

impl BlockStore for RocksStore {
    fn load(&self) -> Result<StoredChain> {
        let mut chain = StoredChain::default();

        for item in self.db.iterator_cf(self.cf_handle(CF_BLOCKS)?, IteratorMode::Start) {
            let (_, value) = item?;
            chain.blocks.push(bincode::deserialize(&value)?);
        }

        // Big-endian height keys iterate in path order
        for item in self.db.iterator_cf(self.cf_handle(CF_PATH)?, IteratorMode::Start) {
            let (_, value) = item?;
            chain.path.push(Self::decode_block_id(&value)?);
        }

        for item in self.db.iterator_cf(self.cf_handle(CF_DOS)?, IteratorMode::Start) {
            let (key, _) = item?;
            chain.dos_blocks.push(Self::decode_block_id(&key)?);
        }

        tracing::info!(
            blocks = chain.blocks.len(),
            path_len = chain.path.len(),
            dos_blocks = chain.dos_blocks.len(),
            "Loaded stored chain"
        );

        Ok(chain)
    }

    fn commit(&self, write: &ChainWrite) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        for block in &write.blocks {
            batch.put_cf(cf_blocks, block.id.0.as_bytes(), bincode::serialize(block)?);
        }
        for id in &write.removed_blocks {
            batch.delete_cf(cf_blocks, id.0.as_bytes());
        }

        if let Some(path) = &write.path {
            let cf_path = self.cf_handle(CF_PATH)?;
            batch.delete_range_cf(
                cf_path,
                path.start.to_be_bytes(),
                BlockHeight::MAX.to_be_bytes(),
            );
            for (offset, id) in path.tail.iter().enumerate() {
                let height = path.start + offset as BlockHeight;
                batch.put_cf(cf_path, height.to_be_bytes(), id.0.as_bytes());
            }
        }

        let cf_dos = self.cf_handle(CF_DOS)?;
        for id in &write.dos_blocks {
            batch.put_cf(cf_dos, id.0.as_bytes(), b"");
        }

        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;

        tracing::debug!(
            blocks = write.blocks.len(),
            removed = write.removed_blocks.len(),
            path_changed = write.path.is_some(),
            "Chain write committed"
        );

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryChain {
    blocks: HashMap<BlockId, ProcessedBlock>,
    path: Vec<BlockId>,
    dos_blocks: BTreeSet<BlockId>,
    fail_commits: bool,
}

/// In-memory block store for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryChain>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail, simulating a broken disk
    pub fn fail_commits(&self, fail: bool) {
        self.inner.lock().fail_commits = fail;
    }
}

impl BlockStore for MemoryStore {
    fn load(&self) -> Result<StoredChain> {
        let inner = self.inner.lock();
        let mut blocks: Vec<ProcessedBlock> = inner.blocks.values().cloned().collect();
        blocks.sort_by_key(|b| (b.height, b.id));
        Ok(StoredChain {
            blocks,
            path: inner.path.clone(),
            dos_blocks: inner.dos_blocks.iter().copied().collect(),
        })
    }

    fn commit(&self, write: &ChainWrite) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_commits {
            return Err(Error::Storage("memory store is failing commits".to_string()));
        }

        for block in &write.blocks {
            inner.blocks.insert(block.id, block.clone());
        }
        for id in &write.removed_blocks {
            inner.blocks.remove(id);
        }
        if let Some(path) = &write.path {
            let start = (path.start as usize).min(inner.path.len());
            inner.path.truncate(start);
            inner.path.extend(path.tail.iter().copied());
        }
        inner.dos_blocks.extend(write.dos_blocks.iter().copied());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
