//! File access for history trees
//!
//! `HtIo` owns the file handle and the node cache. All positioned reads and
//! writes go through one mutex-guarded handle; cached nodes are served
//! without touching it.
//!
//! Closing the handle (on dispose) makes every later access fail with
//! [`Error::Disposed`], including reads that were waiting on the lock.

use crate::cache::NodeCache;
use crate::config::{HtConfig, TREE_HEADER_SIZE};
use crate::format::TreeHeader;
use crate::node::{HtNode, SeqNum};
use parking_lot::Mutex;
use statehist_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// File handle plus node cache for one tree.
#[derive(Debug)]
pub struct HtIo {
    config: HtConfig,
    file: Mutex<Option<File>>,
    cache: NodeCache,
    disposed: AtomicBool,
}

impl HtIo {
    /// Create (or truncate) the backing file for a new tree.
    pub fn create(config: &HtConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;
        Ok(Self::from_file(config.clone(), file))
    }

    /// Open an existing tree file read-only and decode its header.
    ///
    /// The returned config reflects the header, not caller defaults.
    pub fn open(path: &Path) -> Result<(Self, TreeHeader)> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut buf = vec![0u8; TREE_HEADER_SIZE];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Corruption(format!("{} is shorter than a tree header", path.display()))
            }
            _ => Error::Io(e),
        })?;
        let header = TreeHeader::decode(&buf)?;
        let config = HtConfig {
            path: path.to_path_buf(),
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
            provider_version: header.provider_version,
            tree_start: header.start_time,
        };
        config
            .validate()
            .map_err(|e| Error::Corruption(format!("header describes unusable tree: {}", e)))?;
        Ok((Self::from_file(config, file), header))
    }

    fn from_file(config: HtConfig, file: File) -> Self {
        Self {
            config,
            file: Mutex::new(Some(file)),
            cache: NodeCache::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Tree configuration.
    pub fn config(&self) -> &HtConfig {
        &self.config
    }

    /// Node cache.
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    fn node_offset(&self, seq: SeqNum) -> u64 {
        TREE_HEADER_SIZE as u64 + seq as u64 * self.config.block_size as u64
    }

    /// Offset right after the last node block.
    pub fn nodes_end(&self, node_count: u32) -> u64 {
        self.node_offset(node_count)
    }

    fn check_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(Error::Disposed)?;
        Ok(f(file)?)
    }

    /// Fetch a finalized node, from cache or disk.
    pub fn read_node(&self, seq: SeqNum) -> Result<Arc<HtNode>> {
        self.check_open()?;
        if let Some(node) = self.cache.get(seq) {
            return Ok(node);
        }
        let offset = self.node_offset(seq);
        let mut buf = vec![0u8; self.config.block_size];
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)
        })?;
        let node = Arc::new(HtNode::deserialize(&buf, &self.config)?);
        if node.seq() != seq {
            return Err(Error::Corruption(format!(
                "block {} holds node {}",
                seq,
                node.seq()
            )));
        }
        trace!(seq, "read node from disk");
        self.cache.put(Arc::clone(&node));
        Ok(node)
    }

    /// Write a closed node to its block and publish a copy in the cache.
    pub fn write_node(&self, node: &HtNode) -> Result<()> {
        self.check_open()?;
        let bytes = node.serialize()?;
        let offset = self.node_offset(node.seq());
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&bytes)
        })?;
        trace!(seq = node.seq(), "wrote node");
        self.cache.put(Arc::new(node.clone()));
        Ok(())
    }

    /// Write the header block and flush the file.
    pub fn write_header(&self, header: &TreeHeader) -> Result<()> {
        self.check_open()?;
        let bytes = header.encode()?;
        self.with_file(|file| {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&bytes)?;
            file.sync_data()
        })
    }

    /// Write raw bytes at `offset`.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)
        })
    }

    /// Read `len` raw bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut buf = vec![0u8; len];
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)
        })?;
        Ok(buf)
    }

    /// Current file length.
    pub fn file_size(&self) -> Result<u64> {
        self.check_open()?;
        self.with_file(|file| Ok(file.metadata()?.len()))
    }

    /// Release the file handle and the cache. Idempotent.
    pub fn close(&self) {
        self.disposed.store(true, Ordering::Release);
        self.file.lock().take();
        self.cache.clear();
    }

    /// Check if [`HtIo::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
