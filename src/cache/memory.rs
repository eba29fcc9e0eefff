use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::context::CallContext;
use crate::cache::contract::BlockCache;
use crate::cache::types::{
    BlockCacheStatus, BlockId, CacheStartState, CachedBlock, DeleteOutcome, DiskBlockCacheStatus,
    PrefetchStatus, ServerHalf, TlfId,
};
use crate::core::error::BlockCacheError;
use crate::Result;

/// `status` 中使用的缓存名称
pub const MEMORY_CACHE_NAME: &str = "memory";

struct Entry {
    buf: Vec<u8>,
    server_half: ServerHalf,
    prefetch_status: PrefetchStatus,
}

struct Inner {
    entries: LruCache<(TlfId, BlockId), Entry>,
    bytes: u64,
    stats: DiskBlockCacheStatus,
}

impl Inner {
    fn remove(&mut self, key: &(TlfId, BlockId)) -> Option<u64> {
        let entry = self.entries.pop(key)?;
        let size = entry.buf.len() as u64;
        self.bytes -= size;
        Some(size)
    }
}

/// 进程内的块缓存，按字节上限做 LRU 淘汰
pub struct MemoryBlockCache {
    inner: Mutex<Inner>,
    byte_limit: u64,
    shut_down: AtomicBool,
}

impl MemoryBlockCache {
    pub fn new(byte_limit: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                stats: DiskBlockCacheStatus {
                    start_state: CacheStartState::Started,
                    curr_byte_limit: byte_limit,
                    ..Default::default()
                },
            }),
            byte_limit,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self, ctx: &CallContext) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BlockCacheError::Shutdown);
        }
        match ctx.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlockCache for MemoryBlockCache {
    async fn get(&self, ctx: &CallContext, tlf_id: &TlfId, block_id: &BlockId) -> Result<CachedBlock> {
        self.check_open(ctx)?;
        let mut inner = self.inner.lock();
        let found = inner.entries.get(&(*tlf_id, *block_id)).map(|entry| CachedBlock {
            buf: entry.buf.clone(),
            server_half: entry.server_half,
            prefetch_status: entry.prefetch_status,
        });
        match found {
            Some(block) => {
                inner.stats.hits += 1;
                Ok(block)
            }
            None => {
                inner.stats.misses += 1;
                Err(BlockCacheError::not_found(block_id))
            }
        }
    }

    async fn put(
        &self,
        ctx: &CallContext,
        tlf_id: &TlfId,
        block_id: &BlockId,
        buf: &[u8],
        server_half: &ServerHalf,
    ) -> Result<()> {
        self.check_open(ctx)?;
        let size = buf.len() as u64;
        if size > self.byte_limit {
            return Err(BlockCacheError::remote(
                crate::core::error::ERR_CODE_INVALID_ARG,
                "BlockTooLarge",
                format!("block of {} bytes exceeds cache limit {}", size, self.byte_limit),
            ));
        }

        let key = (*tlf_id, *block_id);
        let mut inner = self.inner.lock();
        // 覆盖写保留原有预取状态
        let prefetch_status = inner
            .entries
            .peek(&key)
            .map(|entry| entry.prefetch_status)
            .unwrap_or_default();
        inner.remove(&key);

        while inner.bytes + size > self.byte_limit {
            match inner.entries.pop_lru() {
                Some((evicted, entry)) => {
                    let evicted_size = entry.buf.len() as u64;
                    inner.bytes -= evicted_size;
                    inner.stats.num_evicted += 1;
                    inner.stats.size_evicted += evicted_size;
                    debug!("Evicted block {} ({} bytes)", evicted.1, evicted_size);
                }
                None => break,
            }
        }

        inner.entries.put(
            key,
            Entry {
                buf: buf.to_vec(),
                server_half: *server_half,
                prefetch_status,
            },
        );
        inner.bytes += size;
        inner.stats.puts += 1;
        Ok(())
    }

    async fn delete(&self, ctx: &CallContext, tlf_id: &TlfId, block_ids: &[BlockId]) -> Result<DeleteOutcome> {
        self.check_open(ctx)?;
        let mut inner = self.inner.lock();
        let mut outcome = DeleteOutcome::default();
        for block_id in block_ids {
            if let Some(size) = inner.remove(&(*tlf_id, *block_id)) {
                outcome.num_removed += 1;
                outcome.size_removed += size;
            }
        }
        inner.stats.num_deleted += outcome.num_removed as u64;
        inner.stats.size_deleted += outcome.size_removed;
        Ok(outcome)
    }

    async fn update_metadata(
        &self,
        ctx: &CallContext,
        tlf_id: &TlfId,
        block_id: &BlockId,
        prefetch_status: PrefetchStatus,
    ) -> Result<()> {
        self.check_open(ctx)?;
        let mut inner = self.inner.lock();
        match inner.entries.peek_mut(&(*tlf_id, *block_id)) {
            Some(entry) => entry.prefetch_status = prefetch_status,
            None => return Err(BlockCacheError::not_found(block_id)),
        }
        inner.stats.metadata_updates += 1;
        Ok(())
    }

    async fn status(&self, _ctx: &CallContext, _tlf_id: &TlfId) -> BlockCacheStatus {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.num_blocks = inner.entries.len() as u64;
        stats.block_bytes = inner.bytes;
        BlockCacheStatus::from([(MEMORY_CACHE_NAME.to_string(), stats)])
    }

    async fn shutdown(&self, _ctx: &CallContext) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
        inner.stats.start_state = CacheStartState::Shutdown;
    }
}
