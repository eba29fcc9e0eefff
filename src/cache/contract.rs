use async_trait::async_trait;

use crate::cache::context::CallContext;
use crate::cache::types::{BlockCacheStatus, BlockId, CachedBlock, DeleteOutcome, PrefetchStatus, ServerHalf, TlfId};
use crate::Result;

/// 块缓存层的统一接口；本地存储和远端代理都实现它
#[async_trait]
pub trait BlockCache: Send + Sync {
    /// 读取块内容、服务端密钥一半和预取状态；块不存在时返回 `NotFound`
    async fn get(&self, ctx: &CallContext, tlf_id: &TlfId, block_id: &BlockId) -> Result<CachedBlock>;

    /// 写入或覆盖一个块，调用方看来是原子的
    async fn put(
        &self,
        ctx: &CallContext,
        tlf_id: &TlfId,
        block_id: &BlockId,
        buf: &[u8],
        server_half: &ServerHalf,
    ) -> Result<()>;

    async fn delete(&self, ctx: &CallContext, tlf_id: &TlfId, block_ids: &[BlockId]) -> Result<DeleteOutcome>;

    /// 只更新预取状态，不动块内容
    async fn update_metadata(
        &self,
        ctx: &CallContext,
        tlf_id: &TlfId,
        block_id: &BlockId,
        prefetch_status: PrefetchStatus,
    ) -> Result<()>;

    /// 诊断信息，不会失败
    async fn status(&self, ctx: &CallContext, tlf_id: &TlfId) -> BlockCacheStatus;

    /// 释放资源；每个实例最多调用一次
    async fn shutdown(&self, ctx: &CallContext);
}
