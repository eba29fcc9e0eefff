use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::trace;

use crate::cache::context::CallContext;
use crate::cache::contract::BlockCache;
use crate::cache::metrics::{MetricsCollector, RemoteCacheMetrics};
use crate::cache::types::{
    BlockCacheStatus, BlockId, CachedBlock, DeleteOutcome, PrefetchStatus, ServerHalf, TlfId,
};
use crate::core::config::RemoteCacheConfig;
use crate::core::error::BlockCacheError;
use crate::rpc::client::{log_tags_from_context, BlockCacheErrorUnwrapper, RpcClient};
use crate::rpc::socket::SocketFactory;
use crate::rpc::transport::Connection;
use crate::rpc::wire::{GetBlockArg, GetBlockRes, PutBlockArg, METHOD_GET_BLOCK, METHOD_PUT_BLOCK};
use crate::Result;

/// 日志前缀
const LOG_TAG: &str = "DBR";

/// 远端块缓存客户端：把 `BlockCache` 调用转发到独立的缓存服务进程
pub struct DiskBlockCacheRemote {
    conn: Arc<dyn Connection>,
    client: RpcClient,
    metrics: MetricsCollector,
    shut_down: AtomicBool,
}

impl DiskBlockCacheRemote {
    /// 通过工厂获取连接；拿不到 socket 直接失败，不重试
    pub async fn new(factory: &dyn SocketFactory, config: &RemoteCacheConfig) -> Result<Self> {
        let (conn, transport) = factory.get_cache_socket().await.map_err(BlockCacheError::Connect)?;
        let client = RpcClient::new(transport, BlockCacheErrorUnwrapper, log_tags_from_context)
            .with_default_timeout(config.call_timeout);

        Ok(Self {
            conn,
            client,
            metrics: MetricsCollector::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn metrics(&self) -> RemoteCacheMetrics {
        self.metrics.get_metrics()
    }

    async fn get_inner(&self, ctx: &CallContext, tlf_id: &TlfId, block_id: &BlockId) -> Result<CachedBlock> {
        let arg = GetBlockArg {
            tlf_id: tlf_id.to_string(),
            block_id: block_id.to_string(),
        };
        let res: GetBlockRes = self.client.call(ctx, METHOD_GET_BLOCK, &arg).await?;

        // 调用成功但密钥解析失败时整个结果作废，块内容不返回
        let server_half = ServerHalf::parse(&res.server_half).map_err(|e| {
            self.metrics.record_decode_error();
            BlockCacheError::ServerHalfDecode(e)
        })?;

        Ok(CachedBlock {
            buf: res.buf,
            server_half,
            prefetch_status: PrefetchStatus::from(res.prefetch_status),
        })
    }
}

#[async_trait]
impl BlockCache for DiskBlockCacheRemote {
    async fn get(&self, ctx: &CallContext, tlf_id: &TlfId, block_id: &BlockId) -> Result<CachedBlock> {
        trace!("{}: DiskBlockCacheRemote: Get {}", LOG_TAG, block_id);
        let start = Instant::now();

        let result = self.get_inner(ctx, tlf_id, block_id).await;

        self.metrics
            .record_get(start.elapsed(), result.as_ref().ok().map(|block| block.buf.len()));
        trace!(
            "{}: DiskBlockCacheRemote: Get {} done (err={:?})",
            LOG_TAG,
            block_id,
            result.as_ref().err()
        );
        result
    }

    async fn put(
        &self,
        ctx: &CallContext,
        tlf_id: &TlfId,
        block_id: &BlockId,
        buf: &[u8],
        server_half: &ServerHalf,
    ) -> Result<()> {
        let start = Instant::now();
        let arg = PutBlockArg {
            tlf_id: tlf_id.to_string(),
            block_id: block_id.to_string(),
            buf: buf.to_vec(),
            server_half: server_half.to_string(),
        };
        let result = self.client.call::<_, ()>(ctx, METHOD_PUT_BLOCK, &arg).await;
        self.metrics.record_put(start.elapsed(), buf.len(), result.is_ok());
        result
    }

    async fn delete(&self, _ctx: &CallContext, _tlf_id: &TlfId, _block_ids: &[BlockId]) -> Result<DeleteOutcome> {
        self.metrics.record_not_implemented();
        Err(BlockCacheError::not_implemented("Delete"))
    }

    async fn update_metadata(
        &self,
        _ctx: &CallContext,
        _tlf_id: &TlfId,
        _block_id: &BlockId,
        _prefetch_status: PrefetchStatus,
    ) -> Result<()> {
        self.metrics.record_not_implemented();
        Err(BlockCacheError::not_implemented("UpdateMetadata"))
    }

    /// 远端诊断信息不经由此层暴露
    async fn status(&self, _ctx: &CallContext, _tlf_id: &TlfId) -> BlockCacheStatus {
        BlockCacheStatus::new()
    }

    async fn shutdown(&self, _ctx: &CallContext) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!("{}: DiskBlockCacheRemote: Shutdown", LOG_TAG);
        self.conn.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::TlfType;
    use crate::core::error::KeyParseError;
    use crate::rpc::transport::{CallError, Transport};
    use crate::rpc::wire::{decode_body, encode_body, LogTags, WireError};
    use std::io;
    use std::sync::atomic::AtomicUsize;

    /// 脚本化的测试替身：记录调用次数和关闭次数
    #[derive(Default)]
    struct FakeService {
        calls: AtomicUsize,
        closes: AtomicUsize,
        server_half: String,
        prefetch_status: i32,
        put_error: Option<(i32, &'static str)>,
    }

    #[async_trait]
    impl Transport for FakeService {
        async fn call(&self, method: &str, _tags: LogTags, body: Vec<u8>) -> std::result::Result<Vec<u8>, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.closes.load(Ordering::SeqCst) > 0 {
                return Err(CallError::Local(BlockCacheError::ConnectionClosed));
            }
            match method {
                METHOD_GET_BLOCK => {
                    let arg: GetBlockArg = decode_body(&body)?;
                    let res = GetBlockRes {
                        buf: arg.block_id.into_bytes(),
                        server_half: self.server_half.clone(),
                        prefetch_status: self.prefetch_status,
                    };
                    Ok(encode_body(&res)?)
                }
                METHOD_PUT_BLOCK => match self.put_error {
                    Some((code, name)) => Err(CallError::Remote(WireError::new(code, name, "rejected"))),
                    None => Ok(encode_body(&())?),
                },
                other => panic!("unexpected method {}", other),
            }
        }
    }

    impl Connection for FakeService {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory(Arc<FakeService>);

    #[async_trait]
    impl SocketFactory for FakeFactory {
        async fn get_cache_socket(&self) -> io::Result<(Arc<dyn Connection>, Arc<dyn Transport>)> {
            let conn: Arc<dyn Connection> = self.0.clone();
            let transport: Arc<dyn Transport> = self.0.clone();
            Ok((conn, transport))
        }
    }

    struct BrokenFactory;

    #[async_trait]
    impl SocketFactory for BrokenFactory {
        async fn get_cache_socket(&self) -> io::Result<(Arc<dyn Connection>, Arc<dyn Transport>)> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no socket"))
        }
    }

    async fn remote_with(service: FakeService) -> (DiskBlockCacheRemote, Arc<FakeService>) {
        let service = Arc::new(service);
        let remote = DiskBlockCacheRemote::new(&FakeFactory(service.clone()), &RemoteCacheConfig::default())
            .await
            .unwrap();
        (remote, service)
    }

    fn ids() -> (TlfId, BlockId) {
        (TlfId::random(TlfType::Private), BlockId::from_contents(b"block"))
    }

    #[tokio::test]
    async fn test_construction_fails_without_socket() {
        let result = DiskBlockCacheRemote::new(&BrokenFactory, &RemoteCacheConfig::default()).await;
        assert!(matches!(result, Err(BlockCacheError::Connect(_))));
    }

    #[tokio::test]
    async fn test_get_parses_scripted_response() {
        let half = ServerHalf::random();
        let (remote, service) = remote_with(FakeService {
            server_half: half.to_string(),
            prefetch_status: 2,
            ..Default::default()
        })
        .await;
        let (tlf, id) = ids();

        let block = remote.get(&CallContext::background(), &tlf, &id).await.unwrap();
        assert_eq!(block.buf, id.to_string().into_bytes());
        assert_eq!(block.server_half, half);
        assert_eq!(block.prefetch_status, PrefetchStatus::FinishedPrefetch);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.metrics().gets, 1);
    }

    #[tokio::test]
    async fn test_get_with_malformed_server_half() {
        let (remote, _) = remote_with(FakeService {
            server_half: "zz-not-a-key".to_string(),
            ..Default::default()
        })
        .await;
        let (tlf, id) = ids();

        let err = remote.get(&CallContext::background(), &tlf, &id).await.unwrap_err();
        assert!(matches!(err, BlockCacheError::ServerHalfDecode(KeyParseError::InvalidHex(_))));
        assert!(err.is_local_decode());
        let metrics = remote.metrics();
        assert_eq!(metrics.decode_errors, 1);
        assert_eq!(metrics.get_errors, 1);
        assert_eq!(metrics.bytes_read, 0);
    }

    #[tokio::test]
    async fn test_get_passes_unknown_prefetch_status_through() {
        let (remote, _) = remote_with(FakeService {
            server_half: ServerHalf::random().to_string(),
            prefetch_status: 9,
            ..Default::default()
        })
        .await;
        let (tlf, id) = ids();

        let block = remote.get(&CallContext::background(), &tlf, &id).await.unwrap();
        assert_eq!(block.prefetch_status, PrefetchStatus::Unknown(9));
        assert_eq!(i32::from(block.prefetch_status), 9);
        assert_eq!(remote.metrics().decode_errors, 0);
    }

    #[tokio::test]
    async fn test_put_forwards_remote_error() {
        let (remote, service) = remote_with(FakeService::default()).await;
        let (tlf, id) = ids();
        let ctx = CallContext::background();

        remote.put(&ctx, &tlf, &id, b"data", &ServerHalf::random()).await.unwrap();

        let (failing, _) = remote_with(FakeService {
            put_error: Some((42, "DiskFull")),
            ..Default::default()
        })
        .await;
        let err = failing.put(&ctx, &tlf, &id, b"data", &ServerHalf::random()).await.unwrap_err();
        assert!(matches!(err, BlockCacheError::Remote { code: 42, ref name, .. } if name == "DiskFull"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unimplemented_ops_make_no_calls() {
        let (remote, service) = remote_with(FakeService::default()).await;
        let (tlf, id) = ids();
        let ctx = CallContext::background();

        for block_ids in [vec![], vec![id], vec![id, BlockId::from_contents(b"other")]] {
            let err = remote.delete(&ctx, &tlf, &block_ids).await.unwrap_err();
            assert!(err.is_not_implemented());
        }
        for status in [
            PrefetchStatus::NoPrefetch,
            PrefetchStatus::TriggeredPrefetch,
            PrefetchStatus::FinishedPrefetch,
        ] {
            let err = remote.update_metadata(&ctx, &tlf, &id, status).await.unwrap_err();
            assert!(err.is_not_implemented());
            assert_eq!(err.to_string(), "UpdateMetadata: not implemented");
        }

        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert_eq!(remote.metrics().not_implemented, 6);
    }

    #[tokio::test]
    async fn test_status_is_empty() {
        let (remote, service) = remote_with(FakeService::default()).await;
        let (tlf, _) = ids();
        assert!(remote.status(&CallContext::background(), &tlf).await.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_once() {
        let (remote, service) = remote_with(FakeService::default()).await;
        let ctx = CallContext::background();
        remote.shutdown(&ctx).await;
        remote.shutdown(&ctx).await;
        assert_eq!(service.closes.load(Ordering::SeqCst), 1);

        // 关闭后的调用得到普通错误而不是 panic
        let (tlf, id) = ids();
        let err = remote.get(&ctx, &tlf, &id).await.unwrap_err();
        assert!(matches!(err, BlockCacheError::ConnectionClosed));
    }
}
