use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::context::CallContext;
use crate::core::error::{BlockCacheError, ERR_CODE_NOT_FOUND};
use crate::rpc::transport::{CallError, Transport};
use crate::rpc::wire::{decode_body, encode_body, LogTags, WireError};
use crate::Result;

/// 把远端错误还原成本地错误类型
pub trait ErrorUnwrapper: Send + Sync {
    fn unwrap_error(&self, err: WireError) -> BlockCacheError;
}

/// 块缓存服务的错误还原策略；只识别 NotFound，其余原样透传
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockCacheErrorUnwrapper;

impl ErrorUnwrapper for BlockCacheErrorUnwrapper {
    fn unwrap_error(&self, err: WireError) -> BlockCacheError {
        match err.code {
            ERR_CODE_NOT_FOUND => BlockCacheError::NotFound { block_id: err.desc },
            code => BlockCacheError::remote(code, err.name, err.desc),
        }
    }
}

/// 把调用上下文映射成随请求发送的日志标签
pub type LogTagsFn = Arc<dyn Fn(&CallContext) -> LogTags + Send + Sync>;

pub fn log_tags_from_context(ctx: &CallContext) -> LogTags {
    ctx.tags().clone()
}

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    unwrapper: Arc<dyn ErrorUnwrapper>,
    log_tags: LogTagsFn,
    default_timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        unwrapper: impl ErrorUnwrapper + 'static,
        log_tags: impl Fn(&CallContext) -> LogTags + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            unwrapper: Arc::new(unwrapper),
            log_tags: Arc::new(log_tags),
            default_timeout: None,
        }
    }

    /// 调用方上下文没有截止时间时使用的超时
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// 发送一次请求并等待回复，调用方取消或超时会立即返回
    pub async fn call<A, R>(&self, ctx: &CallContext, method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let body = encode_body(arg)?;
        let tags = (self.log_tags)(ctx);

        let bounded;
        let ctx = match (ctx.deadline(), self.default_timeout) {
            (None, Some(timeout)) => {
                bounded = ctx.clone().with_timeout(timeout);
                &bounded
            }
            _ => ctx,
        };

        let reply = tokio::select! {
            biased;
            reply = self.transport.call(method, tags, body) => reply,
            err = ctx.done() => return Err(err),
        };

        match reply {
            Ok(body) => decode_body(&body),
            Err(CallError::Remote(err)) => Err(self.unwrapper.unwrap_error(err)),
            Err(CallError::Local(err)) => Err(err),
        }
    }
}
