//! Cache service side of the protocol: serves a `BlockCache` over a
//! connection. Used by the `serve` command and by end-to-end tests.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cache::context::CallContext;
use crate::cache::contract::BlockCache;
use crate::cache::types::{BlockId, ServerHalf, TlfId};
use crate::core::error::{
    BlockCacheError, ERR_CODE_INTERNAL, ERR_CODE_INVALID_ARG, ERR_CODE_METHOD_NOT_FOUND, ERR_CODE_NOT_FOUND,
};
use crate::rpc::wire::{
    decode_body, encode_body, encode_frame, read_frame, write_payload, GetBlockArg, GetBlockRes, LogTags,
    PutBlockArg, RpcFrame, WireError, METHOD_GET_BLOCK, METHOD_PUT_BLOCK,
};

fn to_wire_error(err: BlockCacheError) -> WireError {
    match err {
        BlockCacheError::NotFound { block_id } => WireError::new(ERR_CODE_NOT_FOUND, "NotFound", block_id),
        BlockCacheError::Remote { code, name, desc } => WireError::new(code, name, desc),
        BlockCacheError::Decode(desc) => WireError::new(ERR_CODE_INVALID_ARG, "InvalidArgument", desc),
        other => WireError::new(ERR_CODE_INTERNAL, "Internal", other.to_string()),
    }
}

fn invalid_arg(what: &str, err: impl std::fmt::Display) -> WireError {
    WireError::new(ERR_CODE_INVALID_ARG, "InvalidArgument", format!("bad {}: {}", what, err))
}

/// 把请求分发给具体的缓存实现
pub async fn dispatch(
    cache: &dyn BlockCache,
    method: &str,
    tags: LogTags,
    body: &[u8],
) -> Result<Vec<u8>, WireError> {
    let ctx = tags
        .into_iter()
        .fold(CallContext::background(), |ctx, (k, v)| ctx.with_tag(k, v));

    match method {
        METHOD_GET_BLOCK => {
            let arg: GetBlockArg = decode_body(body).map_err(to_wire_error)?;
            let tlf_id = TlfId::parse(&arg.tlf_id).map_err(|e| invalid_arg("TLF ID", e))?;
            let block_id = BlockId::parse(&arg.block_id).map_err(|e| invalid_arg("block ID", e))?;

            let block = cache.get(&ctx, &tlf_id, &block_id).await.map_err(to_wire_error)?;
            encode_body(&GetBlockRes {
                buf: block.buf,
                server_half: block.server_half.to_string(),
                prefetch_status: block.prefetch_status.into(),
            })
            .map_err(to_wire_error)
        }
        METHOD_PUT_BLOCK => {
            let arg: PutBlockArg = decode_body(body).map_err(to_wire_error)?;
            let tlf_id = TlfId::parse(&arg.tlf_id).map_err(|e| invalid_arg("TLF ID", e))?;
            let block_id = BlockId::parse(&arg.block_id).map_err(|e| invalid_arg("block ID", e))?;
            let server_half = ServerHalf::parse(&arg.server_half).map_err(|e| invalid_arg("server half", e))?;

            cache
                .put(&ctx, &tlf_id, &block_id, &arg.buf, &server_half)
                .await
                .map_err(to_wire_error)?;
            encode_body(&()).map_err(to_wire_error)
        }
        other => Err(WireError::new(
            ERR_CODE_METHOD_NOT_FOUND,
            "MethodNotFound",
            format!("unknown method {}", other),
        )),
    }
}

/// 编码响应帧；响应超出帧上限时改为回复一个内部错误
fn encode_response(seqno: u64, reply: Result<Vec<u8>, WireError>) -> crate::Result<Vec<u8>> {
    let (error, body) = match reply {
        Ok(body) => (None, body),
        Err(err) => (Some(err), Vec::new()),
    };
    encode_frame(&RpcFrame::Response { seqno, error, body }).or_else(|e| {
        warn!("Response {} not sent: {}", seqno, e);
        encode_frame(&RpcFrame::Response {
            seqno,
            error: Some(WireError::new(ERR_CODE_INTERNAL, "Internal", e.to_string())),
            body: Vec::new(),
        })
    })
}

/// 处理一条连接上的所有请求，请求之间并发执行
pub async fn serve_connection<S>(stream: S, cache: Arc<dyn BlockCache>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (responses, mut responses_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_task = tokio::spawn(async move {
        while let Some(payload) = responses_rx.recv().await {
            if let Err(e) = write_payload(&mut writer, &payload).await {
                debug!("Failed to write response: {}", e);
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = read_frame(&mut reader) => next,
            // 写端失效后不再接收请求，让对端看到连接关闭
            _ = responses.closed() => {
                warn!("Response writer stopped, closing connection");
                break;
            }
        };

        match next {
            Ok(Some(RpcFrame::Request { seqno, method, tags, body })) => {
                let cache = Arc::clone(&cache);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let reply = dispatch(cache.as_ref(), &method, tags, &body).await;
                    if let Err(err) = &reply {
                        debug!("{} failed: {} ({})", method, err.desc, err.code);
                    }
                    match encode_response(seqno, reply) {
                        Ok(payload) => {
                            if responses.send(payload).is_err() {
                                debug!("Connection gone, dropping response {}", seqno);
                            }
                        }
                        Err(e) => warn!("Failed to encode response {}: {}", seqno, e),
                    }
                });
            }
            Ok(Some(RpcFrame::Response { seqno, .. })) => {
                warn!("Ignoring unexpected response {} on service connection", seqno);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read request: {}", e);
                break;
            }
        }
    }

    // 等已派发的请求写完响应再退出
    drop(responses);
    drop(reader);
    let _ = writer_task.await;
}

/// 在 Unix socket 上监听的缓存服务
pub struct CacheService {
    cache: Arc<dyn BlockCache>,
    shutdown_sender: watch::Sender<bool>,
}

impl CacheService {
    pub fn new(cache: Arc<dyn BlockCache>) -> Self {
        let (shutdown_sender, _) = watch::channel(false);
        Self { cache, shutdown_sender }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(true);
    }

    pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        UnixListener::bind(path)
    }

    pub async fn serve(&self, listener: UnixListener) -> std::io::Result<()> {
        let mut shutdown = self.shutdown_sender.subscribe();
        info!("Block cache service listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    debug!("Accepted block cache client");
                    tokio::spawn(serve_connection(stream, Arc::clone(&self.cache)));
                }
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    info!("Block cache service shutting down");
                    break;
                }
            }
        }

        self.cache.shutdown(&CallContext::background()).await;
        Ok(())
    }
}
