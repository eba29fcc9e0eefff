use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::BlockCacheError;
use crate::rpc::wire::{encode_frame, read_frame, write_payload, LogTags, RpcFrame, WireError};

/// 一次调用的失败：远端返回的错误，或本地传输层错误
#[derive(Debug)]
pub enum CallError {
    Remote(WireError),
    Local(BlockCacheError),
}

impl From<BlockCacheError> for CallError {
    fn from(e: BlockCacheError) -> Self {
        Self::Local(e)
    }
}

/// 请求/响应传输，多个调用可以并发共享同一个实例
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, tags: LogTags, body: Vec<u8>) -> Result<Vec<u8>, CallError>;
}

/// 底层连接，由持有者负责关闭
pub trait Connection: Send + Sync {
    fn close(&self);
}

type Reply = Result<Vec<u8>, CallError>;
type PendingCalls = DashMap<u64, oneshot::Sender<Reply>>;

struct Shared {
    pending: PendingCalls,
    closed: AtomicBool,
}

impl Shared {
    /// 连接断开后让所有等待中的调用失败
    fn fail_all(&self) {
        let seqnos: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for seqno in seqnos {
            if let Some((_, tx)) = self.pending.remove(&seqno) {
                let _ = tx.send(Err(CallError::Local(BlockCacheError::ConnectionClosed)));
            }
        }
    }
}

/// 调用被放弃（如上下文取消）时清理等待表
struct PendingGuard<'a> {
    shared: &'a Shared,
    seqno: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.seqno);
    }
}

/// 基于长度前缀帧的多路复用传输
pub struct FramedTransport {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    next_seqno: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FramedTransport {
    pub fn new<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        let writer_shared = Arc::clone(&shared);
        let writer_task = tokio::spawn(async move {
            // 帧在入队前已编码，这里只会遇到 I/O 错误
            while let Some(payload) = outgoing_rx.recv().await {
                if let Err(e) = write_payload(&mut writer, &payload).await {
                    warn!("Failed to write RPC frame: {}", e);
                    break;
                }
            }
            writer_shared.closed.store(true, Ordering::SeqCst);
            writer_shared.fail_all();
        });

        let reader_shared = Arc::clone(&shared);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(RpcFrame::Response { seqno, error, body })) => {
                        let reply = match error {
                            Some(err) => Err(CallError::Remote(err)),
                            None => Ok(body),
                        };
                        match reader_shared.pending.remove(&seqno) {
                            Some((_, tx)) => {
                                let _ = tx.send(reply);
                            }
                            None => debug!("Dropping response for abandoned call {}", seqno),
                        }
                    }
                    Ok(Some(RpcFrame::Request { method, .. })) => {
                        warn!("Ignoring unexpected request {} on client connection", method);
                    }
                    Ok(None) => {
                        debug!("RPC connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read RPC frame: {}", e);
                        break;
                    }
                }
            }
            reader_shared.closed.store(true, Ordering::SeqCst);
            reader_shared.fail_all();
        });

        Arc::new(Self {
            shared,
            outgoing,
            next_seqno: AtomicU64::new(1),
            tasks: Mutex::new(vec![writer_task, reader_task]),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn call(&self, method: &str, tags: LogTags, body: Vec<u8>) -> Result<Vec<u8>, CallError> {
        if self.is_closed() {
            return Err(BlockCacheError::ConnectionClosed.into());
        }

        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed);
        // 超限的帧只让本次调用失败
        let payload = encode_frame(&RpcFrame::Request {
            seqno,
            method: method.to_string(),
            tags,
            body,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(seqno, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            seqno,
        };

        // 插入之后再检查一次，避免与 fail_all 竞争
        if self.is_closed() {
            return Err(BlockCacheError::ConnectionClosed.into());
        }

        if self.outgoing.send(payload).is_err() {
            return Err(BlockCacheError::ConnectionClosed.into());
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(BlockCacheError::ConnectionClosed.into()),
        }
    }
}

impl Connection for FramedTransport {
    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.fail_all();
        debug!("RPC connection closed");
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::wire::{read_frame, write_frame, MAX_FRAME_LEN};

    /// 回显服务：把请求体原样返回，method 为 "fail" 时返回错误
    fn spawn_echo_peer(stream: tokio::io::DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(stream);
            while let Ok(Some(frame)) = read_frame(&mut reader).await {
                if let RpcFrame::Request { seqno, method, body, .. } = frame {
                    let response = if method == "fail" {
                        RpcFrame::Response {
                            seqno,
                            error: Some(WireError::new(1, "Boom", "remote failure")),
                            body: Vec::new(),
                        }
                    } else {
                        RpcFrame::Response { seqno, error: None, body }
                    };
                    if write_frame(&mut writer, &response).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        spawn_echo_peer(server);
        let transport = FramedTransport::new(client);

        let reply = transport.call("echo", LogTags::new(), b"ping".to_vec()).await.unwrap();
        assert_eq!(reply, b"ping");

        match transport.call("fail", LogTags::new(), Vec::new()).await {
            Err(CallError::Remote(err)) => assert_eq!(err.name, "Boom"),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        spawn_echo_peer(server);
        let transport = FramedTransport::new(client);

        let mut handles = Vec::new();
        for i in 0..32u32 {
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                let body = i.to_be_bytes().to_vec();
                let reply = transport.call("echo", LogTags::new(), body.clone()).await.unwrap();
                assert_eq!(reply, body);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_fails_calls() {
        let (client, _server) = tokio::io::duplex(4096);
        let transport = FramedTransport::new(client);

        // 对端不回复，调用挂起直到连接关闭
        let pending = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.call("echo", LogTags::new(), Vec::new()).await }
        });
        while transport.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        transport.close();
        transport.close();

        assert!(matches!(
            pending.await.unwrap(),
            Err(CallError::Local(BlockCacheError::ConnectionClosed))
        ));
        assert!(transport.is_closed());
        assert!(matches!(
            transport.call("echo", LogTags::new(), Vec::new()).await,
            Err(CallError::Local(BlockCacheError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn test_oversized_call_fails_alone() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        spawn_echo_peer(server);
        let transport = FramedTransport::new(client);

        let result = transport
            .call("echo", LogTags::new(), vec![0u8; MAX_FRAME_LEN + 1])
            .await;
        assert!(matches!(result, Err(CallError::Local(BlockCacheError::Encode(_)))));
        assert!(!transport.is_closed());
        assert_eq!(transport.in_flight(), 0);

        let reply = transport.call("echo", LogTags::new(), b"still up".to_vec()).await.unwrap();
        assert_eq!(reply, b"still up");
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_calls() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = FramedTransport::new(client);
        drop(server);

        let result = transport.call("echo", LogTags::new(), Vec::new()).await;
        assert!(matches!(result, Err(CallError::Local(BlockCacheError::ConnectionClosed))));
    }
}
