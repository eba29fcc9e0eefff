use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tracing::debug;

use crate::core::config::RemoteCacheConfig;
use crate::rpc::transport::{Connection, FramedTransport, Transport};

/// 获取到缓存服务的私有连接，以及包装在其上的传输层
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn get_cache_socket(&self) -> io::Result<(Arc<dyn Connection>, Arc<dyn Transport>)>;
}

/// 通过 Unix domain socket 连接本机缓存服务
#[derive(Debug, Clone)]
pub struct UnixSocketFactory {
    path: PathBuf,
    connect_timeout: Duration,
}

impl UnixSocketFactory {
    pub fn new(path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &RemoteCacheConfig) -> Self {
        Self::new(config.socket_path.clone(), config.connect_timeout)
    }
}

#[async_trait]
impl SocketFactory for UnixSocketFactory {
    async fn get_cache_socket(&self) -> io::Result<(Arc<dyn Connection>, Arc<dyn Transport>)> {
        let stream = tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.path))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out connecting to {}", self.path.display()),
                )
            })??;
        debug!("Connected to block cache service at {}", self.path.display());

        let transport = FramedTransport::new(stream);
        let conn: Arc<dyn Connection> = transport.clone();
        let transport: Arc<dyn Transport> = transport;
        Ok((conn, transport))
    }
}
