use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::error::BlockCacheError;

/// 单次调用的上下文：取消信号、截止时间和日志标签
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    tags: Arc<BTreeMap<String, String>>,
}

/// 取消句柄，drop 不会触发取消
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

impl CallContext {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel = Some(receiver);
        (self, CancelHandle { sender })
    }

    /// 截止时间只能提前，不能推后
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.tags).insert(key.into(), value.into());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// 立即检查是否已取消或超时
    pub fn err(&self) -> Option<BlockCacheError> {
        if self.is_canceled() {
            return Some(BlockCacheError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(BlockCacheError::DeadlineExceeded),
            _ => None,
        }
    }

    /// 等到上下文被取消或超时；两者都没有时永不返回
    pub async fn done(&self) -> BlockCacheError {
        let canceled = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // 句柄已释放，不会再被取消
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = canceled => BlockCacheError::Canceled,
            _ = expired => BlockCacheError::DeadlineExceeded,
        }
    }
}
