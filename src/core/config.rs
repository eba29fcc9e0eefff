use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::error::BlockCacheError;
use crate::{DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MEMORY_LIMIT_BYTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    pub socket_path: PathBuf,
    pub connect_timeout: Duration,
    /// 调用方未给出截止时间时使用的默认超时
    pub call_timeout: Option<Duration>,
    pub memory_limit_bytes: u64,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = BlockCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(BlockCacheError::config_error(format!("Unknown log level: {}", s))),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            log_level: LogLevel::Info,
        }
    }
}

/// 默认 socket 路径：优先 $XDG_RUNTIME_DIR
fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("kbfs-blockcache.sock")
}

impl RemoteCacheConfig {
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// 从 key=value 选项列表解析配置
    pub fn from_options(options: &[&str]) -> Result<Self, BlockCacheError> {
        let mut config = RemoteCacheConfig::default();

        for option in options {
            if let Some((key, value)) = option.split_once('=') {
                match key.trim() {
                    "socket" => {
                        config.socket_path = PathBuf::from(value);
                    }
                    "connect_timeout_ms" => {
                        let ms: u64 = value.parse()?;
                        config.connect_timeout = Duration::from_millis(ms);
                    }
                    "call_timeout_ms" => {
                        let ms: u64 = value.parse()?;
                        // 0 表示不设默认超时，完全由调用方上下文决定
                        config.call_timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
                    }
                    "memory_limit_mb" => {
                        let mb: u64 = value.parse()?;
                        config.memory_limit_bytes = mb.checked_mul(1024 * 1024).ok_or_else(|| {
                            BlockCacheError::config_error(format!("memory_limit_mb too large: {}", mb))
                        })?;
                    }
                    "log_level" => {
                        config.log_level = value.parse()?;
                    }
                    _ => {
                        tracing::debug!("Ignoring unknown option: {}", key);
                    }
                }
            }
        }

        config.validate()?;
        tracing::debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BlockCacheError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(BlockCacheError::config_error("Missing required option: socket"));
        }

        if self.connect_timeout.is_zero() {
            return Err(BlockCacheError::config_error("Connect timeout must be greater than 0"));
        }

        if self.memory_limit_bytes == 0 {
            return Err(BlockCacheError::config_error("Memory limit must be greater than 0"));
        }

        Ok(())
    }
}
