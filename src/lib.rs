pub mod core;
pub mod cache;
pub mod identity;
pub mod rpc;

// 重新导出主要类型
pub use crate::core::config::RemoteCacheConfig;
pub use crate::core::error::{BlockCacheError, IdentityError, KeyParseError};
pub use crate::cache::context::{CallContext, CancelHandle};
pub use crate::cache::contract::BlockCache;
pub use crate::cache::memory::MemoryBlockCache;
pub use crate::cache::remote::DiskBlockCacheRemote;
pub use crate::cache::types::{BlockCacheStatus, BlockId, CachedBlock, DeleteOutcome, DiskBlockCacheStatus, PrefetchStatus, ServerHalf, TlfId, TlfType};
pub use crate::identity::{Uid, UidScheme};

// 常量定义
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024; // 256MB

// 结果类型别名
pub type Result<T> = std::result::Result<T, BlockCacheError>;
