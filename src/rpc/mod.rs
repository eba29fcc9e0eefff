pub mod client;
pub mod server;
pub mod socket;
pub mod transport;
pub mod wire;

pub use client::{log_tags_from_context, BlockCacheErrorUnwrapper, ErrorUnwrapper, LogTagsFn, RpcClient};
pub use server::CacheService;
pub use socket::{SocketFactory, UnixSocketFactory};
pub use transport::{CallError, Connection, FramedTransport, Transport};
