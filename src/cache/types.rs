use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::KeyParseError;

pub const TLF_ID_LEN: usize = 16;
pub const BLOCK_HASH_LEN: usize = 32;
pub const SERVER_HALF_LEN: usize = 32;

/// BlockId 的哈希类型前缀
pub const BLOCK_HASH_SHA256: u8 = 0x01;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], KeyParseError> {
    let raw = hex::decode(s)?;
    if raw.len() != N {
        return Err(KeyParseError::WrongLength {
            expected: N,
            actual: raw.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// TLF 类型，存放在 TlfId 的最后一个字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlfType {
    Private,
    Public,
    SingleTeam,
    TeamPrivate,
}

impl TlfType {
    pub fn suffix(self) -> u8 {
        match self {
            Self::Private => 0x16,
            Self::Public => 0x17,
            Self::SingleTeam => 0x19,
            Self::TeamPrivate => 0x2a,
        }
    }

    pub fn from_suffix(b: u8) -> Option<Self> {
        match b {
            0x16 => Some(Self::Private),
            0x17 => Some(Self::Public),
            0x19 => Some(Self::SingleTeam),
            0x2a => Some(Self::TeamPrivate),
            _ => None,
        }
    }
}

/// 顶层文件夹标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlfId([u8; TLF_ID_LEN]);

impl TlfId {
    pub fn new(body: [u8; TLF_ID_LEN - 1], tlf_type: TlfType) -> Self {
        let mut bytes = [0u8; TLF_ID_LEN];
        bytes[..TLF_ID_LEN - 1].copy_from_slice(&body);
        bytes[TLF_ID_LEN - 1] = tlf_type.suffix();
        Self(bytes)
    }

    pub fn random(tlf_type: TlfType) -> Self {
        let mut body = [0u8; TLF_ID_LEN - 1];
        rand::thread_rng().fill_bytes(&mut body);
        Self::new(body, tlf_type)
    }

    pub fn parse(s: &str) -> Result<Self, KeyParseError> {
        let bytes = decode_fixed::<TLF_ID_LEN>(s)?;
        let suffix = bytes[TLF_ID_LEN - 1];
        if TlfType::from_suffix(suffix).is_none() {
            return Err(KeyParseError::UnknownType(suffix));
        }
        Ok(Self(bytes))
    }

    pub fn tlf_type(&self) -> TlfType {
        TlfType::from_suffix(self.0[TLF_ID_LEN - 1]).unwrap_or(TlfType::Private)
    }
}

/// 块 ID：哈希类型字节 + 内容摘要
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId([u8; BLOCK_HASH_LEN + 1]);

impl BlockId {
    /// 内容寻址：相同明文得到相同 ID
    pub fn from_contents(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; BLOCK_HASH_LEN + 1];
        bytes[0] = BLOCK_HASH_SHA256;
        bytes[1..].copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn parse(s: &str) -> Result<Self, KeyParseError> {
        let bytes = decode_fixed::<{ BLOCK_HASH_LEN + 1 }>(s)?;
        if bytes[0] != BLOCK_HASH_SHA256 {
            return Err(KeyParseError::UnknownType(bytes[0]));
        }
        Ok(Self(bytes))
    }

    pub fn verify_contents(&self, data: &[u8]) -> bool {
        *self == Self::from_contents(data)
    }
}

/// 块加密密钥的服务端一半
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHalf([u8; SERVER_HALF_LEN]);

impl ServerHalf {
    pub fn from_bytes(bytes: [u8; SERVER_HALF_LEN]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; SERVER_HALF_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn parse(s: &str) -> Result<Self, KeyParseError> {
        decode_fixed::<SERVER_HALF_LEN>(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SERVER_HALF_LEN] {
        &self.0
    }
}

macro_rules! impl_hex_display {
    ($($ty:ident),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self)
            }
        }

        impl FromStr for $ty {
            type Err = KeyParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    )*};
}

impl_hex_display!(TlfId, BlockId);

impl fmt::Display for ServerHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// 密钥材料不出现在日志里
impl fmt::Debug for ServerHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerHalf(..)")
    }
}

/// 块的预取状态；这里只负责传递，不校验单调性
///
/// 线上出现的其他取值原样保留在 `Unknown` 中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrefetchStatus {
    NoPrefetch,
    TriggeredPrefetch,
    FinishedPrefetch,
    Unknown(i32),
}

impl Default for PrefetchStatus {
    fn default() -> Self {
        Self::NoPrefetch
    }
}

impl From<i32> for PrefetchStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::NoPrefetch,
            1 => Self::TriggeredPrefetch,
            2 => Self::FinishedPrefetch,
            other => Self::Unknown(other),
        }
    }
}

impl From<PrefetchStatus> for i32 {
    fn from(status: PrefetchStatus) -> Self {
        match status {
            PrefetchStatus::NoPrefetch => 0,
            PrefetchStatus::TriggeredPrefetch => 1,
            PrefetchStatus::FinishedPrefetch => 2,
            PrefetchStatus::Unknown(raw) => raw,
        }
    }
}

/// 一次 Get 的完整结果
#[derive(Clone, PartialEq, Eq)]
pub struct CachedBlock {
    pub buf: Vec<u8>,
    pub server_half: ServerHalf,
    pub prefetch_status: PrefetchStatus,
}

impl fmt::Debug for CachedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedBlock")
            .field("len", &self.buf.len())
            .field("prefetch_status", &self.prefetch_status)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub num_removed: usize,
    pub size_removed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStartState {
    #[default]
    Starting,
    Started,
    Failed,
    Shutdown,
}

/// 单个缓存实例的诊断快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskBlockCacheStatus {
    pub start_state: CacheStartState,
    pub num_blocks: u64,
    pub block_bytes: u64,
    pub curr_byte_limit: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub metadata_updates: u64,
    pub num_evicted: u64,
    pub size_evicted: u64,
    pub num_deleted: u64,
    pub size_deleted: u64,
}

/// 缓存名称 -> 诊断记录
pub type BlockCacheStatus = HashMap<String, DiskBlockCacheStatus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_content_addressing() {
        let a = BlockId::from_contents(b"hello block");
        let b = BlockId::from_contents(b"hello block");
        let c = BlockId::from_contents(b"other block");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.verify_contents(b"hello block"));
        assert!(!a.verify_contents(b"other block"));

        let s = a.to_string();
        assert_eq!(s.len(), (BLOCK_HASH_LEN + 1) * 2);
        assert!(s.starts_with("01"));
        assert_eq!(BlockId::parse(&s).unwrap(), a);
    }

    #[test]
    fn test_block_id_rejects_unknown_hash_type() {
        let mut s = BlockId::from_contents(b"x").to_string();
        s.replace_range(0..2, "7f");
        assert_eq!(BlockId::parse(&s), Err(KeyParseError::UnknownType(0x7f)));
    }

    #[test]
    fn test_tlf_id_parse() {
        let id = TlfId::random(TlfType::Public);
        assert_eq!(id.tlf_type(), TlfType::Public);
        assert_eq!(id.to_string().parse::<TlfId>().unwrap(), id);

        assert!(TlfId::parse("00000000000000000000000000000000").is_err());
        assert!(TlfId::parse("0000000000000000000000000000000016").is_err());
        assert!(TlfId::parse("00000000000000000000000000000016").is_ok());
    }

    #[test]
    fn test_server_half_parse() {
        let half = ServerHalf::random();
        assert_eq!(ServerHalf::parse(&half.to_string()).unwrap(), half);

        assert!(matches!(
            ServerHalf::parse("abcd"),
            Err(KeyParseError::WrongLength { expected: SERVER_HALF_LEN, actual: 2 })
        ));
        assert!(matches!(ServerHalf::parse("not hex"), Err(KeyParseError::InvalidHex(_))));
        assert_eq!(format!("{:?}", half), "ServerHalf(..)");
    }

    #[test]
    fn test_prefetch_status_from_wire() {
        assert_eq!(PrefetchStatus::from(0), PrefetchStatus::NoPrefetch);
        assert_eq!(PrefetchStatus::from(1), PrefetchStatus::TriggeredPrefetch);
        assert_eq!(PrefetchStatus::from(2), PrefetchStatus::FinishedPrefetch);
        assert_eq!(PrefetchStatus::from(7), PrefetchStatus::Unknown(7));
        assert_eq!(i32::from(PrefetchStatus::FinishedPrefetch), 2);
        // 未知取值原样往返
        assert_eq!(i32::from(PrefetchStatus::from(-3)), -3);
        assert!(PrefetchStatus::NoPrefetch < PrefetchStatus::FinishedPrefetch);
    }
}
