use thiserror::Error;

/// 远端错误码，与缓存服务约定
pub const ERR_CODE_NOT_FOUND: i32 = 2804;
pub const ERR_CODE_METHOD_NOT_FOUND: i32 = 2805;
pub const ERR_CODE_INVALID_ARG: i32 = 2806;
pub const ERR_CODE_INTERNAL: i32 = 2807;

#[derive(Debug, Error)]
pub enum BlockCacheError {
    #[error("failed to obtain block cache socket: {0}")]
    Connect(#[source] std::io::Error),

    #[error("{op}: not implemented")]
    NotImplemented { op: &'static str },

    #[error("block {block_id} not found in cache")]
    NotFound { block_id: String },

    #[error("remote cache error {name} ({code}): {desc}")]
    Remote { code: i32, name: String, desc: String },

    #[error("failed to decode server half: {0}")]
    ServerHalfDecode(#[source] KeyParseError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("call canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("block cache has been shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] std::num::ParseIntError),
}

impl BlockCacheError {
    pub fn not_implemented(op: &'static str) -> Self {
        Self::NotImplemented { op }
    }

    pub fn not_found(block_id: impl ToString) -> Self {
        Self::NotFound {
            block_id: block_id.to_string(),
        }
    }

    pub fn remote(code: i32, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::Remote {
            code,
            name: name.into(),
            desc: desc.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn decode_error(message: impl ToString) -> Self {
        Self::Decode(message.to_string())
    }

    pub fn encode_error(message: impl ToString) -> Self {
        Self::Encode(message.to_string())
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// 是否为本地解码失败（远端调用本身成功）
    pub fn is_local_decode(&self) -> bool {
        matches!(self, Self::ServerHalfDecode(_) | Self::Decode(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("bad UID {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("UID mismatch: {uid} != {derived} (via {username})")]
    Mismatch {
        uid: String,
        derived: String,
        username: String,
    },

    #[error("UID scheme {scheme} cannot be derived from a username")]
    UnsupportedScheme { scheme: String },
}

impl IdentityError {
    pub fn parse_error(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// 标识符与密钥的十六进制解析错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeyParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("wrong length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("unknown type byte {0:#04x}")]
    UnknownType(u8),
}
