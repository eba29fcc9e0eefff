use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::core::error::IdentityError;

pub const UID_LEN: usize = 16;
pub const UID_SUFFIX: u8 = 0x00;
pub const UID_SUFFIX_2: u8 = 0x19;

/// 用户名哈希规则生效时间：Fri Feb  6 19:33:08 EST 2015
const USERNAME_HASH_CUTOVER_SECS: i64 = 1_423_269_188;

/// UID 派生规则，由末尾后缀字节区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UidScheme {
    /// 早期账号，UID 由服务端分配，无法从用户名推导
    Legacy,
    /// sha256(lowercase(username)) 截断 + 后缀
    UsernameHash,
}

impl UidScheme {
    pub const CURRENT: UidScheme = UidScheme::UsernameHash;

    pub fn suffix(self) -> u8 {
        match self {
            Self::Legacy => UID_SUFFIX,
            Self::UsernameHash => UID_SUFFIX_2,
        }
    }

    pub fn from_suffix(suffix: u8) -> Option<Self> {
        match suffix {
            UID_SUFFIX => Some(Self::Legacy),
            UID_SUFFIX_2 => Some(Self::UsernameHash),
            _ => None,
        }
    }

    /// 该规则开始适用的时间点；`Legacy` 没有下限
    pub fn cutover(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Legacy => None,
            Self::UsernameHash => Utc.timestamp_opt(USERNAME_HASH_CUTOVER_SECS, 0).single(),
        }
    }

    /// 根据注册时间选择规则
    pub fn for_signup_time(signup: DateTime<Utc>) -> Self {
        match Self::UsernameHash.cutover() {
            Some(cutover) if signup >= cutover => Self::UsernameHash,
            _ => Self::Legacy,
        }
    }

    pub fn is_derivable(self) -> bool {
        matches!(self, Self::UsernameHash)
    }
}

impl fmt::Display for UidScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::UsernameHash => write!(f, "username-hash"),
        }
    }
}

/// 16 字节的用户标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    pub fn from_bytes(bytes: [u8; UID_LEN]) -> Result<Self, IdentityError> {
        let suffix = bytes[UID_LEN - 1];
        if UidScheme::from_suffix(suffix).is_none() {
            return Err(IdentityError::parse_error(
                hex::encode(bytes),
                format!("invalid UID suffix {:#04x}", suffix),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if s.len() != UID_LEN * 2 {
            return Err(IdentityError::parse_error(
                s,
                format!("expected {} hex characters, got {}", UID_LEN * 2, s.len()),
            ));
        }
        let mut bytes = [0u8; UID_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| IdentityError::parse_error(s, e.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    pub fn scheme(&self) -> UidScheme {
        // 构造时已校验后缀
        UidScheme::from_suffix(self.0[UID_LEN - 1]).unwrap_or(UidScheme::Legacy)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self)
    }
}

impl FromStr for Uid {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// 按当前规则从用户名派生 UID
pub fn derive(username: &str) -> Uid {
    derive_hashed(UidScheme::CURRENT.suffix(), username)
}

pub fn derive_with(scheme: UidScheme, username: &str) -> Result<Uid, IdentityError> {
    if !scheme.is_derivable() {
        return Err(IdentityError::UnsupportedScheme {
            scheme: scheme.to_string(),
        });
    }
    Ok(derive_hashed(scheme.suffix(), username))
}

fn derive_hashed(suffix: u8, username: &str) -> Uid {
    let digest = Sha256::digest(username.to_lowercase().as_bytes());
    let mut bytes = [0u8; UID_LEN];
    bytes[..UID_LEN - 1].copy_from_slice(&digest[..UID_LEN - 1]);
    bytes[UID_LEN - 1] = suffix;
    Uid(bytes)
}

/// 校验声称的用户名与 UID 是否一致
pub fn validate(uid: &Uid, username: &str) -> Result<(), IdentityError> {
    let derived = derive(username);
    if *uid != derived {
        return Err(IdentityError::Mismatch {
            uid: uid.to_string(),
            derived: derived.to_string(),
            username: username.to_string(),
        });
    }
    Ok(())
}
