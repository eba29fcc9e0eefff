//! Wire shapes for the block cache protocol and the frame envelope that
//! carries them. Bodies are MessagePack; frames are length-prefixed.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::error::BlockCacheError;
use crate::Result;

pub const METHOD_GET_BLOCK: &str = "keybase.1.diskBlockCache.getBlock";
pub const METHOD_PUT_BLOCK: &str = "keybase.1.diskBlockCache.putBlock";

/// 单帧上限，超过即视为协议错误
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockArg {
    pub tlf_id: String,
    pub block_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockRes {
    pub buf: Vec<u8>,
    pub server_half: String,
    pub prefetch_status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutBlockArg {
    pub tlf_id: String,
    pub block_id: String,
    pub buf: Vec<u8>,
    pub server_half: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub name: String,
    pub desc: String,
}

impl WireError {
    pub fn new(code: i32, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            desc: desc.into(),
        }
    }
}

pub type LogTags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcFrame {
    Request {
        seqno: u64,
        method: String,
        tags: LogTags,
        body: Vec<u8>,
    },
    Response {
        seqno: u64,
        error: Option<WireError>,
        body: Vec<u8>,
    },
}

pub fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(BlockCacheError::encode_error)
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    rmp_serde::from_slice(body).map_err(BlockCacheError::decode_error)
}

/// 编码一帧；超过上限时返回编码错误，不影响连接上的其他帧
pub fn encode_frame(frame: &RpcFrame) -> Result<Vec<u8>> {
    let payload = encode_body(frame)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(BlockCacheError::encode_error(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    Ok(payload)
}

/// 写出已编码的帧，这里的错误都是 I/O 错误
pub async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, frame: &RpcFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_frame(frame)?;
    write_payload(writer, &payload).await
}

/// 读取一帧；对端正常关闭时返回 `Ok(None)`
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<RpcFrame>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(BlockCacheError::decode_error(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_body(&payload).map(Some)
}
