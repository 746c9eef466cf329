use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::*;

/// 长度前缀字节数
pub const METADATA_PREFIX_LEN: usize = 4;

/// 封包：4字节大端长度前缀 + JSON元数据 + 原始编码数据
pub fn pack_payload(metadata: &ChunkMetadata, data: &[u8]) -> Result<Bytes, WireError> {
    let json = serde_json::to_vec(metadata).map_err(|e| WireError::InvalidMetadata {
        message: e.to_string(),
    })?;

    let mut buf = BytesMut::with_capacity(METADATA_PREFIX_LEN + json.len() + data.len());
    buf.put_u32(json.len() as u32);
    buf.put_slice(&json);
    buf.put_slice(data);
    Ok(buf.freeze())
}

/// 解包：读取长度前缀，截取元数据，剩余部分作为不透明的编码数据
pub fn unpack_payload(payload: &Bytes) -> Result<(ChunkMetadata, Bytes), WireError> {
    if payload.len() < METADATA_PREFIX_LEN {
        return Err(WireError::Truncated {
            needed: METADATA_PREFIX_LEN,
            available: payload.len(),
        });
    }

    let mut prefix = [0u8; METADATA_PREFIX_LEN];
    prefix.copy_from_slice(&payload[..METADATA_PREFIX_LEN]);
    let metadata_len = u32::from_be_bytes(prefix) as usize;

    let metadata_end = METADATA_PREFIX_LEN + metadata_len;
    if payload.len() < metadata_end {
        return Err(WireError::Truncated {
            needed: metadata_end,
            available: payload.len(),
        });
    }

    let metadata: ChunkMetadata = serde_json::from_slice(&payload[METADATA_PREFIX_LEN..metadata_end])
        .map_err(|e| WireError::InvalidMetadata {
            message: e.to_string(),
        })?;

    Ok((metadata, payload.slice(metadata_end..)))
}

/// 配置错误原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigErrorReason {
    Unsupported,
    ReconfigureFailed,
}

/// 对外发送的监测消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// 码率采样
    Bitrate { media: MediaKind, kbps: f64 },
    /// 编码器配置失败
    ConfigError {
        media: MediaKind,
        reason: ConfigErrorReason,
        config: CodecConfig,
    },
}
