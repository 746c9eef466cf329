use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WireError;

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// 接收端是否在入缓冲前丢弃控制对象（组结束/轨道结束标记、空载荷）
    ///
    /// 视频丢弃；音频没有对应的丢弃策略，控制对象照常入缓冲。
    pub fn discards_control_objects(&self) -> bool {
        matches!(self, MediaKind::Video)
    }

    /// 组头发送优先级（数值越小越优先）
    pub fn group_priority(&self) -> u8 {
        match self {
            MediaKind::Audio => 0,
            MediaKind::Video => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输对象状态
///
/// 线上状态码在传输边界处校验，内部只流转已知变体。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectStatus {
    Normal,
    EndOfGroup,
    EndOfTrackAndGroup,
    EndOfTrack,
}

impl ObjectStatus {
    pub fn code(&self) -> u64 {
        match self {
            ObjectStatus::Normal => 0x0,
            ObjectStatus::EndOfGroup => 0x3,
            ObjectStatus::EndOfTrackAndGroup => 0x4,
            ObjectStatus::EndOfTrack => 0x5,
        }
    }

    /// 是否为组/轨道结束标记
    pub fn is_end_marker(&self) -> bool {
        !matches!(self, ObjectStatus::Normal)
    }
}

impl TryFrom<u64> for ObjectStatus {
    type Error = WireError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        match code {
            0x0 => Ok(ObjectStatus::Normal),
            0x3 => Ok(ObjectStatus::EndOfGroup),
            0x4 => Ok(ObjectStatus::EndOfTrackAndGroup),
            0x5 => Ok(ObjectStatus::EndOfTrack),
            other => Err(WireError::InvalidStatus(other)),
        }
    }
}

/// 编码块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Key,
    Delta,
}

/// 编码块元数据（载荷前缀中的JSON部分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// 时间戳（微秒，已重定基到流起点）
    pub timestamp: i64,
    /// 时长（微秒）
    #[serde(default)]
    pub duration: Option<u64>,
}

/// 编码块
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub chunk_type: ChunkType,
    /// 时间戳（微秒）
    pub timestamp: i64,
    /// 时长（微秒）
    pub duration: Option<u64>,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            chunk_type: self.chunk_type,
            timestamp: self.timestamp,
            duration: self.duration,
        }
    }

    pub fn from_parts(metadata: ChunkMetadata, data: Bytes) -> Self {
        Self {
            chunk_type: metadata.chunk_type,
            timestamp: metadata.timestamp,
            duration: metadata.duration,
            data,
        }
    }
}

/// 编解码器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecConfig {
    /// 编解码器标识（如 "avc1.42001f"、"opus"）
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 目标码率（bps）
    pub bitrate: u64,
    pub framerate: f64,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// 从传输层收到的对象
#[derive(Debug, Clone, PartialEq)]
pub struct InboundObject {
    pub track_alias: u64,
    /// 推流代次，发送端每挂接一次新的采集序列加1
    pub epoch: u64,
    pub group_id: u64,
    pub object_id: u64,
    pub payload: Bytes,
    pub status: ObjectStatus,
}

impl InboundObject {
    /// 由线上字段构造，未知状态码返回错误
    pub fn from_wire(
        track_alias: u64,
        epoch: u64,
        group_id: u64,
        object_id: u64,
        status_code: u64,
        payload: Bytes,
    ) -> Result<Self, WireError> {
        Ok(Self {
            track_alias,
            epoch,
            group_id,
            object_id,
            payload,
            status: ObjectStatus::try_from(status_code)?,
        })
    }

    /// 控制对象：结束标记或空载荷
    pub fn is_control(&self) -> bool {
        self.status.is_end_marker() || self.payload.is_empty()
    }
}

/// 组头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupHeader {
    pub track_alias: u64,
    pub group_id: u64,
    pub subgroup_id: u64,
    pub priority: u8,
}

/// 发往传输层的对象
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundObject {
    pub track_alias: u64,
    pub epoch: u64,
    pub group_id: u64,
    pub subgroup_id: u64,
    pub object_id: u64,
    pub payload: Bytes,
    pub status: Option<ObjectStatus>,
}

impl OutboundObject {
    /// 线上状态码；未设置状态即普通对象
    pub fn status_code(&self) -> u64 {
        self.status.unwrap_or(ObjectStatus::Normal).code()
    }
}
