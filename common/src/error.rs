use thiserror::Error;

/// 编解码器错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported codec configuration: {codec}")]
    Unsupported { codec: String },

    #[error("Codec rejected input: {message}")]
    Rejected { message: String },

    #[error("Codec is closed")]
    Closed,
}

/// 传输层发送错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {message}")]
    SendFailed { message: String },

    #[error("Transport closed")]
    Closed,
}

/// 载荷封包/解包错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Payload truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid chunk metadata: {message}")]
    InvalidMetadata { message: String },

    #[error("Invalid object status code: {0}")]
    InvalidStatus(u64),
}
