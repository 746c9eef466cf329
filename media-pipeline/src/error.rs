// 管线错误类型

use common::{CodecError, MediaKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported {media} configuration: {codec}")]
    ConfigurationUnsupported { media: MediaKind, codec: String },

    #[error("Reconfiguration of {media} encoder failed: {source}")]
    ReconfigureFailed {
        media: MediaKind,
        #[source]
        source: CodecError,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{media} worker is gone")]
    WorkerGone { media: MediaKind },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
