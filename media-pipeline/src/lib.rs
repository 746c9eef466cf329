pub mod timing;
pub mod jitter;
pub mod codec;
pub mod transport;
pub mod events;
pub mod encode;
pub mod decode;
pub mod worker;
pub mod session;
#[cfg(test)]
mod session_test;
pub mod config;
pub mod error;

pub use config::{LoggingConfig, MediaConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use jitter::{BufferEntry, JitterBuffer, PushOutcome};
pub use session::{MediaSession, SessionCodecs, SessionOutputs, SessionStats};
pub use timing::{BitrateMeter, CaptureClock};
