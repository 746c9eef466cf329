pub mod types;
pub mod protocol;
pub mod error;

pub use types::*;
pub use protocol::*;
pub use error::*;
