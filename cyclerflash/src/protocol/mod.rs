//! Upload strategies.

pub mod chunked;
pub mod crc;
pub mod ymodem;

// Re-export common types
pub use chunked::{ChunkedConfig, ChunkedWriter};
pub use ymodem::{BlockSize, YmodemConfig, YmodemState, YmodemTransfer};
