//! Reader for the offset table at the front of packed container files.
//!
//! A container stores many gzip-compressed blocks back to back. The header
//! maps every `(block number, block hash)` pair to the inclusive byte range
//! of its compressed payload, which lets callers fetch a single block with a
//! ranged read instead of downloading the whole container.

pub mod error;
pub mod header;
pub mod layout;

pub use error::{HeaderError, HeaderResult};
pub use header::{
    decode_header, encode_header, peek_header_length, BlockLocation, ContainerHeader,
};
