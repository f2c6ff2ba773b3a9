//! Fixed field widths of the container header.
//!
//! ```text
//! [8: header length][2: block count][2: hash length]
//! block count x [8: block number][hash length: hash][8: start][8: end]
//! ```
//!
//! All integers are little-endian.

/// Reserved total header size written by the packer. Not trusted by readers.
pub const HEADER_LENGTH_FIELD: usize = 8;

pub const BLOCK_COUNT_FIELD: usize = 2;

pub const HASH_LENGTH_FIELD: usize = 2;

/// Bytes a reader must fetch before it knows the full header size.
pub const HEADER_PREFIX_LEN: usize = HEADER_LENGTH_FIELD + BLOCK_COUNT_FIELD + HASH_LENGTH_FIELD;

pub const BLOCK_NUMBER_FIELD: usize = 8;

/// Width of the start and of the end offset of an entry.
pub const OFFSET_FIELD: usize = 8;

/// Width of one offset table entry for the given hash length.
pub const fn entry_width(hash_length: u16) -> usize {
    BLOCK_NUMBER_FIELD + hash_length as usize + OFFSET_FIELD + OFFSET_FIELD
}
