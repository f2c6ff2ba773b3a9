use crate::{
    error::{HeaderError, HeaderResult},
    layout::{
        entry_width, BLOCK_COUNT_FIELD, BLOCK_NUMBER_FIELD, HEADER_LENGTH_FIELD, HEADER_PREFIX_LEN,
        OFFSET_FIELD,
    },
};

/// Position of one compressed block inside a container.
///
/// `start` and `end` are both inclusive, matching an HTTP `Range` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub block_number: u64,
    pub block_hash: String,
    pub start: u64,
    pub end: u64,
}

/// Decoded offset table of a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Value of the reserved length field as written by the packer.
    pub declared_length: u64,
    pub hash_length: u16,
    pub entries: Vec<BlockLocation>,
}

impl ContainerHeader {
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    /// Byte length of this header, as derived from the block count and hash length.
    pub fn encoded_len(&self) -> usize {
        HEADER_PREFIX_LEN + self.entries.len() * entry_width(self.hash_length)
    }
}

struct Prefix {
    declared_length: u64,
    block_count: u16,
    hash_length: u16,
}

impl Prefix {
    fn read(bytes: &[u8]) -> HeaderResult<Self> {
        if bytes.len() < HEADER_PREFIX_LEN {
            return Err(HeaderError::MalformedHeader {
                expected: HEADER_PREFIX_LEN,
                actual: bytes.len(),
            });
        }

        let count_at = HEADER_LENGTH_FIELD;
        let hash_at = count_at + BLOCK_COUNT_FIELD;

        Ok(Prefix {
            declared_length: read_u64(bytes, 0),
            block_count: read_u16(bytes, count_at),
            hash_length: read_u16(bytes, hash_at),
        })
    }

    fn header_len(&self) -> usize {
        HEADER_PREFIX_LEN + self.block_count as usize * entry_width(self.hash_length)
    }
}

/// Total header length announced by the fixed prefix of a container.
///
/// `prefix` must hold at least [`HEADER_PREFIX_LEN`] bytes; anything after that
/// is ignored.
pub fn peek_header_length(prefix: &[u8]) -> HeaderResult<u64> {
    let prefix = Prefix::read(prefix)?;
    // The largest possible header (65535 entries with 65535 byte hashes) overflows u32.
    Ok(prefix.header_len() as u64)
}

/// Decodes the full offset table. `bytes` may extend past the header.
pub fn decode_header(bytes: &[u8]) -> HeaderResult<ContainerHeader> {
    let prefix = Prefix::read(bytes)?;
    let header_len = prefix.header_len();

    if bytes.len() < header_len {
        return Err(HeaderError::MalformedHeader {
            expected: header_len,
            actual: bytes.len(),
        });
    }

    let hash_length = prefix.hash_length as usize;
    let stride = entry_width(prefix.hash_length);

    let entries = (0..prefix.block_count as usize)
        .map(|index| {
            let at = HEADER_PREFIX_LEN + index * stride;
            let hash_at = at + BLOCK_NUMBER_FIELD;
            let start_at = hash_at + hash_length;
            let end_at = start_at + OFFSET_FIELD;

            BlockLocation {
                block_number: read_u64(bytes, at),
                block_hash: String::from_utf8_lossy(&bytes[hash_at..start_at]).into_owned(),
                start: read_u64(bytes, start_at),
                end: read_u64(bytes, end_at),
            }
        })
        .collect();

    Ok(ContainerHeader {
        declared_length: prefix.declared_length,
        hash_length: prefix.hash_length,
        entries,
    })
}

/// Builds the header bytes for `entries`. Used to produce containers in tests
/// and tooling; the service itself never writes containers.
pub fn encode_header(hash_length: u16, entries: &[BlockLocation]) -> HeaderResult<Vec<u8>> {
    let block_count =
        u16::try_from(entries.len()).map_err(|_| HeaderError::TooManyEntries(entries.len()))?;

    let header_len = HEADER_PREFIX_LEN + entries.len() * entry_width(hash_length);
    let mut out = Vec::with_capacity(header_len);

    out.extend_from_slice(&(header_len as u64).to_le_bytes());
    out.extend_from_slice(&block_count.to_le_bytes());
    out.extend_from_slice(&hash_length.to_le_bytes());

    for (index, entry) in entries.iter().enumerate() {
        if entry.block_hash.len() != hash_length as usize {
            return Err(HeaderError::HashLengthMismatch {
                index,
                expected: hash_length as usize,
                actual: entry.block_hash.len(),
            });
        }
        out.extend_from_slice(&entry.block_number.to_le_bytes());
        out.extend_from_slice(entry.block_hash.as_bytes());
        out.extend_from_slice(&entry.start.to_le_bytes());
        out.extend_from_slice(&entry.end.to_le_bytes());
    }

    debug_assert_eq!(out.len(), header_len);
    Ok(out)
}

// Callers check the slice length against the computed header length first.
fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
