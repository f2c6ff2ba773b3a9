pub type HeaderResult<T> = std::result::Result<T, HeaderError>;

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("Malformed container header: expected at least {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },
    #[error("Entry {index} has a {actual} byte hash, header declares {expected}")]
    HashLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("A container holds at most {max} blocks, got {0}", max = u16::MAX)]
    TooManyEntries(usize),
}
