use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("container size {0} is not a whole number of pages")]
    BadSize(u64),

    #[error("page {page} failed checksum: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        page: u32,
        expected: u32,
        actual: u32,
    },

    #[error("offset {0} is out of range")]
    OutOfRange(u64),

    #[error("no entry at path {0:?}")]
    NotFound(String),

    #[error("a non-final component of {0:?} is not a folder")]
    NotADirectory(String),

    #[error("the file system backing this entry was dropped")]
    Closed,

    #[error("malformed {0}")]
    Malformed(&'static str),
}
