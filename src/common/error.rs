use thiserror::Error;

/// Errors surfaced by the file virtual memory manager.
///
/// Every fallible entry point on [`crate::FileVirtualMemoryController`]
/// returns one of these. Nothing is retried internally except the bounded
/// allocator miss -> grow-chain -> retry sequence used by `alloc_node` and
/// `alloc_heap`, which never surfaces as an error.
#[derive(Error, Debug)]
pub enum FvmError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad virtual index {index} for {space} space")]
    BadVirtualIndex { index: u64, space: &'static str },

    #[error("inconsistent on-disk state: {0}")]
    InconsistentOnDisk(String),

    #[error("access past declared size: offset {offset} len {len} size {size}")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    #[error("bad file magic")]
    BadMagic,

    #[error("unsupported on-disk version {0}")]
    UnsupportedVersion(u32),
}
