pub mod error;

/// Size of a page in bytes for the heap page chain.
///
/// _Note_: chosen as a power-of-two multiple of a typical disk block, per
/// the file format notes.
pub const HEAP_PAGE_SIZE: usize = 4096;

/// Number of slots held by a single Node page.
pub const NODE_SLOTS_PER_PAGE: usize = 64;

/// Number of slots held by a single Byte page.
pub const BYTE_SLOTS_PER_PAGE: usize = 64;

/// Magic bytes stamped at the start of every database file.
pub const MAGIC: [u8; 8] = *b"BINOMFVM";

/// On-disk format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;
