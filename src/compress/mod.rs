//! Compression building blocks.
//!
//! The encoder proper lives in [`deflate`]; the remaining modules are its
//! collaborators: checksum, Huffman construction, LZ77 tokenization,
//! code-length run-length coding, and the static DEFLATE tables.

pub mod adler32;
pub mod deflate;
pub mod huffman;
pub mod lz77;
pub mod rle;
pub mod tables;

pub use adler32::{adler32, Adler32};
pub use deflate::{
    compress, deflate_zlib, deflate_zlib_with_stats, EncodeStats, Encoder, FlushKind, Mode, Status,
};
