//! # zflate
//!
//! A minimal-dependency streaming DEFLATE encoder with zlib framing
//! (RFC 1950 + RFC 1951).
//!
//! The core is a pull-model state machine: the caller owns the input and
//! output buffers, the encoder borrows them per [`Encoder::eval`] call
//! and suspends cooperatively whenever it needs more input (`Wait`) or
//! more output room (`Flush`). Stored, fixed-Huffman, and
//! dynamic-Huffman block encodings share one emission path, and the
//! Adler-32 of the consumed input is appended big-endian after the final
//! block.
//!
//! ## Example
//!
//! ```rust
//! use zflate::{deflate_zlib, Mode};
//!
//! let stream = deflate_zlib(b"hello hello hello", 15, Mode::Dynamic).unwrap();
//! // 2-byte zlib header, DEFLATE payload, 4-byte Adler-32 trailer.
//! assert_eq!((stream[0] as u32 * 256 + stream[1] as u32) % 31, 0);
//! ```
//!
//! For streaming use, drive an [`Encoder`] directly or hand callbacks to
//! [`compress`](compress::deflate::compress).
//!
//! [`Encoder::eval`]: compress::deflate::Encoder::eval

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bits;
pub mod compress;
pub mod error;

pub use compress::deflate::{
    compress, deflate_zlib, deflate_zlib_with_stats, EncodeStats, Encoder, FlushKind, Mode, Status,
};
pub use error::{Error, Result};
