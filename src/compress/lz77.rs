//! Streaming LZ77 tokenizer with a configurable sliding window.
//!
//! Input bytes are ingested incrementally; the tokenizer owns its window
//! buffer, so emitted literal runs stay valid after the caller recycles
//! the input view. Match finding uses hash chains with lazy evaluation.

use crate::compress::tables::{distance_to_code, length_to_code};

/// Minimum match length worth encoding.
pub const MIN_MATCH_LENGTH: usize = 3;

/// Maximum match length (as per DEFLATE spec).
pub const MAX_MATCH_LENGTH: usize = 258;

/// Threshold for "good enough" match; skip lazy matching beyond this.
const GOOD_MATCH_LENGTH: usize = 16;

/// Hash table size (power of two for fast masking).
const HASH_SIZE: usize = 1 << 16;

/// Hash-chain probe depth per position.
const MAX_CHAIN_LENGTH: usize = 64;

/// Bytes withheld from tokenization during [`Lz77Compressor::ingest`] so
/// that match finding never observes an input chunk boundary. The tail is
/// drained at block close.
const LOOKAHEAD: usize = MAX_MATCH_LENGTH + MIN_MATCH_LENGTH + 1;

/// LZ77 token: a run of literals or a back-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A contiguous run of literal bytes, indexing the tokenizer's buffer
    /// (resolve with [`Lz77Compressor::literal_bytes`]).
    Literal {
        /// Offset of the run in the tokenizer buffer.
        start: u32,
        /// Run length in bytes.
        len: u32,
    },
    /// Back-reference match.
    Match {
        /// Match length (3-258).
        length: u16,
        /// Backward distance to the match (1 to window size).
        distance: u16,
    },
}

/// A closed block's token stream and symbol histograms.
///
/// `lit_len_freqs[256]` already includes the end-of-block marker the
/// emitter appends.
#[derive(Debug)]
pub struct BlockTokens {
    /// Ordered tokens of the block.
    pub tokens: Vec<Token>,
    /// Literal/length alphabet frequencies (286 symbols).
    pub lit_len_freqs: [u32; 286],
    /// Distance alphabet frequencies (30 symbols).
    pub dist_freqs: [u32; 30],
}

/// Hash 4-byte sequences for better distribution.
#[inline]
fn hash4(data: &[u8], pos: usize) -> usize {
    let val = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
    // Multiplicative hash; 0x1E35_A7BD is used in several LZ implementations.
    ((val.wrapping_mul(0x1E35_A7BD)) >> 16) as usize & (HASH_SIZE - 1)
}

/// Streaming LZ77 compressor with hash-chain matching.
#[derive(Debug)]
pub struct Lz77Compressor {
    window_bits: u8,
    window_size: usize,
    buf: Vec<u8>,
    pos: usize,
    head: Vec<i32>,
    prev: Vec<i32>,
    tokens: Vec<Token>,
    run: Option<(usize, usize)>,
    lit_len_freqs: [u32; 286],
    dist_freqs: [u32; 30],
}

impl Lz77Compressor {
    /// Create a tokenizer with a `1 << window_bits` byte sliding window.
    pub fn new(window_bits: u8) -> Self {
        debug_assert!((8..=15).contains(&window_bits));
        let window_size = 1usize << window_bits;
        Self {
            window_bits,
            window_size,
            buf: Vec::with_capacity(2 * window_size),
            pos: 0,
            head: vec![-1; HASH_SIZE],
            prev: vec![-1; window_size],
            tokens: Vec::new(),
            run: None,
            lit_len_freqs: [0; 286],
            dist_freqs: [0; 30],
        }
    }

    /// The window bits this tokenizer was built with.
    pub fn window_bits(&self) -> u8 {
        self.window_bits
    }

    /// Whether the current block holds no pending content.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.run.is_none() && self.pos >= self.buf.len()
    }

    /// Ingest a contiguous input range, extending the token stream.
    ///
    /// The trailing lookahead bytes stay untokenized until
    /// [`take_block`](Self::take_block), which makes the token stream
    /// independent of how the input was chunked.
    pub fn ingest(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        let stop = self.buf.len().saturating_sub(LOOKAHEAD);
        self.tokenize_to(stop);
    }

    /// Close the current block: drain the held-back tail, account for the
    /// end-of-block symbol, and move out tokens and histograms.
    ///
    /// Call [`compact`](Self::compact) once the block has been emitted.
    pub fn take_block(&mut self) -> BlockTokens {
        self.tokenize_to(self.buf.len());
        self.flush_run();

        let mut lit_len_freqs = self.lit_len_freqs;
        lit_len_freqs[256] += 1;
        let dist_freqs = self.dist_freqs;

        self.lit_len_freqs.fill(0);
        self.dist_freqs.fill(0);

        BlockTokens {
            tokens: std::mem::take(&mut self.tokens),
            lit_len_freqs,
            dist_freqs,
        }
    }

    /// Resolve a literal run emitted by this tokenizer.
    ///
    /// Valid until the next [`compact`](Self::compact) or
    /// [`reset_dictionary`](Self::reset_dictionary).
    pub fn literal_bytes(&self, start: u32, len: u32) -> &[u8] {
        &self.buf[start as usize..(start + len) as usize]
    }

    /// Drop processed bytes beyond one window and rebase the hash chains.
    ///
    /// Must only be called between blocks (after the tokens from
    /// [`take_block`](Self::take_block) have been fully emitted).
    pub fn compact(&mut self) {
        debug_assert!(self.tokens.is_empty() && self.run.is_none());
        debug_assert_eq!(self.pos, self.buf.len());

        if self.pos <= self.window_size {
            return;
        }
        let drop = self.pos - self.window_size;
        self.buf.drain(..drop);
        self.pos = self.window_size;

        self.head.fill(-1);
        self.prev.fill(-1);
        let insert_end = self.buf.len().saturating_sub(MIN_MATCH_LENGTH);
        for i in 0..insert_end {
            self.insert_hash(i);
        }
    }

    /// Forget all history (zlib full-flush semantics).
    pub fn reset_dictionary(&mut self) {
        debug_assert!(self.tokens.is_empty() && self.run.is_none());
        self.buf.clear();
        self.pos = 0;
        self.head.fill(-1);
        self.prev.fill(-1);
    }

    fn tokenize_to(&mut self, stop: usize) {
        while self.pos < stop {
            let pos = self.pos;
            let best = self.find_best_match(pos);

            if let Some((length, distance)) = best {
                let mut inserted_first = false;

                // Defer to a better match at the next position, but skip
                // the probe for matches already "good enough" (zlib's
                // lazy-match heuristic).
                if length < GOOD_MATCH_LENGTH && pos + 1 < self.buf.len() {
                    self.insert_hash(pos);
                    inserted_first = true;

                    if let Some((next_length, _)) = self.find_best_match(pos + 1) {
                        if next_length > length + 1 {
                            self.push_literal(pos);
                            self.pos += 1;
                            continue;
                        }
                    }
                }

                self.push_match(length as u16, distance as u16);
                let skip = if inserted_first { 1 } else { 0 };
                for i in skip..length {
                    self.insert_hash(pos + i);
                }
                self.pos += length;
            } else {
                self.push_literal(pos);
                self.insert_hash(pos);
                self.pos += 1;
            }
        }
    }

    fn push_literal(&mut self, pos: usize) {
        self.lit_len_freqs[self.buf[pos] as usize] += 1;
        if let Some((start, len)) = &mut self.run {
            if *start + *len == pos {
                *len += 1;
                return;
            }
        }
        self.flush_run();
        self.run = Some((pos, 1));
    }

    fn push_match(&mut self, length: u16, distance: u16) {
        self.flush_run();
        self.lit_len_freqs[257 + length_to_code(length) as usize] += 1;
        self.dist_freqs[distance_to_code(distance) as usize] += 1;
        self.tokens.push(Token::Match { length, distance });
    }

    fn flush_run(&mut self) {
        if let Some((start, len)) = self.run.take() {
            self.tokens.push(Token::Literal {
                start: start as u32,
                len: len as u32,
            });
        }
    }

    /// Find the best match at the given position.
    fn find_best_match(&self, pos: usize) -> Option<(usize, usize)> {
        if pos + MIN_MATCH_LENGTH > self.buf.len() {
            return None;
        }

        let data = &self.buf[..];
        let hash = hash4_checked(data, pos)?;
        let mut chain_pos = self.head[hash];
        let mut best_length = MIN_MATCH_LENGTH - 1;
        let mut best_distance = 0;

        let max_distance = pos.min(self.window_size);
        let mut chain_remaining = MAX_CHAIN_LENGTH;

        // Quick-rejection prefix for candidates.
        let target_prefix = u32::from_le_bytes([
            data[pos],
            data[pos + 1],
            data[pos + 2],
            data[pos + 3],
        ]);

        while chain_pos >= 0 && chain_remaining > 0 {
            let match_pos = chain_pos as usize;
            if match_pos >= pos {
                break;
            }
            let distance = pos - match_pos;
            if distance > max_distance {
                break;
            }

            let cand = u32::from_le_bytes([
                data[match_pos],
                data[match_pos + 1],
                data[match_pos + 2],
                data[match_pos + 3],
            ]);
            if cand != target_prefix {
                chain_pos = self.prev[match_pos % self.window_size];
                chain_remaining -= 1;
                continue;
            }

            let length = match_length(data, match_pos, pos);
            if length > best_length {
                best_length = length;
                best_distance = distance;
                if length >= MAX_MATCH_LENGTH {
                    break;
                }
            }

            chain_pos = self.prev[match_pos % self.window_size];
            chain_remaining -= 1;
        }

        if best_length >= MIN_MATCH_LENGTH {
            Some((best_length, best_distance))
        } else {
            None
        }
    }

    /// Insert a position into the hash chains.
    #[inline]
    fn insert_hash(&mut self, pos: usize) {
        if pos + MIN_MATCH_LENGTH >= self.buf.len() {
            return;
        }
        let hash = hash4(&self.buf, pos);
        self.prev[pos % self.window_size] = self.head[hash];
        self.head[hash] = pos as i32;
    }
}

#[inline]
fn hash4_checked(data: &[u8], pos: usize) -> Option<usize> {
    if pos + 4 > data.len() {
        return None;
    }
    Some(hash4(data, pos))
}

/// Match length between two positions, comparing 8 bytes at a time.
#[inline]
fn match_length(data: &[u8], pos1: usize, pos2: usize) -> usize {
    let max_len = (data.len() - pos2).min(MAX_MATCH_LENGTH);
    let mut length = 0;

    while length + 8 <= max_len {
        let a = u64::from_ne_bytes(data[pos1 + length..pos1 + length + 8].try_into().unwrap());
        let b = u64::from_ne_bytes(data[pos2 + length..pos2 + length + 8].try_into().unwrap());
        if a != b {
            let xor = a ^ b;
            #[cfg(target_endian = "little")]
            {
                length += (xor.trailing_zeros() / 8) as usize;
            }
            #[cfg(target_endian = "big")]
            {
                length += (xor.leading_zeros() / 8) as usize;
            }
            return length;
        }
        length += 8;
    }

    while length < max_len && data[pos1 + length] == data[pos2 + length] {
        length += 1;
    }

    length
}
