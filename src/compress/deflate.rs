//! Streaming DEFLATE encoder with zlib framing (RFC 1950 + RFC 1951).
//!
//! The encoder is a pull-model state machine: the caller owns the input
//! and output views, grants budget with [`Encoder::refill`] and
//! [`Encoder::flush`], and repeatedly calls [`Encoder::eval`], which
//! advances by at most one logical DEFLATE field between suspension
//! checks. Stored, fixed-Huffman, and dynamic-Huffman blocks share one
//! emission envelope.

use crate::bits::BitSink;
use crate::compress::adler32::Adler32;
use crate::compress::huffman;
use crate::compress::lz77::{BlockTokens, Lz77Compressor, Token};
use crate::compress::rle::{self, RleSym};
use crate::compress::tables::{
    distance_to_code, length_to_code, CODE_LENGTH_ORDER, DISTANCE_BASE, DISTANCE_EXTRA,
    LENGTH_BASE, LENGTH_EXTRA,
};
use crate::error::{Error, Result};

/// Longest code the code-length alphabet can carry (its lengths travel in
/// 3-bit fields).
const MAX_TREE_CODE_LENGTH: u8 = 7;

/// Largest payload of a single stored block (16-bit LEN field).
const MAX_STORED_BLOCK: usize = 0xFFFF;

/// Block encoding strategy, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Raw stored blocks, no compression.
    Stored,
    /// LZ77 with the fixed Huffman tables.
    Fixed,
    /// LZ77 with per-block computed Huffman tables.
    #[default]
    Dynamic,
}

/// Flush request, consumed at the next block boundary.
///
/// All three close the current block and emit the empty stored sentinel
/// (`00 00 FF FF`); `Full` additionally forgets the LZ77 dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Byte-align the output so the decoder can see everything so far.
    Sync,
    /// Same wire behavior as `Sync`.
    Partial,
    /// `Sync` plus a dictionary reset.
    Full,
}

/// Result of one [`Encoder::eval`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Status {
    /// The stream is complete: final block and Adler-32 trailer written.
    Ok,
    /// Output budget exhausted: drain [`Encoder::contents`] bytes and
    /// call [`Encoder::flush`].
    Flush,
    /// Input exhausted: [`Encoder::refill`] (marking
    /// [`Encoder::last`] first if at end).
    Wait,
    /// Terminal failure: inspect [`Encoder::error`].
    Error,
}

/// Counters surfaced by the encoder, in the spirit of compression stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Uncompressed bytes consumed.
    pub bytes_in: u64,
    /// Stored blocks emitted (sync sentinels not included).
    pub stored_blocks: u32,
    /// Fixed-Huffman blocks emitted.
    pub fixed_blocks: u32,
    /// Dynamic-Huffman blocks emitted.
    pub dynamic_blocks: u32,
    /// Sync/partial/full flushes honored.
    pub sync_flushes: u32,
}

/// Per-mode block state.
#[derive(Debug)]
enum BlockState {
    Stored { buffer: Vec<u8>, filled: usize },
    Fixed { lz77: Lz77Compressor },
    Dynamic { lz77: Lz77Compressor },
}

/// Where the driver goes once the current block is fully emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterBlock {
    Continue,
    Sentinel,
    Trailer,
}

/// Continuation label: the step `eval` resumes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    HeaderCmf,
    HeaderFlg,
    Read,
    Flushing,
    BlockHeader,
    StoredHeader,
    StoredAlign,
    StoredLen,
    StoredNlen,
    StoredCopy,
    DynHlit,
    DynHdist,
    DynHclen,
    DynTrans,
    DynSym,
    DynSymExtra,
    Tokens,
    MatchLenExtra,
    MatchDist,
    MatchDistExtra,
    EndOfBlock,
    BlockDone,
    Align,
    TrailerHigh,
    TrailerLow,
    Done,
}

/// Scratch tables for one dynamic block, allocated on the first dynamic
/// close and zero-filled per block.
#[derive(Debug)]
struct DynScratch {
    lit_lengths: [u8; 286],
    lit_codes: [u16; 286],
    dist_lengths: [u8; 30],
    dist_codes: [u16; 30],
    tree_syms: Vec<RleSym>,
    tree_freqs: [u32; 19],
    tree_lengths: [u8; 19],
    tree_codes: [u16; 19],
    hlit: usize,
    hdist: usize,
    hclen: usize,
}

impl DynScratch {
    fn new() -> Self {
        Self {
            lit_lengths: [0; 286],
            lit_codes: [0; 286],
            dist_lengths: [0; 30],
            dist_codes: [0; 30],
            tree_syms: Vec::new(),
            tree_freqs: [0; 19],
            tree_lengths: [0; 19],
            tree_codes: [0; 19],
            hlit: 257,
            hdist: 1,
            hclen: 4,
        }
    }
}

/// Streaming zlib encoder.
///
/// ```
/// use zflate::compress::deflate::{deflate_zlib, Mode};
///
/// let stream = deflate_zlib(b"hello hello hello", 15, Mode::Dynamic).unwrap();
/// assert_eq!(stream[0], 0x78); // CMF: deflate, 32 KiB window
/// ```
#[derive(Debug)]
pub struct Encoder {
    window_bits: u8,
    mode: Mode,
    block: BlockState,
    sink: BitSink,
    adler: Adler32,
    step: Step,
    after: AfterBlock,
    bfinal: bool,
    sentinel: bool,
    last: bool,
    flush_request: Option<FlushKind>,
    inpos: usize,
    available: usize,
    // Emission progress for the block in flight.
    tokens: Vec<Token>,
    token_idx: usize,
    run_off: u32,
    tree_idx: usize,
    stored_from: usize,
    stored_chunk: usize,
    dyn_active: bool,
    scratch: Option<Box<DynScratch>>,
    stats: EncodeStats,
    error: Option<Error>,
}

impl Encoder {
    /// Create an encoder.
    ///
    /// `window_bits` (8-15) sizes the LZ77 window and the zlib CINFO
    /// field and is frozen afterwards. `output_capacity` is the size of
    /// the caller's output view; it seeds the write budget that
    /// [`flush`](Self::flush) replenishes.
    pub fn new(window_bits: u8, mode: Mode, output_capacity: usize) -> Result<Self> {
        if !(8..=15).contains(&window_bits) {
            return Err(Error::InvalidWindowBits(window_bits));
        }
        let block = match mode {
            Mode::Stored => BlockState::Stored {
                buffer: vec![0; 2 << window_bits],
                filled: 0,
            },
            Mode::Fixed => BlockState::Fixed {
                lz77: Lz77Compressor::new(window_bits),
            },
            Mode::Dynamic => BlockState::Dynamic {
                lz77: Lz77Compressor::new(window_bits),
            },
        };
        Ok(Self {
            window_bits,
            mode,
            block,
            sink: BitSink::new(output_capacity),
            adler: Adler32::new(),
            step: Step::HeaderCmf,
            after: AfterBlock::Continue,
            bfinal: false,
            sentinel: false,
            last: false,
            flush_request: None,
            inpos: 0,
            available: 0,
            tokens: Vec::new(),
            token_idx: 0,
            run_off: 0,
            tree_idx: 0,
            stored_from: 0,
            stored_chunk: 0,
            dyn_active: false,
            scratch: None,
            stats: EncodeStats::default(),
            error: None,
        })
    }

    /// The window bits chosen at construction.
    pub fn window_bits(&self) -> u8 {
        self.window_bits
    }

    /// The block mode chosen at construction.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> EncodeStats {
        self.stats
    }

    /// Bytes currently written into the output view, from offset 0.
    pub fn contents(&self) -> usize {
        self.sink.contents()
    }

    /// The terminal error, if `eval` returned [`Status::Error`].
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Tell the encoder `n` output bytes were drained.
    ///
    /// Rewinds the write cursor to offset 0 and returns `n` bytes of
    /// budget, so the caller must have consumed everything reported by
    /// [`contents`](Self::contents). Claiming more than was written is a
    /// terminal [`Error::BudgetUnderflow`].
    pub fn flush(&mut self, n: usize) {
        if self.error.is_some() {
            return;
        }
        let written = self.sink.contents();
        if n > written {
            self.error = Some(Error::BudgetUnderflow {
                claimed: n,
                written,
            });
            return;
        }
        self.sink.rewind(n);
    }

    /// Tell the encoder `n` fresh input bytes sit at the start of the
    /// input view. Refilling a closed stream is a terminal
    /// [`Error::BufferMissing`].
    pub fn refill(&mut self, n: usize) {
        if self.error.is_some() {
            return;
        }
        if self.step == Step::Done {
            self.error = Some(Error::BufferMissing);
            return;
        }
        self.inpos = 0;
        self.available += n;
    }

    /// Mark the next refill as terminal: the block closed after it drains
    /// carries BFINAL and the Adler-32 trailer follows.
    pub fn last(&mut self, is_last: bool) {
        self.last = is_last;
    }

    /// Request a flush, honored at the next block boundary.
    pub fn request_flush(&mut self, kind: FlushKind) {
        self.flush_request = Some(kind);
    }

    /// Advance the state machine.
    ///
    /// Suspends with [`Status::Flush`] when the output budget runs out
    /// and [`Status::Wait`] when input is needed; both leave all state
    /// intact for re-entry. `src` and `dst` must be the same views across
    /// calls, with `src` unchanged between a refill and the evals that
    /// consume it.
    pub fn eval(&mut self, src: &[u8], dst: &mut [u8]) -> Status {
        if self.error.is_some() {
            return Status::Error;
        }
        match self.run(src, dst) {
            Ok(status) => status,
            Err(e) => {
                self.error = Some(e);
                Status::Error
            }
        }
    }

    fn run(&mut self, src: &[u8], dst: &mut [u8]) -> Result<Status> {
        loop {
            match self.step {
                Step::HeaderCmf => {
                    if !self.sink.fits(dst, 8) {
                        return Ok(Status::Flush);
                    }
                    let cmf = 0x08 | ((self.window_bits - 8) << 4);
                    self.sink.add_bits(dst, cmf as u32, 8);
                    self.step = Step::HeaderFlg;
                }
                Step::HeaderFlg => {
                    if !self.sink.fits(dst, 8) {
                        return Ok(Status::Flush);
                    }
                    let cmf = 0x08u16 | (((self.window_bits - 8) as u16) << 4);
                    // FLEVEL=2, FDICT=0; FCHECK makes the pair a multiple
                    // of 31 (RFC 1950).
                    let base = 2u16 << 6;
                    let fcheck = (31 - (cmf * 256 + base) % 31) % 31;
                    self.sink.add_bits(dst, (base | fcheck) as u32, 8);
                    self.step = Step::Read;
                }
                Step::Read => {
                    if self.available > 0 {
                        let take = match &mut self.block {
                            BlockState::Stored { buffer, filled } => {
                                let take = (buffer.len() - *filled).min(self.available);
                                buffer[*filled..*filled + take]
                                    .copy_from_slice(&src[self.inpos..self.inpos + take]);
                                *filled += take;
                                take
                            }
                            BlockState::Fixed { lz77 } | BlockState::Dynamic { lz77 } => {
                                let take = self.available;
                                lz77.ingest(&src[self.inpos..self.inpos + take]);
                                take
                            }
                        };
                        self.adler.update(&src[self.inpos..self.inpos + take]);
                        self.inpos += take;
                        self.available -= take;
                        self.stats.bytes_in += take as u64;

                        // A full stored buffer auto-closes its block; any
                        // leftover input is consumed on the way back.
                        let stored_full = matches!(
                            &self.block,
                            BlockState::Stored { buffer, filled } if *filled == buffer.len()
                        );
                        if stored_full {
                            self.open_stored(false, AfterBlock::Continue);
                            continue;
                        }
                    }
                    if self.flush_request.is_some() {
                        self.step = Step::Flushing;
                    } else if self.last {
                        self.close_final()?;
                    } else {
                        return Ok(Status::Wait);
                    }
                }
                Step::Flushing => {
                    let empty = match &self.block {
                        BlockState::Stored { filled, .. } => *filled == 0,
                        BlockState::Fixed { lz77 } | BlockState::Dynamic { lz77 } => {
                            lz77.is_empty()
                        }
                    };
                    if empty {
                        self.begin_sentinel();
                    } else {
                        match &self.block {
                            BlockState::Stored { .. } => {
                                self.open_stored(false, AfterBlock::Sentinel)
                            }
                            _ => self.open_coded(false, AfterBlock::Sentinel)?,
                        }
                    }
                }
                Step::BlockHeader => {
                    if !self.sink.fits(dst, 3) {
                        return Ok(Status::Flush);
                    }
                    let btype = if self.dyn_active { 2 } else { 1 };
                    self.sink.add_bits(dst, self.bfinal as u32, 1);
                    self.sink.add_bits(dst, btype, 2);
                    self.step = if self.dyn_active {
                        Step::DynHlit
                    } else {
                        Step::Tokens
                    };
                }
                Step::StoredHeader => {
                    if !self.sink.fits(dst, 3) {
                        return Ok(Status::Flush);
                    }
                    let (chunk, fin) = if self.sentinel {
                        (0, false)
                    } else {
                        let BlockState::Stored { filled, .. } = &self.block else {
                            return Err(Error::InvariantViolation(
                                "stored emission without a stored buffer",
                            ));
                        };
                        let remaining = *filled - self.stored_from;
                        let chunk = remaining.min(MAX_STORED_BLOCK);
                        (chunk, self.bfinal && chunk == remaining)
                    };
                    self.stored_chunk = chunk;
                    if !self.sentinel {
                        self.stats.stored_blocks += 1;
                    }
                    self.sink.add_bits(dst, fin as u32, 1);
                    self.sink.add_bits(dst, 0, 2);
                    self.step = Step::StoredAlign;
                }
                Step::StoredAlign => {
                    if !self.sink.align(dst) {
                        return Ok(Status::Flush);
                    }
                    self.step = Step::StoredLen;
                }
                Step::StoredLen => {
                    if !self.sink.fits(dst, 16) {
                        return Ok(Status::Flush);
                    }
                    self.sink.put_short(dst, self.stored_chunk as u16);
                    self.step = Step::StoredNlen;
                }
                Step::StoredNlen => {
                    if !self.sink.fits(dst, 16) {
                        return Ok(Status::Flush);
                    }
                    self.sink.put_short(dst, !(self.stored_chunk as u16));
                    self.step = Step::StoredCopy;
                }
                Step::StoredCopy => {
                    while self.stored_chunk > 0 {
                        if !self.sink.drained(dst) {
                            return Ok(Status::Flush);
                        }
                        let BlockState::Stored { buffer, .. } = &self.block else {
                            return Err(Error::InvariantViolation(
                                "stored emission without a stored buffer",
                            ));
                        };
                        let end = self.stored_from + self.stored_chunk;
                        let taken = self
                            .sink
                            .put_slice(dst, &buffer[self.stored_from..end]);
                        if taken == 0 {
                            return Ok(Status::Flush);
                        }
                        self.stored_from += taken;
                        self.stored_chunk -= taken;
                    }
                    if self.sentinel {
                        self.finish_sentinel();
                        continue;
                    }
                    let BlockState::Stored { filled, .. } = &mut self.block else {
                        return Err(Error::InvariantViolation(
                            "stored emission without a stored buffer",
                        ));
                    };
                    if self.stored_from < *filled {
                        self.step = Step::StoredHeader;
                    } else {
                        *filled = 0;
                        self.stored_from = 0;
                        self.step = Step::BlockDone;
                    }
                }
                Step::DynHlit => {
                    let scratch = self.scratch()?;
                    let hlit = scratch.hlit;
                    if !self.sink.fits(dst, 5) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, (hlit - 257) as u32, 5);
                    self.step = Step::DynHdist;
                }
                Step::DynHdist => {
                    let hdist = self.scratch()?.hdist;
                    if !self.sink.fits(dst, 5) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, (hdist - 1) as u32, 5);
                    self.step = Step::DynHclen;
                }
                Step::DynHclen => {
                    let hclen = self.scratch()?.hclen;
                    if !self.sink.fits(dst, 4) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, (hclen - 4) as u32, 4);
                    self.tree_idx = 0;
                    self.step = Step::DynTrans;
                }
                Step::DynTrans => {
                    loop {
                        let scratch = self.scratch()?;
                        if self.tree_idx >= scratch.hclen {
                            self.tree_idx = 0;
                            self.step = Step::DynSym;
                            break;
                        }
                        let len = scratch.tree_lengths[CODE_LENGTH_ORDER[self.tree_idx]];
                        if !self.sink.fits(dst, 3) {
                            return Ok(Status::Flush);
                        }
                        self.sink.add_bits(dst, len as u32, 3);
                        self.tree_idx += 1;
                    }
                }
                Step::DynSym => {
                    loop {
                        let scratch = self.scratch()?;
                        if self.tree_idx >= scratch.tree_syms.len() {
                            self.token_idx = 0;
                            self.run_off = 0;
                            self.step = Step::Tokens;
                            break;
                        }
                        let s = scratch.tree_syms[self.tree_idx];
                        if s.sym >= 19 {
                            return Err(Error::InvariantViolation(
                                "code-length symbol out of range",
                            ));
                        }
                        let bits = scratch.tree_lengths[s.sym as usize];
                        let code = scratch.tree_codes[s.sym as usize];
                        if bits == 0 {
                            return Err(Error::InvariantViolation(
                                "code-length symbol without a code",
                            ));
                        }
                        if !self.sink.fits(dst, bits) {
                            return Ok(Status::Flush);
                        }
                        self.sink.add_bits(dst, reverse_bits(code, bits), bits);
                        if rle::extra_bit_count(s.sym) > 0 {
                            self.step = Step::DynSymExtra;
                            break;
                        }
                        self.tree_idx += 1;
                    }
                }
                Step::DynSymExtra => {
                    let s = {
                        let scratch = self.scratch()?;
                        scratch.tree_syms[self.tree_idx]
                    };
                    let n = rle::extra_bit_count(s.sym);
                    if !self.sink.fits(dst, n) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, s.extra as u32, n);
                    self.tree_idx += 1;
                    self.step = Step::DynSym;
                }
                Step::Tokens => {
                    loop {
                        if self.token_idx >= self.tokens.len() {
                            self.step = Step::EndOfBlock;
                            break;
                        }
                        match self.tokens[self.token_idx] {
                            Token::Literal { start, len } => {
                                if self.run_off >= len {
                                    self.run_off = 0;
                                    self.token_idx += 1;
                                    continue;
                                }
                                let byte = {
                                    let (BlockState::Fixed { lz77 }
                                    | BlockState::Dynamic { lz77 }) = &self.block
                                    else {
                                        return Err(Error::InvariantViolation(
                                            "literal token in stored mode",
                                        ));
                                    };
                                    lz77.literal_bytes(start, len)[self.run_off as usize]
                                };
                                let (code, bits) = self.litlen_code(byte as usize)?;
                                if !self.sink.fits(dst, bits) {
                                    return Ok(Status::Flush);
                                }
                                self.sink.add_bits(dst, reverse_bits(code, bits), bits);
                                self.run_off += 1;
                            }
                            Token::Match { length, .. } => {
                                let sym = 257 + length_to_code(length) as usize;
                                let (code, bits) = self.litlen_code(sym)?;
                                if !self.sink.fits(dst, bits) {
                                    return Ok(Status::Flush);
                                }
                                self.sink.add_bits(dst, reverse_bits(code, bits), bits);
                                self.step = Step::MatchLenExtra;
                                break;
                            }
                        }
                    }
                }
                Step::MatchLenExtra => {
                    let Token::Match { length, .. } = self.tokens[self.token_idx] else {
                        return Err(Error::InvariantViolation("match state without a match"));
                    };
                    let idx = length_to_code(length) as usize;
                    let n = LENGTH_EXTRA[idx];
                    if n > 0 {
                        if !self.sink.fits(dst, n) {
                            return Ok(Status::Flush);
                        }
                        self.sink
                            .add_bits(dst, (length - LENGTH_BASE[idx]) as u32, n);
                    }
                    self.step = Step::MatchDist;
                }
                Step::MatchDist => {
                    let Token::Match { distance, .. } = self.tokens[self.token_idx] else {
                        return Err(Error::InvariantViolation("match state without a match"));
                    };
                    let sym = distance_to_code(distance) as usize;
                    let (code, bits) = self.dist_code(sym)?;
                    if !self.sink.fits(dst, bits) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, reverse_bits(code, bits), bits);
                    self.step = Step::MatchDistExtra;
                }
                Step::MatchDistExtra => {
                    let Token::Match { distance, .. } = self.tokens[self.token_idx] else {
                        return Err(Error::InvariantViolation("match state without a match"));
                    };
                    let idx = distance_to_code(distance) as usize;
                    let n = DISTANCE_EXTRA[idx];
                    if n > 0 {
                        if !self.sink.fits(dst, n) {
                            return Ok(Status::Flush);
                        }
                        self.sink
                            .add_bits(dst, (distance - DISTANCE_BASE[idx]) as u32, n);
                    }
                    self.token_idx += 1;
                    self.step = Step::Tokens;
                }
                Step::EndOfBlock => {
                    let (code, bits) = self.litlen_code(256)?;
                    if !self.sink.fits(dst, bits) {
                        return Ok(Status::Flush);
                    }
                    self.sink.add_bits(dst, reverse_bits(code, bits), bits);
                    self.tokens.clear();
                    if let BlockState::Fixed { lz77 } | BlockState::Dynamic { lz77 } =
                        &mut self.block
                    {
                        lz77.compact();
                    }
                    self.step = Step::BlockDone;
                }
                Step::BlockDone => match self.after {
                    AfterBlock::Continue => self.step = Step::Read,
                    AfterBlock::Sentinel => self.begin_sentinel(),
                    AfterBlock::Trailer => self.step = Step::Align,
                },
                Step::Align => {
                    if !self.sink.align(dst) {
                        return Ok(Status::Flush);
                    }
                    self.step = Step::TrailerHigh;
                }
                Step::TrailerHigh => {
                    if !self.sink.fits(dst, 16) {
                        return Ok(Status::Flush);
                    }
                    let (hi, _) = self.adler.halves();
                    self.sink.put_short_msb(dst, hi);
                    self.step = Step::TrailerLow;
                }
                Step::TrailerLow => {
                    if !self.sink.fits(dst, 16) {
                        return Ok(Status::Flush);
                    }
                    let (_, lo) = self.adler.halves();
                    self.sink.put_short_msb(dst, lo);
                    self.step = Step::Done;
                }
                Step::Done => {
                    // Residual trailer bytes may still be pending when the
                    // budget ran dry on the last field.
                    if !self.sink.drained(dst) {
                        return Ok(Status::Flush);
                    }
                    return Ok(Status::Ok);
                }
            }
        }
    }

    fn scratch(&self) -> Result<&DynScratch> {
        self.scratch
            .as_deref()
            .ok_or(Error::InvariantViolation("dynamic block without tables"))
    }

    fn litlen_code(&self, sym: usize) -> Result<(u16, u8)> {
        let (code, bits) = if self.dyn_active {
            let scratch = self.scratch()?;
            (scratch.lit_codes[sym], scratch.lit_lengths[sym])
        } else {
            let c = huffman::fixed_literal_codes()[sym];
            (c.code, c.length)
        };
        if bits == 0 {
            return Err(Error::InvariantViolation(
                "literal/length symbol without a code",
            ));
        }
        Ok((code, bits))
    }

    fn dist_code(&self, sym: usize) -> Result<(u16, u8)> {
        let (code, bits) = if self.dyn_active {
            let scratch = self.scratch()?;
            (scratch.dist_codes[sym], scratch.dist_lengths[sym])
        } else {
            let c = huffman::fixed_distance_codes()[sym];
            (c.code, c.length)
        };
        if bits == 0 {
            return Err(Error::InvariantViolation("distance symbol without a code"));
        }
        Ok((code, bits))
    }

    fn close_final(&mut self) -> Result<()> {
        match &self.block {
            BlockState::Stored { .. } => {
                self.open_stored(true, AfterBlock::Trailer);
                Ok(())
            }
            _ => self.open_coded(true, AfterBlock::Trailer),
        }
    }

    fn open_stored(&mut self, is_final: bool, after: AfterBlock) {
        self.bfinal = is_final;
        self.after = after;
        self.sentinel = false;
        self.stored_from = 0;
        self.step = Step::StoredHeader;
    }

    fn open_coded(&mut self, is_final: bool, after: AfterBlock) -> Result<()> {
        let block = match &mut self.block {
            BlockState::Fixed { lz77 } | BlockState::Dynamic { lz77 } => lz77.take_block(),
            BlockState::Stored { .. } => {
                return Err(Error::InvariantViolation("coded close in stored mode"))
            }
        };
        self.bfinal = is_final;
        self.after = after;
        self.sentinel = false;
        self.token_idx = 0;
        self.run_off = 0;
        self.tree_idx = 0;

        // An empty token stream degenerates to the lone end-of-block
        // symbol; fixed coding spends 10 bits on it where a dynamic
        // header would cost dozens of bytes.
        if block.tokens.is_empty() || self.mode != Mode::Dynamic {
            self.dyn_active = false;
            self.stats.fixed_blocks += 1;
        } else {
            self.prepare_dynamic(&block);
            self.dyn_active = true;
            self.stats.dynamic_blocks += 1;
        }
        self.tokens = block.tokens;
        self.step = Step::BlockHeader;
        Ok(())
    }

    fn prepare_dynamic(&mut self, block: &BlockTokens) {
        let scratch = self
            .scratch
            .get_or_insert_with(|| Box::new(DynScratch::new()));

        huffman::build_lengths(
            &block.lit_len_freqs,
            huffman::MAX_CODE_LENGTH,
            &mut scratch.lit_lengths,
        );
        huffman::assign_codes(&scratch.lit_lengths, &mut scratch.lit_codes);
        huffman::build_lengths(
            &block.dist_freqs,
            huffman::MAX_CODE_LENGTH,
            &mut scratch.dist_lengths,
        );
        huffman::assign_codes(&scratch.dist_lengths, &mut scratch.dist_codes);

        let mut hlit = 286;
        while hlit > 257 && scratch.lit_lengths[hlit - 1] == 0 {
            hlit -= 1;
        }
        let mut hdist = 30;
        while hdist > 1 && scratch.dist_lengths[hdist - 1] == 0 {
            hdist -= 1;
        }

        rle::compress_code_lengths(
            &scratch.lit_lengths[..hlit],
            &scratch.dist_lengths[..hdist],
            &mut scratch.tree_syms,
            &mut scratch.tree_freqs,
        );
        huffman::build_lengths(
            &scratch.tree_freqs,
            MAX_TREE_CODE_LENGTH,
            &mut scratch.tree_lengths,
        );
        huffman::assign_codes(&scratch.tree_lengths, &mut scratch.tree_codes);

        let mut hclen = 19;
        while hclen > 4 && scratch.tree_lengths[CODE_LENGTH_ORDER[hclen - 1]] == 0 {
            hclen -= 1;
        }

        scratch.hlit = hlit;
        scratch.hdist = hdist;
        scratch.hclen = hclen;
    }

    fn begin_sentinel(&mut self) {
        self.sentinel = true;
        self.bfinal = false;
        self.after = AfterBlock::Continue;
        self.step = Step::StoredHeader;
    }

    fn finish_sentinel(&mut self) {
        self.sentinel = false;
        if matches!(self.flush_request, Some(FlushKind::Full)) {
            if let BlockState::Fixed { lz77 } | BlockState::Dynamic { lz77 } = &mut self.block {
                lz77.reset_dictionary();
            }
        }
        self.flush_request = None;
        self.stats.sync_flushes += 1;
        self.step = Step::Read;
    }
}

/// Reverse bits in a code (DEFLATE emits Huffman codes MSB-first inside
/// the LSB-first bit stream).
#[inline]
fn reverse_bits(code: u16, length: u8) -> u32 {
    let mut result = 0u32;
    let mut code = code as u32;
    for _ in 0..length {
        result = (result << 1) | (code & 1);
        code >>= 1;
    }
    result
}

/// Drive an encoder to completion with caller-supplied callbacks.
///
/// `refill` copies fresh input into the input view and returns how many
/// bytes it placed; returning 0 marks end of input. `drain` consumes the
/// written prefix of the output view and must take all of it.
pub fn compress<R, D>(
    encoder: &mut Encoder,
    src: &mut [u8],
    dst: &mut [u8],
    mut refill: R,
    mut drain: D,
) -> Result<()>
where
    R: FnMut(&mut [u8]) -> usize,
    D: FnMut(&[u8]) -> usize,
{
    loop {
        match encoder.eval(src, dst) {
            Status::Ok => {
                let n = encoder.contents();
                if n > 0 {
                    let taken = drain(&dst[..n]);
                    encoder.flush(taken);
                }
                return Ok(());
            }
            Status::Flush => {
                let n = encoder.contents();
                if n == 0 {
                    return Err(Error::InvariantViolation("no output budget to flush into"));
                }
                let taken = drain(&dst[..n]);
                if taken != n {
                    return Err(Error::InvariantViolation(
                        "output drain must take all contents",
                    ));
                }
                encoder.flush(taken);
            }
            Status::Wait => {
                let n = refill(src);
                if n == 0 {
                    encoder.last(true);
                }
                encoder.refill(n);
            }
            Status::Error => {
                return Err(encoder
                    .error()
                    .cloned()
                    .unwrap_or(Error::InvariantViolation("encoder failed without detail")))
            }
        }
    }
}

/// One-shot zlib compression into a fresh vector.
pub fn deflate_zlib(data: &[u8], window_bits: u8, mode: Mode) -> Result<Vec<u8>> {
    let (out, _) = deflate_zlib_with_stats(data, window_bits, mode)?;
    Ok(out)
}

/// One-shot zlib compression, also returning the encoder's counters.
pub fn deflate_zlib_with_stats(
    data: &[u8],
    window_bits: u8,
    mode: Mode,
) -> Result<(Vec<u8>, EncodeStats)> {
    let mut src = vec![0u8; 32 * 1024];
    let mut dst = vec![0u8; 32 * 1024];
    let mut encoder = Encoder::new(window_bits, mode, dst.len())?;
    let mut out = Vec::new();
    let mut offset = 0;

    compress(
        &mut encoder,
        &mut src,
        &mut dst,
        |buf| {
            let n = (data.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            n
        },
        |bytes| {
            out.extend_from_slice(bytes);
            bytes.len()
        },
    )?;

    Ok((out, encoder.stats()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive an encoder over `data` with the given view sizes, collecting
    /// every drained byte.
    fn stream(data: &[u8], window_bits: u8, mode: Mode, in_cap: usize, out_cap: usize) -> Vec<u8> {
        let mut encoder = Encoder::new(window_bits, mode, out_cap).unwrap();
        let mut src = vec![0u8; in_cap.max(1)];
        let mut dst = vec![0u8; out_cap];
        let mut out = Vec::new();
        let mut offset = 0;
        compress(
            &mut encoder,
            &mut src,
            &mut dst,
            |buf| {
                let n = (data.len() - offset).min(buf.len());
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                offset += n;
                n
            },
            |bytes| {
                out.extend_from_slice(bytes);
                bytes.len()
            },
        )
        .unwrap();
        out
    }

    #[test]
    fn test_empty_dynamic_stream_is_byte_exact() {
        let out = stream(&[], 15, Mode::Dynamic, 64, 64);
        assert_eq!(out, [0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_header_checksum_for_all_window_bits() {
        for wb in 8..=15u8 {
            let out = stream(b"abc", wb, Mode::Dynamic, 64, 64);
            assert_eq!(out[0] & 0x0F, 8, "CM must be deflate");
            assert_eq!(out[0] >> 4, wb - 8, "CINFO must encode window bits");
            assert_eq!(
                (out[0] as u32 * 256 + out[1] as u32) % 31,
                0,
                "FCHECK failed for window_bits {}",
                wb
            );
        }
    }

    #[test]
    fn test_window_bits_9_header() {
        let out = stream(b"x", 9, Mode::Dynamic, 64, 64);
        assert_eq!(out[0], 0x18);
    }

    #[test]
    fn test_invalid_window_bits_rejected() {
        assert_eq!(
            Encoder::new(7, Mode::Dynamic, 64).unwrap_err(),
            Error::InvalidWindowBits(7)
        );
        assert_eq!(
            Encoder::new(16, Mode::Dynamic, 64).unwrap_err(),
            Error::InvalidWindowBits(16)
        );
    }

    #[test]
    fn test_trailer_is_big_endian_adler() {
        let data = b"trailer check payload";
        let out = stream(data, 15, Mode::Dynamic, 64, 64);
        let expected = crate::compress::adler32::adler32(data);
        let tail = u32::from_be_bytes(out[out.len() - 4..].try_into().unwrap());
        assert_eq!(tail, expected);
    }

    #[test]
    fn test_stored_mode_len_nlen() {
        let data = vec![0u8; 32 * 1024];
        let out = stream(&data, 15, Mode::Stored, 4096, 4096);
        // zlib header, stored final block header byte, LEN, NLEN.
        assert_eq!(out[2], 0x01);
        assert_eq!(&out[3..5], &[0x00, 0x80], "LEN must be 0x8000");
        assert_eq!(&out[5..7], &[0xFF, 0x7F], "NLEN must be 0x7FFF");
        assert_eq!(&out[7..7 + data.len()], &data[..]);
        assert_eq!(out.len(), 7 + data.len() + 4);
    }

    #[test]
    fn test_stored_mode_splits_oversized_payloads() {
        // The stored buffer holds 2 << 15 bytes; LEN is 16-bit, so a full
        // buffer must be split across blocks.
        let data = vec![7u8; (2 << 15) + 10];
        let out = stream(&data, 15, Mode::Stored, 8192, 8192);
        let mut enc_stats_blocks = 0;
        // Walk the stored blocks and re-collect the payload.
        let mut collected = Vec::new();
        let mut pos = 2;
        loop {
            let header = out[pos];
            let len = u16::from_le_bytes([out[pos + 1], out[pos + 2]]) as usize;
            let nlen = u16::from_le_bytes([out[pos + 3], out[pos + 4]]);
            assert_eq!(!(len as u16), nlen);
            collected.extend_from_slice(&out[pos + 5..pos + 5 + len]);
            enc_stats_blocks += 1;
            pos += 5 + len;
            if header & 1 == 1 {
                break;
            }
        }
        assert_eq!(collected, data);
        assert!(enc_stats_blocks >= 2);
        assert_eq!(&out[pos..], &crate::compress::adler32::adler32(&data).to_be_bytes());
    }

    #[test]
    fn test_backpressure_byte_at_a_time_output() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 200) as u8).collect();
        let wide = stream(&data, 15, Mode::Dynamic, 1024, 8192);
        let tight = stream(&data, 15, Mode::Dynamic, 1024, 1);
        assert_eq!(wide, tight);
    }

    #[test]
    fn test_input_chunking_does_not_change_output() {
        let data: Vec<u8> = (0..10_000u32).map(|i| ((i * 13) % 251) as u8).collect();
        let whole = stream(&data, 15, Mode::Dynamic, data.len(), 4096);
        for in_cap in [1, 7, 300, 4096] {
            let chunked = stream(&data, 15, Mode::Dynamic, in_cap, 4096);
            assert_eq!(chunked, whole, "input view size {}", in_cap);
        }
    }

    #[test]
    fn test_sync_flush_emits_sentinel() {
        let mut encoder = Encoder::new(15, Mode::Dynamic, 4096).unwrap();
        let mut src = [0u8; 256];
        let mut dst = [0u8; 4096];
        let payload = b"sync flush payload with some repetition repetition";
        src[..payload.len()].copy_from_slice(payload);
        encoder.refill(payload.len());
        encoder.request_flush(FlushKind::Sync);

        let mut out = Vec::new();
        loop {
            match encoder.eval(&src, &mut dst) {
                Status::Wait => break,
                Status::Flush => {
                    let n = encoder.contents();
                    out.extend_from_slice(&dst[..n]);
                    encoder.flush(n);
                }
                other => panic!("unexpected status {:?}", other),
            }
        }
        let n = encoder.contents();
        out.extend_from_slice(&dst[..n]);
        encoder.flush(n);

        assert!(out.len() >= 4);
        assert_eq!(
            &out[out.len() - 4..],
            &[0x00, 0x00, 0xFF, 0xFF],
            "sync flush must end with the empty stored sentinel"
        );
        assert_eq!(encoder.stats().sync_flushes, 1);
    }

    #[test]
    fn test_two_sync_flushes_without_input() {
        let mut encoder = Encoder::new(15, Mode::Dynamic, 4096).unwrap();
        let mut src = [0u8; 64];
        let mut dst = [0u8; 4096];
        src[..5].copy_from_slice(b"hello");
        encoder.refill(5);

        let mut out = Vec::new();
        for _ in 0..2 {
            encoder.request_flush(FlushKind::Sync);
            loop {
                match encoder.eval(&src, &mut dst) {
                    Status::Wait => break,
                    Status::Flush => {
                        let n = encoder.contents();
                        out.extend_from_slice(&dst[..n]);
                        encoder.flush(n);
                    }
                    other => panic!("unexpected status {:?}", other),
                }
            }
            let n = encoder.contents();
            out.extend_from_slice(&dst[..n]);
            encoder.flush(n);
        }

        // The second flush found an empty block: sentinel only.
        assert_eq!(encoder.stats().sync_flushes, 2);
        assert_eq!(&out[out.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);
        let sentinels = out
            .windows(4)
            .filter(|w| w == &[0x00, 0x00, 0xFF, 0xFF])
            .count();
        assert!(sentinels >= 2, "expected two sentinels in {:02X?}", out);
    }

    #[test]
    fn test_budget_underflow_is_terminal() {
        let mut encoder = Encoder::new(15, Mode::Dynamic, 64).unwrap();
        let mut dst = [0u8; 64];
        let status = encoder.eval(&[], &mut dst);
        assert_eq!(status, Status::Wait);
        encoder.flush(encoder.contents() + 1);
        assert_eq!(encoder.eval(&[], &mut dst), Status::Error);
        assert!(matches!(
            encoder.error(),
            Some(Error::BudgetUnderflow { .. })
        ));
    }

    #[test]
    fn test_refill_after_close_is_terminal() {
        let mut encoder = Encoder::new(15, Mode::Dynamic, 64).unwrap();
        let mut dst = [0u8; 64];
        encoder.last(true);
        encoder.refill(0);
        assert_eq!(encoder.eval(&[], &mut dst), Status::Ok);
        encoder.refill(1);
        assert_eq!(encoder.eval(&[], &mut dst), Status::Error);
        assert_eq!(encoder.error(), Some(&Error::BufferMissing));
    }

    #[test]
    fn test_stats_count_block_kinds() {
        let data = vec![b'q'; 2048];
        let (_, stats) = deflate_zlib_with_stats(&data, 15, Mode::Dynamic).unwrap();
        assert_eq!(stats.bytes_in, 2048);
        assert_eq!(stats.dynamic_blocks, 1);
        assert_eq!(stats.stored_blocks, 0);

        let (_, stats) = deflate_zlib_with_stats(&data, 15, Mode::Fixed).unwrap();
        assert_eq!(stats.fixed_blocks, 1);

        let (_, stats) = deflate_zlib_with_stats(&data, 15, Mode::Stored).unwrap();
        assert_eq!(stats.stored_blocks, 1);
    }
}
