//! Run-length compression of code-length vectors (RFC 1951, 3.2.7).
//!
//! A dynamic block transmits its literal/length and distance code lengths
//! as one concatenated vector, condensed into the 19-symbol code-length
//! alphabet: 0-15 are literal lengths, 16 repeats the previous length
//! 3-6 times, 17 and 18 repeat zero 3-10 and 11-138 times.

/// One emitted code-length symbol with its pre-biased extra value.
///
/// `extra` is meaningful only for symbols 16 (`count - 3`, 2 bits),
/// 17 (`count - 3`, 3 bits) and 18 (`count - 11`, 7 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleSym {
    /// Code-length alphabet symbol, 0-18.
    pub sym: u8,
    /// Extra-bits value accompanying a repeat symbol.
    pub extra: u8,
}

impl RleSym {
    fn plain(sym: u8) -> Self {
        Self { sym, extra: 0 }
    }
}

/// Extra-bit count carried by a code-length symbol.
#[inline]
pub fn extra_bit_count(sym: u8) -> u8 {
    match sym {
        16 => 2,
        17 => 3,
        18 => 7,
        _ => 0,
    }
}

/// Compress the concatenated `lit` + `dist` length vector into the
/// code-length alphabet, appending symbols to `syms` and counting each
/// emitted symbol (not its extras) in `freqs`.
pub fn compress_code_lengths(
    lit: &[u8],
    dist: &[u8],
    syms: &mut Vec<RleSym>,
    freqs: &mut [u32; 19],
) {
    syms.clear();
    freqs.fill(0);

    let mut emit = |s: RleSym, syms: &mut Vec<RleSym>| {
        freqs[s.sym as usize] += 1;
        syms.push(s);
    };

    let combined = lit.iter().chain(dist.iter()).copied();
    let mut pending: Option<(u8, usize)> = None; // (value, run length)

    let mut flush_run = |value: u8, mut run: usize, syms: &mut Vec<RleSym>| {
        if value == 0 {
            if run < 3 {
                for _ in 0..run {
                    emit(RleSym::plain(0), syms);
                }
                return;
            }
            while run > 0 {
                if run <= 10 {
                    emit(
                        RleSym {
                            sym: 17,
                            extra: (run - 3) as u8,
                        },
                        syms,
                    );
                    run = 0;
                } else {
                    let mut chunk = run.min(138);
                    // A leftover of 1 or 2 zeros could not be re-coded;
                    // shorten the repeat so the remainder stays >= 3.
                    if matches!(run - chunk, 1 | 2) {
                        chunk -= 3;
                    }
                    emit(
                        RleSym {
                            sym: 18,
                            extra: (chunk - 11) as u8,
                        },
                        syms,
                    );
                    run -= chunk;
                }
            }
        } else {
            emit(RleSym::plain(value), syms);
            let mut rem = run - 1;
            if rem < 3 {
                for _ in 0..rem {
                    emit(RleSym::plain(value), syms);
                }
                return;
            }
            while rem >= 3 {
                let mut chunk = rem.min(6);
                if matches!(rem - chunk, 1 | 2) {
                    chunk = rem - 3;
                }
                emit(
                    RleSym {
                        sym: 16,
                        extra: (chunk - 3) as u8,
                    },
                    syms,
                );
                rem -= chunk;
            }
            for _ in 0..rem {
                emit(RleSym::plain(value), syms);
            }
        }
    };

    for value in combined {
        match pending {
            Some((prev, run)) if prev == value => pending = Some((prev, run + 1)),
            Some((prev, run)) => {
                flush_run(prev, run, syms);
                pending = Some((value, 1));
            }
            None => pending = Some((value, 1)),
        }
    }
    if let Some((value, run)) = pending {
        flush_run(value, run, syms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress(lit: &[u8], dist: &[u8]) -> (Vec<RleSym>, [u32; 19]) {
        let mut syms = Vec::new();
        let mut freqs = [0u32; 19];
        compress_code_lengths(lit, dist, &mut syms, &mut freqs);
        (syms, freqs)
    }

    /// Expand an RLE stream back into lengths.
    fn expand(syms: &[RleSym]) -> Vec<u8> {
        let mut out = Vec::new();
        for s in syms {
            match s.sym {
                0..=15 => out.push(s.sym),
                16 => {
                    let prev = *out.last().expect("16 with no previous length");
                    for _ in 0..s.extra + 3 {
                        out.push(prev);
                    }
                }
                17 => out.extend(std::iter::repeat(0).take(s.extra as usize + 3)),
                18 => out.extend(std::iter::repeat(0).take(s.extra as usize + 11)),
                _ => panic!("invalid symbol"),
            }
        }
        out
    }

    #[test]
    fn test_short_runs_stay_literal() {
        let (syms, freqs) = compress(&[5, 5, 7], &[3]);
        assert_eq!(
            syms,
            vec![
                RleSym::plain(5),
                RleSym::plain(5),
                RleSym::plain(7),
                RleSym::plain(3),
            ]
        );
        assert_eq!(freqs[5], 2);
        assert_eq!(freqs[7], 1);
        assert_eq!(freqs[3], 1);
    }

    #[test]
    fn test_repeat_previous() {
        // 5 followed by 5 more copies: literal + one 16 with count 5
        let (syms, freqs) = compress(&[5, 5, 5, 5, 5, 5], &[]);
        assert_eq!(syms, vec![RleSym::plain(5), RleSym { sym: 16, extra: 2 }]);
        assert_eq!(freqs[16], 1);
    }

    #[test]
    fn test_zero_runs_pick_largest_symbol() {
        let (syms, _) = compress(&[0, 0, 0], &[]);
        assert_eq!(syms, vec![RleSym { sym: 17, extra: 0 }]);

        let (syms, _) = compress(&vec![0; 10], &[]);
        assert_eq!(syms, vec![RleSym { sym: 17, extra: 7 }]);

        let (syms, _) = compress(&vec![0; 11], &[]);
        assert_eq!(syms, vec![RleSym { sym: 18, extra: 0 }]);

        let (syms, _) = compress(&vec![0; 138], &[]);
        assert_eq!(syms, vec![RleSym { sym: 18, extra: 127 }]);
    }

    #[test]
    fn test_no_stranded_remainder() {
        // 139 zeros: a greedy 138 would strand one zero, so the first
        // repeat is shortened to 135 and the remainder coded as 17.
        let (syms, _) = compress(&vec![0; 139], &[]);
        assert_eq!(
            syms,
            vec![RleSym { sym: 18, extra: 124 }, RleSym { sym: 17, extra: 1 }]
        );
        assert_eq!(expand(&syms).len(), 139);

        // Same rule for repeats of a non-zero value: 1 + 7 copies.
        let (syms, _) = compress(&vec![4; 8], &[]);
        assert_eq!(
            syms,
            vec![
                RleSym::plain(4),
                RleSym { sym: 16, extra: 1 },
                RleSym { sym: 16, extra: 0 },
            ]
        );
        assert_eq!(expand(&syms), vec![4; 8]);
    }

    #[test]
    fn test_runs_cross_the_alphabet_boundary() {
        // Trailing zeros of the literal vector merge with leading zeros
        // of the distance vector.
        let (syms, _) = compress(&[8, 0, 0], &[0, 0, 0]);
        assert_eq!(syms, vec![RleSym::plain(8), RleSym { sym: 17, extra: 2 }]);
    }

    #[test]
    fn test_expansion_roundtrip() {
        let lit: Vec<u8> = [
            vec![8u8; 20],
            vec![0u8; 50],
            vec![9u8; 7],
            vec![0u8; 140],
            vec![7u8, 7, 7],
        ]
        .concat();
        let dist = vec![5u8; 4];
        let (syms, freqs) = compress(&lit, &dist);

        let expanded = expand(&syms);
        assert_eq!(expanded, [lit.clone(), dist.clone()].concat());
        assert_eq!(freqs.iter().sum::<u32>() as usize, syms.len());
    }
}
