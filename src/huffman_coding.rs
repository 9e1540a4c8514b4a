#![forbid(unsafe_code)]

use std::{collections::HashMap, convert::TryFrom, io::BufRead, sync::OnceLock};

use anyhow::Result;
use thiserror::Error;

use crate::bit_reader::{BitReader, BitSequence};

////////////////////////////////////////////////////////////////////////////////

/// A code length vector that does not describe a complete Huffman tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeTreeError {
    #[error("code lengths produce an over-full huffman tree")]
    OverFull,
    #[error("code lengths produce an under-full huffman tree")]
    UnderFull,
    #[error("no previous code length to repeat")]
    NoPreviousLength,
    #[error("code length run exceeds the declared code count")]
    RunOverflow,
}

////////////////////////////////////////////////////////////////////////////////

/// Reads the literal/length and distance code declarations of a dynamic
/// block and builds both decoders.
pub fn decode_litlen_distance_trees<T: BufRead>(
    bit_reader: &mut BitReader<T>,
) -> Result<(HuffmanCoding<LitLenToken>, DistanceCode)> {
    // See RFC 1951, section 3.2.7.
    let num_litlen = bit_reader.read_bits(5)?.bits() as usize + 257;
    let num_dist = bit_reader.read_bits(5)?.bits() as usize + 1;
    let num_code_len = bit_reader.read_bits(4)?.bits() as usize + 4;

    // The code length code lengths arrive in this fixed shuffled order.
    const POS_ORDER: [usize; 19] = [
        16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
    ];

    let mut code_len_lengths = [0u8; 19];
    for &pos in POS_ORDER.iter().take(num_code_len) {
        code_len_lengths[pos] = bit_reader.read_bits(3)?.bits() as u8;
    }

    let code_len_code = HuffmanCoding::<TreeCodeToken>::from_lengths(&code_len_lengths)?;

    // The literal/length and distance lengths form one sequence: a run may
    // start in the first part and finish in the second, so both are read in
    // a single pass and split afterwards.
    let total = num_litlen + num_dist;
    let mut code_lengths: Vec<u8> = Vec::with_capacity(total);

    while code_lengths.len() < total {
        match code_len_code.read_symbol(bit_reader)? {
            TreeCodeToken::Length(len) => code_lengths.push(len),

            TreeCodeToken::CopyPrev => {
                let prev = match code_lengths.last() {
                    Some(&len) => len,
                    None => return Err(CodeTreeError::NoPreviousLength.into()),
                };
                let run = 3 + bit_reader.read_bits(2)?.bits() as usize;
                if code_lengths.len() + run > total {
                    return Err(CodeTreeError::RunOverflow.into());
                }
                code_lengths.extend(std::iter::repeat(prev).take(run));
            }

            TreeCodeToken::RepeatZero { base, extra_bits } => {
                let extra = bit_reader.read_bits(extra_bits)?.bits() as u16;
                let run = (base + extra) as usize;
                if code_lengths.len() + run > total {
                    return Err(CodeTreeError::RunOverflow.into());
                }
                code_lengths.extend(std::iter::repeat(0).take(run));
            }
        }
    }

    let litlen_code = HuffmanCoding::<LitLenToken>::from_lengths(&code_lengths[..num_litlen])?;
    let dist_code = build_distance_code(&code_lengths[num_litlen..])?;

    Ok((litlen_code, dist_code))
}

fn build_distance_code(dist_lengths: &[u8]) -> Result<DistanceCode> {
    // A single zero length declares that the block carries no distance code
    // at all; such a block must consist of literals only.
    if matches!(dist_lengths, [0]) {
        return Ok(DistanceCode::Empty);
    }

    let one_count = dist_lengths.iter().filter(|&&len| len == 1).count();
    let other_positive = dist_lengths.iter().filter(|&&len| len > 1).count();

    // A lone length-1 code is under-full as declared. It is accepted by
    // padding the tree with a dummy sibling at symbol 31; decoding the dummy
    // hits the reserved-symbol check.
    let code = if one_count == 1 && other_positive == 0 {
        let mut padded = [0u8; 32];
        padded[..dist_lengths.len()].copy_from_slice(dist_lengths);
        padded[31] = 1;
        HuffmanCoding::from_lengths(&padded)?
    } else {
        HuffmanCoding::from_lengths(dist_lengths)?
    };

    Ok(DistanceCode::Present(code))
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeCodeToken {
    Length(u8),
    CopyPrev,
    RepeatZero { base: u16, extra_bits: u8 },
}

impl TryFrom<HuffmanCodeWord> for TreeCodeToken {
    type Error = anyhow::Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        // See RFC 1951, section 3.2.7.
        let v = value.0;

        Ok(match v {
            0..=15 => Self::Length(v as u8),
            16 => Self::CopyPrev,
            17 => Self::RepeatZero {
                base: 3,
                extra_bits: 3,
            },
            18 => Self::RepeatZero {
                base: 11,
                extra_bits: 7,
            },
            _ => anyhow::bail!("code length symbol out of range: {}", v),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LitLenToken {
    Literal(u8),
    EndOfBlock,
    Length { base: u16, extra_bits: u8 },
    /// Symbols 286 and 287 take part in the fixed code but must never appear
    /// in a stream.
    Reserved(u16),
}

impl TryFrom<HuffmanCodeWord> for LitLenToken {
    type Error = anyhow::Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        // See RFC 1951, section 3.2.5.
        let v = value.0;

        Ok(match v {
            0..=255 => Self::Literal(v as u8),
            256 => Self::EndOfBlock,
            257..=264 => Self::Length {
                base: 3 + (v - 257),
                extra_bits: 0,
            },
            265..=268 => Self::Length {
                base: 11 + 2 * (v - 265),
                extra_bits: 1,
            },
            269..=272 => Self::Length {
                base: 19 + 4 * (v - 269),
                extra_bits: 2,
            },
            273..=276 => Self::Length {
                base: 35 + 8 * (v - 273),
                extra_bits: 3,
            },
            277..=280 => Self::Length {
                base: 67 + 16 * (v - 277),
                extra_bits: 4,
            },
            281..=284 => Self::Length {
                base: 131 + 32 * (v - 281),
                extra_bits: 5,
            },
            285 => Self::Length {
                base: 258,
                extra_bits: 0,
            },
            286..=287 => Self::Reserved(v),
            _ => anyhow::bail!("literal/length symbol out of range: {}", v),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceToken {
    Distance { base: u16, extra_bits: u8 },
    /// Symbols 30 and 31 are reserved, as is the dummy sibling a padded
    /// single-symbol code decodes to.
    Reserved(u16),
}

impl TryFrom<HuffmanCodeWord> for DistanceToken {
    type Error = anyhow::Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        // See RFC 1951, section 3.2.5.
        let v = value.0;

        Ok(match v {
            0..=3 => Self::Distance {
                base: 1 + v,
                extra_bits: 0,
            },
            4..=29 => {
                let extra_bits = (v / 2 - 1) as u8;
                Self::Distance {
                    base: ((v % 2 + 2) << extra_bits) + 1,
                    extra_bits,
                }
            }
            30..=31 => Self::Reserved(v),
            _ => anyhow::bail!("distance symbol out of range: {}", v),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The distance code of a block. A dynamic block may declare that it has
/// none, in which case any length symbol in the block body is an error.
#[derive(Debug)]
pub enum DistanceCode {
    Present(HuffmanCoding<DistanceToken>),
    Empty,
}

////////////////////////////////////////////////////////////////////////////////

const MAX_BITS: u8 = 15;

pub struct HuffmanCodeWord(pub u16);

/// A canonical Huffman decoder: a map from length-tagged code values to
/// decoded tokens. Tagging the keys with their length keeps codes like `0`
/// and `00` distinct.
#[derive(Debug)]
pub struct HuffmanCoding<T> {
    map: HashMap<BitSequence, T>,
}

impl<T> HuffmanCoding<T>
where
    T: Copy + TryFrom<HuffmanCodeWord, Error = anyhow::Error>,
{
    pub fn new(map: HashMap<BitSequence, T>) -> Self {
        Self { map }
    }

    pub fn decode_symbol(&self, seq: BitSequence) -> Option<T> {
        self.map.get(&seq).copied()
    }

    /// Reads bits one at a time, accumulating the code value MSB-first,
    /// until a code word matches. A complete code always matches within
    /// `MAX_BITS` bits.
    pub fn read_symbol<U: BufRead>(&self, bit_reader: &mut BitReader<U>) -> Result<T> {
        let mut cur_bits = BitSequence::new(0, 0);
        loop {
            cur_bits = cur_bits.concat(bit_reader.pop_bit()?);
            if let Some(symbol) = self.decode_symbol(cur_bits) {
                return Ok(symbol);
            }

            if cur_bits.len() > MAX_BITS {
                break;
            }
        }

        anyhow::bail!("could not decode symbol: cur_bits = {:b}", cur_bits.bits());
    }

    /// Builds the decoder from a vector of per-symbol code lengths, length 0
    /// meaning "no code". Symbols are assigned code values in ascending
    /// `(length, symbol)` order, and the vector must describe a complete
    /// tree: walking the lengths must fill the value space exactly.
    pub fn from_lengths(code_lengths: &[u8]) -> Result<Self> {
        let mut map = HashMap::<BitSequence, T>::new();
        let mut next_code = 0u64;

        for len in 1..=MAX_BITS {
            next_code <<= 1;

            for (symbol, _) in code_lengths
                .iter()
                .enumerate()
                .filter(|&(_, &length)| length == len)
            {
                if next_code >= 1 << len {
                    return Err(CodeTreeError::OverFull.into());
                }

                let token = T::try_from(HuffmanCodeWord(symbol as u16))?;
                map.insert(BitSequence::new(next_code, len), token);
                next_code += 1;
            }
        }

        if next_code != 1 << MAX_BITS {
            return Err(CodeTreeError::UnderFull.into());
        }

        Ok(Self::new(map))
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The fixed literal/length code: lengths 8 for 0..=143, 9 for 144..=255,
/// 7 for 256..=279, 8 for 280..=287.
pub fn fixed_litlen_code() -> &'static HuffmanCoding<LitLenToken> {
    static CODE: OnceLock<HuffmanCoding<LitLenToken>> = OnceLock::new();
    CODE.get_or_init(|| {
        let mut lengths = [8u8; 288];
        lengths[144..256].fill(9);
        lengths[256..280].fill(7);
        HuffmanCoding::from_lengths(&lengths).expect("fixed literal/length code is complete")
    })
}

/// The fixed distance code: 32 symbols, all of length 5.
pub fn fixed_distance_code() -> &'static DistanceCode {
    static CODE: OnceLock<DistanceCode> = OnceLock::new();
    CODE.get_or_init(|| {
        let code =
            HuffmanCoding::from_lengths(&[5u8; 32]).expect("fixed distance code is complete");
        DistanceCode::Present(code)
    })
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Value(u16);

    impl TryFrom<HuffmanCodeWord> for Value {
        type Error = anyhow::Error;

        fn try_from(x: HuffmanCodeWord) -> Result<Self> {
            Ok(Self(x.0))
        }
    }

    fn tree_error(err: anyhow::Error) -> CodeTreeError {
        err.downcast::<CodeTreeError>().expect("code tree error")
    }

    #[test]
    fn from_lengths() -> Result<()> {
        let code = HuffmanCoding::<Value>::from_lengths(&[2, 3, 4, 3, 3, 4, 2])?;

        assert_eq!(
            code.decode_symbol(BitSequence::new(0b00, 2)),
            Some(Value(0)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b100, 3)),
            Some(Value(1)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b1110, 4)),
            Some(Value(2)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b101, 3)),
            Some(Value(3)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b110, 3)),
            Some(Value(4)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b1111, 4)),
            Some(Value(5)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b01, 2)),
            Some(Value(6)),
        );

        assert_eq!(code.decode_symbol(BitSequence::new(0b0, 1)), None);
        assert_eq!(code.decode_symbol(BitSequence::new(0b10, 2)), None);
        assert_eq!(code.decode_symbol(BitSequence::new(0b111, 3)), None);

        Ok(())
    }

    #[test]
    fn from_lengths_single_bit() -> Result<()> {
        let code = HuffmanCoding::<Value>::from_lengths(&[1, 1])?;

        assert_eq!(code.decode_symbol(BitSequence::new(0b0, 1)), Some(Value(0)));
        assert_eq!(code.decode_symbol(BitSequence::new(0b1, 1)), Some(Value(1)));

        Ok(())
    }

    #[test]
    fn from_lengths_with_zeros() -> Result<()> {
        // Zero-length symbols get no code at all.
        let code = HuffmanCoding::<Value>::from_lengths(&[2, 2, 1, 0, 0, 0])?;

        assert_eq!(code.decode_symbol(BitSequence::new(0b0, 1)), Some(Value(2)));
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b10, 2)),
            Some(Value(0)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b11, 2)),
            Some(Value(1)),
        );
        assert_eq!(code.decode_symbol(BitSequence::new(0b1, 1)), None);

        Ok(())
    }

    #[test]
    fn from_lengths_over_full() {
        let err = HuffmanCoding::<Value>::from_lengths(&[1, 1, 1]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::OverFull);

        let err = HuffmanCoding::<Value>::from_lengths(&[1, 1, 2, 2, 3, 3, 3, 3]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::OverFull);
    }

    #[test]
    fn from_lengths_under_full() {
        let err = HuffmanCoding::<Value>::from_lengths(&[0, 2, 0]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::UnderFull);

        let err = HuffmanCoding::<Value>::from_lengths(&[1]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::UnderFull);

        let err = HuffmanCoding::<Value>::from_lengths(&[3, 0, 3]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::UnderFull);
    }

    #[test]
    fn read_symbol() -> Result<()> {
        let code = HuffmanCoding::<Value>::from_lengths(&[2, 3, 4, 3, 3, 4, 2])?;
        let mut data: &[u8] = &[0b10111001, 0b11001010, 0b11101101];
        let mut reader = BitReader::new(&mut data);

        assert_eq!(code.read_symbol(&mut reader)?, Value(1));
        assert_eq!(code.read_symbol(&mut reader)?, Value(2));
        assert_eq!(code.read_symbol(&mut reader)?, Value(3));
        assert_eq!(code.read_symbol(&mut reader)?, Value(6));
        assert_eq!(code.read_symbol(&mut reader)?, Value(0));
        assert_eq!(code.read_symbol(&mut reader)?, Value(2));
        assert_eq!(code.read_symbol(&mut reader)?, Value(4));
        assert!(code.read_symbol(&mut reader).is_err());

        Ok(())
    }

    #[test]
    fn from_lengths_additional() -> Result<()> {
        let lengths = [
            9, 10, 10, 8, 8, 8, 5, 6, 4, 5, 4, 5, 4, 5, 4, 4, 5, 4, 4, 5, 4, 5, 4, 5, 5, 5, 4, 6, 6,
        ];
        let code = HuffmanCoding::<Value>::from_lengths(&lengths)?;
        let mut data: &[u8] = &[
            0b11111000, 0b10111100, 0b01010001, 0b11111111, 0b00110101, 0b11111001, 0b11011111,
            0b11100001, 0b01110111, 0b10011111, 0b10111111, 0b00110100, 0b10111010, 0b11111111,
            0b11111101, 0b10010100, 0b11001110, 0b01000011, 0b11100111, 0b00000010,
        ];
        let mut reader = BitReader::new(&mut data);

        assert_eq!(code.read_symbol(&mut reader)?, Value(10));
        assert_eq!(code.read_symbol(&mut reader)?, Value(7));
        assert_eq!(code.read_symbol(&mut reader)?, Value(27));
        assert_eq!(code.read_symbol(&mut reader)?, Value(22));
        assert_eq!(code.read_symbol(&mut reader)?, Value(9));
        assert_eq!(code.read_symbol(&mut reader)?, Value(0));
        assert_eq!(code.read_symbol(&mut reader)?, Value(11));
        assert_eq!(code.read_symbol(&mut reader)?, Value(15));
        assert_eq!(code.read_symbol(&mut reader)?, Value(2));
        assert_eq!(code.read_symbol(&mut reader)?, Value(20));
        assert_eq!(code.read_symbol(&mut reader)?, Value(8));
        assert_eq!(code.read_symbol(&mut reader)?, Value(4));
        assert_eq!(code.read_symbol(&mut reader)?, Value(23));
        assert_eq!(code.read_symbol(&mut reader)?, Value(24));
        assert_eq!(code.read_symbol(&mut reader)?, Value(5));
        assert_eq!(code.read_symbol(&mut reader)?, Value(26));
        assert_eq!(code.read_symbol(&mut reader)?, Value(18));
        assert_eq!(code.read_symbol(&mut reader)?, Value(12));
        assert_eq!(code.read_symbol(&mut reader)?, Value(25));
        assert_eq!(code.read_symbol(&mut reader)?, Value(1));
        assert_eq!(code.read_symbol(&mut reader)?, Value(3));
        assert_eq!(code.read_symbol(&mut reader)?, Value(6));
        assert_eq!(code.read_symbol(&mut reader)?, Value(13));
        assert_eq!(code.read_symbol(&mut reader)?, Value(14));
        assert_eq!(code.read_symbol(&mut reader)?, Value(16));
        assert_eq!(code.read_symbol(&mut reader)?, Value(17));
        assert_eq!(code.read_symbol(&mut reader)?, Value(19));
        assert_eq!(code.read_symbol(&mut reader)?, Value(21));

        Ok(())
    }

    #[test]
    fn fixed_litlen_symbols() {
        let code = fixed_litlen_code();

        assert_eq!(
            code.decode_symbol(BitSequence::new(0b00110000, 8)),
            Some(LitLenToken::Literal(0)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b10111111, 8)),
            Some(LitLenToken::Literal(143)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b110010000, 9)),
            Some(LitLenToken::Literal(144)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b111111111, 9)),
            Some(LitLenToken::Literal(255)),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b0000000, 7)),
            Some(LitLenToken::EndOfBlock),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b0000001, 7)),
            Some(LitLenToken::Length {
                base: 3,
                extra_bits: 0
            }),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b11000110, 8)),
            Some(LitLenToken::Reserved(286)),
        );
    }

    #[test]
    fn fixed_distance_symbols() {
        let code = match fixed_distance_code() {
            DistanceCode::Present(code) => code,
            DistanceCode::Empty => panic!("fixed distance code must be present"),
        };

        assert_eq!(
            code.decode_symbol(BitSequence::new(0b00000, 5)),
            Some(DistanceToken::Distance {
                base: 1,
                extra_bits: 0
            }),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b11101, 5)),
            Some(DistanceToken::Distance {
                base: 24577,
                extra_bits: 13
            }),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b11110, 5)),
            Some(DistanceToken::Reserved(30)),
        );
    }

    #[test]
    fn single_symbol_distance_code_is_padded() -> Result<()> {
        let code = match build_distance_code(&[0, 1])? {
            DistanceCode::Present(code) => code,
            DistanceCode::Empty => panic!("expected a present distance code"),
        };

        assert_eq!(
            code.decode_symbol(BitSequence::new(0b0, 1)),
            Some(DistanceToken::Distance {
                base: 2,
                extra_bits: 0
            }),
        );
        assert_eq!(
            code.decode_symbol(BitSequence::new(0b1, 1)),
            Some(DistanceToken::Reserved(31)),
        );

        Ok(())
    }

    #[test]
    fn sole_zero_length_is_the_empty_distance_code() -> Result<()> {
        assert!(matches!(build_distance_code(&[0])?, DistanceCode::Empty));
        Ok(())
    }

    #[test]
    fn other_under_full_distance_codes_fail() {
        // Two symbols declared, only one given a code: not the padded case.
        let err = build_distance_code(&[0, 2]).unwrap_err();
        assert_eq!(tree_error(err), CodeTreeError::UnderFull);
    }
}
