#![forbid(unsafe_code)]

use std::io::{BufRead, Write};

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use thiserror::Error;

use crate::bit_reader::BitReader;
use crate::huffman_coding::{
    decode_litlen_distance_trees, fixed_distance_code, fixed_litlen_code, DistanceCode,
    DistanceToken, HuffmanCoding, LitLenToken,
};
use crate::tracking_writer::TrackingWriter;

////////////////////////////////////////////////////////////////////////////////

/// A well-formed-looking block that asks for something the format reserves
/// or forbids.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("reserved block type")]
    ReservedBlockType,
    #[error("stored block length check failed: len = {len:#06x}, nlen = {nlen:#06x}")]
    BadStoredLength { len: u16, nlen: u16 },
    #[error("reserved length symbol: {0}")]
    ReservedLengthSymbol(u16),
    #[error("reserved distance symbol: {0}")]
    ReservedDistanceSymbol(u16),
    #[error("length symbol encountered with empty distance code")]
    EmptyDistanceCode,
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct BlockHeader {
    pub is_final: bool,
    pub compression_type: CompressionType,
}

#[derive(Debug)]
pub enum CompressionType {
    Uncompressed = 0,
    FixedTree = 1,
    DynamicTree = 2,
    Reserved = 3,
}

////////////////////////////////////////////////////////////////////////////////

/// Reads DEFLATE blocks from a bit stream, one `decode_block` call per
/// block. The caller loops until a block reports that it was final; the
/// trailing bits of the last byte are left unconsumed for the container.
pub struct DeflateReader<T> {
    bit_reader: BitReader<T>,
}

impl<T: BufRead> DeflateReader<T> {
    pub fn new(stream: T) -> Self {
        Self {
            bit_reader: BitReader::new(stream),
        }
    }

    fn read_header(&mut self) -> Result<BlockHeader> {
        let is_final = self.bit_reader.read_bits(1)?.bits() != 0;
        let compression_bits = self.bit_reader.read_bits(2)?.bits();

        Ok(BlockHeader {
            is_final,
            compression_type: match compression_bits {
                0 => CompressionType::Uncompressed,
                1 => CompressionType::FixedTree,
                2 => CompressionType::DynamicTree,
                _ => CompressionType::Reserved,
            },
        })
    }

    /// Decodes one block into `output` and returns its final-block flag.
    pub fn decode_block<W: Write>(&mut self, output: &mut TrackingWriter<W>) -> Result<bool> {
        let header = self.read_header()?;
        debug!(
            "block: final = {}, type = {:?}",
            header.is_final, header.compression_type
        );

        match header.compression_type {
            CompressionType::Uncompressed => {
                // LEN and NLEN are byte-aligned little-endian words; the
                // padding bits before them carry no information.
                let reader = self.bit_reader.borrow_reader_from_boundary();
                let len = reader.read_u16::<LittleEndian>()?;
                let nlen = reader.read_u16::<LittleEndian>()?;
                if (len ^ 0xffff) != nlen {
                    return Err(BlockError::BadStoredLength { len, nlen }.into());
                }

                let mut data = vec![0u8; len as usize];
                reader.read_exact(&mut data)?;
                output.write_all(&data)?;
            }

            CompressionType::FixedTree => {
                self.decode_huffman_block(fixed_litlen_code(), fixed_distance_code(), output)?;
            }

            CompressionType::DynamicTree => {
                let (litlen_code, dist_code) =
                    decode_litlen_distance_trees(&mut self.bit_reader)?;
                self.decode_huffman_block(&litlen_code, &dist_code, output)?;
            }

            CompressionType::Reserved => return Err(BlockError::ReservedBlockType.into()),
        }

        Ok(header.is_final)
    }

    fn decode_huffman_block<W: Write>(
        &mut self,
        litlen_code: &HuffmanCoding<LitLenToken>,
        dist_code: &DistanceCode,
        output: &mut TrackingWriter<W>,
    ) -> Result<()> {
        loop {
            match litlen_code.read_symbol(&mut self.bit_reader)? {
                LitLenToken::EndOfBlock => return Ok(()),

                LitLenToken::Literal(byte) => {
                    output.write_u8(byte)?;
                }

                LitLenToken::Length { base, extra_bits } => {
                    let run = base + self.bit_reader.read_bits(extra_bits)?.bits() as u16;
                    let dist = self.decode_distance(dist_code)?;
                    debug_assert!((3..=258).contains(&run));
                    debug_assert!((1..=32768).contains(&dist));
                    output.write_previous(dist as usize, run as usize)?;
                }

                LitLenToken::Reserved(symbol) => {
                    return Err(BlockError::ReservedLengthSymbol(symbol).into());
                }
            }
        }
    }

    fn decode_distance(&mut self, dist_code: &DistanceCode) -> Result<u32> {
        let code = match dist_code {
            DistanceCode::Present(code) => code,
            DistanceCode::Empty => return Err(BlockError::EmptyDistanceCode.into()),
        };

        match code.read_symbol(&mut self.bit_reader)? {
            DistanceToken::Distance { base, extra_bits } => {
                Ok(base as u32 + self.bit_reader.read_bits(extra_bits)?.bits() as u32)
            }
            DistanceToken::Reserved(symbol) => {
                Err(BlockError::ReservedDistanceSymbol(symbol).into())
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
