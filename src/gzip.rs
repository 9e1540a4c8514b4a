#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use thiserror::Error;

use crate::deflate::DeflateReader;
use crate::tracking_writer::TrackingWriter;

////////////////////////////////////////////////////////////////////////////////

const ID1: u8 = 0x1f;
const ID2: u8 = 0x8b;

const CM_DEFLATE: u8 = 8;

const FTEXT_OFFSET: u8 = 0;
const FHCRC_OFFSET: u8 = 1;
const FEXTRA_OFFSET: u8 = 2;
const FNAME_OFFSET: u8 = 3;
const FCOMMENT_OFFSET: u8 = 4;
const RESERVED_MASK: u8 = 0xe0;

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GzipError {
    #[error("bad gzip magic: {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("unsupported compression method: {0}")]
    UnsupportedMethod(u8),
    #[error("reserved header flags are set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("decompressed size mismatch: footer declares {expected}, got {actual}")]
    SizeMismatch { expected: u32, actual: u32 },
    #[error("crc32 mismatch: footer declares {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

////////////////////////////////////////////////////////////////////////////////

/// Everything the member header carries besides the compressed data. The
/// optional fields stay `None` when their flag bit is clear.
#[derive(Debug, Default)]
pub struct MemberHeader {
    pub modification_time: u32,
    pub extra: Option<Vec<u8>>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub extra_flags: u8,
    pub os: u8,
    /// Header CRC-16 as stored in the stream; present when FHCRC is set,
    /// never verified here.
    pub header_crc: Option<u16>,
    pub is_text: bool,
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug)]
pub struct MemberFlags(u8);

impl MemberFlags {
    fn bit(self, n: u8) -> bool {
        (self.0 >> n) & 1 != 0
    }

    pub fn is_text(self) -> bool {
        self.bit(FTEXT_OFFSET)
    }

    pub fn has_crc(self) -> bool {
        self.bit(FHCRC_OFFSET)
    }

    pub fn has_extra(self) -> bool {
        self.bit(FEXTRA_OFFSET)
    }

    pub fn has_name(self) -> bool {
        self.bit(FNAME_OFFSET)
    }

    pub fn has_comment(self) -> bool {
        self.bit(FCOMMENT_OFFSET)
    }

    pub fn reserved(self) -> u8 {
        self.0 & RESERVED_MASK
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MemberFooter {
    pub data_crc32: u32,
    pub data_size: u32,
}

////////////////////////////////////////////////////////////////////////////////

/// Reads one gzip member: the fixed header, the DEFLATE body, and the
/// CRC-32/ISIZE footer. Bytes past the member are left unread.
pub struct GzipReader<T> {
    input: T,
}

impl<T: BufRead> GzipReader<T> {
    pub fn new(input: T) -> Self {
        Self { input }
    }

    /// Decompresses the member into `output`, verifying the footer, and
    /// returns the parsed header metadata.
    pub fn decompress_to<W: Write>(mut self, output: W) -> Result<MemberHeader> {
        let header = self.read_header().context("reading gzip header")?;

        let mut writer = TrackingWriter::new(output);
        let mut deflate_reader = DeflateReader::new(&mut self.input);
        loop {
            if deflate_reader.decode_block(&mut writer)? {
                break;
            }
        }
        writer.flush()?;

        let byte_count = writer.byte_count() as u32; // ISIZE is modulo 2^32
        let crc32 = writer.crc32();

        let footer = self.read_footer().context("reading gzip footer")?;
        if footer.data_size != byte_count {
            return Err(GzipError::SizeMismatch {
                expected: footer.data_size,
                actual: byte_count,
            }
            .into());
        }
        if footer.data_crc32 != crc32 {
            return Err(GzipError::CrcMismatch {
                expected: footer.data_crc32,
                actual: crc32,
            }
            .into());
        }

        Ok(header)
    }

    fn read_header(&mut self) -> Result<MemberHeader> {
        let mut magic = [0u8; 2];
        self.input.read_exact(&mut magic)?;
        if magic != [ID1, ID2] {
            return Err(GzipError::BadMagic(magic).into());
        }

        let method = self.input.read_u8()?;
        if method != CM_DEFLATE {
            return Err(GzipError::UnsupportedMethod(method).into());
        }

        let flags = MemberFlags(self.input.read_u8()?);
        if flags.reserved() != 0 {
            return Err(GzipError::ReservedFlags(flags.0).into());
        }

        let mut header = MemberHeader {
            modification_time: self.input.read_u32::<LittleEndian>()?,
            extra_flags: self.input.read_u8()?,
            os: self.input.read_u8()?,
            is_text: flags.is_text(),
            ..MemberHeader::default()
        };

        if flags.has_extra() {
            let xlen = self.input.read_u16::<LittleEndian>()?;
            let mut extra = vec![0u8; xlen as usize];
            self.input.read_exact(&mut extra)?;
            header.extra = Some(extra);
        }

        if flags.has_name() {
            header.name = Some(self.read_zero_terminated().context("reading file name")?);
        }

        if flags.has_comment() {
            header.comment = Some(self.read_zero_terminated().context("reading comment")?);
        }

        if flags.has_crc() {
            header.header_crc = Some(self.input.read_u16::<LittleEndian>()?);
        }

        debug!(
            "member header: mtime = {}, os = {}, name = {:?}, comment = {:?}",
            header.modification_time, header.os, header.name, header.comment
        );

        Ok(header)
    }

    fn read_zero_terminated(&mut self) -> Result<String> {
        let mut raw = Vec::new();
        self.input.read_until(0, &mut raw)?;
        if raw.pop() != Some(0) {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(String::from_utf8(raw)?)
    }

    fn read_footer(&mut self) -> Result<MemberFooter> {
        Ok(MemberFooter {
            data_crc32: self.input.read_u32::<LittleEndian>()?,
            data_size: self.input.read_u32::<LittleEndian>()?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
