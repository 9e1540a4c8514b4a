#![forbid(unsafe_code)]

//! Decompression of raw DEFLATE streams (RFC 1951) and gzip files
//! (RFC 1952).
//!
//! The raw entry points ([`inflate`], [`inflate_to`]) consume the DEFLATE
//! bit stream and stop right after the final block; [`gunzip`] and
//! [`gunzip_to`] additionally parse the gzip header and verify the CRC-32
//! and length recorded in the footer. Use [`gzip::GzipReader`] directly
//! when the header metadata is wanted.

use std::io::{BufRead, Write};

use anyhow::Result;

pub mod bit_reader;
pub mod deflate;
pub mod gzip;
pub mod huffman_coding;
pub mod tracking_writer;

pub use deflate::BlockError;
pub use gzip::{GzipError, GzipReader, MemberHeader};
pub use huffman_coding::CodeTreeError;
pub use tracking_writer::{InvalidCopy, TrackingWriter};

use deflate::DeflateReader;

/// Decompresses a raw DEFLATE stream into a new byte vector.
pub fn inflate<R: BufRead>(input: R) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    inflate_to(input, &mut output)?;
    Ok(output)
}

/// Decompresses a raw DEFLATE stream into the given sink, flushing it at
/// the end. Bytes after the final block are left unread.
pub fn inflate_to<R: BufRead, W: Write>(input: R, output: W) -> Result<()> {
    let mut writer = TrackingWriter::new(output);
    let mut deflate_reader = DeflateReader::new(input);
    loop {
        if deflate_reader.decode_block(&mut writer)? {
            break;
        }
    }
    writer.flush()?;

    Ok(())
}

/// Decompresses a single-member gzip stream into a new byte vector.
pub fn gunzip<R: BufRead>(input: R) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    gunzip_to(input, &mut output)?;
    Ok(output)
}

/// Decompresses a single-member gzip stream into the given sink, verifying
/// the footer checks.
pub fn gunzip_to<R: BufRead, W: Write>(input: R, output: W) -> Result<()> {
    GzipReader::new(input).decompress_to(output)?;
    Ok(())
}
