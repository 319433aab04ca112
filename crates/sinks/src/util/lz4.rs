//! LZ4-framed JSON lines
//!
//! Backup and error objects are newline-delimited JSON compressed as a single
//! LZ4 frame, readable with the stock `lz4` CLI.

use std::io::{self, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

/// Encode records as newline-terminated lines inside one LZ4 frame
pub fn encode_lz4_lines<'a, I>(lines: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut encoder = FrameEncoder::new(Vec::new());
    for line in lines {
        encoder.write_all(line)?;
        encoder.write_all(b"\n")?;
    }
    encoder.finish().map_err(io::Error::other)
}

/// Decode an LZ4 frame back into its lines
pub fn decode_lz4_lines(bytes: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut decoded = Vec::new();
    FrameDecoder::new(bytes).read_to_end(&mut decoded)?;
    Ok(decoded
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect())
}
