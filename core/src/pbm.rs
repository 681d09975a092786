//! PBM `P4` (binary portable bitmap) decoding
//!
//! File layout:
//! ```text
//! P4\n
//! # optional comments
//! <width> <height>\n
//! <ceil(width / 8) * height bytes of pixel data>
//! ```
//!
//! P4 pixel data is already in the panel's native format (1 = ink, MSB is the
//! leftmost pixel, rows padded to whole bytes), so the payload is read straight
//! into the output buffer without any conversion.

use alloc::vec;
use alloc::vec::Vec;

use embedded_io::{Error as _, ErrorKind, Read, ReadExactError};

use crate::storage::{FileReader, Storage, StorageError};

/// Largest payload accepted (a 7.5" 800x480 panel needs 48000 bytes)
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024;

const MAGIC: &[u8] = b"P4";

/// The magic line is short; anything longer is not a PBM file
const MAX_MAGIC_LINE: usize = 16;

/// Decode error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// First line isn't `P4`
    BadMagic,
    /// Width/height missing or not an unsigned integer
    MalformedHeader,
    /// Fewer payload bytes than the header promises
    Truncated,
    /// Payload size overflows or exceeds `MAX_PAYLOAD_LEN`
    TooLarge,
    /// Underlying reader failed
    Io(ErrorKind),
    /// Source file couldn't be opened
    Storage(StorageError),
}

/// Monochrome bitmap, 1 bit per pixel, row-major, MSB first, 1 = ink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, `ceil(width / 8)`
    pub fn row_bytes(&self) -> usize {
        row_bytes(self.width)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether pixel (x, y) is inked. Out-of-range pixels are blank.
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = y as usize * self.row_bytes() + x as usize / 8;
        self.data[idx] & (0x80 >> (x % 8)) != 0
    }
}

#[inline]
fn row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(8)
}

/// `ceil(width / 8) * height`, bounded by `MAX_PAYLOAD_LEN`
fn payload_len(width: u32, height: u32) -> Result<usize, DecodeError> {
    let len = row_bytes(width)
        .checked_mul(height as usize)
        .ok_or(DecodeError::TooLarge)?;
    if len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::TooLarge);
    }
    Ok(len)
}

/// Decode a P4 bitmap from `reader`.
///
/// Reading stops right after the payload; anything that follows is ignored.
/// With `invert` set every byte is complemented once the payload is complete.
pub fn decode<R: Read>(reader: &mut R, invert: bool) -> Result<Bitmap, DecodeError> {
    read_magic(reader)?;
    let width = next_number(reader)?;
    let height = next_number(reader)?;

    // The single delimiter after the height was consumed by the tokenizer;
    // the payload starts at the very next byte.
    let len = payload_len(width, height)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(|e| match e {
        ReadExactError::UnexpectedEof => DecodeError::Truncated,
        ReadExactError::Other(e) => DecodeError::Io(e.kind()),
    })?;

    if invert {
        for byte in data.iter_mut() {
            *byte = !*byte;
        }
    }

    Ok(Bitmap { data, width, height })
}

/// Decode the P4 bitmap stored at `path`
pub fn decode_file<S: Storage>(
    storage: &mut S,
    path: &str,
    invert: bool,
) -> Result<Bitmap, DecodeError> {
    let mut reader = FileReader::open(storage, path).map_err(DecodeError::Storage)?;
    decode(&mut reader, invert)
}

fn next_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, DecodeError> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(e) => Err(DecodeError::Io(e.kind())),
    }
}

/// The magic marker sits alone on the first line
fn read_magic<R: Read>(reader: &mut R) -> Result<(), DecodeError> {
    let mut line: heapless::Vec<u8, MAX_MAGIC_LINE> = heapless::Vec::new();
    while let Some(byte) = next_byte(reader)? {
        if byte == b'\n' {
            break;
        }
        line.push(byte).map_err(|_| DecodeError::BadMagic)?;
    }

    if line.trim_ascii() == MAGIC {
        Ok(())
    } else {
        Err(DecodeError::BadMagic)
    }
}

#[inline]
fn is_separator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

/// Read the next header token as an unsigned integer, skipping separators
/// and `#` comments. Consumes exactly one delimiter after the token.
fn next_number<R: Read>(reader: &mut R) -> Result<u32, DecodeError> {
    let first = loop {
        match next_byte(reader)? {
            None => return Err(DecodeError::MalformedHeader),
            Some(b'#') => skip_comment(reader)?,
            Some(byte) if is_separator(byte) => {}
            Some(byte) => break byte,
        }
    };

    let mut value = digit(first)?;
    loop {
        match next_byte(reader)? {
            None => return Ok(value),
            Some(byte) if is_separator(byte) => return Ok(value),
            Some(byte) => {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit(byte).ok()?))
                    .ok_or(DecodeError::MalformedHeader)?;
            }
        }
    }
}

fn skip_comment<R: Read>(reader: &mut R) -> Result<(), DecodeError> {
    while let Some(byte) = next_byte(reader)? {
        if byte == b'\n' {
            break;
        }
    }
    Ok(())
}

#[inline]
fn digit(byte: u8) -> Result<u32, DecodeError> {
    if byte.is_ascii_digit() {
        Ok((byte - b'0') as u32)
    } else {
        Err(DecodeError::MalformedHeader)
    }
}
