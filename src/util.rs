//! Byte-level primitives shared by the reader and the writer.
//!
//! The Marshal format uses exactly three fixed-width quantities (unsigned
//! byte, signed byte, little-endian unsigned 16-bit) plus one
//! variable-length signed integer, the *packed long*, which encodes every
//! length, index and fixnum in the stream.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use std::io::Read;

use crate::error::Error;

/// Reads a single unsigned byte from the stream.
pub fn read_ubyte<R>(reader: &mut R) -> Result<u8, Error>
where
    R: io::Read,
{
    Ok(reader.read_u8()?)
}

/// Reads a single signed byte from the stream.
pub fn read_sbyte<R>(reader: &mut R) -> Result<i8, Error>
where
    R: io::Read,
{
    Ok(reader.read_i8()?)
}

/// Reads an unsigned 16-bit little-endian integer from the stream.
pub fn read_ushort<R>(reader: &mut R) -> Result<u16, Error>
where
    R: io::Read,
{
    Ok(reader.read_u16::<LittleEndian>()?)
}

/// Writes a single unsigned byte to the stream.
pub fn write_ubyte<W>(writer: &mut W, value: u8) -> Result<(), Error>
where
    W: io::Write,
{
    Ok(writer.write_u8(value)?)
}

/// Writes a single signed byte to the stream.
pub fn write_sbyte<W>(writer: &mut W, value: i8) -> Result<(), Error>
where
    W: io::Write,
{
    Ok(writer.write_i8(value)?)
}

/// Writes an unsigned 16-bit little-endian integer to the stream.
pub fn write_ushort<W>(writer: &mut W, value: u16) -> Result<(), Error>
where
    W: io::Write,
{
    Ok(writer.write_u16::<LittleEndian>(value)?)
}

/// Reads exactly `len` bytes from the stream.
///
/// Unlike [`std::io::Read::read_exact`] into a pre-sized buffer, this
/// never allocates more than the stream can actually deliver, so a
/// corrupt length prefix fails with [`Error::TruncatedInput`] instead of
/// exhausting memory.
pub fn read_byte_seq<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, Error>
where
    R: io::Read,
{
    let mut buf = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(Error::TruncatedInput);
    }
    Ok(buf)
}

/// Reads a packed long.
///
/// The first byte `h` selects one of three forms:
/// - `h == 0`: the value is zero,
/// - `5 < h < 128` or `-129 < h < -5`: a small value biased by ±5
///   (covering `-123..=122`),
/// - otherwise `|h|` is a byte count and the value follows little-endian;
///   a negative `h` marks a negative value stored as `v - 256^|h|`.
///
/// Non-minimal encodings are accepted: `FF 00` and `FE 00 FF` both decode
/// to `-256`.
///
/// # Example
/// ```
/// use rbmarshal::util::read_long;
///
/// let mut data: &[u8] = &[0x01, 0x7B];
/// assert_eq!(read_long(&mut data).unwrap(), 123);
/// ```
pub fn read_long<R>(reader: &mut R) -> Result<i64, Error>
where
    R: io::Read,
{
    let h = read_sbyte(reader)? as i64;
    if h == 0 {
        return Ok(0);
    }
    if h > 5 {
        return Ok(h - 5);
    }
    if h < -5 {
        return Ok(h + 5);
    }
    let count = h.unsigned_abs() as usize;
    if count > 8 {
        return Err(Error::Format(format!(
            "packed integer claims {} content bytes",
            count
        )));
    }
    let mut value: i128 = 0;
    for i in 0..count {
        value |= (read_ubyte(reader)? as i128) << (8 * i);
    }
    if h < 0 {
        value -= 1i128 << (8 * count);
    }
    i64::try_from(value)
        .map_err(|_| Error::Format(format!("packed integer {} exceeds the 64-bit range", value)))
}

/// Writes a packed long, choosing the shortest encoding that fits.
///
/// Values in `-123..=122` are written as a single biased byte. Everything
/// else is written as a byte count followed by the little-endian content
/// bytes; for negatives the count is negated and the content is the
/// two's-complement low bytes, so `-256` becomes `FF 00` and `-65536`
/// becomes `FE 00 00`.
pub fn write_long<W>(writer: &mut W, value: i64) -> Result<(), Error>
where
    W: io::Write,
{
    if value == 0 {
        return write_ubyte(writer, 0);
    }
    if value > 0 && value < 123 {
        return write_sbyte(writer, (value + 5) as i8);
    }
    if value < 0 && value > -124 {
        return write_sbyte(writer, (value - 5) as i8);
    }
    let mut bytes = [0u8; 8];
    let mut rest = value;
    let mut count = 0;
    for slot in bytes.iter_mut() {
        *slot = (rest & 0xFF) as u8;
        rest >>= 8;
        count += 1;
        if rest == 0 || rest == -1 {
            break;
        }
    }
    if count > 5 {
        return Err(Error::Unrepresentable(format!(
            "{} is too long for a packed integer",
            value
        )));
    }
    let header = if value < 0 {
        -(count as i8)
    } else {
        count as i8
    };
    write_sbyte(writer, header)?;
    writer.write_all(&bytes[..count])?;
    Ok(())
}

/// A reader wrapper that counts how many bytes passed through it.
///
/// The decoder reads strictly sequentially and never seeks, so the number
/// of bytes pulled from the wrapped source is exactly the number of bytes
/// one encoded value occupies.
pub struct ByteCounter<R> {
    inner: R,
    count: u64,
}

impl<R> ByteCounter<R> {
    pub fn new(inner: R) -> Self {
        ByteCounter { inner, count: 0 }
    }

    /// Returns the number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Consumes the counter and returns the wrapped source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read> io::Read for ByteCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
