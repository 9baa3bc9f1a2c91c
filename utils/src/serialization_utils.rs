//! Fixed-width big-endian primitives and length-prefixed byte spans.
//!
//! Every reader reports a short read as [`std::io::ErrorKind::UnexpectedEof`] with the
//! message "expected N bytes, got M", so callers can tell truncated data from other I/O
//! failures.

use std::io::{Error, ErrorKind, Read, Write};
use std::mem::size_of;

/// Fills `buf` from `reader`, failing with "expected N bytes, got M" if the source ends early.
pub fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => return Err(premature_eof(buf.len(), got)),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn premature_eof(expected: usize, got: usize) -> Error {
    Error::new(ErrorKind::UnexpectedEof, PrematureEof { expected, got })
}

/// Payload of the `UnexpectedEof` errors produced here; recover it with
/// `err.get_ref().and_then(|e| e.downcast_ref::<PrematureEof>())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} bytes, got {got}")]
pub struct PrematureEof {
    pub expected: usize,
    pub got: usize,
}

pub fn write_i32<W: Write + ?Sized>(writer: &mut W, v: i32) -> Result<(), Error> {
    writer.write_all(&v.to_be_bytes())
}

pub fn write_i64<W: Write + ?Sized>(writer: &mut W, v: i64) -> Result<(), Error> {
    writer.write_all(&v.to_be_bytes())
}

pub fn write_f32<W: Write + ?Sized>(writer: &mut W, v: f32) -> Result<(), Error> {
    writer.write_all(&v.to_be_bytes())
}

pub fn write_f64<W: Write + ?Sized>(writer: &mut W, v: f64) -> Result<(), Error> {
    writer.write_all(&v.to_be_bytes())
}

pub fn write_f32s<W: Write + ?Sized>(writer: &mut W, vs: &[f32]) -> Result<(), Error> {
    for v in vs {
        write_f32(writer, *v)?;
    }
    Ok(())
}

/// Writes `bytes` preceded by its length as a big-endian i32.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<(), Error> {
    let len = i32::try_from(bytes.len())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, format!("buffer of {} bytes is too long", bytes.len())))?;
    write_i32(writer, len)?;
    writer.write_all(bytes)
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> Result<i32, Error> {
    let mut buf = [0u8; size_of::<i32>()];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> Result<i64, Error> {
    let mut buf = [0u8; size_of::<i64>()];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub fn read_f32<R: Read + ?Sized>(reader: &mut R) -> Result<f32, Error> {
    let mut buf = [0u8; size_of::<f32>()];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub fn read_f64<R: Read + ?Sized>(reader: &mut R) -> Result<f64, Error> {
    let mut buf = [0u8; size_of::<f64>()];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

pub fn read_f32s<R: Read + ?Sized>(reader: &mut R, vs: &mut [f32]) -> Result<(), Error> {
    for v in vs.iter_mut() {
        *v = read_f32(reader)?;
    }
    Ok(())
}

/// Reads a span written by [`write_bytes`].
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let len = read_i32(reader)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::new(ErrorKind::InvalidData, format!("negative buffer length {len}")))?;
    let mut buf = vec![0u8; len];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(buf)
}
