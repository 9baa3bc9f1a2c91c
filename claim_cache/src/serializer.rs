use std::io::{Read, Write};

use utils::serialization_utils::{read_bytes, read_f32s, read_i32, write_bytes, write_f32s, write_i32};

use crate::error::CacheError;

/// Converts values to and from the byte streams of the disk tier.
pub trait ObjectSerializer<T>: Send + Sync {
    fn serialize(&self, sink: &mut dyn Write, value: &T) -> Result<(), CacheError>;

    fn deserialize(&self, source: &mut dyn Read) -> Result<T, CacheError>;
}

/// A length-prefixed byte buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl ObjectSerializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, sink: &mut dyn Write, value: &Vec<u8>) -> Result<(), CacheError> {
        write_bytes(sink, value)?;
        Ok(())
    }

    fn deserialize(&self, source: &mut dyn Read) -> Result<Vec<u8>, CacheError> {
        Ok(read_bytes(source)?)
    }
}

/// A length-prefixed array of big-endian floats, e.g. a vertex buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct F32ArraySerializer;

impl ObjectSerializer<Vec<f32>> for F32ArraySerializer {
    fn serialize(&self, sink: &mut dyn Write, value: &Vec<f32>) -> Result<(), CacheError> {
        let len = i32::try_from(value.len()).map_err(|_| CacheError::parse(format!("{} floats do not fit", value.len())))?;
        write_i32(sink, len)?;
        write_f32s(sink, value)?;
        Ok(())
    }

    fn deserialize(&self, source: &mut dyn Read) -> Result<Vec<f32>, CacheError> {
        let len = read_i32(source)?;
        let len = usize::try_from(len).map_err(|_| CacheError::parse(format!("negative float count {len}")))?;
        let mut values = vec![0f32; len];
        read_f32s(source, &mut values)?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_bytes_layout() {
        let mut buf = Vec::new();
        BytesSerializer.serialize(&mut buf, &vec![9, 8, 7]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, 9, 8, 7]);
        assert_eq!(BytesSerializer.deserialize(&mut Cursor::new(buf)).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_f32_layout() {
        let mut buf = Vec::new();
        F32ArraySerializer.serialize(&mut buf, &vec![1.0, -0.5]).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 2]);
        assert_eq!(&buf[4..8], &1.0f32.to_be_bytes());
        assert_eq!(F32ArraySerializer.deserialize(&mut Cursor::new(buf)).unwrap(), vec![1.0, -0.5]);
    }

    #[test]
    fn test_truncated_floats() {
        let mut buf = Vec::new();
        F32ArraySerializer.serialize(&mut buf, &vec![1.0, 2.0, 3.0]).unwrap();
        buf.truncate(10);
        let err = F32ArraySerializer.deserialize(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, CacheError::PrematureEof { expected: 4, got: 2 }), "{err:?}");
    }

    #[test]
    fn test_negative_length() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -1).unwrap();
        assert!(matches!(F32ArraySerializer.deserialize(&mut Cursor::new(buf)), Err(CacheError::Parse(_))));
    }
}
