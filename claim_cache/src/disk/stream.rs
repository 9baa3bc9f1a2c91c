use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use file_utils::SafeFileCreator;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};

/// A write stream whose data only becomes visible once [`FinishWrite::finish`] succeeds.
/// Dropping it unfinished discards everything written.
pub trait FinishWrite: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl FinishWrite for SafeFileCreator {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.close()
    }
}

/// Wraps the raw files of the disk tier, e.g. to buffer or compress them.
pub trait StreamFactory: Send + Sync {
    fn read(&self, file: File) -> io::Result<Box<dyn Read + Send>>;

    fn write(&self, file: SafeFileCreator) -> io::Result<Box<dyn FinishWrite>>;
}

/// Plain buffered streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedStreamFactory;

struct BufferedWriter(BufWriter<SafeFileCreator>);

impl Write for BufferedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FinishWrite for BufferedWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.into_inner().map_err(|e| e.into_error())?.close()
    }
}

impl StreamFactory for BufferedStreamFactory {
    fn read(&self, file: File) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(file)))
    }

    fn write(&self, file: SafeFileCreator) -> io::Result<Box<dyn FinishWrite>> {
        Ok(Box::new(BufferedWriter(BufWriter::new(file))))
    }
}

/// LZ4 frame compressed streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4StreamFactory;

struct Lz4Writer(FrameEncoder<BufWriter<SafeFileCreator>>);

impl Write for Lz4Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FinishWrite for Lz4Writer {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let buffered = self.0.finish().map_err(io::Error::other)?;
        buffered.into_inner().map_err(|e| e.into_error())?.close()
    }
}

impl StreamFactory for Lz4StreamFactory {
    fn read(&self, file: File) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(FrameDecoder::new(BufReader::new(file))))
    }

    fn write(&self, file: SafeFileCreator) -> io::Result<Box<dyn FinishWrite>> {
        Ok(Box::new(Lz4Writer(FrameEncoder::new(BufWriter::new(file)))))
    }
}
