use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"SPIKNET1";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Strict format: raw LZ4 block with external expected size.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

/// Counts bytes without storing them; used to size an image before writing it.
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self { written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Default for CountingWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

/// Write an LZ4 block preceded by its uncompressed and compressed lengths.
///
/// Layout:
/// - uncompressed_len: u32
/// - compressed_len: u32
/// - compressed payload bytes
pub fn write_lz4_block<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload too large"))?;
    let compressed_len = u32::try_from(compressed.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload too large"))?;

    write_u32_le(w, uncompressed_len)?;
    write_u32_le(w, compressed_len)?;
    w.write_all(&compressed)
}

pub fn read_lz4_block<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let uncompressed_len = read_u32_le(r)? as usize;
    let compressed_len = read_u32_le(r)? as usize;
    let mut compressed = vec![0u8; compressed_len];
    r.read_exact(&mut compressed)?;
    decompress_lz4(&compressed, uncompressed_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_block_restores_payload() {
        let payload = b"spikenet spikenet spikenet spikenet".repeat(8);
        let mut bytes = Vec::new();
        write_lz4_block(&mut bytes, &payload).unwrap();
        assert!(bytes.len() < payload.len());

        let mut cursor = io::Cursor::new(bytes);
        assert_eq!(read_lz4_block(&mut cursor).unwrap(), payload);
    }

    #[test]
    fn counting_writer_counts() {
        let mut cw = CountingWriter::new();
        write_u32_le(&mut cw, 5).unwrap();
        cw.write_all(b"abc").unwrap();
        assert_eq!(cw.written(), 7);
    }
}
