//! Index chunk I/O
//!
//! A flushed index chunk is an opaque byte blob (a serialized R-tree) plus
//! its descriptive header. This module provides the byte-stream reader used
//! by all deserialization paths, and a chunk file format for persisting
//! chunks alongside the data they index.
//!
//! Chunk file layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (8 bytes)                        │
//! │   magic: [u8; 4] = "SIMX"               │
//! │   version: u16                          │
//! │   reserved: u16                         │
//! ├─────────────────────────────────────────┤
//! │ CHUNKS (variable)                       │
//! │   For each chunk:                       │
//! │     body_size: u32                      │
//! │     body: [u8; body_size]               │
//! │     body_checksum: u32                  │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   For each chunk:                       │
//! │     path_len: u16, path: [u8]           │
//! │     index_type: u8                      │
//! │     start_time: i64, end_time: i64      │
//! │     offset: u64, body_size: u32         │
//! │   footer_size: u32                      │
//! │   footer_checksum: u32                  │
//! └─────────────────────────────────────────┘
//! ```

use crate::error::{IndexError, IndexResult};
use crate::index::IndexType;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for chunk file identification
const CHUNK_FILE_MAGIC: [u8; 4] = *b"SIMX";

/// Current chunk file format version
const CHUNK_FILE_VERSION: u16 = 1;

/// Cursor over a byte slice with bounds-checked little-endian reads
///
/// Every deserialization path (R-tree streams, identifiers, footers) goes
/// through this; a short read surfaces as `CorruptChunk`.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> IndexResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(IndexError::CorruptChunk(format!(
                "short read: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> IndexResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> IndexResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> IndexResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> IndexResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> IndexResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> IndexResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> IndexResult<&'a [u8]> {
        self.take(n)
    }
}

/// One flushed index chunk: the serialized tree plus its header fields
#[derive(Debug, Clone)]
pub struct IndexFlushChunk {
    pub path: String,
    pub index_type: IndexType,
    pub body: Vec<u8>,
    pub start_time: i64,
    pub end_time: i64,
}

impl IndexFlushChunk {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Where a chunk body can be recovered from
#[derive(Debug, Clone)]
enum ChunkSource {
    /// Byte range in a chunk file
    File {
        file: PathBuf,
        offset: u64,
        size: u32,
    },
    /// Body held in memory (unflushed or test chunks)
    Inline(Vec<u8>),
}

/// Descriptor of one persisted index chunk
#[derive(Debug, Clone)]
pub struct IndexChunkMeta {
    pub path: String,
    pub index_type: IndexType,
    pub start_time: i64,
    pub end_time: i64,
    source: ChunkSource,
}

impl IndexChunkMeta {
    /// Wrap an in-memory chunk, e.g. one just flushed
    pub fn inline(chunk: &IndexFlushChunk) -> Self {
        Self {
            path: chunk.path.clone(),
            index_type: chunk.index_type,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            source: ChunkSource::Inline(chunk.body.clone()),
        }
    }

    /// Read the chunk body back, verifying its checksum
    ///
    /// I/O failures are `ChunkUnpack` (transient, the reader skips the
    /// chunk); checksum mismatches are `CorruptChunk`.
    pub fn unpack(&self) -> IndexResult<Vec<u8>> {
        match &self.source {
            ChunkSource::Inline(body) => Ok(body.clone()),
            ChunkSource::File { file, offset, size } => {
                let open = File::open(file)
                    .map_err(|e| IndexError::ChunkUnpack(format!("{}: {}", file.display(), e)))?;
                let mut reader = BufReader::new(open);
                reader
                    .seek(SeekFrom::Start(*offset))
                    .map_err(|e| IndexError::ChunkUnpack(e.to_string()))?;

                let mut size_buf = [0u8; 4];
                reader
                    .read_exact(&mut size_buf)
                    .map_err(|e| IndexError::ChunkUnpack(e.to_string()))?;
                let stored_size = u32::from_le_bytes(size_buf);
                if stored_size != *size {
                    return Err(IndexError::CorruptChunk(format!(
                        "body size mismatch: footer {}, frame {}",
                        size, stored_size
                    )));
                }

                let mut body = vec![0u8; stored_size as usize];
                reader
                    .read_exact(&mut body)
                    .map_err(|e| IndexError::ChunkUnpack(e.to_string()))?;

                let mut crc_buf = [0u8; 4];
                reader
                    .read_exact(&mut crc_buf)
                    .map_err(|e| IndexError::ChunkUnpack(e.to_string()))?;
                let stored_crc = u32::from_le_bytes(crc_buf);
                let computed_crc = crc32fast::hash(&body);
                if stored_crc != computed_crc {
                    return Err(IndexError::CorruptChunk(format!(
                        "chunk checksum mismatch: stored={}, computed={}",
                        stored_crc, computed_crc
                    )));
                }
                Ok(body)
            }
        }
    }
}

/// Appends flushed chunks to a chunk file
pub struct IndexFileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    offset: u64,
    metas: Vec<IndexChunkMeta>,
}

impl IndexFileWriter {
    /// Create a new chunk file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&CHUNK_FILE_MAGIC)?;
        writer.write_all(&CHUNK_FILE_VERSION.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?;
        Ok(Self {
            writer,
            path,
            offset: 8,
            metas: Vec::new(),
        })
    }

    /// Append one chunk: `body_size + body + crc32`
    pub fn append(&mut self, chunk: &IndexFlushChunk) -> IndexResult<()> {
        let checksum = crc32fast::hash(&chunk.body);
        self.writer
            .write_all(&(chunk.body.len() as u32).to_le_bytes())?;
        self.writer.write_all(&chunk.body)?;
        self.writer.write_all(&checksum.to_le_bytes())?;

        self.metas.push(IndexChunkMeta {
            path: chunk.path.clone(),
            index_type: chunk.index_type,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            source: ChunkSource::File {
                file: self.path.clone(),
                offset: self.offset,
                size: chunk.body.len() as u32,
            },
        });
        self.offset += 8 + chunk.body.len() as u64;
        tracing::debug!(
            "Appended index chunk for {} [{}, {}] ({} bytes)",
            chunk.path,
            chunk.start_time,
            chunk.end_time,
            chunk.body.len()
        );
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.metas.len()
    }

    /// Write the footer and close the file
    pub fn finish(mut self) -> IndexResult<Vec<IndexChunkMeta>> {
        let mut footer = Vec::new();
        for meta in &self.metas {
            let (offset, size) = match &meta.source {
                ChunkSource::File { offset, size, .. } => (*offset, *size),
                ChunkSource::Inline(_) => unreachable!("writer only produces file sources"),
            };
            footer.extend_from_slice(&(meta.path.len() as u16).to_le_bytes());
            footer.extend_from_slice(meta.path.as_bytes());
            footer.push(meta.index_type.tag());
            footer.extend_from_slice(&meta.start_time.to_le_bytes());
            footer.extend_from_slice(&meta.end_time.to_le_bytes());
            footer.extend_from_slice(&offset.to_le_bytes());
            footer.extend_from_slice(&size.to_le_bytes());
        }
        let checksum = crc32fast::hash(&footer);
        self.writer.write_all(&footer)?;
        self.writer.write_all(&(footer.len() as u32).to_le_bytes())?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.writer.flush()?;
        Ok(self.metas)
    }
}

/// Reads chunk metadata back from a chunk file
pub struct IndexFileReader {
    metas: Vec<IndexChunkMeta>,
}

impl IndexFileReader {
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if header[0..4] != CHUNK_FILE_MAGIC {
            return Err(IndexError::CorruptChunk(format!(
                "invalid chunk file magic: {:?}",
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > CHUNK_FILE_VERSION {
            return Err(IndexError::CorruptChunk(format!(
                "unsupported chunk file version: {}",
                version
            )));
        }

        // footer trailer: footer_size + checksum
        file.seek(SeekFrom::End(-8))?;
        let mut trailer = [0u8; 8];
        file.read_exact(&mut trailer)?;
        let footer_size = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let stored_crc = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        file.seek(SeekFrom::End(-(footer_size as i64) - 8))?;
        let mut footer = vec![0u8; footer_size as usize];
        file.read_exact(&mut footer)?;
        if crc32fast::hash(&footer) != stored_crc {
            return Err(IndexError::CorruptChunk("footer checksum mismatch".into()));
        }

        let mut metas = Vec::new();
        let mut reader = ByteReader::new(&footer);
        while !reader.is_exhausted() {
            let path_len = reader.read_u16()? as usize;
            let series_path = String::from_utf8(reader.read_bytes(path_len)?.to_vec())
                .map_err(|e| IndexError::CorruptChunk(format!("bad path in footer: {}", e)))?;
            let index_type = IndexType::from_tag(reader.read_u8()?)?;
            let start_time = reader.read_i64()?;
            let end_time = reader.read_i64()?;
            let offset = reader.read_u64()?;
            let size = reader.read_u32()?;
            metas.push(IndexChunkMeta {
                path: series_path,
                index_type,
                start_time,
                end_time,
                source: ChunkSource::File {
                    file: path.clone(),
                    offset,
                    size,
                },
            });
        }
        Ok(Self { metas })
    }

    /// Metadata for every chunk of the given series path, in file order
    pub fn chunk_metas(&self, series_path: &str) -> Vec<IndexChunkMeta> {
        self.metas
            .iter()
            .filter(|m| m.path == series_path)
            .cloned()
            .collect()
    }

    pub fn all_metas(&self) -> &[IndexChunkMeta] {
        &self.metas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(path: &str, start: i64, end: i64, body: Vec<u8>) -> IndexFlushChunk {
        IndexFlushChunk {
            path: path.to_string(),
            index_type: IndexType::Elb,
            body,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn test_byte_reader_bounds() {
        let data = [1u8, 0, 0, 0, 7];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert!(reader.is_exhausted());
        assert!(matches!(reader.read_u8(), Err(IndexError::CorruptChunk(_))));
    }

    #[test]
    fn test_chunk_file_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("series.simx");

        let chunks = [
            chunk("root.sg.d1.s1", 0, 990, vec![1, 2, 3, 4]),
            chunk("root.sg.d1.s1", 1000, 1990, vec![5, 6]),
            chunk("root.sg.d1.s2", 0, 500, vec![9; 100]),
        ];
        let mut writer = IndexFileWriter::create(&file_path).unwrap();
        for c in &chunks {
            writer.append(c).unwrap();
        }
        let metas = writer.finish().unwrap();
        assert_eq!(metas.len(), 3);

        let reader = IndexFileReader::open(&file_path).unwrap();
        let s1 = reader.chunk_metas("root.sg.d1.s1");
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].start_time, 0);
        assert_eq!(s1[0].end_time, 990);
        assert_eq!(s1[0].unpack().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(s1[1].unpack().unwrap(), vec![5, 6]);

        let s2 = reader.chunk_metas("root.sg.d1.s2");
        assert_eq!(s2.len(), 1);
        assert_eq!(s2[0].unpack().unwrap(), vec![9; 100]);
    }

    #[test]
    fn test_corrupted_body_detected() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("series.simx");

        let mut writer = IndexFileWriter::create(&file_path).unwrap();
        writer.append(&chunk("p", 0, 10, vec![42; 32])).unwrap();
        let metas = writer.finish().unwrap();

        // flip a body byte in place
        let mut raw = std::fs::read(&file_path).unwrap();
        raw[12] ^= 0xFF;
        std::fs::write(&file_path, raw).unwrap();

        assert!(matches!(
            metas[0].unpack(),
            Err(IndexError::CorruptChunk(_))
        ));
    }

    #[test]
    fn test_missing_file_is_transient() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("series.simx");
        let mut writer = IndexFileWriter::create(&file_path).unwrap();
        writer.append(&chunk("p", 0, 10, vec![1])).unwrap();
        let metas = writer.finish().unwrap();

        std::fs::remove_file(&file_path).unwrap();
        let err = metas[0].unpack().unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_inline_meta_unpacks_directly() {
        let c = chunk("p", 5, 9, vec![1, 2, 3]);
        let meta = IndexChunkMeta::inline(&c);
        assert_eq!(meta.unpack().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bogus.simx");
        std::fs::write(&file_path, b"NOPExxxxxxxxxxxxxxxx").unwrap();
        assert!(matches!(
            IndexFileReader::open(&file_path),
            Err(IndexError::CorruptChunk(_))
        ));
    }
}
