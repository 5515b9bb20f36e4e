use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::{CODEBOOK_VERSION, PACKSZ};
use crate::grid::tables;
use crate::lattice::{PackedAbsTable, ABS_GRID_ROWS};
use crate::packing::PackedIndexMatrix;
use crate::E8pError;

const PERSIST_MAGIC: [u8; 4] = *b"E8P1";
const PERSIST_VERSION: u32 = 1;
const MAX_HEADER_BYTES: usize = 1024;

fn read_vecs_from_reader<R, T, F>(
    mut reader: R,
    limit: Option<usize>,
    convert: F,
) -> io::Result<Vec<Vec<T>>>
where
    R: Read,
    F: Fn([u8; 4]) -> T,
{
    let mut vectors = Vec::new();

    loop {
        if let Some(max) = limit {
            if vectors.len() >= max {
                break;
            }
        }

        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let dim = i32::from_le_bytes(dim_buf);
        if dim < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("negative dimension {dim} encountered"),
            ));
        }
        let dim = dim as usize;

        let mut buffer = vec![0u8; dim * 4];
        reader.read_exact(&mut buffer)?;

        let mut vector = Vec::with_capacity(dim);
        for chunk in buffer.chunks_exact(4) {
            let bytes: [u8; 4] = chunk.try_into().expect("chunk of length 4");
            vector.push(convert(bytes));
        }
        vectors.push(vector);
    }

    Ok(vectors)
}

pub fn read_fvecs_from_reader<R: Read>(
    reader: R,
    limit: Option<usize>,
) -> io::Result<Vec<Vec<f32>>> {
    read_vecs_from_reader(reader, limit, f32::from_le_bytes)
}

pub fn read_ivecs_from_reader<R: Read>(
    reader: R,
    limit: Option<usize>,
) -> io::Result<Vec<Vec<i32>>> {
    read_vecs_from_reader(reader, limit, i32::from_le_bytes)
}

pub fn read_fvecs<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<Vec<Vec<f32>>> {
    let file = File::open(path)?;
    read_fvecs_from_reader(BufReader::new(file), limit)
}

pub fn read_ivecs<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<Vec<Vec<i32>>> {
    let file = File::open(path)?;
    read_ivecs_from_reader(BufReader::new(file), limit)
}

/// Write vectors in fvecs layout: little-endian `i32` length, then the values.
pub fn write_fvecs_to_writer<W: Write>(writer: W, vectors: &[Vec<f32>]) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);
    for vector in vectors {
        let dim = i32::try_from(vector.len()).map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "vector too long for fvecs")
        })?;
        writer.write_all(&dim.to_le_bytes())?;
        for value in vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()
}

pub fn write_fvecs<P: AsRef<Path>>(path: P, vectors: &[Vec<f32>]) -> io::Result<()> {
    let file = File::create(path)?;
    write_fvecs_to_writer(file, vectors)
}

/// Shape metadata stored ahead of the packed words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedHeader {
    pub index_rows: u64,
    pub index_cols: u64,
    pub codebook_version: u32,
}

/// Packed indices together with the abs table needed to decode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCodes {
    pub packed: PackedIndexMatrix,
    pub packed_abs: PackedAbsTable,
}

fn write_u32<W: Write>(writer: &mut W, value: u32, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    writer.write_all(&bytes)?;
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    Ok(())
}

fn write_u64<W: Write>(writer: &mut W, value: u64, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    writer.write_all(&bytes)?;
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    Ok(u64::from_le_bytes(bytes))
}

fn usize_from_u64(value: u64) -> Result<usize, E8pError> {
    usize::try_from(value)
        .map_err(|_| E8pError::InvalidPersistence("value exceeds platform limits"))
}

impl PackedCodes {
    pub fn new(packed: PackedIndexMatrix, packed_abs: PackedAbsTable) -> Self {
        Self { packed, packed_abs }
    }

    /// Persist to the provided filesystem path.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), E8pError> {
        let file = File::create(path)?;
        self.save_to_writer(file)
    }

    /// Persist using the supplied writer.
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<(), E8pError> {
        let mut writer = BufWriter::new(writer);
        writer.write_all(&PERSIST_MAGIC)?;
        write_u32(&mut writer, PERSIST_VERSION, None)?;

        let mut hasher = Hasher::new();

        let header = PackedHeader {
            index_rows: self.packed.index_rows() as u64,
            index_cols: self.packed.index_cols() as u64,
            codebook_version: CODEBOOK_VERSION,
        };
        let header_bytes = bincode::serialize(&header)
            .map_err(|_| E8pError::InvalidPersistence("failed to serialize header"))?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| E8pError::InvalidPersistence("header too large"))?;
        write_u32(&mut writer, header_len, Some(&mut hasher))?;
        writer.write_all(&header_bytes)?;
        hasher.update(&header_bytes);

        for &word in self.packed_abs.as_slice() {
            write_u32(&mut writer, word, Some(&mut hasher))?;
        }
        for &word in self.packed.words() {
            write_u64(&mut writer, word, Some(&mut hasher))?;
        }

        let checksum = hasher.finalize();
        write_u32(&mut writer, checksum, None)?;

        writer.flush()?;
        Ok(())
    }

    /// Load from the provided filesystem path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, E8pError> {
        let file = File::open(path)?;
        Self::load_from_reader(file)
    }

    /// Load from a persisted byte stream. The stored abs table must match
    /// the codebook built by this crate.
    pub fn load_from_reader<R: Read>(reader: R) -> Result<Self, E8pError> {
        let mut reader = BufReader::new(reader);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PERSIST_MAGIC {
            return Err(E8pError::InvalidPersistence("unrecognized file header"));
        }

        let version = read_u32(&mut reader, None)?;
        if version != PERSIST_VERSION {
            return Err(E8pError::InvalidPersistence(
                "unsupported packed format version",
            ));
        }

        let mut hasher = Hasher::new();

        let header_len = read_u32(&mut reader, Some(&mut hasher))? as usize;
        if header_len > MAX_HEADER_BYTES {
            return Err(E8pError::InvalidPersistence("header length out of range"));
        }
        let mut header_bytes = vec![0u8; header_len];
        reader.read_exact(&mut header_bytes)?;
        hasher.update(&header_bytes);
        let header: PackedHeader = bincode::deserialize(&header_bytes)
            .map_err(|_| E8pError::InvalidPersistence("failed to deserialize header"))?;
        if header.codebook_version != CODEBOOK_VERSION {
            return Err(E8pError::InvalidPersistence("unsupported codebook version"));
        }

        let index_rows = usize_from_u64(header.index_rows)?;
        let index_cols = usize_from_u64(header.index_cols)?;
        let word_count = index_rows
            .checked_mul(index_cols)
            .map(|n| n / PACKSZ)
            .ok_or(E8pError::InvalidPersistence("packed shape overflows"))?;

        let mut abs_words = Vec::with_capacity(ABS_GRID_ROWS);
        for _ in 0..ABS_GRID_ROWS {
            abs_words.push(read_u32(&mut reader, Some(&mut hasher))?);
        }

        let mut words = Vec::with_capacity(word_count.min(1 << 20));
        for _ in 0..word_count {
            words.push(read_u64(&mut reader, Some(&mut hasher))?);
        }

        let stored_checksum = read_u32(&mut reader, None)?;
        if stored_checksum != hasher.finalize() {
            return Err(E8pError::InvalidPersistence("checksum mismatch"));
        }

        let packed_abs = PackedAbsTable::from_words(&abs_words)
            .map_err(|_| E8pError::InvalidPersistence("malformed packed abs table"))?;
        if &packed_abs != tables().packed_abs() {
            return Err(E8pError::InvalidPersistence(
                "packed abs table does not match the codebook",
            ));
        }
        let packed = PackedIndexMatrix::from_words(index_rows, index_cols, words)
            .map_err(|_| E8pError::InvalidPersistence("packed shape violates tiling"))?;

        Ok(Self { packed, packed_abs })
    }
}

/// Write the packed abs table as 256 little-endian `u32` words.
pub fn write_packed_abs<W: Write>(mut writer: W, table: &PackedAbsTable) -> io::Result<()> {
    writer.write_all(&table.to_le_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::matrix::IndexMatrix;
    use crate::packing::pack_indices;

    fn sample_codes() -> PackedCodes {
        let data = (0..32 * 8).map(|k| (k * 257) as u16).collect();
        let indices = IndexMatrix::new(32, 8, data).unwrap();
        PackedCodes::new(
            pack_indices(&indices).unwrap(),
            tables().packed_abs().clone(),
        )
    }

    #[test]
    fn fvecs_roundtrip() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![], vec![-4.5]];
        let mut bytes = Vec::new();
        write_fvecs_to_writer(&mut bytes, &vectors).unwrap();
        assert_eq!(&bytes[..4], &3i32.to_le_bytes());
        let restored = read_fvecs_from_reader(Cursor::new(bytes.clone()), None).unwrap();
        assert_eq!(restored, vectors);
        let limited = read_fvecs_from_reader(Cursor::new(bytes), Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn ivecs_reader_rejects_negative_dimension() {
        let bytes = (-1i32).to_le_bytes().to_vec();
        let err = read_ivecs_from_reader(Cursor::new(bytes), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn packed_codes_roundtrip() {
        let codes = sample_codes();
        let mut buffer = Vec::new();
        codes.save_to_writer(&mut buffer).unwrap();
        assert_eq!(&buffer[..4], b"E8P1");
        let restored = PackedCodes::load_from_reader(buffer.as_slice()).unwrap();
        assert_eq!(restored, codes);
    }

    #[test]
    fn packed_codes_detect_corruption() {
        let codes = sample_codes();
        let mut buffer = Vec::new();
        codes.save_to_writer(&mut buffer).unwrap();
        let target = buffer.len() - 12;
        buffer[target] ^= 0x40;
        match PackedCodes::load_from_reader(buffer.as_slice()) {
            Err(E8pError::InvalidPersistence(msg)) => assert_eq!(msg, "checksum mismatch"),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn packed_codes_reject_foreign_abs_table() {
        let codes = sample_codes();
        let mut buffer = Vec::new();
        codes.save_to_writer(&mut buffer).unwrap();

        // magic + version + header length + bincode header (u64, u64, u32)
        let abs_offset = 4 + 4 + 4 + 20;
        buffer[abs_offset] ^= 0x01;
        let checksum_offset = buffer.len() - 4;
        let mut hasher = Hasher::new();
        hasher.update(&buffer[8..checksum_offset]);
        let checksum = hasher.finalize();
        buffer[checksum_offset..].copy_from_slice(&checksum.to_le_bytes());

        match PackedCodes::load_from_reader(buffer.as_slice()) {
            Err(E8pError::InvalidPersistence(msg)) => {
                assert_eq!(msg, "packed abs table does not match the codebook")
            }
            other => panic!("expected abs table mismatch, got {other:?}"),
        }
    }

    #[test]
    fn packed_abs_dump_is_little_endian() {
        let mut bytes = Vec::new();
        write_packed_abs(&mut bytes, tables().packed_abs()).unwrap();
        assert_eq!(bytes.len(), ABS_GRID_ROWS * 4);
        assert_eq!(&bytes[..4], &0x9999_9999u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0x5999_9999u32.to_le_bytes());
    }
}
