//! The external compressed-archive codec boundary.
//!
//! `ShardFile` is written against the `ArchiveCodec` trait rather than
//! against a concrete format, so the on-disk archive layout can change
//! without touching the manager or shard logic. `ZstdArchive` is the one
//! concrete codec this crate ships.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Error};

// WARNING: PLEASE DO NOT MODIFY THIS MAGIC VALUE
// openssl::sha::sha256(b"Prime shard archive v1.0")[0..8]
const ARCHIVE_MAGIC_1_0: [u8; 8] = [142, 112, 67, 73, 64, 66, 167, 113];

/// A compressed container mapping chunk name to an ordered `u64` array.
///
/// `ShardFile` depends only on this trait, so the on-disk archive format
/// can be swapped (a real `.npz`-equivalent, a columnar format, ...)
/// without touching the manager or the shard file logic.
pub trait ArchiveCodec {
    fn write(&self, path: &Path, chunks: &[(&str, &[u64])]) -> Result<(), Error>;
    fn open(&self, path: &Path) -> Result<Vec<(String, Vec<u64>)>, Error>;
}

/// Frames `name -> [u64]` pairs into a flat buffer, checksums it with
/// CRC32, and compresses the whole buffer with zstd.
///
/// Buffer layout (pre-compression):
/// `MAGIC(8) || CRC32(4) || entry_count(4) || entries...`
/// where each entry is `name_len(2) || name || item_count(4) || items (u64 LE)`.
pub struct ZstdArchive {
    pub level: i32,
}

impl Default for ZstdArchive {
    fn default() -> Self {
        ZstdArchive { level: 3 }
    }
}

impl ArchiveCodec for ZstdArchive {
    fn write(&self, path: &Path, chunks: &[(&str, &[u64])]) -> Result<(), Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
        for (name, items) in chunks {
            let name_bytes = name.as_bytes();
            if name_bytes.len() > u16::MAX as usize {
                bail!("chunk name too long: {name}");
            }
            body.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            body.extend_from_slice(name_bytes);
            body.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in *items {
                body.extend_from_slice(&item.to_le_bytes());
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut framed = Vec::with_capacity(8 + 4 + body.len());
        framed.extend_from_slice(&ARCHIVE_MAGIC_1_0);
        framed.extend_from_slice(&crc.to_le_bytes());
        framed.extend_from_slice(&body);

        let compressed =
            zstd::encode_all(framed.as_slice(), self.level).context("zstd compression failed")?;

        let mut file = File::create(path)
            .with_context(|| format!("unable to create archive {}", path.display()))?;
        file.write_all(&compressed)?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Vec<(String, Vec<u64>)>, Error> {
        let mut file = File::open(path)
            .with_context(|| format!("unable to open archive {}", path.display()))?;
        let mut compressed = Vec::new();
        file.read_to_end(&mut compressed)?;

        let framed =
            zstd::decode_all(compressed.as_slice()).context("zstd decompression failed")?;

        if framed.len() < 12 || framed[0..8] != ARCHIVE_MAGIC_1_0 {
            bail!("bad archive magic in {}", path.display());
        }
        let stored_crc = u32::from_le_bytes(framed[8..12].try_into().unwrap());
        let body = &framed[12..];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            bail!("archive checksum mismatch in {}", path.display());
        }

        let mut cursor = 0usize;
        let entry_count = read_u32(body, &mut cursor)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let name_len = read_u16(body, &mut cursor)? as usize;
            let name = read_str(body, &mut cursor, name_len)?;
            let item_count = read_u32(body, &mut cursor)? as usize;
            let mut items = Vec::with_capacity(item_count);
            for _ in 0..item_count {
                items.push(read_u64(body, &mut cursor)?);
            }
            entries.push((name, items));
        }

        Ok(entries)
    }
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, Error> {
    let bytes: [u8; 2] = buf
        .get(*cursor..*cursor + 2)
        .ok_or_else(|| anyhow::format_err!("truncated archive"))?
        .try_into()?;
    *cursor += 2;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, Error> {
    let bytes: [u8; 4] = buf
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| anyhow::format_err!("truncated archive"))?
        .try_into()?;
    *cursor += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(buf: &[u8], cursor: &mut usize) -> Result<u64, Error> {
    let bytes: [u8; 8] = buf
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| anyhow::format_err!("truncated archive"))?
        .try_into()?;
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes))
}

fn read_str(buf: &[u8], cursor: &mut usize, len: usize) -> Result<String, Error> {
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or_else(|| anyhow::format_err!("truncated archive"))?;
    *cursor += len;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Convenience used by `ShardFile::write` to adapt a `BTreeMap` of owned
/// chunk data into the borrowed-slice form `ArchiveCodec::write` expects.
pub fn as_codec_input(chunks: &BTreeMap<String, Vec<u64>>) -> Vec<(&str, &[u64])> {
    chunks
        .iter()
        .map(|(name, items)| (name.as_str(), items.as_slice()))
        .collect()
}
