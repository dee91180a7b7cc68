use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{as_codec_input, ArchiveCodec, ZstdArchive};
use crate::error::{Result, StoreError};

/// One shard on disk: a mapping from chunk name to an ordered `u64` array,
/// stored via an `ArchiveCodec`.
pub struct ShardFile<C: ArchiveCodec = ZstdArchive> {
    path: PathBuf,
    codec: C,
}

impl ShardFile<ZstdArchive> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ShardFile {
            path: path.into(),
            codec: ZstdArchive::default(),
        }
    }
}

impl<C: ArchiveCodec> ShardFile<C> {
    pub fn with_codec(path: impl Into<PathBuf>, codec: C) -> Self {
        ShardFile {
            path: path.into(),
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate(chunk_dict: &BTreeMap<String, Vec<u64>>) -> Result<()> {
        if chunk_dict.is_empty() {
            return Err(StoreError::InvalidArgument(
                "chunk dictionary is empty".into(),
            ));
        }
        for (name, items) in chunk_dict {
            if name.is_empty() {
                return Err(StoreError::InvalidArgument("chunk name is empty".into()));
            }
            if items.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "chunk {name} is empty"
                )));
            }
        }
        Ok(())
    }

    pub fn write(&self, chunk_dict: &BTreeMap<String, Vec<u64>>, overwrite: bool) -> Result<()> {
        Self::validate(chunk_dict)?;

        if self.path.exists() {
            if !overwrite {
                return Err(StoreError::AlreadyExists(self.path.clone()));
            }
            self.delete()?;
        }

        let input = as_codec_input(chunk_dict);
        self.codec
            .write(&self.path, &input)
            .map_err(|err| StoreError::Corrupt(format!("writing shard {:?}: {err}", self.path)))?;
        Ok(())
    }

    /// Concatenates all chunks (insertion order not assumed meaningful),
    /// sorts, and deduplicates. Callers always see a sorted unique view
    /// regardless of on-disk chunk ordering.
    pub fn read(&self) -> Result<Vec<u64>> {
        let mut all: Vec<u64> = self
            .read_chunks()?
            .into_iter()
            .flat_map(|(_, items)| items)
            .collect();
        all.sort_unstable();
        all.dedup();
        Ok(all)
    }

    /// The raw per-chunk entries as stored, with no flattening, sorting, or
    /// deduplication -- lets a caller check chunk-level ordering/content
    /// that `read()`'s sorted view would otherwise hide.
    pub fn read_chunks(&self) -> Result<Vec<(String, Vec<u64>)>> {
        if !self.path.exists() {
            return Err(StoreError::NotFound(self.path.clone()));
        }

        self.codec
            .open(&self.path)
            .map_err(|err| StoreError::Corrupt(format!("reading shard {:?}: {err}", self.path)))
    }

    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prime_shard_1_of_1.npz");
        let shard = ShardFile::new(&path);

        let mut chunks = BTreeMap::new();
        chunks.insert("2_5".to_string(), vec![2u64, 3, 5]);
        chunks.insert("7_11".to_string(), vec![7u64, 11]);
        shard.write(&chunks, false).unwrap();

        let mut read = shard.read().unwrap();
        read.sort_unstable();
        assert_eq!(read, vec![2, 3, 5, 7, 11]);

        shard.delete().unwrap();
        assert!(matches!(shard.read(), Err(StoreError::NotFound(_))));
        // idempotent
        shard.delete().unwrap();
    }

    #[test]
    fn write_refuses_overwrite_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.npz");
        let shard = ShardFile::new(&path);

        let mut chunks = BTreeMap::new();
        chunks.insert("1_2".to_string(), vec![1u64, 2]);
        shard.write(&chunks, false).unwrap();

        assert!(matches!(
            shard.write(&chunks, false),
            Err(StoreError::AlreadyExists(_))
        ));
        shard.write(&chunks, true).unwrap();
    }

    #[test]
    fn write_rejects_empty_chunk_dict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.npz");
        let shard = ShardFile::new(&path);
        let chunks = BTreeMap::new();
        assert!(matches!(
            shard.write(&chunks, false),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn read_deduplicates_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.npz");
        let shard = ShardFile::new(&path);

        let mut chunks = BTreeMap::new();
        chunks.insert("a".to_string(), vec![1u64, 2, 2]);
        chunks.insert("b".to_string(), vec![2u64, 3]);
        shard.write(&chunks, false).unwrap();

        let read = shard.read().unwrap();
        assert_eq!(read, vec![1, 2, 3]);
    }
}
