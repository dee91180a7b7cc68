use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use openssl::sha::Sha256;

use crate::error::{Result, StoreError};
use crate::managed_path::ManagedPath;

const HASH_BLOCK_SIZE: usize = 8 * 1024;

/// Streams a target file through SHA-256 and persists/verifies the digest
/// in a sibling `.sha256` file.
pub struct HashFile {
    target: ManagedPath,
    sibling: PathBuf,
    cached_digest: Option<String>,
}

impl HashFile {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = ManagedPath::new(target.into());
        let sibling = target.sibling_with_appended_extension("sha256");
        HashFile {
            target,
            sibling,
            cached_digest: None,
        }
    }

    /// Compute the hex digest of the target file, reading it in
    /// `HASH_BLOCK_SIZE` blocks. Cached after the first call.
    pub fn compute(&mut self) -> Result<String> {
        if let Some(digest) = &self.cached_digest {
            return Ok(digest.clone());
        }

        if !self.target.exists() {
            return Err(StoreError::NotFound(self.target.as_path().to_owned()));
        }

        let mut file = File::open(self.target.as_path())?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; HASH_BLOCK_SIZE];

        loop {
            let count = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            hasher.update(&buffer[..count]);
        }

        let digest = hex::encode(hasher.finish());
        self.cached_digest = Some(digest.clone());
        Ok(digest)
    }

    pub fn write(&self, digest: &str, overwrite: bool) -> Result<()> {
        if self.sibling.exists() {
            if !overwrite {
                return Err(StoreError::AlreadyExists(self.sibling.clone()));
            }
            fs::remove_file(&self.sibling)?;
        }
        fs::write(&self.sibling, digest.as_bytes())?;
        Ok(())
    }

    pub fn read(&self) -> Result<String> {
        if !self.sibling.exists() {
            return Err(StoreError::NotFound(self.sibling.clone()));
        }
        let data = fs::read_to_string(&self.sibling)?;
        Ok(data.trim().to_string())
    }

    /// Returns true iff both files exist and `read() == compute()`. Any
    /// I/O or parse error is logged and treated as verification failure,
    /// not propagated.
    pub fn verify(&mut self) -> bool {
        let stored = match self.read() {
            Ok(digest) => digest,
            Err(err) => {
                log::warn!("hash verify: unable to read digest: {err}");
                return false;
            }
        };
        let computed = match self.compute() {
            Ok(digest) => digest,
            Err(err) => {
                log::warn!("hash verify: unable to compute digest: {err}");
                return false;
            }
        };
        stored == computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn compute_write_read_verify_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let mut hash_file = HashFile::new(&path);
        let digest = hash_file.compute().unwrap();
        hash_file.write(&digest, false).unwrap();

        let mut reread = HashFile::new(&path);
        assert!(reread.verify());

        // mutate target -> verify fails
        fs::write(&path, b"tampered").unwrap();
        let mut reread = HashFile::new(&path);
        assert!(!reread.verify());
    }

    #[test]
    fn compute_caches_after_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();

        let mut hash_file = HashFile::new(&path);
        let first = hash_file.compute().unwrap();
        fs::remove_file(&path).unwrap();
        // cached value is returned without re-reading the (now missing) file
        let second = hash_file.compute().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn write_refuses_overwrite_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();

        let hash_file = HashFile::new(&path);
        hash_file.write("deadbeef", false).unwrap();
        assert!(matches!(
            hash_file.write("cafebabe", false),
            Err(StoreError::AlreadyExists(_))
        ));
        hash_file.write("cafebabe", true).unwrap();
        assert_eq!(hash_file.read().unwrap(), "cafebabe");
    }

    #[test]
    fn missing_sibling_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();
        let hash_file = HashFile::new(&path);
        assert!(matches!(hash_file.read(), Err(StoreError::NotFound(_))));
    }
}
