use std::fs;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::hash_file::HashFile;
use crate::lock_file::LockFile;
use crate::managed_path::ManagedPath;

/// Releases the wrapped lock on drop, so `MetadataFile::write` releases its
/// lock on every exit path (success, merge failure, or I/O error) without
/// repeating the release call at each `return`.
struct LockGuard<'a> {
    lock: &'a LockFile,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release(false) {
            log::warn!("failed to release metadata lock cleanly: {err}");
            // best effort: reclaim unconditionally so a failed release
            // doesn't wedge the store for the lifetime of this process.
            let _ = self.lock.release(true);
        }
    }
}

/// A JSON document coupled to a `LockFile` and a `HashFile` on the same
/// path.
pub struct MetadataFile {
    path: ManagedPath,
    lock: LockFile,
}

impl MetadataFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = LockFile::new(&path);
        MetadataFile {
            path: ManagedPath::new(path),
            lock,
        }
    }

    fn hash_file(&self) -> HashFile {
        HashFile::new(self.path.as_path())
    }

    /// Read and parse the document. Missing file or malformed JSON yields
    /// an empty map in non-strict mode; `strict: true` turns those
    /// conditions (plus hash mismatch) into `Corrupt`.
    pub fn read(&self, ignore_lock: bool, strict: bool) -> Result<Map<String, Value>> {
        if self.lock.is_locked() && !ignore_lock {
            return Err(StoreError::Locked(self.path.as_path().to_owned()));
        }

        if !self.path.exists() {
            if strict {
                return Err(StoreError::Corrupt(format!("{} does not exist", self.path)));
            }
            return Ok(Map::new());
        }

        if !self.hash_file().verify() {
            log::warn!("metadata hash mismatch for {}", self.path);
            if strict {
                return Err(StoreError::Corrupt(format!(
                    "hash mismatch for {}",
                    self.path
                )));
            }
            return Ok(Map::new());
        }

        let data = fs::read_to_string(self.path.as_path())?;
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                if strict {
                    Err(StoreError::Corrupt(format!(
                        "malformed metadata JSON at {}",
                        self.path
                    )))
                } else {
                    Ok(Map::new())
                }
            }
        }
    }

    /// Merge `new_data` into the document under the lock and rewrite it.
    /// New keys win over existing keys; nested objects are replaced
    /// wholesale, not deep-merged.
    pub fn write(&mut self, new_data: Map<String, Value>, overwrite: bool) -> Result<()> {
        self.lock.acquire()?;
        let _guard = LockGuard { lock: &self.lock };

        let mut document = if overwrite {
            Map::new()
        } else {
            self.read(true, false)?
        };

        for (key, value) in new_data {
            document.insert(key, value);
        }

        let serialized = to_string_pretty_indent4(&sort_map(&document))?;
        fs::write(self.path.as_path(), serialized.as_bytes())?;

        let mut hash_file = self.hash_file();
        let digest = hash_file.compute()?;
        hash_file.write(&digest, true)?;

        Ok(())
    }
}

/// `serde_json::Map` preserves insertion order by default; re-serialize
/// through a `BTreeMap` so the on-disk representation has stable, sorted
/// key ordering and keeps diffs human-readable.
fn sort_map(map: &Map<String, Value>) -> std::collections::BTreeMap<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// `serde_json::to_string_pretty` hardcodes `PrettyFormatter`'s 2-space
/// default; the on-disk metadata format calls for 4-space indentation, so
/// serialize through an explicit formatter instead.
fn to_string_pretty_indent4<T: serde::Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf).expect("serde_json output is valid utf-8"))
}
