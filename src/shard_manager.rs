use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::error::{Result, StoreError};
use crate::metadata_file::MetadataFile;
use crate::partition::{PartitionConstraints, PartitionPlan, PartitionStrategy};
use crate::shard_file::ShardFile;

const ITEM_BYTE_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// Inclusive interval `[min, max]`.
pub type Interval = (u64, u64);

/// Per-shard metadata record: its overall interval, position, chunk count,
/// and the `{min, max}` of each of its chunks.
#[derive(Debug, Clone)]
pub struct ShardRecord {
    pub prime_interval: Interval,
    pub shard_index: u64,
    pub chunk_count: u64,
    pub chunks: BTreeMap<String, Interval>,
}

impl ShardRecord {
    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(
            "prime_interval".into(),
            json!([self.prime_interval.0, self.prime_interval.1]),
        );
        obj.insert("shard_index".into(), json!(self.shard_index));
        obj.insert("chunk_count".into(), json!(self.chunk_count));
        for (name, (min, max)) in &self.chunks {
            obj.insert(name.clone(), json!({ "min": min, "max": max }));
        }
        Value::Object(obj)
    }
}

fn interval_intersects(request: Interval, shard: Interval) -> bool {
    request.0 < shard.1 && shard.0 < request.1
}

fn chunk_name(min: u64, max: u64) -> String {
    format!("{min}_{max}")
}

/// Drives save/load/repartition against a `PartitionPlan`, generates
/// per-shard metadata, and keeps the metadata file in sync with what is
/// actually on disk.
pub struct ShardManager {
    data_dir: PathBuf,
    metadata_path: PathBuf,
}

impl ShardManager {
    pub fn new(data_dir: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        ShardManager {
            data_dir: data_dir.into(),
            metadata_path: metadata_path.into(),
        }
    }

    fn shard_path(&self, index: u64, total_shards: u64) -> PathBuf {
        self.data_dir
            .join(format!("prime_shard_{}_of_{}.npz", index + 1, total_shards))
    }

    /// Normalize, plan, and write shards + metadata. On step-by-shard
    /// failure, shards already written stay on disk and the metadata file
    /// is not updated -- a recoverable inconsistent state repaired by a
    /// later `save` with `overwrite_shards: true`.
    pub fn save(
        &self,
        items: &mut Vec<u64>,
        constraints: PartitionConstraints,
        overwrite_shards: bool,
        overwrite_metadata: bool,
    ) -> Result<PartitionPlan> {
        if items.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot save an empty array".into(),
            ));
        }

        items.sort_unstable();
        items.dedup();

        let plan =
            PartitionStrategy::calculate_plan(items.len() as u64, ITEM_BYTE_SIZE, constraints)?;

        fs::create_dir_all(&self.data_dir)?;

        let mut document = Map::new();
        document.insert(
            "chunk_size".into(),
            json!(plan.items_per_chunk * ITEM_BYTE_SIZE),
        );
        document.insert(
            "shard_size".into(),
            json!(plan.items_per_shard * ITEM_BYTE_SIZE),
        );
        document.insert("itemsize".into(), json!(ITEM_BYTE_SIZE));
        document.insert(
            "total_bytes".into(),
            json!(items.len() as u64 * ITEM_BYTE_SIZE),
        );
        document.insert("total_primes".into(), json!(items.len() as u64));
        document.insert("total_chunks".into(), json!(plan.total_chunks));
        document.insert("total_shards".into(), json!(plan.total_shards));
        document.insert("config".into(), serde_json::to_value(plan)?);

        let mut shard_paths = Vec::new();

        let items_per_shard = plan.items_per_shard as usize;
        let items_per_chunk = plan.items_per_chunk as usize;

        for shard_index in 0..plan.total_shards {
            let start = shard_index as usize * items_per_shard;
            let end = (start + items_per_shard).min(items.len());
            if start >= end {
                break;
            }
            let shard_slice = &items[start..end];

            let path = self.shard_path(shard_index, plan.total_shards);
            let path_str = path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .to_string_lossy()
                .into_owned();
            shard_paths.push(json!(path_str));

            let mut chunk_dict: BTreeMap<String, Vec<u64>> = BTreeMap::new();
            let mut chunk_intervals = BTreeMap::new();

            for chunk in shard_slice.chunks(items_per_chunk) {
                let min = chunk[0];
                let max = chunk[chunk.len() - 1];
                let name = chunk_name(min, max);
                chunk_intervals.insert(name.clone(), (min, max));
                chunk_dict.insert(name, chunk.to_vec());
            }

            let record = ShardRecord {
                prime_interval: (shard_slice[0], shard_slice[shard_slice.len() - 1]),
                shard_index,
                chunk_count: chunk_dict.len() as u64,
                chunks: chunk_intervals,
            };
            document.insert(path_str, record.to_json());

            ShardFile::new(&path).write(&chunk_dict, overwrite_shards)?;
        }

        document.insert("shard_paths".into(), Value::Array(shard_paths));

        let mut metadata = MetadataFile::new(&self.metadata_path);
        metadata.write(document, overwrite_metadata)?;

        Ok(plan)
    }

    /// Load items whose value falls in the inclusive `[min, max]` range,
    /// filtered at shard granularity: every matching item is present, but
    /// the returned set may include items from a shard that merely
    /// intersects the requested range (no chunk-level filtering).
    pub fn load(&self, range: Option<Interval>) -> Result<Vec<u64>> {
        let request = range.unwrap_or((0, u64::MAX));
        if request.0 > request.1 {
            return Err(StoreError::InvalidArgument(
                "requested range is reversed".into(),
            ));
        }

        let metadata = MetadataFile::new(&self.metadata_path).read(false, false)?;
        if metadata.is_empty() {
            return Err(StoreError::NotFound(self.metadata_path.clone()));
        }

        let shard_paths = shard_paths_of(&metadata)?;

        let mut collected = Vec::new();
        for path in shard_paths {
            let record = shard_record_of(&metadata, &path)?;
            if interval_intersects(request, record.prime_interval) {
                collected.extend(ShardFile::new(&path).read()?);
            }
        }

        collected.sort_unstable();
        collected.dedup();
        Ok(collected)
    }

    /// Verify that every shard path in metadata exists, that each of its
    /// chunks is itself sorted and matches its recorded `{min, max}`, and
    /// that the chunks -- ordered by recorded `min`, not by the sorted read
    /// path -- are pairwise disjoint and combine into the recorded overall
    /// interval.
    ///
    /// This reads chunks raw (`ShardFile::read_chunks`) rather than through
    /// `ShardFile::read`, which sorts and dedups the union of all chunks
    /// and would make any ordering check vacuously true.
    pub fn verify_shard_integrity(&self) -> Result<()> {
        let metadata = MetadataFile::new(&self.metadata_path).read(false, false)?;
        if metadata.is_empty() {
            return Err(StoreError::NotFound(self.metadata_path.clone()));
        }

        for path in shard_paths_of(&metadata)? {
            let record = shard_record_of(&metadata, &path)?;

            if !Path::new(&path).exists() {
                return Err(StoreError::IntegrityViolated(format!(
                    "missing shard file {path}"
                )));
            }

            let chunks = ShardFile::new(&path).read_chunks()?;
            if chunks.is_empty() {
                return Err(StoreError::IntegrityViolated(format!(
                    "shard {path} has no chunks"
                )));
            }
            if chunks.len() as u64 != record.chunk_count {
                return Err(StoreError::IntegrityViolated(format!(
                    "shard {path} has {} chunks, recorded chunk_count is {}",
                    chunks.len(),
                    record.chunk_count
                )));
            }

            let mut observed_intervals: Vec<Interval> = Vec::with_capacity(chunks.len());
            for (name, items) in &chunks {
                if items.is_empty() {
                    return Err(StoreError::IntegrityViolated(format!(
                        "chunk {name} in shard {path} is empty"
                    )));
                }
                if !items.windows(2).all(|w| w[0] <= w[1]) {
                    return Err(StoreError::IntegrityViolated(format!(
                        "chunk {name} in shard {path} is not internally sorted"
                    )));
                }

                let actual = (items[0], items[items.len() - 1]);
                let recorded = record.chunks.get(name).ok_or_else(|| {
                    StoreError::IntegrityViolated(format!(
                        "chunk {name} in shard {path} has no recorded interval"
                    ))
                })?;
                if actual != *recorded {
                    return Err(StoreError::IntegrityViolated(format!(
                        "chunk {name} in shard {path} has interval {:?}, recorded {:?}",
                        actual, recorded
                    )));
                }
                observed_intervals.push(actual);
            }

            observed_intervals.sort_by_key(|interval| interval.0);
            if !observed_intervals.windows(2).all(|w| w[0].1 < w[1].0) {
                return Err(StoreError::IntegrityViolated(format!(
                    "shard {path} chunks are not disjoint and ordered by recorded interval"
                )));
            }

            let observed = (
                observed_intervals[0].0,
                observed_intervals[observed_intervals.len() - 1].1,
            );
            if observed != record.prime_interval {
                return Err(StoreError::IntegrityViolated(format!(
                    "shard {path} interval {:?} does not match recorded {:?}",
                    observed, record.prime_interval
                )));
            }
        }

        Ok(())
    }

    /// Verify, reload the full array, delete the old shards, and re-save
    /// with new partition knobs. Not incremental: steps 2-4 run against the
    /// same in-memory array.
    pub fn repartition(&self, constraints: PartitionConstraints) -> Result<PartitionPlan> {
        self.verify_shard_integrity()?;

        let mut items = self.load(None)?;

        let metadata = MetadataFile::new(&self.metadata_path).read(false, false)?;
        for path in shard_paths_of(&metadata)? {
            ShardFile::new(&path).delete()?;
        }

        self.save(&mut items, constraints, true, true)
    }
}

fn shard_paths_of(metadata: &Map<String, Value>) -> Result<Vec<String>> {
    metadata
        .get("shard_paths")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Corrupt("metadata missing shard_paths".into()))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| StoreError::Corrupt("shard_paths entry is not a string".into()))
        })
        .collect()
}

fn shard_record_of(metadata: &Map<String, Value>, path: &str) -> Result<ShardRecord> {
    let obj = metadata
        .get(path)
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Corrupt(format!("missing shard record for {path}")))?;

    let interval = obj
        .get("prime_interval")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Corrupt(format!("shard {path} missing prime_interval")))?;
    let min = interval
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Corrupt(format!("shard {path} has bad interval")))?;
    let max = interval
        .get(1)
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Corrupt(format!("shard {path} has bad interval")))?;

    let shard_index = obj.get("shard_index").and_then(Value::as_u64).unwrap_or(0);
    let chunk_count = obj.get("chunk_count").and_then(Value::as_u64).unwrap_or(0);

    let mut chunks = BTreeMap::new();
    for (key, value) in obj {
        if matches!(
            key.as_str(),
            "prime_interval" | "shard_index" | "chunk_count"
        ) {
            continue;
        }
        if let Some(chunk_obj) = value.as_object() {
            if let (Some(min), Some(max)) = (
                chunk_obj.get("min").and_then(Value::as_u64),
                chunk_obj.get("max").and_then(Value::as_u64),
            ) {
                chunks.insert(key.clone(), (min, max));
            }
        }
    }

    Ok(ShardRecord {
        prime_interval: (min, max),
        shard_index,
        chunk_count,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path) -> ShardManager {
        ShardManager::new(dir.join("data"), dir.join("data").join("metadata.json"))
    }

    #[test]
    fn round_trip_with_explicit_counts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());

        let mut items: Vec<u64> = vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29];
        let plan = manager
            .save(
                &mut items,
                PartitionConstraints {
                    max_shard_bytes: Some(4 * 8),
                    max_chunk_bytes: Some(2 * 8),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        assert_eq!(plan.total_shards, 3);
        assert_eq!(plan.chunks_per_shard, 2);

        let loaded = manager.load(None).unwrap();
        assert_eq!(loaded, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn save_normalizes_unsorted_duplicate_input() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items = vec![5u64, 3, 3, 7, 2, 2, 11];
        manager
            .save(&mut items, PartitionConstraints::default(), false, false)
            .unwrap();

        let loaded = manager.load(None).unwrap();
        assert_eq!(loaded, vec![2, 3, 5, 7, 11]);
    }

    #[test]
    fn save_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items = Vec::new();
        assert!(matches!(
            manager.save(&mut items, PartitionConstraints::default(), false, false),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn second_save_without_overwrite_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items = vec![1u64, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let constraints = PartitionConstraints {
            target_shard_count: Some(4),
            ..Default::default()
        };
        manager
            .save(&mut items.clone(), constraints, false, false)
            .unwrap();

        assert!(matches!(
            manager.save(&mut items, constraints, false, true),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn load_range_filter_returns_superset_bounded_by_shards() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items: Vec<u64> = (1..=100).collect();
        manager
            .save(
                &mut items,
                PartitionConstraints {
                    target_shard_count: Some(10),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        let result = manager.load(Some((45, 55))).unwrap();
        // every matching item is present
        for v in 45..=55 {
            assert!(result.contains(&v));
        }
        // and only values drawn from the stored array
        for v in &result {
            assert!(*v >= 1 && *v <= 100);
        }
    }

    #[test]
    fn load_rejects_reversed_range() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        assert!(matches!(
            manager.load(Some((10, 5))),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn load_without_prior_save_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        assert!(matches!(manager.load(None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn verify_shard_integrity_detects_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items: Vec<u64> = (1..=20).collect();
        manager
            .save(
                &mut items,
                PartitionConstraints {
                    target_shard_count: Some(4),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        manager.verify_shard_integrity().unwrap();

        let metadata = MetadataFile::new(dir.path().join("data").join("metadata.json"))
            .read(false, false)
            .unwrap();
        let first_shard = &shard_paths_of(&metadata).unwrap()[0];
        std::fs::remove_file(first_shard).unwrap();

        assert!(matches!(
            manager.verify_shard_integrity(),
            Err(StoreError::IntegrityViolated(_))
        ));
    }

    #[test]
    fn verify_shard_integrity_detects_out_of_order_chunk_on_disk() {
        use crate::shard_file::ShardFile;
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items: Vec<u64> = vec![1, 2, 3, 4];
        manager
            .save(
                &mut items,
                PartitionConstraints {
                    target_shard_count: Some(1),
                    target_chunks_per_shard: Some(1),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        manager.verify_shard_integrity().unwrap();

        let metadata = MetadataFile::new(dir.path().join("data").join("metadata.json"))
            .read(false, false)
            .unwrap();
        let shard_path = shard_paths_of(&metadata).unwrap()[0].clone();
        let record = shard_record_of(&metadata, &shard_path).unwrap();
        let chunk_name = record.chunks.keys().next().unwrap().clone();

        // rewrite the same chunk with its items reversed: the
        // flattened-and-sorted read path (ShardFile::read) would hide this
        // entirely, so this must be caught via the raw per-chunk read.
        let mut tampered: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        tampered.insert(chunk_name, vec![4, 3, 2, 1]);
        ShardFile::new(&shard_path).write(&tampered, true).unwrap();

        assert!(matches!(
            manager.verify_shard_integrity(),
            Err(StoreError::IntegrityViolated(_))
        ));
    }

    #[test]
    fn repartition_preserves_contents_under_new_knobs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items: Vec<u64> = (1..=50).collect();
        manager
            .save(
                &mut items,
                PartitionConstraints {
                    target_shard_count: Some(5),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        let plan = manager
            .repartition(PartitionConstraints {
                target_shard_count: Some(2),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(plan.total_shards, 2);
        let loaded = manager.load(None).unwrap();
        assert_eq!(loaded, (1..=50).collect::<Vec<u64>>());
    }

    #[test]
    fn shard_intervals_are_disjoint_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let mut items: Vec<u64> = (1..=97).collect();
        manager
            .save(
                &mut items,
                PartitionConstraints {
                    target_shard_count: Some(6),
                    ..Default::default()
                },
                false,
                false,
            )
            .unwrap();

        let metadata = MetadataFile::new(dir.path().join("data").join("metadata.json"))
            .read(false, false)
            .unwrap();
        let mut intervals: Vec<Interval> = shard_paths_of(&metadata)
            .unwrap()
            .iter()
            .map(|p| shard_record_of(&metadata, p).unwrap().prime_interval)
            .collect();
        intervals.sort();

        for window in intervals.windows(2) {
            assert!(window[0].1 < window[1].0);
        }
    }
}
