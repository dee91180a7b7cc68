use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// 25 MiB, the default upper bound on a chunk's encoded size.
pub const MAX_CHUNK_SIZE_BYTES: u64 = 25 * 1024 * 1024;
/// 250 MiB, ten chunks' worth, the default upper bound on a shard's size.
pub const MAX_SHARD_SIZE_BYTES: u64 = 10 * MAX_CHUNK_SIZE_BYTES;

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    numerator.div_ceil(denominator)
}

/// Immutable description of how a save/repartition will lay out shards and
/// chunks, derived once from the input size and the caller's constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub items_per_shard: u64,
    pub items_per_chunk: u64,
    pub chunks_per_shard: u64,
    pub total_shards: u64,
    pub total_chunks: u64,
}

/// Optional knobs a caller may pin; `None` falls back to the relevant
/// byte-size default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionConstraints {
    pub target_shard_count: Option<u64>,
    pub target_chunks_per_shard: Option<u64>,
    pub max_shard_bytes: Option<u64>,
    pub max_chunk_bytes: Option<u64>,
}

pub struct PartitionStrategy;

impl PartitionStrategy {
    /// Resolve how many items fit in one partition (shard or chunk).
    ///
    /// If `target_count` is supplied, the partition size is derived purely
    /// from dividing `total_items` evenly across that many partitions and
    /// byte limits are ignored. Otherwise the partition size is derived
    /// from a byte budget (`target_bytes` or `default_bytes`) divided by
    /// the per-item size, clamped to at least 1 so a non-empty input never
    /// produces a zero-length partition.
    fn resolve_limit(
        total_items: u64,
        item_bytes: u64,
        target_count: Option<u64>,
        target_bytes: Option<u64>,
        default_bytes: u64,
    ) -> Result<u64> {
        if item_bytes == 0 {
            return Err(StoreError::InvalidArgument(
                "item_byte_size must be positive".into(),
            ));
        }

        if let Some(count) = target_count {
            if count == 0 {
                return Err(StoreError::InvalidArgument(
                    "target count must be positive".into(),
                ));
            }
            return Ok(ceil_div(total_items, count));
        }

        let limit_bytes = target_bytes.unwrap_or(default_bytes);
        if limit_bytes == 0 {
            return Err(StoreError::InvalidArgument(
                "byte limit must be positive".into(),
            ));
        }

        Ok((limit_bytes / item_bytes).max(1))
    }

    pub fn calculate_plan(
        total_items: u64,
        item_byte_size: u64,
        constraints: PartitionConstraints,
    ) -> Result<PartitionPlan> {
        if item_byte_size == 0 {
            return Err(StoreError::InvalidArgument(
                "item_byte_size must be positive".into(),
            ));
        }

        let items_per_shard = Self::resolve_limit(
            total_items,
            item_byte_size,
            constraints.target_shard_count,
            constraints.max_shard_bytes,
            MAX_SHARD_SIZE_BYTES,
        )?;

        let mut items_per_chunk = Self::resolve_limit(
            items_per_shard,
            item_byte_size,
            constraints.target_chunks_per_shard,
            constraints.max_chunk_bytes,
            MAX_CHUNK_SIZE_BYTES,
        )?;

        // a chunk never exceeds its enclosing shard
        items_per_chunk = items_per_chunk.min(items_per_shard);

        let chunks_per_shard = ceil_div(items_per_shard, items_per_chunk);
        let total_shards = ceil_div(total_items, items_per_shard);
        let total_chunks = ceil_div(total_items, items_per_chunk);

        Ok(PartitionPlan {
            items_per_shard,
            items_per_chunk,
            chunks_per_shard,
            total_shards,
            total_chunks,
        })
    }
}
