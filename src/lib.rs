//! Sharded on-disk storage for large sorted arrays of unsigned integers.
//!
//! An array is split into shards (files), each holding one or more
//! compressed chunks. A JSON metadata file catalogues every shard's
//! interval and chunk layout; a sibling hashfile attests its integrity and
//! a sibling lockfile serializes writers.

pub mod archive;
pub mod error;
pub mod hash_file;
pub mod lock_file;
pub mod managed_path;
pub mod metadata_file;
pub mod partition;
pub mod shard_file;
pub mod shard_manager;

pub use archive::{ArchiveCodec, ZstdArchive};
pub use error::{Result, StoreError};
pub use hash_file::HashFile;
pub use lock_file::LockFile;
pub use managed_path::ManagedPath;
pub use metadata_file::MetadataFile;
pub use partition::{PartitionConstraints, PartitionPlan, PartitionStrategy};
pub use shard_file::ShardFile;
pub use shard_manager::{Interval, ShardManager, ShardRecord};
