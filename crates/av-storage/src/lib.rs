//! av-storage: object storage boundary for digitized AV validation
//!
//! The validation pipeline never talks to a storage backend directly; it
//! consumes the `ObjectStore` trait defined here.
//!
//! ## Layer 0 - Storage
//!
//! ## Key Components
//!
//! - `ObjectStore`: get / put / delete / exists keyed by `ObjectLocation`, plus
//!   streaming `get_to_path` and store-side `copy` for package archives
//! - `FsObjectStore`: bucket-per-directory store with atomic writes
//! - `fakes::MemoryObjectStore`: in-memory store with call counters and fault injection

mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::FsObjectStore;
pub use storage_traits::{ObjectLocation, ObjectStore, StorageResult};
