//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryObjectStore` satisfies the `ObjectStore` contract without touching
//! disk, counts every operation, and can inject transient faults so retry
//! behaviour is observable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Operation kinds tracked by `MemoryObjectStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Delete,
    Exists,
    Size,
    Download,
    Copy,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<ObjectLocation, Vec<u8>>,
    calls: HashMap<StoreOp, usize>,
    transient_faults: HashMap<StoreOp, usize>,
    permanent_faults: Vec<StoreOp>,
}

/// In-memory object store backed by a `HashMap<location, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a `put`.
    pub fn insert(&self, location: ObjectLocation, data: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(location, data.into());
    }

    /// Peek at an object without counting it as a `get`.
    pub fn object(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.objects.get(location).cloned()
    }

    pub fn contains(&self, location: &ObjectLocation) -> bool {
        self.object(location).is_some()
    }

    /// Number of times `op` was invoked (including failed attempts).
    pub fn call_count(&self, op: StoreOp) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// The next `count` invocations of `op` fail with `StorageError::Unavailable`.
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        let mut state = self.state.lock().unwrap();
        *state.transient_faults.entry(op).or_insert(0) += count;
    }

    /// Every invocation of `op` fails with `StorageError::Unavailable`.
    pub fn fail_always(&self, op: StoreOp) {
        let mut state = self.state.lock().unwrap();
        state.permanent_faults.push(op);
    }

    fn enter(&self, op: StoreOp) -> StorageResult<std::sync::MutexGuard<'_, StoreState>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_insert(0) += 1;

        if state.permanent_faults.contains(&op) {
            return Err(StorageError::Unavailable(format!("injected {op:?} fault")));
        }
        if let Some(remaining) = state.transient_faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Unavailable(format!(
                    "injected transient {op:?} fault"
                )));
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        location.validate()?;
        let state = self.enter(StoreOp::Get)?;
        state
            .objects
            .get(location)
            .cloned()
            .ok_or_else(|| not_found(location))
    }

    async fn put(&self, location: &ObjectLocation, data: &[u8]) -> StorageResult<()> {
        location.validate()?;
        let mut state = self.enter(StoreOp::Put)?;
        state.objects.insert(location.clone(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<()> {
        location.validate()?;
        let mut state = self.enter(StoreOp::Delete)?;
        state.objects.remove(location);
        Ok(())
    }

    async fn exists(&self, location: &ObjectLocation) -> StorageResult<bool> {
        location.validate()?;
        let state = self.enter(StoreOp::Exists)?;
        Ok(state.objects.contains_key(location))
    }

    async fn size(&self, location: &ObjectLocation) -> StorageResult<u64> {
        location.validate()?;
        let state = self.enter(StoreOp::Size)?;
        state
            .objects
            .get(location)
            .map(|data| data.len() as u64)
            .ok_or_else(|| not_found(location))
    }

    async fn get_to_path(&self, location: &ObjectLocation, path: &Path) -> StorageResult<u64> {
        location.validate()?;
        let data = {
            let state = self.enter(StoreOp::Download)?;
            state
                .objects
                .get(location)
                .cloned()
                .ok_or_else(|| not_found(location))?
        };
        tokio::fs::write(path, &data).await?;
        Ok(data.len() as u64)
    }

    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> StorageResult<()> {
        from.validate()?;
        to.validate()?;
        let mut state = self.enter(StoreOp::Copy)?;
        let data = state
            .objects
            .get(from)
            .cloned()
            .ok_or_else(|| not_found(from))?;
        state.objects.insert(to.clone(), data);
        Ok(())
    }
}

fn not_found(location: &ObjectLocation) -> StorageError {
    StorageError::NotFound {
        bucket: location.bucket.clone(),
        key: location.key.clone(),
    }
}
