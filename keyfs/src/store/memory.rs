//! 内存存储实现（同步），用于测试和临时文件系统。

use super::adapter::{SyncPrimitives, SyncTransaction};
use super::{range_end, read_range, write_range, Store, StoreFlags, Transaction};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Entries = Arc<Mutex<HashMap<u32, Vec<u8>>>>;

/// Sync-native store keeping every value in a shared map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    label: Option<String>,
    entries: Entries,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            entries: Entries::default(),
        }
    }

    /// Seed a value outside any transaction.
    pub fn insert(&self, id: u32, value: Vec<u8>) {
        self.entries.lock().insert(id, value);
    }

    /// Copy of the whole value stored under `id`.
    pub fn value(&self, id: u32) -> Option<Vec<u8>> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn flags(&self) -> StoreFlags {
        StoreFlags::PARTIAL
    }

    async fn sync(&self) -> StoreResult<()> {
        Ok(())
    }

    fn transaction(&self) -> Box<dyn Transaction> {
        Box::new(SyncTransaction::new(MemoryTransaction {
            entries: self.entries.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    entries: Entries,
}

impl SyncPrimitives for MemoryTransaction {
    fn keys(&mut self) -> StoreResult<Vec<u32>> {
        let mut keys: Vec<u32> = self.entries.lock().keys().copied().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        Ok(self
            .entries
            .lock()
            .get(&id)
            .map(|value| read_range(value, offset, end)))
    }

    fn set(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        if !data.is_empty() {
            range_end(offset, data.len())?;
        }
        let mut entries = self.entries.lock();
        let value = entries.entry(id).or_default();
        write_range(value, &data, offset)
    }

    fn remove(&mut self, id: u32) -> StoreResult<()> {
        self.entries
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("key {id}")))
    }
}
