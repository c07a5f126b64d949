//! 键值存储抽象：`Store` / `Transaction` 接口 + 范围读写辅助函数。
//!
//! [`Store`] 以 32 位 id 为键保存字节值，并创建原始 [`Transaction`]。每种存储
//! 只原生支持一种执行模型，[`adapter`] 中的适配器为原始事务补齐同步与异步两套接口，
//! [`WrappedTransaction`] 在其上提供回滚。

pub mod adapter;
pub mod localfs;
pub mod memory;
pub mod queue;
pub mod wrapped;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;

pub use adapter::{AsyncPrimitives, AsyncTransaction, SyncPrimitives, SyncTransaction};
pub use localfs::LocalFsStore;
pub use memory::MemoryStore;
pub use queue::TaskQueue;
pub use wrapped::{Evict, WrappedTransaction};

bitflags! {
    /// Capabilities a store advertises to its transactions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StoreFlags: u8 {
        /// `get` honours offset/end and `set` writes at an offset without
        /// rewriting the whole value.
        const PARTIAL = 0b0000_0001;
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend identifier, e.g. `memory`.
    fn name(&self) -> &str;

    /// Optional human-readable label of this instance.
    fn label(&self) -> Option<&str> {
        None
    }

    /// Optional numeric id distinguishing instances of the same backend.
    fn id(&self) -> Option<u32> {
        None
    }

    fn flags(&self) -> StoreFlags {
        StoreFlags::empty()
    }

    /// Flush pending work. Async-native stores wait for their queue here.
    async fn sync(&self) -> StoreResult<()>;

    /// Start a raw, non-rollback transaction.
    fn transaction(&self) -> Box<dyn Transaction>;
}

/// Raw key-value operations, each in a synchronous and an asynchronous form.
///
/// `get` returns `Ok(None)` for an absent key; `remove` of an absent key
/// fails with `NotFound`. `end` is exclusive; `None` reads to the end.
#[async_trait]
pub trait Transaction: Send {
    async fn keys(&mut self) -> StoreResult<Vec<u32>>;
    fn keys_sync(&mut self) -> StoreResult<Vec<u32>>;

    async fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>>;
    fn get_sync(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>>;

    async fn set(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()>;
    fn set_sync(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()>;

    async fn remove(&mut self, id: u32) -> StoreResult<()>;
    fn remove_sync(&mut self, id: u32) -> StoreResult<()>;

    /// Remove `id` if present; absence is not an error.
    async fn discard(&mut self, id: u32) -> StoreResult<()> {
        ignore_not_found(self.remove(id).await)
    }

    /// Synchronous [`Transaction::discard`]. Stores that queue their
    /// synchronous removals must tolerate absence inside the queued job.
    fn discard_sync(&mut self, id: u32) -> StoreResult<()> {
        ignore_not_found(self.remove_sync(id))
    }
}

pub(crate) fn ignore_not_found(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Slice `[offset, end)` out of a whole value, clamped to its length.
pub(crate) fn read_range(value: &[u8], offset: u64, end: Option<u64>) -> Bytes {
    let len = value.len() as u64;
    let start = offset.min(len);
    let stop = end.unwrap_or(len).clamp(start, len);
    Bytes::copy_from_slice(&value[start as usize..stop as usize])
}

/// Exclusive end of a write of `len` bytes at `offset`, if addressable.
pub(crate) fn range_end(offset: u64, len: usize) -> StoreResult<usize> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(len))
        .filter(|end| u32::try_from(*end).is_ok())
        .ok_or_else(|| {
            StoreError::InvalidInput(format!("write of {len} bytes at offset {offset} is out of range"))
        })
}

/// Write `data` into `value` at `offset`, zero-filling any gap.
pub(crate) fn write_range(value: &mut Vec<u8>, data: &[u8], offset: u64) -> StoreResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    let stop = range_end(offset, data.len())?;
    let start = stop - data.len();
    if value.len() < stop {
        value.resize(stop, 0);
    }
    value[start..stop].copy_from_slice(data);
    Ok(())
}
