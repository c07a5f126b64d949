//! 同步/异步适配器：为原生事务补齐缺失的一侧接口。
//!
//! 同步原生的存储实现 [`SyncPrimitives`]，其异步方法直接返回同步结果。
//! 异步原生的存储实现 [`AsyncPrimitives`]，同步修改进入 [`TaskQueue`]，
//! 同步读取只使用存储已缓存的数据。

use super::queue::TaskQueue;
use super::{Transaction, ignore_not_found};
use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Operations of a store whose medium is accessed synchronously.
pub trait SyncPrimitives: Send {
    fn keys(&mut self) -> StoreResult<Vec<u32>>;
    fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>>;
    fn set(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()>;
    fn remove(&mut self, id: u32) -> StoreResult<()>;
}

pub struct SyncTransaction<T> {
    inner: T,
}

impl<T: SyncPrimitives> SyncTransaction<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: SyncPrimitives> Transaction for SyncTransaction<T> {
    async fn keys(&mut self) -> StoreResult<Vec<u32>> {
        self.inner.keys()
    }

    fn keys_sync(&mut self) -> StoreResult<Vec<u32>> {
        self.inner.keys()
    }

    async fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        self.inner.get(id, offset, end)
    }

    fn get_sync(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        self.inner.get(id, offset, end)
    }

    async fn set(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        self.inner.set(id, data, offset)
    }

    fn set_sync(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        self.inner.set(id, data, offset)
    }

    async fn remove(&mut self, id: u32) -> StoreResult<()> {
        self.inner.remove(id)
    }

    fn remove_sync(&mut self, id: u32) -> StoreResult<()> {
        self.inner.remove(id)
    }
}

/// Operations of a store whose medium is accessed asynchronously.
///
/// `cached_keys` and `cached_get` must not block. `cached_get` fails with
/// `TryAgain` when the value is not cached yet; the adapter then queues a
/// `get` so a later retry can succeed.
#[async_trait]
pub trait AsyncPrimitives: Send + Sync + 'static {
    async fn keys(&self) -> StoreResult<Vec<u32>>;
    fn cached_keys(&self) -> StoreResult<Vec<u32>>;

    async fn get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>>;
    fn cached_get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>>;

    async fn set(&self, id: u32, data: Bytes, offset: u64) -> StoreResult<()>;
    async fn remove(&self, id: u32) -> StoreResult<()>;
}

pub struct AsyncTransaction<T: AsyncPrimitives> {
    inner: Arc<T>,
    queue: TaskQueue,
}

impl<T: AsyncPrimitives> AsyncTransaction<T> {
    /// `queue` is shared by every transaction of the same store so queued
    /// work keeps its global order.
    pub fn new(inner: Arc<T>, queue: TaskQueue) -> Self {
        Self { inner, queue }
    }
}

#[async_trait]
impl<T: AsyncPrimitives> Transaction for AsyncTransaction<T> {
    // Asynchronous calls wait for queued work first so they observe every
    // mutation issued through the synchronous surface before them. Queued
    // failures are left for `TaskQueue::settled`.

    async fn keys(&mut self) -> StoreResult<Vec<u32>> {
        self.queue.idle().await;
        self.inner.keys().await
    }

    fn keys_sync(&mut self) -> StoreResult<Vec<u32>> {
        self.inner.cached_keys()
    }

    async fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        self.queue.idle().await;
        self.inner.get(id, offset, end).await
    }

    fn get_sync(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        match self.inner.cached_get(id, offset, end) {
            Err(err) if err.is_try_again() => {
                let inner = self.inner.clone();
                self.queue.enqueue("warm", async move {
                    inner.get(id, offset, end).await.map(|_| ())
                })?;
                Err(err)
            }
            other => other,
        }
    }

    async fn set(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        self.queue.idle().await;
        self.inner.set(id, data, offset).await
    }

    fn set_sync(&mut self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        let inner = self.inner.clone();
        self.queue
            .enqueue("set", async move { inner.set(id, data, offset).await })
    }

    async fn remove(&mut self, id: u32) -> StoreResult<()> {
        self.queue.idle().await;
        self.inner.remove(id).await
    }

    fn remove_sync(&mut self, id: u32) -> StoreResult<()> {
        let inner = self.inner.clone();
        self.queue
            .enqueue("remove", async move { inner.remove(id).await })
    }

    fn discard_sync(&mut self, id: u32) -> StoreResult<()> {
        let inner = self.inner.clone();
        self.queue.enqueue("discard", async move {
            ignore_not_found(inner.remove(id).await)
        })
    }
}
