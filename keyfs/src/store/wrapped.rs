//! 可回滚事务。
//!
//! 每次修改前，[`WrappedTransaction`] 先读出将被覆盖的字节并保存快照。
//! `abort` 逆序重放快照，使所有被修改的键恢复到事务开始时的状态。
//!
//! 若某个键的第一个快照记录的是“不存在”，说明它是事务内新建的，回滚时删除。
//! 之后的“不存在”快照不算：事务内先删除再重建的键在事务前就存在，
//! 因此回滚时恢复而不是删除。
//!
//! 原始事务不支持截断。键被删除或变长时，会保存它当时的完整值作为基线；
//! 回滚时先删除该键、写回基线，再按基线长度裁剪并重放快照。

use super::{Store, StoreFlags, Transaction};
use crate::error::StoreResult;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook telling a filesystem layer to drop cached state for a key that an
/// abort deleted.
pub trait Evict: Send + Sync {
    fn evict(&self, id: u32);
}

#[derive(Debug, Clone)]
struct Snapshot {
    offset: u64,
    /// `None` when the key was absent when the snapshot was taken.
    data: Option<Bytes>,
}

enum Undo {
    Delete(u32),
    Restore {
        id: u32,
        baseline: Option<Bytes>,
        stashes: Vec<Snapshot>,
    },
}

pub struct WrappedTransaction {
    raw: Box<dyn Transaction>,
    flags: StoreFlags,
    evict: Option<Arc<dyn Evict>>,
    done: bool,
    snapshots: BTreeMap<u32, Vec<Snapshot>>,
    /// Whole value of a key before its first removal or growth.
    baselines: BTreeMap<u32, Bytes>,
    touched: BTreeSet<u32>,
}

impl WrappedTransaction {
    pub fn new(raw: Box<dyn Transaction>, flags: StoreFlags) -> Self {
        Self {
            raw,
            flags,
            evict: None,
            done: false,
            snapshots: BTreeMap::new(),
            baselines: BTreeMap::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Open a raw transaction on `store` and wrap it.
    pub fn begin(store: &dyn Store) -> Self {
        Self::new(store.transaction(), store.flags())
    }

    pub fn with_evict(mut self, evict: Arc<dyn Evict>) -> Self {
        self.evict = Some(evict);
        self
    }

    /// Whether the underlying store advertises `flag`.
    pub fn flag(&self, flag: StoreFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Keys mutated through this transaction so far.
    pub fn modified(&self) -> impl Iterator<Item = u32> + '_ {
        self.touched.iter().copied()
    }

    pub async fn keys(&mut self) -> StoreResult<Vec<u32>> {
        self.raw.keys().await
    }

    pub fn keys_sync(&mut self) -> StoreResult<Vec<u32>> {
        self.raw.keys_sync()
    }

    pub async fn get(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        let data = self.raw.get(id, offset, end).await?;
        self.stash(id, offset, data.clone());
        Ok(data)
    }

    pub fn get_sync(&mut self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        let data = self.raw.get_sync(id, offset, end)?;
        self.stash(id, offset, data.clone());
        Ok(data)
    }

    pub async fn set(&mut self, id: u32, data: impl Into<Bytes>, offset: u64) -> StoreResult<()> {
        let data = data.into();
        let end = snapshot_end(offset, &data);
        let current = self.raw.get(id, offset, end).await?;
        if self.needs_baseline(id, current.as_ref(), &data) {
            let whole = self.raw.get(id, 0, None).await?;
            self.keep_baseline(id, whole);
        }
        self.mark_modified(id, offset, current);
        self.raw.set(id, data, offset).await
    }

    pub fn set_sync(&mut self, id: u32, data: impl Into<Bytes>, offset: u64) -> StoreResult<()> {
        let data = data.into();
        let end = snapshot_end(offset, &data);
        let current = self.raw.get_sync(id, offset, end)?;
        if self.needs_baseline(id, current.as_ref(), &data) {
            let whole = self.raw.get_sync(id, 0, None)?;
            self.keep_baseline(id, whole);
        }
        self.mark_modified(id, offset, current);
        self.raw.set_sync(id, data, offset)
    }

    pub async fn remove(&mut self, id: u32) -> StoreResult<()> {
        let current = self.raw.get(id, 0, None).await?;
        self.keep_baseline(id, current.clone());
        self.mark_modified(id, 0, current);
        self.raw.remove(id).await
    }

    pub fn remove_sync(&mut self, id: u32) -> StoreResult<()> {
        let current = self.raw.get_sync(id, 0, None)?;
        self.keep_baseline(id, current.clone());
        self.mark_modified(id, 0, current);
        self.raw.remove_sync(id)
    }

    /// Keep every change. Idempotent.
    pub async fn commit(&mut self) -> StoreResult<()> {
        self.commit_sync()
    }

    pub fn commit_sync(&mut self) -> StoreResult<()> {
        self.done = true;
        Ok(())
    }

    /// Undo every change made through this transaction.
    ///
    /// No-op once committed or aborted. Errors propagate and leave the
    /// touched keys in an indeterminate state; the abort is not retried.
    pub async fn abort(&mut self) -> StoreResult<()> {
        if self.done {
            return Ok(());
        }
        for undo in self.take_undo_plan() {
            match undo {
                Undo::Delete(id) => {
                    self.raw.discard(id).await?;
                    self.evicted(id);
                }
                Undo::Restore {
                    id,
                    baseline,
                    stashes,
                } => {
                    let limit = baseline.as_ref().map(|b| b.len() as u64);
                    if let Some(baseline) = baseline {
                        self.raw.discard(id).await?;
                        self.raw.set(id, baseline, 0).await?;
                    }
                    for (offset, data) in replay(stashes, limit) {
                        self.raw.set(id, data, offset).await?;
                    }
                }
            }
        }
        self.done = true;
        Ok(())
    }

    pub fn abort_sync(&mut self) -> StoreResult<()> {
        if self.done {
            return Ok(());
        }
        for undo in self.take_undo_plan() {
            match undo {
                Undo::Delete(id) => {
                    self.raw.discard_sync(id)?;
                    self.evicted(id);
                }
                Undo::Restore {
                    id,
                    baseline,
                    stashes,
                } => {
                    let limit = baseline.as_ref().map(|b| b.len() as u64);
                    if let Some(baseline) = baseline {
                        self.raw.discard_sync(id)?;
                        self.raw.set_sync(id, baseline, 0)?;
                    }
                    for (offset, data) in replay(stashes, limit) {
                        self.raw.set_sync(id, data, offset)?;
                    }
                }
            }
        }
        self.done = true;
        Ok(())
    }

    /// Record the bytes read or about to be overwritten at `offset`.
    ///
    /// Stashes taken after a key was modified are replayed before the older
    /// ones, so the oldest bytes for any overlapping range always win.
    fn stash(&mut self, id: u32, offset: u64, data: Option<Bytes>) {
        self.snapshots
            .entry(id)
            .or_default()
            .push(Snapshot { offset, data });
    }

    /// A write of `data` over `current` grows a key that has no baseline yet.
    fn needs_baseline(&self, id: u32, current: Option<&Bytes>, data: &Bytes) -> bool {
        current.is_some_and(|c| c.len() < data.len()) && !self.baselines.contains_key(&id)
    }

    fn keep_baseline(&mut self, id: u32, whole: Option<Bytes>) {
        if let Some(whole) = whole {
            self.baselines.entry(id).or_insert(whole);
        }
    }

    fn mark_modified(&mut self, id: u32, offset: u64, current: Option<Bytes>) {
        if !self.touched.contains(&id) {
            debug!(id, offset, absent = current.is_none(), "snapshot before first write");
        }
        self.stash(id, offset, current);
        self.touched.insert(id);
    }

    /// Drain the stash into an ordered undo plan so a failed abort is never
    /// replayed twice.
    fn take_undo_plan(&mut self) -> Vec<Undo> {
        let mut snapshots = std::mem::take(&mut self.snapshots);
        let mut baselines = std::mem::take(&mut self.baselines);
        let touched = std::mem::take(&mut self.touched);
        touched
            .into_iter()
            .map(|id| {
                let stashes = snapshots.remove(&id).unwrap_or_default();
                // the first stash of a key always predates its first write
                if stashes.first().is_none_or(|s| s.data.is_none()) {
                    Undo::Delete(id)
                } else {
                    Undo::Restore {
                        id,
                        baseline: baselines.remove(&id),
                        stashes,
                    }
                }
            })
            .collect()
    }

    fn evicted(&self, id: u32) {
        if let Some(evict) = &self.evict {
            evict.evict(id);
        }
    }
}

impl Drop for WrappedTransaction {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.abort_sync() {
            warn!(error = %err, "rollback of dropped transaction failed");
        }
    }
}

/// Stashes newest first, skipping absence and clipping each to `limit`.
fn replay(stashes: Vec<Snapshot>, limit: Option<u64>) -> impl Iterator<Item = (u64, Bytes)> {
    stashes.into_iter().rev().filter_map(move |stash| {
        let data = stash.data?;
        let data = match limit {
            Some(limit) if stash.offset >= limit => return None,
            Some(limit) => data.slice(..data.len().min((limit - stash.offset) as usize)),
            None => data,
        };
        (!data.is_empty()).then_some((stash.offset, data))
    })
}

/// Exclusive end of the range a write at `offset` will overwrite.
fn snapshot_end(offset: u64, data: &Bytes) -> Option<u64> {
    (!data.is_empty()).then(|| offset.saturating_add(data.len() as u64))
}
