//! 本地目录存储：每个键一个文件（异步实现）。
//!
//! 值保存在 `root/{id:08x}`。同步读取由有界的整值缓存提供，未命中时返回
//! `TryAgain` 并在后台加载。

use super::adapter::{AsyncPrimitives, AsyncTransaction};
use super::queue::TaskQueue;
use super::{read_range, write_range, Store, StoreFlags, Transaction};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

/// Default cache budget in bytes.
pub const DEFAULT_CACHE_BYTES: u64 = 64 << 20;

pub struct LocalFsStore {
    inner: Arc<LocalFsInner>,
    queue: TaskQueue,
}

pub struct LocalFsInner {
    root: PathBuf,
    cache: Cache<u32, Bytes>,
    known: Mutex<BTreeSet<u32>>,
}

impl LocalFsStore {
    /// Open (creating if needed) the directory at `root` and index its keys.
    pub async fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        Self::open_with_cache(root, DEFAULT_CACHE_BYTES).await
    }

    pub async fn open_with_cache<P: AsRef<Path>>(root: P, cache_bytes: u64) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::from(e).with_path(root.display().to_string()))?;

        let mut known = BTreeSet::new();
        let mut dir = fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(id) = entry.file_name().to_str().and_then(parse_key) {
                known.insert(id);
            }
        }
        info!(root = %root.display(), keys = known.len(), "opened local store");

        let cache = Cache::builder()
            .max_capacity(cache_bytes)
            .weigher(|_id: &u32, value: &Bytes| u32::try_from(value.len()).unwrap_or(u32::MAX))
            .build();

        Ok(Self {
            inner: Arc::new(LocalFsInner {
                root,
                cache,
                known: Mutex::new(known),
            }),
            queue: TaskQueue::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

#[async_trait]
impl Store for LocalFsStore {
    fn name(&self) -> &str {
        "localfs"
    }

    fn label(&self) -> Option<&str> {
        self.inner.root.to_str()
    }

    fn flags(&self) -> StoreFlags {
        StoreFlags::PARTIAL
    }

    /// Every write is flushed when its job finishes, so waiting for the
    /// queue is enough.
    async fn sync(&self) -> StoreResult<()> {
        self.queue.settled().await
    }

    fn transaction(&self) -> Box<dyn Transaction> {
        Box::new(AsyncTransaction::new(self.inner.clone(), self.queue.clone()))
    }
}

impl LocalFsInner {
    fn path_for(&self, id: u32) -> PathBuf {
        self.root.join(format!("{id:08x}"))
    }

    async fn load(&self, id: u32) -> StoreResult<Option<Bytes>> {
        if let Some(value) = self.cache.get(&id) {
            return Ok(Some(value));
        }
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(buf) => {
                let value = Bytes::from(buf);
                self.cache.insert(id, value.clone());
                Ok(Some(value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from(e).with_path(path.display().to_string())),
        }
    }
}

#[async_trait]
impl AsyncPrimitives for LocalFsInner {
    async fn keys(&self) -> StoreResult<Vec<u32>> {
        Ok(self.known.lock().iter().copied().collect())
    }

    fn cached_keys(&self) -> StoreResult<Vec<u32>> {
        Ok(self.known.lock().iter().copied().collect())
    }

    async fn get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        Ok(self
            .load(id)
            .await?
            .map(|value| read_range(&value, offset, end)))
    }

    fn cached_get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        if let Some(value) = self.cache.get(&id) {
            return Ok(Some(read_range(&value, offset, end)));
        }
        if !self.known.lock().contains(&id) {
            return Ok(None);
        }
        Err(StoreError::try_again(self.path_for(id).display().to_string()))
    }

    async fn set(&self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        let mut value = self
            .load(id)
            .await?
            .map(|v| v.to_vec())
            .unwrap_or_default();
        write_range(&mut value, &data, offset)?;

        let path = self.path_for(id);
        let write = async {
            let mut f = fs::File::create(&path).await?;
            f.write_all(&value).await?;
            f.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        write
            .await
            .map_err(|e| StoreError::from(e).with_path(path.display().to_string()))?;

        debug!(id, offset, len = data.len(), "wrote value");
        self.cache.insert(id, Bytes::from(value));
        self.known.lock().insert(id);
        Ok(())
    }

    async fn remove(&self, id: u32) -> StoreResult<()> {
        let path = self.path_for(id);
        self.cache.invalidate(&id);
        fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::from(e).with_path(path.display().to_string()))?;
        self.known.lock().remove(&id);
        Ok(())
    }
}

fn parse_key(name: &str) -> Option<u32> {
    if name.len() != 8 {
        return None;
    }
    u32::from_str_radix(name, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WrappedTransaction;

    #[tokio::test]
    async fn test_localfs_set_get() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(tmp.path()).await.unwrap();
        let mut tx = store.transaction();

        tx.set(0x2a, Bytes::from_static(b"hello"), 0).await.unwrap();
        tx.set(0x2a, Bytes::from_static(b"J"), 0).await.unwrap();
        assert_eq!(
            tx.get(0x2a, 0, None).await.unwrap().unwrap(),
            &b"Jello"[..]
        );

        let on_disk = std::fs::read(tmp.path().join("0000002a")).unwrap();
        assert_eq!(on_disk, b"Jello");
    }

    #[tokio::test]
    async fn test_reopen_finds_existing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("00000010"), b"sixteen").unwrap();
        std::fs::write(tmp.path().join("not-a-key"), b"ignored").unwrap();

        let store = LocalFsStore::open(tmp.path()).await.unwrap();
        let mut tx = store.transaction();
        assert_eq!(tx.keys().await.unwrap(), vec![0x10]);

        // nothing cached yet
        let err = tx.get_sync(0x10, 0, None).unwrap_err();
        assert!(err.is_try_again());
        store.sync().await.unwrap();
        assert_eq!(tx.get_sync(0x10, 0, Some(3)).unwrap().unwrap(), &b"six"[..]);

        // unknown keys are absent, not pending
        assert_eq!(tx.get_sync(0x11, 0, None).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_writes_are_queued() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(tmp.path()).await.unwrap();
        let mut tx = store.transaction();

        tx.set_sync(1, Bytes::from_static(b"queued"), 0).unwrap();
        tx.remove_sync(1).unwrap();
        tx.set_sync(2, Bytes::from_static(b"kept"), 0).unwrap();
        store.sync().await.unwrap();

        assert!(!tmp.path().join("00000001").exists());
        assert_eq!(std::fs::read(tmp.path().join("00000002")).unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_dropped_create_and_remove_leaves_queue_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(tmp.path()).await.unwrap();
        {
            let mut tx = WrappedTransaction::begin(&store);
            tx.set_sync(9, &b"tmp"[..], 0).unwrap();
            tx.remove_sync(9).unwrap();
        }
        store.sync().await.unwrap();

        assert!(!tmp.path().join("00000009").exists());
        assert_eq!(store.transaction().keys().await.unwrap(), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn test_remove_missing_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(tmp.path()).await.unwrap();
        let err = store.transaction().remove(7).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
