//! Network backend: files served by a remote origin, described by an index.
//!
//! Paths resolve through the [`Index`] to a size and a URL under the base
//! URL. Reads go through a shared [`RangeCache`]; asynchronous reads fetch
//! whatever sub-ranges are missing, synchronous reads answer only from the
//! cache and queue the fetch on a miss, failing with `TryAgain` so the
//! caller can retry once it has settled.
//!
//! Writes and deletes reach the origin only when `remote_write` is set;
//! otherwise they update the cache alone.

pub mod cache;
pub mod index;
pub mod transport;

use crate::config::{FetchConfig, IndexSource};
use crate::error::{StoreError, StoreResult};
use crate::meta::record::{MetadataRecord, now_ms};
use crate::store::{
    AsyncPrimitives, AsyncTransaction, Store, StoreFlags, TaskQueue, Transaction, range_end,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::Url;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

pub use cache::{CachedRange, RangeCache, RangeSet};
pub use index::{Index, IndexData, normalize_path};
pub use transport::{HttpTransport, Transport, TransportError};

pub struct FetchBackend<T: Transport = HttpTransport> {
    state: Arc<FetchState<T>>,
    queue: TaskQueue,
}

struct FetchState<T> {
    base_url: String,
    remote_write: bool,
    index: RwLock<Index>,
    cache: RangeCache,
    transport: T,
}

/// Strip the trailing separator and collapse the path of `raw`.
pub fn normalize_base_url(raw: &str) -> StoreResult<String> {
    let mut url = Url::parse(raw)
        .map_err(|e| StoreError::InvalidInput(format!("invalid base url {raw}: {e}")))?;
    let path = normalize_path(url.path());
    url.set_path(&path);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn resolve_index_url(base_url: &str, index: &str) -> String {
    match Url::parse(index) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base_url}/{}", index.trim_start_matches('/')),
    }
}

impl FetchBackend<HttpTransport> {
    /// Backend over HTTP, built from `config.transport`.
    pub async fn from_config(config: FetchConfig) -> StoreResult<Self> {
        let transport = HttpTransport::new(&config.transport)?;
        Self::create(config, transport).await
    }
}

impl<T: Transport> FetchBackend<T> {
    /// Load the index and, unless disabled, prefetch every regular file.
    pub async fn create(config: FetchConfig, transport: T) -> StoreResult<Self> {
        let base_url = normalize_base_url(&config.base_url)?;

        let index = match config.index {
            IndexSource::Inline(data) => Index::from_data(data)?,
            IndexSource::Url(location) => {
                let url = resolve_index_url(&base_url, &location);
                let raw = transport
                    .get(&url, None)
                    .await
                    .map_err(|e| e.into_store_error(&url))?;
                Index::from_json(&raw).map_err(|e| e.with_path(url))?
            }
        };
        info!(base_url = %base_url, entries = index.len(), "loaded index");

        let backend = Self {
            state: Arc::new(FetchState {
                base_url,
                remote_write: config.remote_write,
                index: RwLock::new(index),
                cache: RangeCache::new(),
                transport,
            }),
            queue: TaskQueue::new(),
        };

        if !config.disable_prefetch {
            backend.prefetch().await?;
        }
        Ok(backend)
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    /// Fetch every regular file in full into the cache.
    pub async fn prefetch(&self) -> StoreResult<()> {
        let files: Vec<(String, u32)> = self
            .state
            .index
            .read()
            .files()
            .map(|(path, record)| (path.to_string(), record.size))
            .collect();

        for (path, size) in &files {
            let url = self.state.url_for(path);
            if *size == 0 {
                self.state.cache.insert_empty(&url);
                continue;
            }
            let data = self
                .state
                .transport
                .get(&url, None)
                .await
                .map_err(|e| e.into_store_error(path))?;
            if data.len() as u64 != u64::from(*size) {
                return Err(TransportError::Size {
                    expected: u64::from(*size),
                    actual: data.len() as u64,
                }
                .into_store_error(path));
            }
            self.state.cache.insert(&url, 0, &data)?;
        }
        info!(files = files.len(), "prefetched");
        Ok(())
    }

    pub fn stat(&self, path: &str) -> StoreResult<MetadataRecord> {
        self.state
            .index
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))
    }

    /// Add or replace the index entry for `path`.
    pub fn insert_entry(&self, path: &str, record: MetadataRecord) {
        self.state.index.write().insert(path, record);
    }

    /// Snapshot of every index entry, sorted by path.
    pub fn entries(&self) -> Vec<(String, MetadataRecord)> {
        self.state
            .index
            .read()
            .iter()
            .map(|(p, r)| (p.to_string(), r.clone()))
            .collect()
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        self.state
            .index
            .read()
            .children(path)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Read `[offset, end)` of `path` into `buf`, fetching missing ranges.
    ///
    /// `end` defaults to the file size. Returns the number of bytes copied.
    pub async fn read(&self, path: &str, buf: &mut [u8], offset: u64, end: Option<u64>) -> StoreResult<usize> {
        let range = self.state.resolve(path, offset, end)?;
        if range.is_empty() {
            return Ok(0);
        }
        let data = self.state.read_range(path, range).await?;
        copy_into(path, buf, &data)
    }

    /// Read from the cache only. A miss queues the fetch and fails with
    /// `TryAgain`.
    pub fn read_sync(&self, path: &str, buf: &mut [u8], offset: u64, end: Option<u64>) -> StoreResult<usize> {
        let range = self.state.resolve(path, offset, end)?;
        if range.is_empty() {
            return Ok(0);
        }
        let url = self.state.url_for(path);
        let cached = self.state.cache.query(&url, range);
        if cached.is_complete() {
            return copy_into(path, buf, &cached.data);
        }

        debug!(path, missing = cached.missing.len(), "cache miss, queueing fetch");
        let state = self.state.clone();
        let owned = path.to_string();
        self.queue.enqueue("fetch", async move {
            state.fetch_missing(&owned, &url, cached.missing).await
        })?;
        Err(StoreError::try_again(path))
    }

    pub async fn write(&self, path: &str, data: Bytes, offset: u64) -> StoreResult<()> {
        let end = self.state.write_end(path, offset, data.len())?;
        self.state.write(path, data, offset).await?;
        self.state.record_write(path, end)
    }

    /// Queue the write behind earlier queued work and return at once.
    pub fn write_sync(&self, path: &str, data: Bytes, offset: u64) -> StoreResult<()> {
        let end = self.state.write_end(path, offset, data.len())?;
        self.state.record_write(path, end)?;
        let state = self.state.clone();
        let owned = path.to_string();
        self.queue
            .enqueue("write", async move { state.write(&owned, data, offset).await })
    }

    pub async fn remove(&self, path: &str) -> StoreResult<()> {
        self.state.forget(path)?;
        self.state.remove_remote(path).await
    }

    pub fn remove_sync(&self, path: &str) -> StoreResult<()> {
        self.state.forget(path)?;
        let state = self.state.clone();
        let owned = path.to_string();
        self.queue
            .enqueue("remove", async move { state.remove_remote(&owned).await })
    }

    /// Wait for every queued fetch, write and delete.
    pub async fn settled(&self) -> StoreResult<()> {
        self.queue.settled().await
    }
}

fn copy_into(path: &str, buf: &mut [u8], data: &[u8]) -> StoreResult<usize> {
    let capacity = buf.len();
    let dst = buf.get_mut(..data.len()).ok_or_else(|| {
        StoreError::InvalidInput(format!(
            "buffer of {capacity} bytes too small for {} bytes of {path}",
            data.len()
        ))
    })?;
    dst.copy_from_slice(data);
    Ok(data.len())
}

impl<T: Transport> FetchState<T> {
    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, normalize_path(path))
    }

    /// Clamp `[offset, end)` to the indexed size of `path`.
    fn resolve(&self, path: &str, offset: u64, end: Option<u64>) -> StoreResult<Range<u64>> {
        let size = self
            .index
            .read()
            .get(path)
            .map(|r| u64::from(r.size))
            .ok_or_else(|| StoreError::not_found(path))?;
        let end = end.unwrap_or(size).min(size);
        Ok(offset.min(end)..end)
    }

    fn path_of(&self, id: u32) -> Option<String> {
        self.index.read().path_of(id).map(str::to_string)
    }

    async fn fetch_missing(&self, path: &str, url: &str, missing: Vec<Range<u64>>) -> StoreResult<()> {
        for range in missing {
            let expected = range.end - range.start;
            let data = self
                .transport
                .get(url, Some(range.clone()))
                .await
                .map_err(|e| e.into_store_error(path))?;
            if data.is_empty() {
                return Err(StoreError::no_data(path));
            }
            if data.len() as u64 != expected {
                return Err(TransportError::Size {
                    expected,
                    actual: data.len() as u64,
                }
                .into_store_error(path));
            }
            self.cache.insert(url, range.start, &data)?;
        }
        Ok(())
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let url = self.url_for(path);
        let cached = self.cache.query(&url, range.clone());
        if cached.is_complete() {
            return Ok(cached.data);
        }
        self.fetch_missing(path, &url, cached.missing).await?;
        let cached = self.cache.query(&url, range);
        if !cached.is_complete() {
            return Err(StoreError::no_data(path));
        }
        Ok(cached.data)
    }

    async fn write(&self, path: &str, data: Bytes, offset: u64) -> StoreResult<()> {
        let url = self.url_for(path);
        if self.remote_write {
            self.transport
                .set(&url, data.clone(), offset)
                .await
                .map_err(|e| e.into_store_error(path))?;
        }
        self.cache.insert(&url, offset, &data)

    }

    /// Check a write of `len` bytes at `offset` before any I/O and return
    /// the size it needs. Empty writes need nothing.
    fn write_end(&self, path: &str, offset: u64, len: usize) -> StoreResult<u32> {
        if self.index.read().get(path).is_none() {
            return Err(StoreError::not_found(path));
        }
        if len == 0 {
            return Ok(0);
        }
        range_end(offset, len)
            .ok()
            .and_then(|end| u32::try_from(end).ok())
            .ok_or_else(|| {
                StoreError::InvalidInput(format!(
                    "write of {len} bytes at offset {offset} is out of range for {path}"
                ))
            })
    }

    /// Grow the indexed size to cover a write and bump its timestamps.
    fn record_write(&self, path: &str, end: u32) -> StoreResult<()> {
        let mut index = self.index.write();
        let record = index.get_mut(path).ok_or_else(|| StoreError::not_found(path))?;
        record.size = record.size.max(end);
        let now = now_ms();
        record.modify_ms = now;
        record.change_ms = now;
        Ok(())
    }

    fn forget(&self, path: &str) -> StoreResult<MetadataRecord> {
        self.index
            .write()
            .remove(path)
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn remove_remote(&self, path: &str) -> StoreResult<()> {
        let url = self.url_for(path);
        self.cache.remove(&url);
        if self.remote_write {
            self.transport
                .remove(&url)
                .await
                .map_err(|e| e.into_store_error(path))?;
        }
        Ok(())
    }
}

/// Keys are the content ids of indexed regular files.
#[async_trait]
impl<T: Transport> AsyncPrimitives for FetchState<T> {
    async fn keys(&self) -> StoreResult<Vec<u32>> {
        self.cached_keys()
    }

    fn cached_keys(&self) -> StoreResult<Vec<u32>> {
        Ok(self.index.read().files().map(|(_, r)| r.content_id).collect())
    }

    async fn get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        let Some(path) = self.path_of(id) else {
            return Ok(None);
        };
        let range = self.resolve(&path, offset, end)?;
        if range.is_empty() {
            return Ok(Some(Bytes::new()));
        }
        self.read_range(&path, range).await.map(Some)
    }

    fn cached_get(&self, id: u32, offset: u64, end: Option<u64>) -> StoreResult<Option<Bytes>> {
        let Some(path) = self.path_of(id) else {
            return Ok(None);
        };
        let range = self.resolve(&path, offset, end)?;
        let cached = self.cache.query(&self.url_for(&path), range);
        if cached.is_complete() {
            Ok(Some(cached.data))
        } else {
            Err(StoreError::try_again(path))
        }
    }

    async fn set(&self, id: u32, data: Bytes, offset: u64) -> StoreResult<()> {
        let path = self
            .path_of(id)
            .ok_or_else(|| StoreError::not_found(format!("key {id}")))?;
        let end = self.write_end(&path, offset, data.len())?;
        self.write(&path, data, offset).await?;
        self.record_write(&path, end)
    }

    async fn remove(&self, id: u32) -> StoreResult<()> {
        let path = self
            .path_of(id)
            .ok_or_else(|| StoreError::not_found(format!("key {id}")))?;
        self.forget(&path)?;
        self.remove_remote(&path).await
    }
}

#[async_trait]
impl<T: Transport> Store for FetchBackend<T> {
    fn name(&self) -> &str {
        "fetch"
    }

    fn label(&self) -> Option<&str> {
        Some(self.state.base_url.as_str())
    }

    fn flags(&self) -> StoreFlags {
        StoreFlags::PARTIAL
    }

    async fn sync(&self) -> StoreResult<()> {
        self.settled().await
    }

    fn transaction(&self) -> Box<dyn Transaction> {
        Box::new(AsyncTransaction::new(self.state.clone(), self.queue.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::record::S_IFREG;
    use crate::store::WrappedTransaction;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "mock://origin/data";

    #[derive(Default)]
    struct MockTransport {
        files: Mutex<HashMap<String, Vec<u8>>>,
        status: Mutex<Option<u16>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
        removes: AtomicUsize,
    }

    impl MockTransport {
        fn with_files(files: &[(&str, &[u8])]) -> Arc<Self> {
            let mock = Self::default();
            for (path, data) in files {
                mock.files
                    .lock()
                    .insert(format!("{BASE}{path}"), data.to_vec());
            }
            Arc::new(mock)
        }

        fn file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().get(&format!("{BASE}{path}")).cloned()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get(&self, url: &str, range: Option<Range<u64>>) -> Result<Bytes, TransportError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = *self.status.lock() {
                return Err(TransportError::Status(code));
            }
            let files = self.files.lock();
            let data = files.get(url).ok_or(TransportError::Status(404))?;
            Ok(match range {
                Some(r) => {
                    let start = (r.start as usize).min(data.len());
                    let end = (r.end as usize).min(data.len());
                    Bytes::copy_from_slice(&data[start..end])
                }
                None => Bytes::copy_from_slice(data),
            })
        }

        async fn set(&self, url: &str, data: Bytes, offset: u64) -> Result<(), TransportError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            let mut files = self.files.lock();
            let file = files.entry(url.to_string()).or_default();
            crate::store::write_range(file, &data, offset).map_err(|_| TransportError::Status(416))
        }

        async fn remove(&self, url: &str) -> Result<(), TransportError> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .remove(url)
                .map(|_| ())
                .ok_or(TransportError::Status(404))
        }
    }

    fn index_of(files: &[(&str, u32)]) -> IndexData {
        let mut data = IndexData::default();
        for (path, size) in files {
            data.entries.insert(
                path.to_string(),
                MetadataRecord {
                    mode: S_IFREG | 0o644,
                    size: *size,
                    ..MetadataRecord::default()
                },
            );
        }
        data
    }

    fn config(files: &[(&str, u32)]) -> FetchConfig {
        let mut config = FetchConfig::new(format!("{BASE}/")).with_index(IndexSource::Inline(index_of(files)));
        config.disable_prefetch = true;
        config
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://host/").unwrap(), "http://host");
        assert_eq!(normalize_base_url("http://host/a//b/").unwrap(), "http://host/a/b");
        assert_eq!(normalize_base_url("mock://origin/data/").unwrap(), BASE);
        assert!(normalize_base_url("not a url").is_err());

        assert_eq!(resolve_index_url("http://h/x", "index.json"), "http://h/x/index.json");
        assert_eq!(resolve_index_url("http://h/x", "https://cdn/i.json"), "https://cdn/i.json");
    }

    #[tokio::test]
    async fn test_sync_read_retry_loop() {
        let mock = MockTransport::with_files(&[("/hello.txt", b"hello world")]);
        let backend = FetchBackend::create(config(&[("/hello.txt", 11)]), mock.clone())
            .await
            .unwrap();

        let mut buf = [0u8; 5];
        let err = backend.read_sync("/hello.txt", &mut buf, 6, None).unwrap_err();
        assert_eq!(err.errno(), libc::EAGAIN);

        backend.settled().await.unwrap();
        assert_eq!(mock.gets.load(Ordering::SeqCst), 1);

        assert_eq!(backend.read_sync("/hello.txt", &mut buf, 6, None).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_read_fetches_only_missing_ranges() {
        let mock = MockTransport::with_files(&[("/a.bin", b"0123456789")]);
        let backend = FetchBackend::create(config(&[("/a.bin", 10)]), mock.clone())
            .await
            .unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(backend.read("/a.bin", &mut buf, 2, Some(5)).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"234");
        assert_eq!(mock.gets.load(Ordering::SeqCst), 1);

        // 0..2 and 5..10 are missing
        assert_eq!(backend.read("/a.bin", &mut buf, 0, None).await.unwrap(), 10);
        assert_eq!(&buf, b"0123456789");
        assert_eq!(mock.gets.load(Ordering::SeqCst), 3);

        // end past the size is clamped, empty ranges are no-ops
        assert_eq!(backend.read_sync("/a.bin", &mut buf, 8, Some(50)).unwrap(), 2);
        assert_eq!(backend.read_sync("/a.bin", &mut buf, 4, Some(4)).unwrap(), 0);
        assert_eq!(mock.gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let mock = MockTransport::with_files(&[("/a", b"aaa"), ("/dir/b", b"bb"), ("/empty", b"")]);
        let mut cfg = config(&[("/a", 3), ("/dir/b", 2), ("/empty", 0)]);
        cfg.disable_prefetch = false;
        let backend = FetchBackend::create(cfg, mock.clone()).await.unwrap();
        assert_eq!(mock.gets.load(Ordering::SeqCst), 2);

        let mut buf = [0u8; 3];
        assert_eq!(backend.read_sync("/dir/b", &mut buf, 0, None).unwrap(), 2);
        assert_eq!(&buf[..2], b"bb");
        assert_eq!(backend.read_sync("/empty", &mut buf, 0, None).unwrap(), 0);
        assert_eq!(backend.children("/"), vec!["a", "dir", "empty"]);
    }

    #[tokio::test]
    async fn test_prefetch_size_mismatch() {
        let mock = MockTransport::with_files(&[("/a", b"short")]);
        let mut cfg = config(&[("/a", 10)]);
        cfg.disable_prefetch = false;
        let err = FetchBackend::create(cfg, mock).await.err().unwrap();
        assert_eq!(err.errno(), libc::EBADE);
    }

    #[tokio::test]
    async fn test_cache_only_write() {
        let mock = MockTransport::with_files(&[("/f", b"abcdef")]);
        let backend = FetchBackend::create(config(&[("/f", 6)]), mock.clone())
            .await
            .unwrap();

        backend.write("/f", Bytes::from_static(b"XY"), 2).await.unwrap();
        backend.write_sync("/f", Bytes::from_static(b"tail"), 6).unwrap();
        backend.settled().await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(backend.read("/f", &mut buf, 2, Some(4)).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"XY");
        assert_eq!(backend.read_sync("/f", &mut buf, 6, None).unwrap(), 4);
        assert_eq!(&buf, b"tail");

        assert_eq!(backend.stat("/f").unwrap().size, 10);
        assert_eq!(mock.sets.load(Ordering::SeqCst), 0);
        assert_eq!(mock.file("/f").unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_remote_write_and_remove() {
        let mock = MockTransport::with_files(&[("/f", b"abc"), ("/g", b"g")]);
        let mut cfg = config(&[("/f", 3), ("/g", 1)]);
        cfg.remote_write = true;
        let backend = FetchBackend::create(cfg, mock.clone()).await.unwrap();

        backend.write_sync("/f", Bytes::from_static(b"1"), 0).unwrap();
        backend.write_sync("/f", Bytes::from_static(b"23"), 1).unwrap();
        backend.settled().await.unwrap();
        assert_eq!(mock.file("/f").unwrap(), b"123");
        assert_eq!(mock.sets.load(Ordering::SeqCst), 2);

        backend.remove("/g").await.unwrap();
        assert!(mock.file("/g").is_none());
        assert!(backend.stat("/g").unwrap_err().is_not_found());

        backend.remove_sync("/f").unwrap();
        backend.settled().await.unwrap();
        assert!(mock.file("/f").is_none());
        assert_eq!(mock.removes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_write_rejected_before_io() {
        let mock = MockTransport::with_files(&[("/f", b"abc")]);
        let mut cfg = config(&[("/f", 3)]);
        cfg.remote_write = true;
        let backend = FetchBackend::create(cfg, mock.clone()).await.unwrap();
        let id = backend.stat("/f").unwrap().content_id;

        let err = backend
            .write("/f", Bytes::from_static(b"zz"), u64::MAX - 1)
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        let err = backend
            .write_sync("/f", Bytes::from_static(b"zz"), u64::from(u32::MAX))
            .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);

        let mut tx = backend.transaction();
        let err = tx.set(id, Bytes::from_static(b"zz"), u64::MAX - 1).await.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);

        backend.settled().await.unwrap();
        assert_eq!(mock.sets.load(Ordering::SeqCst), 0);
        assert_eq!(mock.file("/f").unwrap(), b"abc");
        assert_eq!(backend.stat("/f").unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_read_into_short_buffer() {
        let mock = MockTransport::with_files(&[("/f", b"abcdef")]);
        let backend = FetchBackend::create(config(&[("/f", 6)]), mock).await.unwrap();

        let mut buf = [0u8; 4];
        let err = backend.read("/f", &mut buf, 0, None).await.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(backend.read("/f", &mut buf, 2, None).await.unwrap(), 4);
        assert_eq!(&buf, b"cdef");
    }

    #[tokio::test]
    async fn test_read_errors() {
        let mock = MockTransport::with_files(&[("/short", b"abc"), ("/blank", b"")]);
        let backend = FetchBackend::create(
            config(&[("/short", 10), ("/blank", 4), ("/gone", 4)]),
            mock.clone(),
        )
        .await
        .unwrap();
        let mut buf = [0u8; 16];

        let err = backend.read("/missing", &mut buf, 0, None).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);

        let err = backend.read("/short", &mut buf, 0, None).await.unwrap_err();
        assert_eq!(err.errno(), libc::EBADE);

        let err = backend.read("/blank", &mut buf, 0, None).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENODATA);

        let err = backend.read("/gone", &mut buf, 0, None).await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);

        *mock.status.lock() = Some(503);
        let err = backend.read("/short", &mut buf, 0, Some(2)).await.unwrap_err();
        assert_eq!(err.errno(), libc::EREMOTEIO);
        assert!(err.to_string().contains("/short"));

        // queued fetch failures surface through settled()
        assert!(backend.read_sync("/short", &mut buf, 0, Some(2)).unwrap_err().is_try_again());
        assert_eq!(backend.settled().await.unwrap_err().errno(), libc::EREMOTEIO);
    }

    #[tokio::test]
    async fn test_index_fetched_from_origin() {
        let index = serde_json::to_vec(&index_of(&[("/x", 1)])).unwrap();
        let mock = MockTransport::with_files(&[("/meta/index.json", &index), ("/x", b"x")]);
        let mut cfg = FetchConfig::new(BASE).with_index(IndexSource::Url("meta/index.json".into()));
        cfg.disable_prefetch = true;

        let backend = FetchBackend::create(cfg, mock).await.unwrap();
        assert_eq!(backend.base_url(), BASE);
        assert_eq!(backend.stat("/x").unwrap().size, 1);
        assert!(backend.entries().iter().any(|(p, _)| p == "/"));
    }

    #[tokio::test]
    async fn test_rollback_over_fetch_store() {
        let mock = MockTransport::with_files(&[("/doc", b"hello")]);
        let mut cfg = config(&[("/doc", 5)]);
        cfg.disable_prefetch = false;
        let backend = FetchBackend::create(cfg, mock.clone()).await.unwrap();
        let id = backend.stat("/doc").unwrap().content_id;

        let mut tx = WrappedTransaction::begin(&backend);
        assert_eq!(tx.keys().await.unwrap(), vec![id]);
        tx.set(id, &b"HE"[..], 0).await.unwrap();

        let mut buf = [0u8; 5];
        backend.read("/doc", &mut buf, 0, None).await.unwrap();
        assert_eq!(&buf, b"HEllo");

        tx.abort().await.unwrap();
        backend.read("/doc", &mut buf, 0, None).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(mock.sets.load(Ordering::SeqCst), 0);
    }
}
