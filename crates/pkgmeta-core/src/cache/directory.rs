//! Durable directory cache: one JSON file per key, mirrored in memory.
//!
//! The directory is the source of truth and may be shared by several
//! processes. Reads only consult the in-memory mirror. A loader task pulls
//! files into the mirror, a writer task persists puts, a watcher feeds the
//! loader with change hints, and a periodic reconciliation pass re-enqueues
//! anything the mirror and the directory disagree on. Every file access
//! happens under the record's named file lock.

use super::atomic::{atomic_read_json, atomic_write_json};
use super::file_lock::{LockWait, NamedFileLock};
use super::watcher::{is_record_path, RecordWatcher};
use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::error::{MetadataError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Tunables for a directory cache.
#[derive(Debug, Clone)]
pub struct DirectoryCacheOptions {
    /// Extension of record files, without the dot.
    pub extension: String,
    pub reconcile_initial_delay: Duration,
    pub reconcile_period: Duration,
    pub lock_poll_interval: Duration,
    pub lock_timeout: Duration,
    /// Use OS change notifications in addition to reconciliation.
    pub watch: bool,
}

impl Default for DirectoryCacheOptions {
    fn default() -> Self {
        Self {
            extension: CacheConfig::RECORD_EXTENSION.to_string(),
            reconcile_initial_delay: CacheConfig::RECONCILE_INITIAL_DELAY,
            reconcile_period: CacheConfig::RECONCILE_PERIOD,
            lock_poll_interval: CacheConfig::LOCK_POLL_INTERVAL,
            lock_timeout: CacheConfig::LOCK_TIMEOUT,
            watch: true,
        }
    }
}

impl DirectoryCacheOptions {
    fn lock_wait(&self) -> LockWait {
        LockWait {
            poll_interval: self.lock_poll_interval,
            timeout: self.lock_timeout,
        }
    }
}

/// Mirror state of one record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A put is queued and not yet on disk.
    Loading,
    Present,
    /// The file exists but could not be parsed.
    Absent,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: Option<V>,
    state: EntryState,
}

/// Change notifications published by the cache workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Loaded(PathBuf),
    Stored(PathBuf),
    Removed(PathBuf),
    WriteFailed { path: PathBuf, message: String },
}

struct WriteRequest<V> {
    path: PathBuf,
    value: V,
    done: Option<oneshot::Sender<Result<()>>>,
}

struct Shared<V> {
    directory: PathBuf,
    options: DirectoryCacheOptions,
    mirror: RwLock<HashMap<PathBuf, CacheEntry<V>>>,
    locks: NamedFileLock,
    events: broadcast::Sender<CacheEvent>,
    load_tx: mpsc::UnboundedSender<PathBuf>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    watcher: Option<RecordWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

/// Key-to-file cache over a shared directory.
///
/// `file_name` maps a key to its file stem; the record lives at
/// `{directory}/{stem}.{extension}`.
pub struct DurableDirectoryCache<K, V> {
    shared: Arc<Shared<V>>,
    file_name: Box<dyn Fn(&K) -> String + Send + Sync>,
    write_tx: mpsc::UnboundedSender<WriteRequest<V>>,
    lifecycle: Mutex<Lifecycle>,
    initial_load: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl<K, V> DurableDirectoryCache<K, V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open the cache, creating `directory` if needed.
    ///
    /// Existing record files are handed to the loader before the workers
    /// start; this returns once both workers are running, usually before
    /// those files are loaded. `wait_initial_load` waits for them.
    pub async fn open<F>(
        directory: impl Into<PathBuf>,
        file_name: F,
        options: DirectoryCacheOptions,
    ) -> Result<Self>
    where
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| MetadataError::io_with_path(e, &directory))?;
        // Watcher paths are absolute and resolved
        let directory = tokio::fs::canonicalize(&directory)
            .await
            .map_err(|e| MetadataError::io_with_path(e, &directory))?;

        let (load_tx, load_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(CacheConfig::EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            locks: NamedFileLock::new(directory.join(CacheConfig::LOCK_DIR_NAME)),
            directory: directory.clone(),
            options,
            mirror: RwLock::new(HashMap::new()),
            events,
            load_tx,
            cancel: CancellationToken::new(),
        });

        let existing = scan_blocking(&directory, &shared.options.extension).await?;
        debug!(
            "Queueing {} existing records in {}",
            existing.len(),
            directory.display()
        );

        let (initial_loaded, initial_load) = watch::channel(false);
        let (loader_ready, loader_started) = oneshot::channel();
        let (writer_ready, writer_started) = oneshot::channel();
        let loader = Loader {
            queue: load_rx,
            existing,
            initial_loaded,
        };
        let mut tasks = vec![
            tokio::spawn(run_loader(shared.clone(), loader, loader_ready)),
            tokio::spawn(run_writer(shared.clone(), write_rx, writer_ready)),
        ];
        for started in [loader_started, writer_started] {
            if started.await.is_err() {
                shared.cancel.cancel();
                return Err(MetadataError::Other(
                    "Cache worker exited during startup".to_string(),
                ));
            }
        }

        let watcher = if shared.options.watch {
            match RecordWatcher::start(
                &directory,
                &shared.options.extension,
                shared.load_tx.clone(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(
                        "Not watching {}, relying on reconciliation: {}",
                        directory.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        tasks.push(tokio::spawn(run_reconciler(shared.clone())));
        info!("Opened record cache at {}", directory.display());

        Ok(Self {
            shared,
            file_name: Box::new(file_name),
            write_tx,
            lifecycle: Mutex::new(Lifecycle { watcher, tasks }),
            initial_load,
            closed: AtomicBool::new(false),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.shared.directory
    }

    /// File path backing `key`.
    pub fn path_for(&self, key: &K) -> PathBuf {
        self.shared.directory.join(format!(
            "{}.{}",
            (self.file_name)(key),
            self.shared.options.extension
        ))
    }

    /// Value for `key` if the mirror holds it. Never touches the disk.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let path = self.path_for(key);
        let mirror = self.shared.read_mirror();
        match mirror.get(&path) {
            Some(CacheEntry {
                value: Some(value),
                state: EntryState::Present,
            }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Wait until the records present at `open` have been loaded.
    ///
    /// Returns at once if that already happened, and also when the cache
    /// shuts down first.
    pub async fn wait_initial_load(&self) {
        let mut initial_load = self.initial_load.clone();
        // Err means the loader is gone
        let _ = initial_load.wait_for(|loaded| *loaded).await;
    }

    pub fn state_of(&self, key: &K) -> Option<EntryState> {
        let path = self.path_for(key);
        self.shared.read_mirror().get(&path).map(|entry| entry.state)
    }

    /// Queue `value` for persistence and return immediately.
    ///
    /// The mirror picks the value up once the write has landed; a
    /// `Stored` event announces it.
    pub fn put(&self, key: &K, value: V) -> Result<()> {
        self.enqueue(key, value, None)
    }

    /// Queue `value` and wait for the writer's outcome.
    pub async fn put_and_wait(&self, key: &K, value: V) -> Result<()> {
        let (done, outcome) = oneshot::channel();
        self.enqueue(key, value, Some(done))?;
        outcome.await.map_err(|_| MetadataError::Cancelled)?
    }

    fn enqueue(
        &self,
        key: &K,
        value: V,
        done: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetadataError::Other("Record cache is shut down".to_string()));
        }

        let path = self.path_for(key);
        self.shared
            .write_mirror()
            .entry(path.clone())
            .and_modify(|entry| {
                if entry.state == EntryState::Absent {
                    entry.state = EntryState::Loading;
                }
            })
            .or_insert(CacheEntry {
                value: None,
                state: EntryState::Loading,
            });

        self.write_tx
            .send(WriteRequest { path, value, done })
            .map_err(|_| MetadataError::Other("Cache writer has stopped".to_string()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    /// Number of present records in the mirror.
    pub fn len(&self) -> usize {
        self.shared
            .read_mirror()
            .values()
            .filter(|entry| entry.state == EntryState::Present)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the watcher and workers, then clear the mirror.
    ///
    /// Queued writes that have not started are dropped. Calling this more
    /// than once is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let Lifecycle { watcher, tasks } = std::mem::take(
            &mut *self
                .lifecycle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        drop(watcher);
        self.shared.cancel.cancel();

        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Cache worker ended abnormally: {}", e);
                }
            }
        }

        self.shared.write_mirror().clear();
        info!("Closed record cache at {}", self.shared.directory.display());
    }
}

impl<K, V> Drop for DurableDirectoryCache<K, V> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lifecycle.watcher.take();
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }
    }
}

impl<V> Shared<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn read_mirror(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, CacheEntry<V>>> {
        self.mirror
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_mirror(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, CacheEntry<V>>> {
        self.mirror
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_cached(&self, path: &Path) -> bool {
        matches!(
            self.read_mirror().get(path).map(|entry| entry.state),
            Some(EntryState::Present | EntryState::Loading)
        )
    }

    /// Drop a mirror entry whose file is gone. Pending puts are kept.
    fn forget(&self, path: &Path) {
        let removed = {
            let mut mirror = self.write_mirror();
            match mirror.get(path).map(|entry| entry.state) {
                Some(EntryState::Loading) | None => false,
                Some(_) => mirror.remove(path).is_some(),
            }
        };
        if removed {
            debug!("Record removed: {}", path.display());
            self.emit(CacheEvent::Removed(path.to_path_buf()));
        }
    }

    async fn load(&self, path: PathBuf) {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.forget(&path);
            return;
        }
        if self.is_cached(&path) {
            return;
        }

        let _guard = match self
            .locks
            .acquire(&path, self.options.lock_wait(), &self.cancel)
            .await
        {
            Ok(guard) => guard,
            Err(MetadataError::Cancelled) => return,
            Err(e) => {
                warn!("Skipping load of {}: {}", path.display(), e);
                return;
            }
        };

        // A put may have landed while we waited
        if self.is_cached(&path) {
            return;
        }

        let read_path = path.clone();
        let loaded =
            tokio::task::spawn_blocking(move || atomic_read_json::<V>(&read_path)).await;

        match loaded {
            Ok(Ok(Some(value))) => {
                self.write_mirror().insert(
                    path.clone(),
                    CacheEntry {
                        value: Some(value),
                        state: EntryState::Present,
                    },
                );
                debug!("Record loaded: {}", path.display());
                self.emit(CacheEvent::Loaded(path));
            }
            Ok(Ok(None)) => self.forget(&path),
            Ok(Err(e)) => {
                warn!("Unreadable cache record {}: {}", path.display(), e);
                self.write_mirror().insert(
                    path,
                    CacheEntry {
                        value: None,
                        state: EntryState::Absent,
                    },
                );
            }
            Err(e) => warn!("Cache load task failed for {}: {}", path.display(), e),
        }
    }

    async fn store(&self, request: WriteRequest<V>) {
        let WriteRequest { path, value, done } = request;
        let result = self.write_record(&path, value).await;

        match &result {
            Ok(()) => {
                debug!("Record stored: {}", path.display());
                self.emit(CacheEvent::Stored(path.clone()));
            }
            Err(e) => {
                warn!("Failed to store {}: {}", path.display(), e);
                self.abandon_pending(&path);
                self.emit(CacheEvent::WriteFailed {
                    path: path.clone(),
                    message: e.to_string(),
                });
            }
        }

        if let Some(done) = done {
            let _ = done.send(result);
        }
    }

    async fn write_record(&self, path: &Path, value: V) -> Result<()> {
        let _guard = self
            .locks
            .acquire(path, self.options.lock_wait(), &self.cancel)
            .await?;

        let target = path.to_path_buf();
        let persisted = value.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&target, &persisted))
            .await
            .map_err(|e| MetadataError::Other(format!("Cache write task failed: {}", e)))??;

        // Mirror updated before the file lock is released
        self.write_mirror().insert(
            path.to_path_buf(),
            CacheEntry {
                value: Some(value),
                state: EntryState::Present,
            },
        );
        Ok(())
    }

    fn abandon_pending(&self, path: &Path) {
        let mut mirror = self.write_mirror();
        if mirror.get(path).map(|entry| entry.state) == Some(EntryState::Loading) {
            mirror.remove(path);
        }
    }

    async fn reconcile(&self) {
        let on_disk: HashSet<PathBuf> = match scan_blocking(&self.directory, &self.options.extension)
            .await
        {
            Ok(paths) => paths.into_iter().collect(),
            Err(e) => {
                warn!("Reconciliation scan failed: {}", e);
                return;
            }
        };

        let mut requeue = Vec::new();
        {
            let mirror = self.read_mirror();
            requeue.extend(
                on_disk
                    .iter()
                    .filter(|path| !mirror.contains_key(*path))
                    .cloned(),
            );
            requeue.extend(
                mirror
                    .iter()
                    .filter(|(path, entry)| {
                        entry.state != EntryState::Loading && !on_disk.contains(*path)
                    })
                    .map(|(path, _)| path.clone()),
            );
        }

        if !requeue.is_empty() {
            debug!("Reconciliation re-queued {} records", requeue.len());
        }
        for path in requeue {
            let _ = self.load_tx.send(path);
        }
    }
}

/// Record files currently in `directory`.
fn scan(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(directory).map_err(|e| MetadataError::io_with_path(e, directory))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MetadataError::io_with_path(e, directory))?;
        let path = entry.path();
        if path.is_file() && is_record_path(&path, extension) {
            paths.push(path);
        }
    }
    Ok(paths)
}

async fn scan_blocking(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let directory = directory.to_path_buf();
    let extension = extension.to_string();
    tokio::task::spawn_blocking(move || scan(&directory, &extension))
        .await
        .map_err(|e| MetadataError::Other(format!("Cache scan task failed: {}", e)))?
}

/// Loader inputs: the change queue plus the records found at open.
struct Loader {
    queue: mpsc::UnboundedReceiver<PathBuf>,
    existing: Vec<PathBuf>,
    initial_loaded: watch::Sender<bool>,
}

async fn run_loader<V>(shared: Arc<Shared<V>>, loader: Loader, ready: oneshot::Sender<()>)
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Loader {
        mut queue,
        existing,
        initial_loaded,
    } = loader;
    let _ = ready.send(());

    for path in existing {
        if shared.cancel.is_cancelled() {
            debug!("Cache loader stopped");
            return;
        }
        shared.load(path).await;
    }
    initial_loaded.send_replace(true);

    loop {
        let path = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };
        shared.load(path).await;
    }
    debug!("Cache loader stopped");
}

async fn run_writer<V>(
    shared: Arc<Shared<V>>,
    mut queue: mpsc::UnboundedReceiver<WriteRequest<V>>,
    ready: oneshot::Sender<()>,
) where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let _ = ready.send(());
    loop {
        let request = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };
        shared.store(request).await;
    }
    debug!("Cache writer stopped");
}

async fn run_reconciler<V>(shared: Arc<Shared<V>>)
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let start = tokio::time::Instant::now() + shared.options.reconcile_initial_delay;
    let period = shared.options.reconcile_period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => shared.reconcile().await,
        }
    }
    debug!("Cache reconciler stopped");
}
