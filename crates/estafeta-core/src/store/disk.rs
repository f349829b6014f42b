use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::message::{reserved, HeaderValue, Headers, Message, DLQ};
use crate::selector::Selector;
use crate::store::{Batch, Destination, MessageStore};

const INDEX_FILE: &str = "master.idx";
const LOCK_FILE: &str = "lock";

/// The first 8 bytes of the master index hold the hex offset of the
/// current image.
const HEADER_LEN: u64 = 8;

/// Cap on message files kept around (open or on the free list) beyond
/// the live set; surplus files are closed and unlinked.
const MAX_OPEN_FILES: usize = 20;

/// Crash-safe disk backend: an append-updated master index holding the
/// queue/topic state, backed by one small file per message body.
///
/// The master index is the single source of truth. Index images are
/// written by next-fit append and only the 8-byte header pointer flip
/// makes a new image current, so a crash at any point leaves the prior
/// image readable.
pub struct DiskStore {
    path: PathBuf,
    fsync: bool,
    inner: Mutex<Option<ActiveStore>>,
}

impl DiskStore {
    /// Create a handle on a store directory. No disk access happens
    /// until [`MessageStore::setup`] or [`MessageStore::activate`].
    pub fn new(path: impl Into<PathBuf>, fsync: bool) -> DiskStore {
        DiskStore {
            path: path.into(),
            fsync,
            inner: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveStore>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_active() -> StoreError {
    StoreError::Unavailable("disk store is not active".to_string())
}

fn unavailable(context: &str, err: io::Error) -> StoreError {
    StoreError::Unavailable(format!("{context}: {err}"))
}

impl MessageStore for DiskStore {
    fn setup(&self) -> StoreResult<bool> {
        fs::create_dir_all(&self.path)
            .map_err(|e| unavailable("cannot create store directory", e))?;
        let index_path = self.path.join(INDEX_FILE);
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&index_path)
        {
            Ok(mut file) => {
                init_index(&mut file)?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(unavailable("cannot create master index", err)),
        }
    }

    fn activate(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.is_some() {
            return Err(StoreError::Unavailable(
                "disk store is already active".to_string(),
            ));
        }

        fs::create_dir_all(&self.path)
            .map_err(|e| unavailable("cannot create store directory", e))?;

        let guard = FileGuard::try_lock(self.path.join(LOCK_FILE))
            .map_err(|e| unavailable("cannot acquire store lock", e))?
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "store directory {} is owned by another process",
                    self.path.display()
                ))
            })?;

        let index_path = self.path.join(INDEX_FILE);
        let mut index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&index_path)
            .map_err(|e| unavailable("cannot open master index", e))?;

        let fresh = index
            .metadata()
            .map_err(|e| unavailable("cannot stat master index", e))?
            .len()
            == 0;

        let (snapshot, image_offset, image_len) = if fresh {
            let (offset, len) = init_index(&mut index)?;
            (Snapshot::default(), offset, len)
        } else {
            read_image(&mut index)?
        };

        *inner = Some(ActiveStore {
            fsync: self.fsync,
            index,
            image_offset,
            image_len,
            snapshot,
            pool: FilePool::new(self.path.clone()),
            _guard: guard,
        });

        info!(path = %self.path.display(), "disk store activated");
        Ok(())
    }

    fn deactivate(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.take().is_some() {
            info!(path = %self.path.display(), "disk store deactivated");
        }
        Ok(())
    }

    fn transaction(&self, batch: Batch) -> StoreResult<()> {
        let mut inner = self.lock();
        let active = inner.as_mut().ok_or_else(not_active)?;
        match active.apply(batch) {
            Ok(()) => Ok(()),
            Err(err) => {
                // The cache may hold a partially applied batch; the
                // durable index is the source of truth.
                if let Err(reload_err) = active.reload() {
                    error!(error = %reload_err, "failed to reload master index after store failure");
                }
                Err(err)
            }
        }
    }

    fn get_headers(&self, queue: &str) -> StoreResult<Vec<Headers>> {
        let inner = self.lock();
        let active = inner.as_ref().ok_or_else(not_active)?;
        Ok(active
            .snapshot
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default())
    }

    fn get_message(&self, queue: &str, selector: &Selector) -> StoreResult<Option<Message>> {
        let mut inner = self.lock();
        let active = inner.as_mut().ok_or_else(not_active)?;
        let Some(headers) = active
            .snapshot
            .queues
            .get(queue)
            .and_then(|list| list.iter().find(|h| selector.matches(h)))
            .cloned()
        else {
            return Ok(None);
        };
        let id = headers
            .id()
            .ok_or_else(|| StoreError::Corrupt(format!("queued header in {queue} has no id")))?;
        let body = active.read_body(id)?;
        Ok(Some(Message { id, headers, body }))
    }

    fn get_last(
        &self,
        topic: &str,
        seen: Option<Uuid>,
        selector: Option<&Selector>,
    ) -> StoreResult<Option<Message>> {
        let mut inner = self.lock();
        let active = inner.as_mut().ok_or_else(not_active)?;
        let Some(entry) = active.snapshot.topics.get(topic).cloned() else {
            return Ok(None);
        };
        if seen == Some(entry.id) {
            return Ok(None);
        }
        if let Some(selector) = selector {
            if !selector.matches(&entry.headers) {
                return Ok(None);
            }
        }
        let body = active.read_body(entry.id)?;
        Ok(Some(Message {
            id: entry.id,
            headers: entry.headers,
            body,
        }))
    }

    fn increment_redelivery(&self, queue: &str, id: Uuid) -> StoreResult<Option<u32>> {
        let mut inner = self.lock();
        let active = inner.as_mut().ok_or_else(not_active)?;
        let Some(list) = active.snapshot.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some(headers) = list.iter_mut().find(|h| h.id() == Some(id)) else {
            return Ok(None);
        };
        let count = headers.redelivery() + 1;
        headers.insert(reserved::REDELIVERY, HeaderValue::Int(i64::from(count)));
        Ok(Some(count))
    }
}

/// Serialized index image: queue header lists in priority order, topic
/// cells, the id→file mapping, and the free-file list.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    queues: HashMap<String, Vec<Headers>>,
    topics: HashMap<String, TopicEntry>,
    files: HashMap<Uuid, String>,
    free: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopicEntry {
    id: Uuid,
    headers: Headers,
}

struct ActiveStore {
    fsync: bool,
    index: File,
    image_offset: u64,
    image_len: u64,
    snapshot: Snapshot,
    pool: FilePool,
    _guard: FileGuard,
}

impl ActiveStore {
    fn apply(&mut self, batch: Batch) -> StoreResult<()> {
        for insert in batch.inserts {
            let name = self
                .snapshot
                .free
                .pop()
                .unwrap_or_else(|| format!("{}.msg", Uuid::now_v7()));
            self.pool.write(&name, &insert.body, self.fsync)?;
            self.snapshot.files.insert(insert.id, name);
            match insert.destination {
                Destination::Queue(queue) => {
                    insert_by_priority(
                        self.snapshot.queues.entry(queue).or_default(),
                        insert.headers,
                    );
                }
                Destination::Topic(topic) => {
                    let previous = self.snapshot.topics.insert(
                        topic,
                        TopicEntry {
                            id: insert.id,
                            headers: insert.headers,
                        },
                    );
                    if let Some(previous) = previous {
                        self.release_body(previous.id);
                    }
                }
            }
        }

        for dead in batch.dead_letters {
            let mut moved = None;
            if let Some(list) = self.snapshot.queues.get_mut(&dead.queue) {
                if let Some(pos) = list.iter().position(|h| h.id() == Some(dead.id)) {
                    moved = Some(list.remove(pos));
                }
            }
            if let Some(headers) = moved {
                insert_by_priority(
                    self.snapshot.queues.entry(DLQ.to_string()).or_default(),
                    headers,
                );
            }
        }

        for delete in batch.deletes {
            let removed = match delete.destination {
                Destination::Queue(ref queue) => {
                    match self.snapshot.queues.get_mut(queue) {
                        Some(list) => match list.iter().position(|h| h.id() == Some(delete.id)) {
                            Some(pos) => {
                                list.remove(pos);
                                true
                            }
                            None => false,
                        },
                        None => false,
                    }
                }
                Destination::Topic(ref topic) => {
                    if self
                        .snapshot
                        .topics
                        .get(topic)
                        .is_some_and(|entry| entry.id == delete.id)
                    {
                        self.snapshot.topics.remove(topic);
                        true
                    } else {
                        false
                    }
                }
            };
            if removed {
                self.release_body(delete.id);
            }
        }

        self.write_image()
    }

    /// Return a deleted message's file to the free pool, or drop it
    /// entirely once the pool is full.
    fn release_body(&mut self, id: Uuid) {
        let Some(name) = self.snapshot.files.remove(&id) else {
            return;
        };
        if self.snapshot.free.len() < MAX_OPEN_FILES {
            self.snapshot.free.push(name);
        } else {
            self.pool.discard(&name);
        }
    }

    fn read_body(&mut self, id: Uuid) -> StoreResult<Vec<u8>> {
        let name = self
            .snapshot
            .files
            .get(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("no body file mapped for message {id}")))?
            .clone();
        self.pool.read(&name).map_err(StoreError::Io)
    }

    /// Serialize the snapshot and persist it by next-fit append: reuse
    /// the region before the current image when the new image fits,
    /// otherwise append after it. Only the header pointer flip makes
    /// the new image current.
    fn write_image(&mut self) -> StoreResult<()> {
        let image = serde_json::to_vec(&self.snapshot)?;
        let image_len = image.len() as u64;

        let offset = if HEADER_LEN + 8 + image_len <= self.image_offset {
            HEADER_LEN
        } else {
            self.image_offset + 8 + self.image_len
        };

        self.index.seek(SeekFrom::Start(offset))?;
        self.index.write_all(encode_hex(image_len).as_bytes())?;
        self.index.write_all(&image)?;
        if self.fsync {
            self.index.sync_data()?;
        }

        self.index.seek(SeekFrom::Start(0))?;
        self.index.write_all(encode_hex(offset).as_bytes())?;
        if self.fsync {
            self.index.sync_data()?;
        }

        self.image_offset = offset;
        self.image_len = image_len;
        Ok(())
    }

    /// Discard the cache and re-read the last durable image.
    fn reload(&mut self) -> StoreResult<()> {
        let (snapshot, offset, len) = read_image(&mut self.index)?;
        self.snapshot = snapshot;
        self.image_offset = offset;
        self.image_len = len;
        self.pool.clear();
        Ok(())
    }
}

/// Insert before the first header with strictly lower priority; equal
/// priorities keep insertion order.
fn insert_by_priority(list: &mut Vec<Headers>, headers: Headers) {
    let priority = headers.priority();
    let pos = list
        .iter()
        .position(|h| h.priority() < priority)
        .unwrap_or(list.len());
    list.insert(pos, headers);
}

fn encode_hex(value: u64) -> String {
    format!("{value:08x}")
}

fn decode_hex(bytes: &[u8; 8]) -> StoreResult<u64> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| StoreError::Corrupt("master index header is not ascii".to_string()))?;
    u64::from_str_radix(text, 16)
        .map_err(|_| StoreError::Corrupt(format!("master index header is not hex: {text:?}")))
}

/// Write an empty snapshot as the initial image. Used by `setup` and
/// by `activate` on a zero-length index file.
fn init_index(file: &mut File) -> StoreResult<(u64, u64)> {
    let image = serde_json::to_vec(&Snapshot::default())?;
    file.seek(SeekFrom::Start(HEADER_LEN))?;
    file.write_all(encode_hex(image.len() as u64).as_bytes())?;
    file.write_all(&image)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(encode_hex(HEADER_LEN).as_bytes())?;
    file.sync_all()?;
    Ok((HEADER_LEN, image.len() as u64))
}

/// Follow the header pointer and deserialize the current image.
fn read_image(file: &mut File) -> StoreResult<(Snapshot, u64, u64)> {
    let mut word = [0u8; 8];
    read_exact_at(file, 0, &mut word)?;
    let offset = decode_hex(&word)?;

    read_exact_at(file, offset, &mut word)?;
    let len = decode_hex(&word)?;

    let mut image = vec![0u8; len as usize];
    read_exact_at(file, offset + 8, &mut image)?;

    let snapshot = serde_json::from_slice(&image)
        .map_err(|e| StoreError::Corrupt(format!("master index image: {e}")))?;
    Ok((snapshot, offset, len))
}

fn read_exact_at(file: &mut File, pos: u64, buf: &mut [u8]) -> StoreResult<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            StoreError::Corrupt("master index truncated".to_string())
        }
        _ => StoreError::Io(e),
    })
}

/// Bounded pool of open message-body files, keyed by file name.
struct FilePool {
    dir: PathBuf,
    open: HashMap<String, File>,
}

impl FilePool {
    fn new(dir: PathBuf) -> FilePool {
        FilePool {
            dir,
            open: HashMap::new(),
        }
    }

    fn file(&mut self, name: &str) -> io::Result<&mut File> {
        if !self.open.contains_key(name) {
            if self.open.len() >= MAX_OPEN_FILES {
                // Evict an arbitrary handle; the file itself stays.
                if let Some(evict) = self.open.keys().next().cloned() {
                    self.open.remove(&evict);
                }
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(self.dir.join(name))?;
            self.open.insert(name.to_string(), file);
        }
        self.open
            .get_mut(name)
            .ok_or_else(|| io::Error::other("file pool entry vanished"))
    }

    /// Seek 0, write the body, then truncate to the body length so a
    /// reused file never leaks a longer previous payload.
    fn write(&mut self, name: &str, body: &[u8], fsync: bool) -> StoreResult<()> {
        let file = self.file(name)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(body)?;
        if fsync {
            file.sync_data()?;
        }
        file.set_len(body.len() as u64)?;
        Ok(())
    }

    fn read(&mut self, name: &str) -> io::Result<Vec<u8>> {
        let file = self.file(name)?;
        let len = file.metadata()?.len() as usize;
        let mut body = Vec::with_capacity(len);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut body)?;
        Ok(body)
    }

    fn discard(&mut self, name: &str) {
        self.open.remove(name);
        if let Err(err) = fs::remove_file(self.dir.join(name)) {
            warn!(file = %name, error = %err, "failed to unlink surplus message file");
        }
    }

    fn clear(&mut self) {
        self.open.clear();
    }
}

/// Directory ownership via the atomicity of `create_new`. Advisory: it
/// only holds against processes that honor it.
struct FileGuard {
    path: PathBuf,
}

impl FileGuard {
    fn try_lock(path: PathBuf) -> io::Result<Option<FileGuard>> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                Ok(Some(FileGuard { path }))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            error!(path = %self.path.display(), error = %err, "unable to remove store lock file");
        }
    }
}
