//! Recovery and rotation controller.
//!
//! The engine keeps the head of the queue in memory and journals every
//! mutation. It runs in one of two states:
//!
//! - `ReadCurrent`: memory holds the whole live queue; new items go to memory
//!   and to the current journal.
//! - `ReadBehind`: the memory budget was reached; new items go only to an
//!   overflow ("future") journal and reach memory later, when that journal is
//!   replayed after memory drains.
//!
//! Journals that still hold active items and are not yet replayed wait in
//! `journals`, oldest first. The newest of them is the open future journal
//! when one exists.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::item::QueuedItem;
use crate::journal::{discover_journals, JournalNamer, JournalReader, JournalWriter};
use crate::{Error, Result};

/// Default memory budget (64 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 64 * 1024 * 1024;
/// Default journal directory.
pub const DEFAULT_JOURNAL_DIR: &str = "journals";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding journal files. Must already exist.
    pub journal_dir: PathBuf,
    /// Bytes of items held in memory before enqueues spill to disk. Also the
    /// size at which an overflow journal is rotated.
    pub max_memory_bytes: usize,
    /// `sync_data` after every journal write.
    pub sync_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from(DEFAULT_JOURNAL_DIR),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            sync_writes: true,
        }
    }
}

impl EngineConfig {
    pub fn new(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_memory_bytes(mut self, max_memory_bytes: usize) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum EngineState {
    ReadCurrent = 0,
    ReadBehind = 1,
}

impl From<EngineState> for u8 {
    fn from(state: EngineState) -> Self {
        state as u8
    }
}

/// Point-in-time counters reported by the `stats` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub memory_count: usize,
    pub total_count: usize,
    pub memory_bytes: usize,
    pub state: EngineState,
}

impl Stats {
    /// One-line JSON form used on the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("stats hold only integers")
    }
}

pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    namer: JournalNamer,
    state: EngineState,
    memory: VecDeque<QueuedItem>,
    memory_bytes: usize,
    total_count: usize,
    journals: VecDeque<PathBuf>,
    current: JournalWriter,
    future: Option<JournalWriter>,
}

impl Engine {
    /// Recovers the queue from `config.journal_dir` using wall-clock ids.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Recovers the queue from `config.journal_dir`.
    ///
    /// Every journal is replayed once as a health check. Journals with no
    /// active items are deleted. The oldest remaining journal is replayed
    /// into memory in full, whatever its size, and keeps receiving writes as
    /// the current journal; any later ones stay on disk until memory drains.
    pub fn open_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = config.journal_dir.clone();
        if !dir.is_dir() {
            return Err(Error::MissingJournalDir(dir));
        }

        info!("Starting health check of {}", dir.display());
        let mut namer = JournalNamer::new(&dir);
        let mut journals = VecDeque::new();
        let mut total_count = 0;
        for path in discover_journals(&dir)? {
            namer.observe(&path);
            let mut reader = JournalReader::open(&path)?;
            let active = reader.verify()?;
            if active.is_empty() {
                reader.delete()?;
                continue;
            }
            debug!("{} holds {} active items", path.display(), active.len());
            total_count += active.len();
            reader.close();
            journals.push_back(path);
        }
        info!(
            "Health check successful: {} items in {} journals",
            total_count,
            journals.len()
        );

        let (current, items) = match journals.pop_front() {
            Some(path) => replay(&path, config.sync_writes)?,
            None => (JournalWriter::open(namer.next_path(), config.sync_writes)?, Vec::new()),
        };
        let state = if journals.is_empty() {
            EngineState::ReadCurrent
        } else {
            EngineState::ReadBehind
        };
        let memory_bytes: usize = items.iter().map(QueuedItem::size).sum();

        let engine = Self {
            config,
            clock,
            namer,
            state,
            memory: items.into(),
            memory_bytes,
            total_count,
            journals,
            current,
            future: None,
        };
        info!(
            "Recovered {} items ({} in memory, {} bytes), state {:?}",
            engine.total_count,
            engine.memory.len(),
            engine.memory_bytes,
            engine.state
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Journals waiting to be replayed, oldest first.
    pub fn pending_journals(&self) -> impl Iterator<Item = &Path> {
        self.journals.iter().map(PathBuf::as_path)
    }

    /// Path of the journal receiving dequeue records for in-memory items.
    pub fn current_journal(&self) -> &Path {
        self.current.path()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            memory_count: self.memory.len(),
            total_count: self.total_count,
            memory_bytes: self.memory_bytes,
            state: self.state,
        }
    }

    /// Appends `data` to the queue and returns the assigned id.
    pub fn enqueue(&mut self, data: Vec<u8>) -> Result<i64> {
        let item = QueuedItem::new(self.clock.now(), data);
        let id = item.id;
        let size = item.size();

        if self.memory_bytes + size >= self.config.max_memory_bytes {
            match self.state {
                EngineState::ReadBehind => self.rotate_full_future()?,
                EngineState::ReadCurrent => {
                    let writer = self.open_future()?;
                    self.future = Some(writer);
                    self.state = EngineState::ReadBehind;
                    info!(
                        "Memory budget of {} bytes reached, spilling to disk",
                        self.config.max_memory_bytes
                    );
                }
            }
        }

        match self.state {
            EngineState::ReadCurrent => {
                self.current.write_enqueue(&item)?;
                self.memory_bytes += size;
                self.memory.push_back(item);
            }
            EngineState::ReadBehind => {
                self.future_writer()?.write_enqueue(&item)?;
            }
        }
        self.total_count += 1;
        Ok(id)
    }

    /// Removes and returns the oldest payload, or `None` when the queue is
    /// empty.
    pub fn dequeue(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(id) = self.memory.front().map(|item| item.id) {
                self.current.write_dequeue(id)?;
                if let Some(item) = self.memory.pop_front() {
                    self.memory_bytes -= item.size();
                    self.total_count -= 1;
                    return Ok(Some(item.data));
                }
            }

            match self.journals.pop_front() {
                Some(path) => self.advance_to(path)?,
                None => break,
            }
        }

        if self.state == EngineState::ReadCurrent {
            self.current.compact()?;
        }
        self.state = EngineState::ReadCurrent;
        Ok(None)
    }

    /// Flushes and releases the open journals.
    pub fn close(self) -> Result<()> {
        if let Some(future) = self.future {
            future.close()?;
        }
        self.current.close()
    }

    /// Replaces the drained current journal with the next pending one.
    fn advance_to(&mut self, path: PathBuf) -> Result<()> {
        let last = self.journals.is_empty();
        if last {
            if let Some(future) = self.future.take() {
                future.close()?;
            }
        }

        let (writer, items) = replay(&path, self.config.sync_writes)?;
        let drained = std::mem::replace(&mut self.current, writer);
        drained.delete()?;

        self.memory_bytes = items.iter().map(QueuedItem::size).sum();
        self.memory = items.into();
        if last {
            self.state = EngineState::ReadCurrent;
        }
        info!(
            "Replayed {} items ({} bytes) from {}, state {:?}",
            self.memory.len(),
            self.memory_bytes,
            path.display(),
            self.state
        );
        Ok(())
    }

    /// Starts a new overflow journal and queues it for replay.
    fn open_future(&mut self) -> Result<JournalWriter> {
        let path = self.namer.next_path();
        let writer = JournalWriter::open(&path, self.config.sync_writes)?;
        self.journals.push_back(path);
        Ok(writer)
    }

    fn future_writer(&mut self) -> Result<&mut JournalWriter> {
        let writer = match self.future.take() {
            Some(writer) => writer,
            None => self.open_future()?,
        };
        Ok(self.future.insert(writer))
    }

    /// Bounds overflow journals to the memory budget, so each one fits in
    /// memory when it is replayed.
    fn rotate_full_future(&mut self) -> Result<()> {
        let full = self
            .future
            .as_ref()
            .is_some_and(|future| future.written_bytes() >= self.config.max_memory_bytes);
        if !full {
            return Ok(());
        }
        if let Some(future) = self.future.take() {
            debug!("Rotating overflow journal {}", future.path().display());
            future.close()?;
        }
        let writer = self.open_future()?;
        self.future = Some(writer);
        Ok(())
    }
}

/// Replays `path` and reopens it for appending.
fn replay(path: &Path, sync: bool) -> Result<(JournalWriter, Vec<QueuedItem>)> {
    let mut reader = JournalReader::open(path)?;
    let items = reader.verify()?;
    let valid_len = reader.valid_len();
    reader.close();
    let writer = JournalWriter::open_repaired(path, valid_len, sync)?;
    Ok((writer, items))
}

/// The engine behind the single lock that serializes every queue command.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Engine>> {
        self.inner.lock().map_err(|_| Error::Poisoned)
    }

    pub fn enqueue(&self, data: Vec<u8>) -> Result<i64> {
        self.lock()?.enqueue(data)
    }

    pub fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        self.lock()?.dequeue()
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(self.lock()?.stats())
    }
}
