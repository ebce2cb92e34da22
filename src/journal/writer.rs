use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::item::{QueuedItem, ID_SIZE};
use crate::journal::codec::{encode_dequeue, encode_enqueue};
use crate::Result;

/// Append-only writer for one journal file.
///
/// Every record is written with a single `write_all` and, when `sync` is set,
/// followed by `sync_data`, so a record is on stable storage before the
/// call returns.
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    file: File,
    sync: bool,
    written_bytes: usize,
    scratch: Vec<u8>,
}

impl JournalWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl Into<PathBuf>, sync: bool) -> Result<Self> {
        let path = path.into();
        info!("Spawning journal writer: {}", path.display());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            sync,
            written_bytes: 0,
            scratch: Vec::with_capacity(256),
        })
    }

    /// Opens `path` for appending after cutting it back to `valid_len`.
    ///
    /// Used when a replayed journal keeps receiving writes: bytes past the
    /// last complete record belong to a torn write and must not sit in front
    /// of new records.
    pub fn open_repaired(path: impl Into<PathBuf>, valid_len: u64, sync: bool) -> Result<Self> {
        let writer = Self::open(path, sync)?;
        let len = writer.file.metadata()?.len();
        if len > valid_len {
            warn!(
                "Truncating torn tail of {} ({} -> {} bytes)",
                writer.path.display(),
                len,
                valid_len
            );
            writer.file.set_len(valid_len)?;
            writer.file.sync_all()?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accounted bytes written through this handle since it was opened.
    pub fn written_bytes(&self) -> usize {
        self.written_bytes
    }

    /// Appends an enqueue record for `item`.
    pub fn write_enqueue(&mut self, item: &QueuedItem) -> Result<()> {
        self.scratch.clear();
        encode_enqueue(item, &mut self.scratch)?;
        self.flush_scratch()?;
        self.written_bytes += item.size();
        Ok(())
    }

    /// Appends a dequeue record for `id`.
    pub fn write_dequeue(&mut self, id: i64) -> Result<()> {
        self.scratch.clear();
        encode_dequeue(id, &mut self.scratch);
        self.flush_scratch()?;
        self.written_bytes += ID_SIZE;
        Ok(())
    }

    fn flush_scratch(&mut self) -> Result<()> {
        self.file.write_all(&self.scratch)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Discards every record, leaving an empty file under the same name.
    pub fn compact(&mut self) -> Result<()> {
        debug!("Compacting journal: {}", self.path.display());
        self.file.set_len(0)?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.written_bytes = 0;
        Ok(())
    }

    /// Flushes and releases the file handle.
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes the handle and removes the file.
    pub fn delete(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        info!("Deleting journal: {}", path.display());
        fs::remove_file(&path)?;
        Ok(())
    }
}
