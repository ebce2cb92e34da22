//! Journal files: naming, discovery and the record reader/writer.
//!
//! A journal directory holds files named `<unix-seconds>.log`. The name is
//! the creation second, so numeric order of names is creation order.

use std::path::{Path, PathBuf};

use crate::clock::unix_seconds;
use crate::Result;

pub mod codec;
pub mod reader;
pub mod writer;

pub use reader::JournalReader;
pub use writer::JournalWriter;

/// File extension for journal files.
pub const JOURNAL_EXT: &str = "log";

/// Journal filename for a creation second (e.g. "1700000000.log").
pub fn journal_filename(secs: u64) -> String {
    format!("{secs}.{JOURNAL_EXT}")
}

/// Returns the creation second encoded in a journal filename, if it is one.
pub fn parse_journal_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".log")?;
    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>().ok()
}

/// Lists journal files in `dir`, oldest first.
pub fn discover_journals(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut journals = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let secs = match path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_journal_filename)
        {
            Some(secs) => secs,
            None => continue,
        };
        journals.push((secs, path));
    }

    journals.sort_unstable_by_key(|(secs, _)| *secs);
    Ok(journals.into_iter().map(|(_, path)| path).collect())
}

/// Hands out paths for new journals.
///
/// Names come from the wall-clock second. When that second is already taken,
/// either by a name handed out earlier or by a file on disk, the next free
/// second is used instead so two journals never share a file.
#[derive(Debug)]
pub struct JournalNamer {
    dir: PathBuf,
    last: Option<u64>,
}

impl JournalNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last: None,
        }
    }

    /// Seeds the namer with a name already in use.
    pub fn observe(&mut self, path: &Path) {
        if let Some(secs) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_journal_filename)
        {
            self.last = Some(self.last.map_or(secs, |last| last.max(secs)));
        }
    }

    pub fn next_path(&mut self) -> PathBuf {
        self.next_path_at(unix_seconds())
    }

    fn next_path_at(&mut self, now: u64) -> PathBuf {
        let mut secs = match self.last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };
        loop {
            let path = self.dir.join(journal_filename(secs));
            if !path.exists() {
                self.last = Some(secs);
                return path;
            }
            secs += 1;
        }
    }
}
