use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::item::{sort_by_id, QueuedItem};
use crate::journal::codec::{DecodeError, Record, RecordDecoder};
use crate::{Error, Result};

/// Sequential reader that replays one journal file.
#[derive(Debug)]
pub struct JournalReader {
    path: PathBuf,
    file: File,
    valid_len: u64,
}

impl JournalReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        info!("Spawning journal reader: {}", path.display());
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file,
            valid_len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the prefix made of complete records, as of the last `verify`.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Replays the whole file and returns the items still active at its end,
    /// oldest first.
    ///
    /// An enqueue record adds its id, a dequeue record removes it wherever it
    /// appears. A partial last line (no line break after it) is a torn write
    /// and is dropped; any other undecodable record fails the replay.
    pub fn verify(&mut self) -> Result<Vec<QueuedItem>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut decoder = RecordDecoder::new(BufReader::new(&self.file));
        let mut active: HashMap<i64, Vec<u8>> = HashMap::new();

        loop {
            let start = decoder.offset();
            match decoder.next_record() {
                Ok(Some(Record::Enqueue(item))) => {
                    active.insert(item.id, item.data);
                }
                Ok(Some(Record::Dequeue(id))) => {
                    active.remove(&id);
                }
                Ok(None) => {
                    self.valid_len = start;
                    break;
                }
                Err(DecodeError::Truncated) => {
                    // Only a final partial line is a torn write. A line break
                    // past `start` means a complete record lied about its length.
                    if has_line_break_after(&self.file, start)? {
                        return Err(Error::Corrupt {
                            path: self.path.clone(),
                            offset: start,
                            reason: "record overruns following records",
                        });
                    }
                    warn!(
                        "Ignoring incomplete record at byte {} of {}",
                        start,
                        self.path.display()
                    );
                    self.valid_len = start;
                    break;
                }
                Err(DecodeError::Malformed(reason)) => {
                    return Err(Error::Corrupt {
                        path: self.path.clone(),
                        offset: start,
                        reason,
                    });
                }
                Err(DecodeError::Io(err)) => return Err(Error::Io(err)),
            }
        }

        let mut items: Vec<QueuedItem> = active
            .into_iter()
            .map(|(id, data)| QueuedItem::new(id, data))
            .collect();
        sort_by_id(&mut items);
        Ok(items)
    }

    pub fn close(self) {}

    /// Closes the handle and removes the file.
    pub fn delete(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        info!("Deleting journal: {}", path.display());
        fs::remove_file(&path)?;
        Ok(())
    }
}

fn has_line_break_after(mut file: &File, offset: u64) -> io::Result<bool> {
    file.seek(SeekFrom::Start(offset))?;
    let mut tail = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut tail)?;
    Ok(tail.ends_with(b"\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalWriter;
    use tempfile::tempdir;

    fn ids(items: &[QueuedItem]) -> Vec<i64> {
        items.iter().map(|item| item.id).collect()
    }

    #[test]
    fn replays_surviving_items_in_id_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        let mut writer = JournalWriter::open(&path, false).expect("open");
        writer.write_enqueue(&QueuedItem::new(30, b"c".to_vec())).expect("c");
        writer.write_enqueue(&QueuedItem::new(10, b"a".to_vec())).expect("a");
        writer.write_enqueue(&QueuedItem::new(20, b"b".to_vec())).expect("b");
        writer.write_dequeue(10).expect("deq a");
        writer.close().expect("close");

        let mut reader = JournalReader::open(&path).expect("reader");
        let items = reader.verify().expect("verify");
        assert_eq!(ids(&items), vec![20, 30]);
        assert_eq!(items[0].data, b"b");
    }

    #[test]
    fn dequeue_before_enqueue_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        let mut writer = JournalWriter::open(&path, false).expect("open");
        writer.write_dequeue(99).expect("stray dequeue");
        writer.write_enqueue(&QueuedItem::new(5, b"x".to_vec())).expect("enqueue");
        writer.close().expect("close");

        let items = JournalReader::open(&path).expect("reader").verify().expect("verify");
        assert_eq!(ids(&items), vec![5]);
    }

    #[test]
    fn verify_is_repeatable() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        let mut writer = JournalWriter::open(&path, false).expect("open");
        for id in 1..=5 {
            writer
                .write_enqueue(&QueuedItem::new(id, vec![id as u8; 3]))
                .expect("enqueue");
        }
        writer.write_dequeue(2).expect("dequeue");
        writer.close().expect("close");

        let mut reader = JournalReader::open(&path).expect("reader");
        let first = reader.verify().expect("first pass");
        let second = reader.verify().expect("second pass");
        let fresh = JournalReader::open(&path).expect("fresh").verify().expect("fresh pass");
        assert_eq!(first, second);
        assert_eq!(first, fresh);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        let mut writer = JournalWriter::open(&path, false).expect("open");
        writer.write_enqueue(&QueuedItem::new(7, b"kept".to_vec())).expect("enqueue");
        writer.close().expect("close");
        let complete = std::fs::metadata(&path).expect("meta").len();

        let mut bytes = std::fs::read(&path).expect("read");
        bytes.extend_from_slice(b"00000000000000000");
        std::fs::write(&path, &bytes).expect("rewrite");

        let mut reader = JournalReader::open(&path).expect("reader");
        let items = reader.verify().expect("verify");
        assert_eq!(ids(&items), vec![7]);
        assert_eq!(reader.valid_len(), complete);
    }

    #[test]
    fn malformed_record_fails_replay() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        std::fs::write(&path, b"0000000000000000001\r\nnot-a-number-at-all\r\n").expect("seed");

        let err = JournalReader::open(&path).expect("reader").verify().unwrap_err();
        match err {
            Error::Corrupt { offset, .. } => assert_eq!(offset, 21),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oversized_length_prefix_mid_file_fails_replay() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        let mut writer = JournalWriter::open(&path, false).expect("open");
        writer.write_enqueue(&QueuedItem::new(1, b"a".to_vec())).expect("a");
        writer.close().expect("close");

        // Id 2 claims a 4 GiB payload, then valid records follow.
        let mut bytes = std::fs::read(&path).expect("read");
        let bad_offset = bytes.len() as u64;
        bytes.extend_from_slice(b"0000000000000000002\xdb\xff\xff\xff\xffb\r\n");
        std::fs::write(&path, &bytes).expect("rewrite");
        let mut writer = JournalWriter::open(&path, false).expect("reopen");
        writer.write_enqueue(&QueuedItem::new(3, b"c".to_vec())).expect("c");
        writer.write_enqueue(&QueuedItem::new(4, b"d".to_vec())).expect("d");
        writer.close().expect("close");

        let err = JournalReader::open(&path).expect("reader").verify().unwrap_err();
        match err {
            Error::Corrupt { offset, .. } => assert_eq!(offset, bad_offset),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.log");
        std::fs::write(&path, b"").expect("seed");
        let mut reader = JournalReader::open(&path).expect("reader");
        assert!(reader.verify().expect("verify").is_empty());
        reader.delete().expect("delete");
        assert!(!path.exists());
    }
}
