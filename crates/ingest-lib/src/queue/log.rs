//! On-disk JSONL log behind the durable queue.
//!
//! One record per line, appended and fsynced before `append` returns.
//! Removal rewrites the file through a temp file and an atomic rename.
//! The directory is locked for as long as the log is open, so one process
//! owns it. Everything here is blocking; callers run it off the async runtime.

use super::{EntryId, QueueEntry};
use crate::error::QueueError;
use crate::models::DataPoint;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serialized form of one entry. Unknown fields are rejected on read.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Record {
    seq: u64,
    /// Assigned once at enqueue, stable across replays
    key: String,
    checksum: String,
    point: DataPoint,
}

impl Record {
    fn into_entry(self, line: usize) -> Result<QueueEntry, QueueError> {
        let actual = self.point.checksum();
        if actual != self.checksum {
            return Err(QueueError::Corrupt {
                line,
                reason: format!("checksum mismatch for seq {}", self.seq),
            });
        }
        Ok(QueueEntry {
            id: EntryId(self.seq),
            key: self.key,
            point: self.point,
        })
    }
}

/// Result of reading the whole log
struct Contents {
    entries: Vec<QueueEntry>,
    /// Byte length of the complete-line prefix, when a torn tail follows it
    torn_at: Option<u64>,
    /// The last record is complete but its newline never reached the disk
    unterminated: bool,
}

pub(crate) struct QueueLog {
    path: PathBuf,
    next_seq: u64,
    /// Held until the log is dropped
    _lock: File,
}

impl QueueLog {
    /// Open the log in `directory`, preparing the directory and recovering
    /// the sequence counter. Returns the log and the surviving entry count.
    pub(crate) fn open(directory: &Path, file_name: &str) -> Result<(Self, usize), QueueError> {
        prepare_directory(directory)?;

        let path = directory.join(file_name);
        let lock = acquire_lock(&path)?;
        if !path.exists() {
            File::create(&path)?.sync_all()?;
        }

        let contents = read_contents(&path)?;
        if let Some(valid_len) = contents.torn_at {
            // Drop the partial record so later appends start on a fresh line
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        } else if contents.unterminated {
            info!(path = %path.display(), "Terminating last queue record");
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        let next_seq = contents
            .entries
            .iter()
            .map(|e| e.id.0 + 1)
            .max()
            .unwrap_or(0);

        debug!(
            path = %path.display(),
            entries = contents.entries.len(),
            next_seq = next_seq,
            "Opened queue log"
        );

        Ok((
            Self {
                path,
                next_seq,
                _lock: lock,
            },
            contents.entries.len(),
        ))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Append one entry and flush it to disk
    pub(crate) fn append(&mut self, point: DataPoint) -> Result<QueueEntry, QueueError> {
        let record = Record {
            seq: self.next_seq,
            key: Uuid::new_v4().to_string(),
            checksum: point.checksum(),
            point,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let previous_len = file.metadata()?.len();

        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.sync_all()) {
            // Best effort: don't leave a partial line for the next append to extend
            if let Err(truncate_err) = file.set_len(previous_len) {
                warn!(error = %truncate_err, "Failed to truncate partial queue record");
            }
            return Err(e.into());
        }

        self.next_seq += 1;
        Ok(QueueEntry {
            id: EntryId(record.seq),
            key: record.key,
            point: record.point,
        })
    }

    /// All entries currently in the log, in append order
    pub(crate) fn read_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(read_contents(&self.path)?.entries)
    }

    /// Delete every entry whose id is in `ids` with one rewrite.
    ///
    /// Returns how many were removed; writes nothing when none are present.
    pub(crate) fn remove_many(&mut self, ids: &[EntryId]) -> Result<usize, QueueError> {
        let ids: HashSet<EntryId> = ids.iter().copied().collect();
        let entries = self.read_all()?;
        let before = entries.len();
        let remaining: Vec<QueueEntry> = entries
            .into_iter()
            .filter(|e| !ids.contains(&e.id))
            .collect();

        let removed = before - remaining.len();
        if removed > 0 {
            self.rewrite(&remaining)?;
        }
        Ok(removed)
    }

    fn rewrite(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in entries {
                let record = Record {
                    seq: entry.id.0,
                    key: entry.key.clone(),
                    checksum: entry.point.checksum(),
                    point: entry.point.clone(),
                };
                serde_json::to_writer(&mut file, &record)?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Lock `<log>.lock` next to the log, failing fast if another owner holds it
fn acquire_lock(log_path: &Path) -> Result<File, QueueError> {
    let lock_path = log_path.with_extension("lock");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    file.try_lock_exclusive()
        .map_err(|_| QueueError::Locked { path: lock_path })?;
    Ok(file)
}

/// Make sure `directory` is a directory, replacing a regular file at that path
fn prepare_directory(directory: &Path) -> io::Result<()> {
    if directory.is_file() {
        warn!(path = %directory.display(), "Removing file in place of queue directory");
        fs::remove_file(directory)?;
    }
    fs::create_dir_all(directory)
}

fn read_contents(path: &Path) -> Result<Contents, QueueError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Contents {
                entries: Vec::new(),
                torn_at: None,
                unterminated: false,
            })
        }
        Err(e) => return Err(e.into()),
    };

    let ends_cleanly = data.last().map_or(true, |b| *b == b'\n');
    let mut entries = Vec::new();
    let mut offset: u64 = 0;
    let mut torn_at = None;
    let mut unterminated = false;

    let lines: Vec<&[u8]> = data.split_inclusive(|b| *b == b'\n').collect();
    let last = lines.len().saturating_sub(1);

    for (index, raw) in lines.iter().enumerate() {
        let line_no = index + 1;
        let text = std::str::from_utf8(raw).map_err(|e| QueueError::Corrupt {
            line: line_no,
            reason: e.to_string(),
        });

        let parsed = text.and_then(|t| {
            let t = t.trim();
            if t.is_empty() {
                return Ok(None);
            }
            serde_json::from_str::<Record>(t)
                .map(Some)
                .map_err(|e| QueueError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                })
        });

        match parsed {
            Ok(Some(record)) => {
                entries.push(record.into_entry(line_no)?);
                if index == last && !ends_cleanly {
                    unterminated = true;
                }
            }
            Ok(None) => {}
            Err(e) if index == last && !ends_cleanly => {
                // An append that never returned success
                info!(path = %path.display(), line = line_no, error = %e, "Dropping torn queue record");
                torn_at = Some(offset);
            }
            Err(e) => return Err(e),
        }

        offset += raw.len() as u64;
    }

    Ok(Contents {
        entries,
        torn_at,
        unterminated,
    })
}
