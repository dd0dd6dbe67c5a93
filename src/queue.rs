//! Durable FIFO queue of pending scrobbles
//!
//! The queue holds encoded scrobble payloads - the exact bytes that will be
//! sent to the service - in arrival order. Durable entries are appended to a
//! newline-delimited file that acts as a write-ahead log: on open the file is
//! replayed into memory, tolerating a damaged tail from a prior crash.
//! Entries leave the file only through [`ScrobbleQueue::remove_head`], which
//! compacts the log by rewriting it without the acknowledged entry.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// In-memory delivery state of a queue entry.
///
/// `InFlight` exists only for the duration of a send attempt and is never
/// persisted; a crash mid-send replays the entry as `Pending` on next open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    InFlight,
}

/// One queued scrobble payload
#[derive(Debug, Clone)]
pub struct QueueEntry {
    sequence: u64,
    payload: Vec<u8>,
    state: EntryState,
    durable: bool,
}

impl QueueEntry {
    /// Queue sequence number; defines FIFO and recovery order
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The encoded scrobble, byte-for-byte what goes on the wire
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Current in-memory state
    #[must_use]
    pub const fn state(&self) -> EntryState {
        self.state
    }

    /// Whether the entry is backed by the durable file
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }
}

/// Ordered, crash-recoverable store of pending scrobble payloads
pub struct ScrobbleQueue {
    path: PathBuf,
    file: File,
    entries: VecDeque<QueueEntry>,
    next_sequence: u64,
}

impl ScrobbleQueue {
    /// Open the queue at `path`, creating the file if absent.
    ///
    /// Previously persisted entries are replayed in file order. A corrupted
    /// tail (partial write from a prior crash) is tolerated: everything
    /// parseable before the damage is recovered and the remainder is
    /// discarded with a warning. Opening never fails because of a damaged
    /// tail.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file or its parent directory cannot be
    /// created or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            Self::replay(&path)?
        } else {
            VecDeque::new()
        };
        let next_sequence = entries.len() as u64;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!(
            path = %path.display(),
            pending = entries.len(),
            "opened scrobble queue"
        );

        Ok(Self {
            path,
            file,
            entries,
            next_sequence,
        })
    }

    /// Read persisted entries back, stopping at the first unparseable record.
    fn replay(path: &Path) -> Result<VecDeque<QueueEntry>> {
        let contents = fs::read(path)?;
        let mut entries = VecDeque::new();

        for record in contents.split(|&b| b == b'\n') {
            if record.is_empty() {
                continue;
            }
            // The payload bytes are stored verbatim; a record that is not
            // valid JSON marks the point of corruption.
            if serde_json::from_slice::<serde_json::Value>(record).is_err() {
                warn!(
                    path = %path.display(),
                    recovered = entries.len(),
                    "damaged record in queue file, discarding it and the rest"
                );
                break;
            }
            entries.push_back(QueueEntry {
                sequence: entries.len() as u64,
                payload: record.to_vec(),
                state: EntryState::Pending,
                durable: true,
            });
        }

        Ok(entries)
    }

    /// Append an encoded scrobble.
    ///
    /// With `durable` set, the payload is written and flushed to the queue
    /// file before this returns; otherwise the entry is memory-only and is
    /// lost on abnormal termination. Returns the entry's sequence number.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the durable write or flush fails. The entry
    /// is then not queued, and the file is truncated back to its previous
    /// length on a best-effort basis.
    pub fn append(&mut self, payload: &[u8], durable: bool) -> Result<u64> {
        if durable {
            let previous_len = self.file.metadata()?.len();
            let mut record = Vec::with_capacity(payload.len() + 1);
            record.extend_from_slice(payload);
            record.push(b'\n');

            if let Err(e) = self
                .file
                .write_all(&record)
                .and_then(|()| self.file.sync_data())
            {
                // Roll back a partial write so later appends stay parseable.
                if let Err(trunc_err) = self.file.set_len(previous_len) {
                    warn!(
                        path = %self.path.display(),
                        error = %trunc_err,
                        "could not truncate queue file after failed append"
                    );
                }
                return Err(e.into());
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(QueueEntry {
            sequence,
            payload: payload.to_vec(),
            state: EntryState::Pending,
            durable,
        });
        Ok(sequence)
    }

    /// Oldest entry still `Pending`, without removing it.
    ///
    /// Returns `None` when the queue is empty or the head is already in
    /// flight.
    #[must_use]
    pub fn peek_head(&self) -> Option<QueueEntry> {
        self.entries
            .front()
            .filter(|entry| entry.state == EntryState::Pending)
            .cloned()
    }

    /// Mark an entry as being sent. In-memory only; durable storage never
    /// records in-flight status.
    pub fn mark_in_flight(&mut self, sequence: u64) {
        self.set_state(sequence, EntryState::InFlight);
    }

    /// Return an entry to `Pending` after a failed or abandoned send attempt.
    pub fn mark_pending_again(&mut self, sequence: u64) {
        self.set_state(sequence, EntryState::Pending);
    }

    fn set_state(&mut self, sequence: u64, state: EntryState) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.sequence == sequence)
        {
            entry.state = state;
        }
    }

    /// Remove the head entry after the service acknowledged it.
    ///
    /// Durable heads are removed by rewriting the queue file without them
    /// (temp file plus atomic rename).
    ///
    /// # Errors
    /// Returns [`Error::Io`] if `sequence` does not match the head or the
    /// compaction rewrite fails; the entry then stays queued and will be
    /// resubmitted (duplicate delivery is the accepted cost of
    /// at-least-once).
    pub fn remove_head(&mut self, sequence: u64) -> Result<()> {
        let head = self.entries.front().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "remove_head on an empty queue",
            ))
        })?;
        if head.sequence != sequence {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "remove_head sequence {sequence} does not match head {}",
                    head.sequence
                ),
            )));
        }

        if head.durable {
            self.compact_without_head()?;
        }
        self.entries.pop_front();
        Ok(())
    }

    /// Rewrite the queue file with every durable entry except the head.
    fn compact_without_head(&mut self) -> Result<()> {
        Self::rewrite_records(
            &self.path,
            self.entries
                .iter()
                .skip(1)
                .filter(|e| e.durable)
                .map(|e| e.payload.as_slice()),
        )?;
        self.reopen_append()
    }

    /// Rewrite the queue file with every queued entry, upgrading memory-only
    /// entries to durable. Called on clean shutdown so scrobbles enqueued
    /// without safe scrobbling still survive a restart, in FIFO order.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the rewrite fails; durability flags are then
    /// left unchanged.
    pub fn make_all_durable(&mut self) -> Result<()> {
        if self.entries.iter().all(|e| e.durable) {
            return Ok(());
        }
        Self::rewrite_records(&self.path, self.entries.iter().map(|e| e.payload.as_slice()))?;
        self.reopen_append()?;
        for entry in &mut self.entries {
            entry.durable = true;
        }
        Ok(())
    }

    /// Replace the queue file contents via temp file and atomic rename.
    fn rewrite_records<'a>(
        path: &Path,
        payloads: impl Iterator<Item = &'a [u8]>,
    ) -> io::Result<()> {
        let tmp_path = path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)?;
        for payload in payloads {
            tmp.write_all(payload)?;
            tmp.write_all(b"\n")?;
        }
        tmp.sync_data()?;
        drop(tmp);
        fs::rename(&tmp_path, path)
    }

    /// Reopen the append handle after the file was replaced.
    fn reopen_append(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Number of queued entries, in flight included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued entries in FIFO order
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Path of the durable queue file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
