//! Bounded stack of checkpoints used by undo.
//!
//! Checkpoint blobs are opaque here: the engine decides what goes in them
//! (a JSON dump, optionally sealed). Blobs live either in memory or as files
//! named `undo_<millis>_<uuid>.ckpt` in a directory, so a directory-backed
//! history survives a restart.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ResultEngine;

pub const DEFAULT_CAPACITY: usize = 10;

const FILE_PREFIX: &str = "undo_";
const FILE_SUFFIX: &str = ".ckpt";

/// Public reference to a stored checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointHandle {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Body {
    Memory(Vec<u8>),
    File(PathBuf),
}

#[derive(Debug)]
pub(crate) struct Checkpoint {
    handle: CheckpointHandle,
    body: Body,
}

impl Checkpoint {
    pub(crate) fn handle(&self) -> CheckpointHandle {
        self.handle
    }

    pub(crate) fn read(&self) -> ResultEngine<Vec<u8>> {
        match &self.body {
            Body::Memory(bytes) => Ok(bytes.clone()),
            Body::File(path) => Ok(fs::read(path)?),
        }
    }

    fn discard(self) {
        if let Body::File(path) = &self.body
            && let Err(err) = fs::remove_file(path)
        {
            warn!("cannot remove checkpoint {}: {err}", path.display());
        }
    }
}

#[derive(Debug)]
pub(crate) struct UndoHistory {
    entries: VecDeque<Checkpoint>,
    capacity: usize,
    dir: Option<PathBuf>,
}

impl UndoHistory {
    pub(crate) fn in_memory(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dir: None,
        }
    }

    /// Open a directory-backed history, reloading the newest `capacity`
    /// checkpoint files. Older files are removed.
    pub(crate) fn in_dir(dir: impl Into<PathBuf>, capacity: usize) -> ResultEngine<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match parse_file_name(&path) {
                Some(handle) => found.push(Checkpoint {
                    handle,
                    body: Body::File(path),
                }),
                None => {
                    if path.extension().is_some_and(|ext| ext == "ckpt") {
                        warn!("ignoring unreadable checkpoint file {}", path.display());
                    }
                }
            }
        }
        found.sort_by_key(|cp| cp.handle.taken_at);

        let mut history = Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dir: Some(dir),
        };
        for checkpoint in found {
            history.entries.push_back(checkpoint);
            history.evict();
        }
        debug!("reloaded {} checkpoints", history.entries.len());
        Ok(history)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn handles(&self) -> Vec<CheckpointHandle> {
        self.entries.iter().map(Checkpoint::handle).collect()
    }

    /// Store a new checkpoint, evicting the oldest ones beyond capacity.
    pub(crate) fn push(&mut self, blob: Vec<u8>) -> ResultEngine<CheckpointHandle> {
        let handle = self.stage(blob)?;
        self.evict();
        Ok(handle)
    }

    /// Store a checkpoint for a mutation still in flight. Nothing is evicted
    /// until [`UndoHistory::evict`] runs, so discarding the staged handle
    /// leaves the history as it was.
    pub(crate) fn stage(&mut self, blob: Vec<u8>) -> ResultEngine<CheckpointHandle> {
        // Millisecond precision, as encoded in file names.
        let now = Utc::now();
        let mut taken_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        if let Some(last) = self.entries.back()
            && taken_at <= last.handle.taken_at
        {
            taken_at = last.handle.taken_at + TimeDelta::milliseconds(1);
        }
        let handle = CheckpointHandle {
            id: Uuid::new_v4(),
            taken_at,
        };

        let body = match &self.dir {
            Some(dir) => {
                let path = dir.join(file_name(&handle));
                fs::write(&path, &blob)?;
                Body::File(path)
            }
            None => Body::Memory(blob),
        };

        self.entries.push_back(Checkpoint { handle, body });
        Ok(handle)
    }

    /// Take the newest checkpoint off the stack.
    pub(crate) fn pop(&mut self) -> Option<Checkpoint> {
        self.entries.pop_back()
    }

    /// Put a popped checkpoint back on top, e.g. after a failed restore.
    pub(crate) fn put_back(&mut self, checkpoint: Checkpoint) {
        self.entries.push_back(checkpoint);
    }

    /// Drop a checkpoint that has been consumed or abandoned.
    pub(crate) fn discard(&mut self, checkpoint: Checkpoint) {
        checkpoint.discard();
    }

    /// Remove the newest checkpoint if it is `handle`.
    pub(crate) fn discard_handle(&mut self, handle: CheckpointHandle) {
        if self.entries.back().is_some_and(|cp| cp.handle == handle)
            && let Some(checkpoint) = self.entries.pop_back()
        {
            checkpoint.discard();
        }
    }

    /// Drop every checkpoint taken before `cutoff`; returns how many went.
    pub(crate) fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while self
            .entries
            .front()
            .is_some_and(|cp| cp.handle.taken_at < cutoff)
        {
            if let Some(checkpoint) = self.entries.pop_front() {
                checkpoint.discard();
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                debug!("evicting checkpoint {}", oldest.handle.id);
                oldest.discard();
            }
        }
    }
}

fn file_name(handle: &CheckpointHandle) -> String {
    format!(
        "{FILE_PREFIX}{}_{}{FILE_SUFFIX}",
        handle.taken_at.timestamp_millis(),
        handle.id
    )
}

fn parse_file_name(path: &Path) -> Option<CheckpointHandle> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (millis, id) = stem.split_once('_')?;
    Some(CheckpointHandle {
        id: Uuid::parse_str(id).ok()?,
        taken_at: DateTime::from_timestamp_millis(millis.parse().ok()?)?,
    })
}
