use std::{collections::BTreeSet, fmt, path::PathBuf, sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    CheckpointHandle, DEFAULT_CAPACITY, EngineError, ResultEngine, StoreDump, TextMatcher,
    history::UndoHistory, seal::Sealer,
};

mod balances;
mod history;
mod loans;
mod records;
mod recurrence;
mod registry;
mod submit;

pub(crate) use balances::Impact;

const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Rows touched by one mutation.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    pub changed: BTreeSet<i64>,
    pub removed: BTreeSet<i64>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    fn merge(&mut self, other: Changes) {
        self.changed.extend(other.changed);
        self.removed.extend(other.removed);
        self.changed.retain(|id| !self.removed.contains(id));
    }
}

/// Checkpoint taken for an in-flight mutation.
///
/// Holds the history lock until dropped, which serializes mutations. The
/// checkpoint is staged without evicting anything and is discarded on drop
/// unless [`Pending::keep`] was called.
pub(crate) struct Pending<'a> {
    history: MutexGuard<'a, UndoHistory>,
    handle: Option<CheckpointHandle>,
}

impl Pending<'_> {
    /// Commit the checkpoint, evicting the oldest beyond capacity.
    fn keep(mut self) -> Option<CheckpointHandle> {
        let handle = self.handle.take();
        self.history.evict();
        handle
    }

    /// Keep the checkpoint only if the mutation changed something.
    fn keep_if(self, changes: &Changes) -> Option<CheckpointHandle> {
        if changes.is_empty() { None } else { self.keep() }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.history.discard_handle(handle);
        }
    }
}

/// The ledger façade.
///
/// Every mutating call checkpoints the store, applies the change and its
/// derived recomputation in one database transaction, and keeps the
/// checkpoint for [`Engine::undo`] only when the change committed.
pub struct Engine {
    database: DatabaseConnection,
    history: Mutex<UndoHistory>,
    sealer: Option<Sealer>,
    text_matcher: Option<Arc<dyn TextMatcher>>,
    retention: Duration,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("sealed", &self.sealer.is_some())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// `true` when checkpoints are sealed with a password.
    pub fn is_sealed(&self) -> bool {
        self.sealer.is_some()
    }

    /// Serialize the store into a checkpoint blob, sealed when a password is set.
    async fn capture_blob(&self) -> ResultEngine<Vec<u8>> {
        let bytes = StoreDump::capture(&self.database).await?.to_bytes()?;
        match &self.sealer {
            Some(sealer) => sealer.seal(&bytes),
            None => Ok(bytes),
        }
    }

    fn decode_blob(&self, blob: Vec<u8>) -> ResultEngine<StoreDump> {
        let bytes = match &self.sealer {
            Some(sealer) => sealer.open(&blob)?,
            None => blob,
        };
        StoreDump::from_bytes(&bytes)
    }

    /// Lock the history and checkpoint the current state ahead of a mutation.
    async fn begin_mutation(&self) -> ResultEngine<Pending<'_>> {
        let mut history = self.history.lock().await;
        let blob = self.capture_blob().await?;
        let handle = history.stage(blob)?;
        Ok(Pending {
            history,
            handle: Some(handle),
        })
    }
}

/// The builder for `Engine`
pub struct EngineBuilder {
    database: DatabaseConnection,
    password: Option<String>,
    checkpoint_dir: Option<PathBuf>,
    capacity: usize,
    retention: Duration,
    text_matcher: Option<Arc<dyn TextMatcher>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConnection::default(),
            password: None,
            checkpoint_dir: None,
            capacity: DEFAULT_CAPACITY,
            retention: DEFAULT_RETENTION,
            text_matcher: None,
        }
    }
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Seal checkpoints with a key derived from `password`.
    pub fn password(mut self, password: impl Into<String>) -> EngineBuilder {
        self.password = Some(password.into());
        self
    }

    /// Keep checkpoints as files in `dir` instead of memory.
    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> EngineBuilder {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// How many checkpoints undo can walk back (default 10).
    pub fn history_capacity(mut self, capacity: usize) -> EngineBuilder {
        self.capacity = capacity;
        self
    }

    /// Age after which [`Engine::purge_expired`] drops checkpoints (default 24h).
    pub fn retention(mut self, retention: Duration) -> EngineBuilder {
        self.retention = retention;
        self
    }

    /// Extra free-text matcher for [`Engine::query`].
    pub fn text_matcher(mut self, matcher: Arc<dyn TextMatcher>) -> EngineBuilder {
        self.text_matcher = Some(matcher);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        if self.capacity == 0 {
            return Err(EngineError::InvalidField(
                "history capacity must be > 0".to_string(),
            ));
        }
        let sealer = self.password.as_deref().map(Sealer::new).transpose()?;
        let history = match self.checkpoint_dir {
            Some(dir) => UndoHistory::in_dir(dir, self.capacity)?,
            None => UndoHistory::in_memory(self.capacity),
        };
        Ok(Engine {
            database: self.database,
            history: Mutex::new(history),
            sealer,
            text_matcher: self.text_matcher,
            retention: self.retention,
        })
    }
}
