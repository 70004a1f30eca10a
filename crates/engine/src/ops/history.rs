use std::{fs, path::Path, time::Duration};

use chrono::{TimeDelta, Utc};
use sea_orm::TransactionTrait;
use tracing::{info, warn};

use crate::{
    CheckpointHandle, EngineError, ResultEngine, Session, StoreDump,
    dump::schema_version,
    seal,
};

use super::{Engine, with_tx};

impl Engine {
    /// Push a checkpoint of the current state on the undo history.
    pub async fn checkpoint(&self) -> ResultEngine<CheckpointHandle> {
        let mut history = self.history.lock().await;
        let blob = self.capture_blob().await?;
        history.push(blob)
    }

    /// Checkpoints on the history, oldest first.
    pub async fn checkpoints(&self) -> Vec<CheckpointHandle> {
        self.history.lock().await.handles()
    }

    /// Replace the live store with the newest checkpoint.
    ///
    /// On failure the checkpoint goes back on the history and the store is
    /// left as it was.
    pub async fn undo(&self, session: &Session) -> ResultEngine<CheckpointHandle> {
        let mut history = self.history.lock().await;
        let checkpoint = history.pop().ok_or(EngineError::NothingToUndo)?;
        let handle = checkpoint.handle();

        let restored = async {
            let dump = self.decode_blob(checkpoint.read()?)?;
            with_tx!(self, |db_tx| {
                dump.restore(&db_tx).await?;
                Ok::<_, EngineError>(())
            })
        }
        .await;

        match restored {
            Ok(()) => {
                history.discard(checkpoint);
                info!(user = %session.user, checkpoint = %handle.id, "undo applied");
                Ok(handle)
            }
            Err(err) => {
                warn!(checkpoint = %handle.id, "undo failed: {err}");
                history.put_back(checkpoint);
                Err(err)
            }
        }
    }

    /// Drop checkpoints older than `age`; returns how many were removed.
    pub async fn purge_older_than(&self, age: Duration) -> ResultEngine<usize> {
        let age = TimeDelta::from_std(age)
            .map_err(|_| EngineError::InvalidField(format!("duration too large: {age:?}")))?;
        let cutoff = Utc::now() - age;
        let removed = self.history.lock().await.purge_older_than(cutoff);
        info!(removed, %cutoff, "purged checkpoints");
        Ok(removed)
    }

    /// [`Engine::purge_older_than`] with the configured retention.
    pub async fn purge_expired(&self) -> ResultEngine<usize> {
        self.purge_older_than(self.retention).await
    }

    /// Number of applied migrations.
    pub async fn schema_version(&self) -> ResultEngine<i64> {
        schema_version(&self.database).await
    }

    /// Full logical copy of the store.
    pub async fn dump(&self) -> ResultEngine<StoreDump> {
        StoreDump::capture(&self.database).await
    }

    /// Write the whole store to `path` as one sealed blob.
    ///
    /// Requires the engine to have been built with a password.
    pub async fn export_sealed(&self, path: &Path) -> ResultEngine<()> {
        let sealer = self.sealer.as_ref().ok_or_else(|| {
            EngineError::InvalidField("sealed export needs a password".to_string())
        })?;
        let _history = self.history.lock().await;
        let bytes = StoreDump::capture(&self.database).await?.to_bytes()?;
        write_atomic(path, &sealer.seal(&bytes)?)?;
        info!(path = %path.display(), "sealed store written");
        Ok(())
    }

    /// Load a sealed file with the engine's own password, without taking a
    /// checkpoint. Meant for startup, before any mutation.
    pub async fn open_sealed(&self, path: &Path) -> ResultEngine<()> {
        let sealer = self.sealer.as_ref().ok_or_else(|| {
            EngineError::InvalidField("sealed storage needs a password".to_string())
        })?;
        let dump = StoreDump::from_bytes(&sealer.open(&fs::read(path)?)?)?;
        let _history = self.history.lock().await;
        with_tx!(self, |db_tx| {
            dump.restore(&db_tx).await?;
            Ok::<_, EngineError>(())
        })?;
        info!(path = %path.display(), "sealed store opened");
        Ok(())
    }

    /// Replace the live store with a sealed file written by
    /// [`Engine::export_sealed`]. The replaced state is checkpointed.
    pub async fn import_sealed(
        &self,
        session: &Session,
        path: &Path,
        password: &str,
    ) -> ResultEngine<()> {
        let blob = fs::read(path)?;
        let dump = StoreDump::from_bytes(&seal::open_with_password(password, &blob)?)?;

        let pending = self.begin_mutation().await?;
        with_tx!(self, |db_tx| {
            dump.restore(&db_tx).await?;
            Ok::<_, EngineError>(())
        })?;
        pending.keep();
        info!(
            user = %session.user,
            path = %path.display(),
            transactions = dump.transactions.len(),
            "sealed store loaded"
        );
        Ok(())
    }
}

/// Write through a temporary sibling file and rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> ResultEngine<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
