//! Wiring for migrations between in-memory controllers

use crate::backend::memory::{Controller, LoopbackConnection, State};
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::locks::MigrationLocks;
use crate::workflow::Migration;
use std::sync::Arc;

/// Migration between two in-memory controllers
pub type MemoryMigration = Migration<State, Controller>;

/// Build a migration of `model_uuid` from `source` to `target`
///
/// Fails if the settings are invalid, the model does not exist on the
/// source, or a migration of the model is already running under `locks`.
pub async fn assemble_migration(
    source: &Controller,
    model_uuid: &str,
    target: &Controller,
    settings: MigrationSettings,
    locks: &MigrationLocks,
) -> Result<MemoryMigration> {
    settings.validate()?;
    if locks.is_locked(model_uuid) {
        return Err(MigrationError::AlreadyInProgress(model_uuid.to_string()));
    }

    let state = source
        .state_for(model_uuid)
        .await
        .map_err(MigrationError::SourceRead)?;
    let connection = Arc::new(LoopbackConnection::new(target.clone()).await);

    Ok(Migration::new(
        model_uuid,
        state,
        target.clone(),
        connection,
        settings,
        locks.clone(),
    ))
}
