//! Migration workflow
//!
//! A [`Migration`] moves one model from a source backend to a target
//! controller through a fixed sequence of phases:
//!
//! ```text
//!  NotStarted ──► Prechecked ──► Exported ──► Transferred ──► Imported
//!                                                                │
//!                  Finalized ◄── BinariesUploaded ◄──────────────┘
//!
//!  any non-terminal phase ──► Aborted
//! ```
//!
//! | Phase              | Work done on entry                                      |
//! |--------------------|---------------------------------------------------------|
//! | `Prechecked`       | [`precheck`] against the source                         |
//! | `Exported`         | [`export_model`] from the source                        |
//! | `Transferred`      | payload handed to the target, digest acknowledged      |
//! | `Imported`         | [`import_model`] on the transferred bytes               |
//! | `BinariesUploaded` | [`upload_binaries`] from source storage into the target |
//! | `Finalized`        | source marked as migrated and read-only                 |
//!
//! Only the finalize phase writes to the source. A failure in any phase
//! moves the migration to `Aborted` and returns the error tagged with that
//! phase. Transient failures are retried inside the phase according to the
//! configured [`RetryPolicy`](crate::retry::RetryPolicy) before that happens.
//!
//! Aborting never deletes anything on the target. If the failure came after
//! the import committed, the target still holds the new model; the operator
//! removes it explicitly (the in-memory controller offers
//! [`discard_model`](crate::backend::memory::Controller::discard_model)).
//!
//! # Resuming
//!
//! [`Migration::checkpoint`] captures the exported payload and phase history.
//! A later [`Migration::resume`] against a fresh target picks up after the
//! export, so the source is not walked again. The precheck always runs again
//! before a resumed migration does any further work.
//!
//! When a new identity is set, the payload is rewritten before transfer. The
//! target imports exactly the bytes it acknowledged.

use crate::backend::{BackendHandle, ImportTarget, ModelInfo, SourceBackend, TargetConnection};
use crate::binaries::{upload_binaries, UploadBinariesConfig, UploadSummary};
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::export::export_model;
use crate::import::{import_model, ImportedBackend};
use crate::locks::{MigrationLockGuard, MigrationLocks};
use crate::logging::PhaseTimer;
use crate::precheck::precheck;
use crate::retry::retry_transient;
use chrono::{DateTime, Utc};
use model_description::{deserialize, serialize, Model, NAME_KEY, UUID_KEY};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Phase a migration has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    NotStarted,
    Prechecked,
    Exported,
    Transferred,
    Imported,
    BinariesUploaded,
    Finalized,
    Aborted,
}

impl MigrationPhase {
    /// Phase that follows this one on success
    pub fn next(self) -> Option<Self> {
        match self {
            MigrationPhase::NotStarted => Some(MigrationPhase::Prechecked),
            MigrationPhase::Prechecked => Some(MigrationPhase::Exported),
            MigrationPhase::Exported => Some(MigrationPhase::Transferred),
            MigrationPhase::Transferred => Some(MigrationPhase::Imported),
            MigrationPhase::Imported => Some(MigrationPhase::BinariesUploaded),
            MigrationPhase::BinariesUploaded => Some(MigrationPhase::Finalized),
            MigrationPhase::Finalized | MigrationPhase::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Finalized | MigrationPhase::Aborted)
    }

    pub fn can_transition_to(self, to: MigrationPhase) -> bool {
        if to == MigrationPhase::Aborted {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::NotStarted => "not-started",
            MigrationPhase::Prechecked => "precheck",
            MigrationPhase::Exported => "export",
            MigrationPhase::Transferred => "transfer",
            MigrationPhase::Imported => "import",
            MigrationPhase::BinariesUploaded => "upload-binaries",
            MigrationPhase::Finalized => "finalize",
            MigrationPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One entry in a migration's phase history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: MigrationPhase,
    pub at: DateTime<Utc>,
    /// Set when the phase failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Name and uuid the model takes on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: String,
    pub uuid: String,
}

/// Serializable snapshot from which a migration can be resumed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationCheckpoint {
    pub migration_id: String,
    pub model_uuid: String,
    /// Last completed phase a migration can restart from, either
    /// `NotStarted` or `Exported`
    pub phase: MigrationPhase,
    /// Exported description, present from `Exported` on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ModelIdentity>,
    #[serde(default)]
    pub history: Vec<PhaseRecord>,
    pub created_at: DateTime<Utc>,
}

impl MigrationCheckpoint {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A model migration from a source backend to a target controller
pub struct Migration<S, T>
where
    S: SourceBackend,
    T: ImportTarget,
{
    id: String,
    model_uuid: String,
    source: S,
    target: T,
    connection: Arc<dyn TargetConnection>,
    settings: MigrationSettings,
    locks: MigrationLocks,
    lock: Option<MigrationLockGuard>,
    identity: Option<ModelIdentity>,
    phase: MigrationPhase,
    reached: MigrationPhase,
    payload: Option<Vec<u8>>,
    /// Bytes acknowledged by the target, identity already applied
    transferred: Option<Vec<u8>>,
    /// Precheck has to pass again before the next phase runs
    recheck_source: bool,
    imported: Option<(ModelInfo, ImportedBackend<T>)>,
    summary: Option<UploadSummary>,
    history: Vec<PhaseRecord>,
}

impl<S, T> Migration<S, T>
where
    S: SourceBackend,
    T: ImportTarget,
{
    pub fn new(
        model_uuid: impl Into<String>,
        source: S,
        target: T,
        connection: Arc<dyn TargetConnection>,
        settings: MigrationSettings,
        locks: MigrationLocks,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_uuid: model_uuid.into(),
            source,
            target,
            connection,
            settings,
            locks,
            lock: None,
            identity: None,
            phase: MigrationPhase::NotStarted,
            reached: MigrationPhase::NotStarted,
            payload: None,
            transferred: None,
            recheck_source: false,
            imported: None,
            summary: None,
            history: Vec::new(),
        }
    }

    /// Import under a different name and uuid than the source model
    pub fn with_identity(mut self, name: impl Into<String>, uuid: impl Into<String>) -> Self {
        self.identity = Some(ModelIdentity {
            name: name.into(),
            uuid: uuid.into(),
        });
        self
    }

    /// Restart a migration from a checkpoint
    ///
    /// The checkpoint's payload is revalidated before anything else happens,
    /// and the source is prechecked again on the first step. A checkpoint
    /// taken before export restarts from the beginning. `target` should not
    /// hold the model from the earlier attempt.
    pub fn resume(
        checkpoint: MigrationCheckpoint,
        source: S,
        target: T,
        connection: Arc<dyn TargetConnection>,
        settings: MigrationSettings,
        locks: MigrationLocks,
    ) -> Result<Self> {
        let mut migration = Self::new(
            checkpoint.model_uuid,
            source,
            target,
            connection,
            settings,
            locks,
        );
        migration.id = checkpoint.migration_id;
        migration.identity = checkpoint.identity;
        migration.history = checkpoint.history;

        let phase = match checkpoint.phase {
            MigrationPhase::NotStarted | MigrationPhase::Prechecked => MigrationPhase::NotStarted,
            MigrationPhase::Exported => {
                let payload = checkpoint.payload.ok_or_else(|| {
                    MigrationError::Config("checkpoint at export has no payload".into())
                })?;
                deserialize(payload.as_bytes())?;
                migration.payload = Some(payload.into_bytes());
                migration.recheck_source = true;
                MigrationPhase::Exported
            }
            other => {
                return Err(MigrationError::Config(format!(
                    "cannot resume a migration from phase {}",
                    other
                )))
            }
        };
        migration.phase = phase;
        migration.reached = phase;

        info!(
            migration = %migration.id,
            model = %migration.model_uuid,
            phase = %migration.phase,
            "Resuming migration"
        );
        Ok(migration)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Serialized description once exported
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// The model created on the target, once imported
    pub fn imported_model(&self) -> Option<&ModelInfo> {
        self.imported.as_ref().map(|(info, _)| info)
    }

    pub fn imported_backend(&self) -> Option<&ImportedBackend<T>> {
        self.imported.as_ref().map(|(_, backend)| backend)
    }

    /// Hand the imported model and its backend to the caller
    pub fn into_imported(self) -> Option<(ModelInfo, ImportedBackend<T>)> {
        self.imported
    }

    pub fn upload_summary(&self) -> Option<&UploadSummary> {
        self.summary.as_ref()
    }

    /// Uuid the model has on the target
    pub fn target_model_uuid(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.uuid.as_str())
            .unwrap_or(&self.model_uuid)
    }

    /// Drive the migration until it finalizes or fails
    pub async fn run(&mut self) -> Result<MigrationPhase> {
        while self.phase != MigrationPhase::Finalized {
            self.step().await?;
        }
        Ok(self.phase)
    }

    /// Advance exactly one phase
    pub async fn step(&mut self) -> Result<MigrationPhase> {
        let next = self.phase.next().ok_or(MigrationError::InvalidTransition {
            from: self.phase,
            to: self.phase,
        })?;
        if self.lock.is_none() {
            self.lock = Some(self.locks.acquire(&self.model_uuid)?);
        }

        if self.recheck_source {
            if let Err(err) = self.recheck().await {
                let err = err.in_phase(MigrationPhase::Prechecked);
                warn!(migration = %self.id, error = %err, "Precheck failed on resume");
                self.enter_aborted(Some(err.to_string()));
                return Err(err);
            }
            self.recheck_source = false;
        }

        let mut timer = PhaseTimer::new(next.to_string(), &self.model_uuid);
        match self.execute(next).await {
            Ok(()) => {
                timer.succeed();
                self.transition(next, None)?;
                self.reached = next;
                if next.is_terminal() {
                    self.lock = None;
                    info!(migration = %self.id, model = %self.model_uuid, "Migration finalized");
                }
                Ok(next)
            }
            Err(err) => {
                let err = err.in_phase(next);
                warn!(migration = %self.id, phase = %next, error = %err, "Migration phase failed");
                self.enter_aborted(Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stop the migration without touching the source
    pub fn abort(&mut self) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(MigrationError::InvalidTransition {
                from: self.phase,
                to: MigrationPhase::Aborted,
            });
        }
        self.enter_aborted(None);
        Ok(())
    }

    /// Snapshot from which this migration can be resumed
    ///
    /// Only an export is worth keeping; anything earlier restarts from
    /// `NotStarted` so the precheck runs again.
    pub fn checkpoint(&self) -> MigrationCheckpoint {
        let payload = self
            .payload
            .as_ref()
            .and_then(|p| String::from_utf8(p.clone()).ok());

        let phase = if self.reached >= MigrationPhase::Exported && payload.is_some() {
            MigrationPhase::Exported
        } else {
            MigrationPhase::NotStarted
        };

        MigrationCheckpoint {
            migration_id: self.id.clone(),
            model_uuid: self.model_uuid.clone(),
            phase,
            payload: payload.filter(|_| phase == MigrationPhase::Exported),
            identity: self.identity.clone(),
            history: self.history.clone(),
            created_at: Utc::now(),
        }
    }

    async fn execute(&mut self, phase: MigrationPhase) -> Result<()> {
        let policy = self.settings.retry.clone();
        let label = phase.to_string();
        let source = &self.source;

        match phase {
            MigrationPhase::Prechecked => {
                retry_transient(&policy, &label, || precheck(source)).await?;
            }
            MigrationPhase::Exported => {
                let payload = retry_transient(&policy, &label, || export_model(source)).await?;
                self.payload = Some(payload);
            }
            MigrationPhase::Transferred => {
                let bytes = self.outgoing_payload()?;
                let payload = bytes.as_slice();
                let connection = self.connection.as_ref();
                let model_uuid = self.target_model_uuid();
                retry_transient(&policy, &label, move || async move {
                    let expected = format!("{:x}", Sha256::digest(payload));
                    let actual = connection
                        .transmit(model_uuid, payload)
                        .await
                        .map_err(MigrationError::Transfer)?;
                    if actual != expected {
                        return Err(MigrationError::TransferDigest { expected, actual });
                    }
                    Ok(())
                })
                .await?;
                self.transferred = Some(bytes);
            }
            MigrationPhase::Imported => {
                let bytes = self.require_transferred()?;
                let imported = import_model(&self.target, bytes).await?;
                self.imported = Some(imported);
            }
            MigrationPhase::BinariesUploaded => {
                let model = deserialize(self.require_transferred()?)?;
                let model = &model;
                let connection = self.connection.as_ref();
                let settings = &self.settings;
                let summary = retry_transient(&policy, &label, move || async move {
                    let config =
                        UploadBinariesConfig::new(source, model, connection).with_settings(settings);
                    upload_binaries(&config).await
                })
                .await?;
                self.summary = Some(summary);
            }
            MigrationPhase::Finalized => {
                let controller = self.connection.controller_uuid();
                let controller = controller.as_str();
                retry_transient(&policy, &label, move || async move {
                    source
                        .mark_migrated(controller)
                        .await
                        .map_err(MigrationError::Finalize)
                })
                .await?;
            }
            MigrationPhase::NotStarted | MigrationPhase::Aborted => {
                return Err(MigrationError::InvalidTransition {
                    from: self.phase,
                    to: phase,
                })
            }
        }
        Ok(())
    }

    fn require_payload(&self) -> Result<&[u8]> {
        self.payload.as_deref().ok_or_else(|| {
            MigrationError::InvariantViolation("no exported payload to work from".into())
        })
    }

    fn require_transferred(&self) -> Result<&[u8]> {
        self.transferred.as_deref().ok_or_else(|| {
            MigrationError::InvariantViolation("no transferred payload to import".into())
        })
    }

    /// The exported payload as it will exist on the target
    fn outgoing_payload(&self) -> Result<Vec<u8>> {
        let payload = self.require_payload()?;
        let Some(identity) = &self.identity else {
            return Ok(payload.to_vec());
        };
        let mut model: Model = deserialize(payload)?;
        model.update_config([
            (NAME_KEY, serde_json::Value::String(identity.name.clone())),
            (UUID_KEY, serde_json::Value::String(identity.uuid.clone())),
        ]);
        serialize(&model).map_err(MigrationError::Export)
    }

    async fn recheck(&self) -> Result<()> {
        let label = MigrationPhase::Prechecked.to_string();
        let mut timer = PhaseTimer::new(label.clone(), &self.model_uuid);
        let source = &self.source;
        retry_transient(&self.settings.retry, &label, || precheck(source)).await?;
        timer.succeed();
        info!(migration = %self.id, model = %self.model_uuid, "Source prechecked again");
        Ok(())
    }

    fn transition(&mut self, to: MigrationPhase, error: Option<String>) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(MigrationError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        self.history.push(PhaseRecord {
            phase: to,
            at: Utc::now(),
            error,
        });
        Ok(())
    }

    fn enter_aborted(&mut self, error: Option<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = MigrationPhase::Aborted;
        self.history.push(PhaseRecord {
            phase: MigrationPhase::Aborted,
            at: Utc::now(),
            error,
        });
        self.lock = None;

        if let Some((info, backend)) = self.imported.take() {
            if let Err(err) = backend.close() {
                warn!(model = info.uuid(), error = %err, "Failed to close imported backend");
            }
            warn!(
                model = info.uuid(),
                "Target still holds the imported model; discard it before retrying"
            );
        }
        info!(migration = %self.id, model = %self.model_uuid, "Migration aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = MigrationPhase::NotStarted;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(phase.can_transition_to(next));
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(phase, MigrationPhase::Finalized);
    }

    #[test]
    fn test_abort_allowed_only_from_live_phases() {
        assert!(MigrationPhase::Imported.can_transition_to(MigrationPhase::Aborted));
        assert!(!MigrationPhase::Finalized.can_transition_to(MigrationPhase::Aborted));
        assert!(!MigrationPhase::Aborted.can_transition_to(MigrationPhase::Aborted));
        assert!(!MigrationPhase::Prechecked.can_transition_to(MigrationPhase::Imported));
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&MigrationPhase::BinariesUploaded).unwrap();
        assert_eq!(json, "\"binaries_uploaded\"");
        assert_eq!(MigrationPhase::BinariesUploaded.to_string(), "upload-binaries");
    }

    #[test]
    fn test_checkpoint_json_round_trip() {
        let checkpoint = MigrationCheckpoint {
            migration_id: "mig-1".into(),
            model_uuid: "m-1".into(),
            phase: MigrationPhase::Exported,
            payload: Some("version: 1\nowner: admin\n".into()),
            identity: None,
            history: vec![PhaseRecord {
                phase: MigrationPhase::Prechecked,
                at: Utc::now(),
                error: None,
            }],
            created_at: Utc::now(),
        };

        let json = checkpoint.to_json().unwrap();
        assert_eq!(MigrationCheckpoint::from_json(&json).unwrap(), checkpoint);
        assert!(MigrationCheckpoint::from_json("{}").is_err());
    }
}
