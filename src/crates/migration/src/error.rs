//! Error types for model migration

use crate::backend::BackendError;
use crate::workflow::MigrationPhase;
use model_description::{Binary, CharmUrl, DescriptionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Broad classification used to decide how a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input was rejected before anything was written
    Validation,
    /// A precondition for migrating does not hold
    Policy,
    /// The same call may succeed if repeated
    Transient,
    /// Import stopped after some entities were staged
    PartialImport,
    /// The source is inconsistent or the caller misused the API
    Internal,
}

/// Errors that can occur while migrating a model
#[derive(Error, Debug)]
pub enum MigrationError {
    /// The cleanup query itself failed
    #[error("precheck cleanups: {0}")]
    PrecheckQuery(#[source] BackendError),

    /// Pending cleanups block the migration
    #[error("precheck failed: cleanup needed")]
    CleanupNeeded,

    /// Reading live source state failed
    #[error("reading source model: {0}")]
    SourceRead(#[source] BackendError),

    /// Live source state breaks a model invariant
    #[error("{0}")]
    InvariantViolation(String),

    /// An exported description could not be encoded
    #[error("encoding description: {0}")]
    Export(#[source] DescriptionError),

    /// A payload failed to parse or validate
    #[error(transparent)]
    Description(#[from] DescriptionError),

    /// The target refused the model before anything was staged
    #[error("import {entity}: {source}")]
    ModelRejected {
        entity: String,
        #[source]
        source: BackendError,
    },

    /// The target rejected an entity during import
    #[error("import {entity}: {source}")]
    Import {
        entity: String,
        #[source]
        source: BackendError,
    },

    #[error("cannot read tools {version}: {source}")]
    ToolsRead {
        version: Binary,
        #[source]
        source: BackendError,
    },

    #[error("cannot upload tools {version}: {source}")]
    ToolsUpload {
        version: Binary,
        #[source]
        source: BackendError,
    },

    #[error("cannot read charm {url}: {source}")]
    CharmRead {
        url: CharmUrl,
        #[source]
        source: BackendError,
    },

    #[error("cannot upload charm {url}: {source}")]
    CharmUpload {
        url: CharmUrl,
        #[source]
        source: BackendError,
    },

    /// The description did not reach the target intact
    #[error("transfer failed: {0}")]
    Transfer(#[source] BackendError),

    #[error("transfer failed: target received digest {actual}, sent {expected}")]
    TransferDigest { expected: String, actual: String },

    #[error("finalize failed: {0}")]
    Finalize(#[source] BackendError),

    #[error("invalid migration transition from {from} to {to}")]
    InvalidTransition {
        from: MigrationPhase,
        to: MigrationPhase,
    },

    #[error("migration already in progress for model {0}")]
    AlreadyInProgress(String),

    /// A failure attributed to the phase it happened in
    #[error("migration phase {phase}: {source}")]
    Phase {
        phase: MigrationPhase,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// A saved checkpoint could not be encoded or decoded
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::PrecheckQuery(_)
            | MigrationError::SourceRead(_)
            | MigrationError::Transfer(_)
            | MigrationError::TransferDigest { .. }
            | MigrationError::Finalize(_) => ErrorKind::Transient,
            MigrationError::CleanupNeeded | MigrationError::AlreadyInProgress(_) => {
                ErrorKind::Policy
            }
            MigrationError::Description(_)
            | MigrationError::Config(_)
            | MigrationError::Checkpoint(_) => ErrorKind::Validation,
            MigrationError::Import { .. } => ErrorKind::PartialImport,
            MigrationError::ModelRejected { source, .. }
            | MigrationError::ToolsRead { source, .. }
            | MigrationError::ToolsUpload { source, .. }
            | MigrationError::CharmRead { source, .. }
            | MigrationError::CharmUpload { source, .. } => {
                if source.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Validation
                }
            }
            MigrationError::InvariantViolation(_)
            | MigrationError::Export(_)
            | MigrationError::InvalidTransition { .. } => ErrorKind::Internal,
            MigrationError::Phase { source, .. } => source.kind(),
        }
    }

    /// Whether repeating the failed step may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Phase the failure is attributed to, if it was raised by the orchestrator
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub(crate) fn in_phase(self, phase: MigrationPhase) -> Self {
        match self {
            err @ MigrationError::Phase { .. } => err,
            err => MigrationError::Phase {
                phase,
                source: Box::new(err),
            },
        }
    }
}
