//! Backend capabilities used by the migration core
//!
//! Every component depends on the narrowest capability it needs rather than
//! on a concrete store:
//!
//! - **Precheck** needs only [`PrecheckBackend`]
//! - **Export** needs the read-only walk in [`ExportBackend`]
//! - **Import** needs the write capability in [`ImportTarget`] / [`ImportSession`]
//! - **Binary transfer** reads from [`UploadBackend`] and writes through the
//!   [`ToolsUploader`] and [`CharmUploader`] bound to a [`TargetConnection`]
//! - **Finalize** marks the source through [`SourceControl`]
//!
//! [`memory`] provides an in-memory controller implementing all of them.

pub mod memory;
pub mod records;

use async_trait::async_trait;
use model_description::{AgentTools, Binary, CharmUrl, Relation};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use records::{ApplicationRecord, CharmRecord, MachineRecord, ModelInfo, UnitRecord};

/// Result type for backend capability calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Stream of binary artifact content
pub type BinaryStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors raised by backend capabilities
#[derive(Error, Debug)]
pub enum BackendError {
    /// Requested entity or artifact does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Entity already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Entity or request rejected by the backend
    #[error("{0}")]
    Invalid(String),

    /// Backend could not be reached or failed transiently
    #[error("{0}")]
    Unavailable(String),

    /// Handle was closed by its owner
    #[error("backend is closed")]
    Closed,

    /// Artifact content does not hash to the expected digest
    #[error("digest mismatch for {artifact}: expected {expected}, got {actual}")]
    DigestMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Artifact content has an unexpected length
    #[error("size mismatch for {artifact}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        artifact: String,
        expected: u64,
        actual: u64,
    },

    /// I/O error while streaming
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// True for failures that may succeed when the same call is repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_)
                | BackendError::Io(_)
                | BackendError::DigestMismatch { .. }
                | BackendError::SizeMismatch { .. }
        )
    }
}

/// Handle to a model backend owned by the caller
pub trait BackendHandle: Send + Sync {
    /// Release the handle; later calls through it fail with [`BackendError::Closed`]
    fn close(&self) -> BackendResult<()>;
}

/// Source-side query run before anything is exported
#[async_trait]
pub trait PrecheckBackend: Send + Sync {
    /// Whether cleanup operations are still pending for the model
    async fn needs_cleanup(&self) -> BackendResult<bool>;
}

/// Read-only walk over live source state
#[async_trait]
pub trait ExportBackend: Send + Sync {
    async fn model_info(&self) -> BackendResult<ModelInfo>;

    /// Machines and containers, flat; containers name their parent
    async fn machines(&self) -> BackendResult<Vec<MachineRecord>>;

    async fn applications(&self) -> BackendResult<Vec<ApplicationRecord>>;

    async fn units(&self) -> BackendResult<Vec<UnitRecord>>;

    async fn relations(&self) -> BackendResult<Vec<Relation>>;
}

/// Target able to allocate a fresh model from a description
#[async_trait]
pub trait ImportTarget: Send + Sync {
    type Session: ImportSession;

    /// Start building a new model in a fresh identity space
    ///
    /// Nothing written through the session is visible until it commits, and
    /// dropping a session discards everything it staged.
    async fn begin_import(&self, info: &ModelInfo) -> BackendResult<Self::Session>;
}

/// Entity-by-entity construction of an imported model
///
/// Callers add parents before children: machines before their containers,
/// applications before their units, and applications before relations.
#[async_trait]
pub trait ImportSession: Send {
    type Backend: BackendHandle;

    async fn add_machine(&mut self, machine: MachineRecord) -> BackendResult<()>;

    async fn add_application(&mut self, application: ApplicationRecord) -> BackendResult<()>;

    async fn add_unit(&mut self, unit: UnitRecord) -> BackendResult<()>;

    async fn add_relation(&mut self, relation: Relation) -> BackendResult<()>;

    /// Publish the staged model and hand back its backend
    async fn commit(self) -> BackendResult<(ModelInfo, Self::Backend)>;
}

/// Source-side storage of binary artifacts
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Open the stored agent tools for a version
    async fn open_tools(&self, version: &Binary) -> BackendResult<BinaryStream>;

    /// Look up the charm record for a locator
    async fn charm(&self, url: &CharmUrl) -> BackendResult<CharmRecord>;

    /// Open a stored charm archive by storage path
    async fn open_charm(&self, storage_path: &str) -> BackendResult<BinaryStream>;
}

/// Writes agent tools into the target controller
#[async_trait]
pub trait ToolsUploader: Send + Sync {
    /// Store the binary for `tools.version`
    ///
    /// Implementations must store nothing unless the whole stream was read,
    /// and must accept a version that is already present.
    async fn upload_tools(&self, tools: &AgentTools, content: BinaryStream) -> BackendResult<()>;
}

/// Writes charm archives into the target controller
#[async_trait]
pub trait CharmUploader: Send + Sync {
    /// Store a charm archive, returning the locator the target recorded it under
    async fn upload_charm(&self, url: &CharmUrl, content: BinaryStream) -> BackendResult<CharmUrl>;
}

/// Opaque connection to the target controller
#[async_trait]
pub trait TargetConnection: Send + Sync {
    /// Identity of the target controller
    fn controller_uuid(&self) -> String;

    /// Hand a serialized description to the target, returning the sha256 of
    /// the payload as the target received it
    async fn transmit(&self, model_uuid: &str, payload: &[u8]) -> BackendResult<String>;

    fn tools_uploader(&self, model_uuid: &str) -> Arc<dyn ToolsUploader>;

    fn charm_uploader(&self, model_uuid: &str) -> Arc<dyn CharmUploader>;
}

/// Source-side control used once a migration has completed
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Mark the source model as migrated away and read-only
    async fn mark_migrated(&self, target_controller: &str) -> BackendResult<()>;
}

/// Everything the orchestrator needs from the source backend
pub trait SourceBackend: PrecheckBackend + ExportBackend + UploadBackend + SourceControl {}

impl<T> SourceBackend for T where T: PrecheckBackend + ExportBackend + UploadBackend + SourceControl {}
