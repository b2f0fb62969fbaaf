//! # model-migration - Moving Models Between Controllers
//!
//! **Precheck, export, import, and binary transfer** for migrating a running
//! model from one controller to another.
//!
//! ## Overview
//!
//! A migration reads live state from a source backend, encodes it as a
//! portable [`Model`](model_description::Model) description, recreates it on
//! a target controller, and copies the agent tools and charm archives the
//! description references:
//!
//! - [`precheck`] refuses models with pending cleanups
//! - [`export_model`] walks the source read-only and serializes it
//! - [`import_model`] parses a payload and rebuilds every entity on a target
//! - [`upload_binaries`] streams each distinct tools version and charm once
//! - [`Migration`] sequences the phases, retries transient failures, and
//!   aborts on anything else
//!
//! Every component depends on a narrow capability trait from [`backend`]
//! rather than a concrete store. [`backend::memory`] implements all of them
//! in memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use model_migration::backend::memory::Controller;
//! use model_migration::{assemble_migration, MigrationLocks, MigrationSettings};
//!
//! # async fn example(source: Controller, target: Controller) -> model_migration::Result<()> {
//! let locks = MigrationLocks::new();
//! let mut migration = assemble_migration(
//!     &source,
//!     "deadbeef-0bad-400d-8000-4b1d0d06f00d",
//!     &target,
//!     MigrationSettings::load(None)?,
//!     &locks,
//! )
//! .await?;
//!
//! migration.run().await?;
//! println!("imported {:?}", migration.imported_model());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`MigrationError`]. [`MigrationError::kind`] sorts
//! failures into validation, policy, transient, partial-import, and internal
//! errors; only transient ones are worth retrying.

pub mod assembly;
pub mod backend;
pub mod binaries;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod locks;
pub mod logging;
pub mod precheck;
pub mod retry;
pub mod workflow;

pub use assembly::{assemble_migration, MemoryMigration};
pub use backend::{BackendError, BackendResult, BinaryStream};
pub use binaries::{get_charm_storage_path, upload_binaries, UploadBinariesConfig, UploadSummary};
pub use config::MigrationSettings;
pub use error::{ErrorKind, MigrationError, Result};
pub use export::{export_description, export_model};
pub use import::{import_description, import_model, ImportedBackend};
pub use locks::{MigrationLockGuard, MigrationLocks};
pub use precheck::precheck;
pub use retry::RetryPolicy;
pub use workflow::{Migration, MigrationCheckpoint, MigrationPhase, ModelIdentity, PhaseRecord};
