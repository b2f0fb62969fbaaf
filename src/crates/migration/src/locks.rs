//! Registry ensuring one migration per model at a time

use crate::error::{MigrationError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Models with a migration in progress
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MigrationLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MigrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a model for migration until the guard is dropped
    pub fn acquire(&self, model_uuid: &str) -> Result<MigrationLockGuard> {
        let mut held = self.held.lock();
        if !held.insert(model_uuid.to_string()) {
            return Err(MigrationError::AlreadyInProgress(model_uuid.to_string()));
        }
        debug!(model = %model_uuid, "Acquired migration lock");
        Ok(MigrationLockGuard {
            held: self.held.clone(),
            model_uuid: model_uuid.to_string(),
        })
    }

    pub fn is_locked(&self, model_uuid: &str) -> bool {
        self.held.lock().contains(model_uuid)
    }
}

/// Releases the model's migration lock on drop
#[derive(Debug)]
pub struct MigrationLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    model_uuid: String,
}

impl MigrationLockGuard {
    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }
}

impl Drop for MigrationLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.model_uuid);
        debug!(model = %self.model_uuid, "Released migration lock");
    }
}
