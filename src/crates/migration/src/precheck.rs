//! Gate run against the source before a migration starts

use crate::backend::PrecheckBackend;
use crate::error::{MigrationError, Result};
use tracing::{debug, info};

/// Check that the source model is in a state that can be migrated
///
/// A model with pending cleanups is refused; the caller should wait for the
/// cleanups to finish and try again. Only reads from the backend.
pub async fn precheck<B>(backend: &B) -> Result<()>
where
    B: PrecheckBackend + ?Sized,
{
    let needs_cleanup = backend
        .needs_cleanup()
        .await
        .map_err(MigrationError::PrecheckQuery)?;

    if needs_cleanup {
        info!("Source model has pending cleanups");
        return Err(MigrationError::CleanupNeeded);
    }

    debug!("Precheck passed");
    Ok(())
}
