//! Import of a serialized description into a target

use crate::backend::{
    ApplicationRecord, BackendError, ImportSession, ImportTarget, MachineRecord, ModelInfo,
    UnitRecord,
};
use crate::error::{MigrationError, Result};
use crate::logging::redact_config;
use model_description::{deserialize, Model};
use tracing::{debug, info};

/// Backend produced by importing into `T`
pub type ImportedBackend<T> = <<T as ImportTarget>::Session as ImportSession>::Backend;

/// Parse `bytes` and recreate the model it describes on `target`
///
/// Parsing and the target's acceptance of the model config run before
/// anything is written, so a rejection there leaves the target untouched and
/// is reported as [`MigrationError::ModelRejected`]. If an entity is rejected
/// after that, the staged model is discarded and the error names the entity.
pub async fn import_model<T>(target: &T, bytes: &[u8]) -> Result<(ModelInfo, ImportedBackend<T>)>
where
    T: ImportTarget,
{
    let model = deserialize(bytes)?;
    import_description(target, &model).await
}

/// Recreate an already-parsed description on `target`
pub async fn import_description<T>(
    target: &T,
    model: &Model,
) -> Result<(ModelInfo, ImportedBackend<T>)>
where
    T: ImportTarget,
{
    let info =
        ModelInfo::from_description(model).map_err(|source| MigrationError::ModelRejected {
            entity: "model config".into(),
            source,
        })?;
    let model_entity = format!("model {:?}", info.uuid());
    debug!(
        model = info.uuid(),
        config = ?redact_config(&info.config),
        "Starting import"
    );

    let mut session = target
        .begin_import(&info)
        .await
        .map_err(|source| MigrationError::ModelRejected {
            entity: model_entity.clone(),
            source,
        })?;

    for (parent, machine) in model.all_machines() {
        let entity = format!("machine {:?}", machine.id());
        session
            .add_machine(MachineRecord::from_description(parent, machine))
            .await
            .map_err(import_error(&entity))?;
    }

    for application in model.applications() {
        let entity = format!("application {:?}", application.name());
        session
            .add_application(ApplicationRecord::from_description(application))
            .await
            .map_err(import_error(&entity))?;
    }

    for application in model.applications() {
        for unit in application.units() {
            let entity = format!("unit {:?}", unit.name());
            session
                .add_unit(UnitRecord::from_description(application.name(), unit))
                .await
                .map_err(import_error(&entity))?;
        }
    }

    for relation in model.relations() {
        let entity = format!("relation {:?}", relation.key);
        session
            .add_relation(relation.clone())
            .await
            .map_err(import_error(&entity))?;
    }

    let (info, backend) = session.commit().await.map_err(import_error(&model_entity))?;
    info!(model = info.uuid(), name = info.name(), "Imported model");
    Ok((info, backend))
}

fn import_error(entity: &str) -> impl Fn(BackendError) -> MigrationError + '_ {
    move |source| MigrationError::Import {
        entity: entity.to_string(),
        source,
    }
}
