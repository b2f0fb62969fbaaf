//! Export of live source state into a serialized description

use crate::backend::{ExportBackend, MachineRecord, UnitRecord};
use crate::error::{MigrationError, Result};
use crate::logging::format_bytes;
use model_description::{
    serialize, ApplicationArgs, Machine, MachineArgs, Model, ModelArgs, UnitArgs,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Walk the source backend and return the serialized description
///
/// The backend is only read. Source state that violates a model invariant is
/// reported as [`MigrationError::InvariantViolation`] and never produces a
/// partial payload.
pub async fn export_model<B>(backend: &B) -> Result<Vec<u8>>
where
    B: ExportBackend + ?Sized,
{
    let model = export_description(backend).await?;
    let bytes = serialize(&model).map_err(MigrationError::Export)?;
    info!(
        model = model.uuid().unwrap_or_default(),
        size = %format_bytes(bytes.len() as u64),
        "Exported model"
    );
    Ok(bytes)
}

/// Build the in-memory description of the source model
pub async fn export_description<B>(backend: &B) -> Result<Model>
where
    B: ExportBackend + ?Sized,
{
    let info = backend.model_info().await.map_err(MigrationError::SourceRead)?;
    let machines = backend.machines().await.map_err(MigrationError::SourceRead)?;
    let applications = backend
        .applications()
        .await
        .map_err(MigrationError::SourceRead)?;
    let units = backend.units().await.map_err(MigrationError::SourceRead)?;
    let relations = backend
        .relations()
        .await
        .map_err(MigrationError::SourceRead)?;

    let mut model = Model::new(ModelArgs {
        owner: info.owner,
        config: info.config,
    });
    model.set_annotations(info.annotations);

    add_machines(&mut model, machines)?;

    let mut units_by_app: BTreeMap<String, Vec<UnitRecord>> = BTreeMap::new();
    for unit in units {
        units_by_app
            .entry(unit.application.clone())
            .or_default()
            .push(unit);
    }

    for record in applications {
        let mut args = ApplicationArgs::new(&record.name);
        args.series = record.series;
        args.charm_url = record.charm_url;
        args.settings = record.settings;

        let application = model.add_application(args);
        application.set_annotations(record.annotations);

        let mut units = units_by_app.remove(&record.name).unwrap_or_default();
        units.sort_by_key(UnitRecord::number);
        for unit in units {
            let mut args = UnitArgs::new(&unit.name);
            args.machine = unit.machine;
            let added = application.add_unit(args);
            if let Some(tools) = unit.tools {
                added.set_tools(tools);
            }
            added.set_annotations(unit.annotations);
        }
    }

    if let Some((application, units)) = units_by_app.into_iter().next() {
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        return Err(MigrationError::InvariantViolation(format!(
            "units {} belong to unknown application {:?}",
            names.join(", "),
            application
        )));
    }

    for relation in relations {
        model.add_relation(relation);
    }

    model
        .validate()
        .map_err(|e| MigrationError::InvariantViolation(e.to_string()))?;

    debug!(
        machines = model.all_machines().len(),
        applications = model.applications().len(),
        relations = model.relations().len(),
        "Built model description"
    );
    Ok(model)
}

/// Nest containers under their parents
fn add_machines(model: &mut Model, machines: Vec<MachineRecord>) -> Result<()> {
    let mut children: BTreeMap<String, Vec<MachineRecord>> = BTreeMap::new();
    let mut top_level = Vec::new();
    for record in machines {
        match record.parent.clone() {
            Some(parent) => children.entry(parent).or_default().push(record),
            None => top_level.push(record),
        }
    }

    for record in top_level {
        let id = record.id.clone();
        let machine = model.add_machine(machine_args(&record));
        fill_machine(machine, record);
        attach_containers(machine, &id, &mut children);
    }

    if let Some((parent, orphans)) = children.into_iter().next() {
        let ids: Vec<_> = orphans.iter().map(|m| m.id.as_str()).collect();
        return Err(MigrationError::InvariantViolation(format!(
            "containers {} have unknown parent machine {:?}",
            ids.join(", "),
            parent
        )));
    }
    Ok(())
}

fn attach_containers(
    machine: &mut Machine,
    id: &str,
    children: &mut BTreeMap<String, Vec<MachineRecord>>,
) {
    let Some(containers) = children.remove(id) else {
        return;
    };
    for record in containers {
        let child_id = record.id.clone();
        let container = machine.add_container(machine_args(&record));
        fill_machine(container, record);
        attach_containers(container, &child_id, children);
    }
}

fn machine_args(record: &MachineRecord) -> MachineArgs {
    MachineArgs {
        id: record.id.clone(),
        series: record.series.clone(),
    }
}

fn fill_machine(machine: &mut Machine, record: MachineRecord) {
    if let Some(tools) = record.tools {
        machine.set_tools(tools);
    }
    machine.set_annotations(record.annotations);
}
