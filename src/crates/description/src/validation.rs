//! Referential validation of a description
//!
//! Every reference inside a description must resolve to another entity in the
//! same description: units to their application and machine, containers to
//! their parent machine, relation endpoints to applications.

use crate::error::{DescriptionError, Result};
use crate::model::Model;
use std::collections::HashSet;

impl Model {
    /// Check the description for dangling references and duplicate identities
    pub fn validate(&self) -> Result<()> {
        if self.owner().is_empty() {
            return Err(invalid("model has no owner"));
        }

        let mut machine_ids = HashSet::new();
        for (parent, machine) in self.all_machines() {
            let id = machine.id();
            if id.is_empty() {
                return Err(invalid("machine with empty id"));
            }
            if let Some(parent) = parent {
                let prefix = format!("{}/", parent);
                if !id.starts_with(&prefix) {
                    return Err(invalid(format!(
                        "container {:?} is not nested under machine {:?}",
                        id, parent
                    )));
                }
            }
            if !machine_ids.insert(id) {
                return Err(invalid(format!("duplicate machine {:?}", id)));
            }
        }

        let mut application_names = HashSet::new();
        let mut unit_names = HashSet::new();
        for application in self.applications() {
            let name = application.name();
            if name.is_empty() {
                return Err(invalid("application with empty name"));
            }
            if !application_names.insert(name) {
                return Err(invalid(format!("duplicate application {:?}", name)));
            }

            for unit in application.units() {
                let unit_name = unit.name();
                let well_formed = unit_name
                    .split_once('/')
                    .map(|(app, n)| app == name && !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false);
                if !well_formed {
                    return Err(invalid(format!(
                        "unit {:?} does not belong to application {:?}",
                        unit_name, name
                    )));
                }
                if !unit_names.insert(unit_name) {
                    return Err(invalid(format!("duplicate unit {:?}", unit_name)));
                }
                if let Some(machine) = unit.machine() {
                    if !machine_ids.contains(machine) {
                        return Err(invalid(format!(
                            "unit {:?} is assigned to unknown machine {:?}",
                            unit_name, machine
                        )));
                    }
                }
            }
        }

        let mut relation_ids = HashSet::new();
        for relation in self.relations() {
            if !relation_ids.insert(relation.id) {
                return Err(invalid(format!("duplicate relation {}", relation.id)));
            }
            if relation.endpoints.is_empty() {
                return Err(invalid(format!("relation {} has no endpoints", relation.id)));
            }
            for endpoint in &relation.endpoints {
                if !application_names.contains(endpoint.application.as_str()) {
                    return Err(invalid(format!(
                        "relation {:?} references unknown application {:?}",
                        relation.key, endpoint.application
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> DescriptionError {
    DescriptionError::Invalid(msg.into())
}
