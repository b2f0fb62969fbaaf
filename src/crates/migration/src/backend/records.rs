//! Flat entity records exchanged with backends
//!
//! Backends see entities one at a time: containers name their parent and
//! units name their application. The nested shape lives only in the
//! description.

use super::{BackendError, BackendResult};
use model_description::{
    AgentTools, Annotations, Application, Attributes, CharmUrl, Machine, Model, Unit, NAME_KEY,
    UUID_KEY,
};
use serde::{Deserialize, Serialize};

/// Configuration attributes that never travel with a model
const DISALLOWED_ATTRIBUTES: &[&str] = &["admin-secret", "ca-private-key"];

/// Attributes owned by the controller rather than any one model
const CONTROLLER_ONLY_ATTRIBUTES: &[&str] = &[
    "api-port",
    "state-port",
    "ca-cert",
    "controller-uuid",
    "set-numa-control-policy",
];

/// Model-level identity, owner, configuration, and annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub owner: String,
    pub config: Attributes,
    #[serde(default)]
    pub annotations: Annotations,
}

impl ModelInfo {
    /// Build model info, enforcing the configuration rules a new model must meet
    pub fn new(
        owner: impl Into<String>,
        config: Attributes,
        annotations: Annotations,
    ) -> BackendResult<Self> {
        let info = Self {
            owner: owner.into(),
            config,
            annotations,
        };
        info.check_config()?;
        Ok(info)
    }

    pub fn from_description(model: &Model) -> BackendResult<Self> {
        Self::new(
            model.owner(),
            model.config().clone(),
            model.annotations().clone(),
        )
    }

    pub fn name(&self) -> &str {
        self.config
            .get(NAME_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    pub fn uuid(&self) -> &str {
        self.config
            .get(UUID_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    fn check_config(&self) -> BackendResult<()> {
        if self.owner.is_empty() {
            return Err(BackendError::Invalid("model owner is empty".into()));
        }
        for key in [NAME_KEY, UUID_KEY] {
            match self.config.get(key).and_then(|v| v.as_str()) {
                Some(value) if !value.is_empty() => {}
                _ => {
                    return Err(BackendError::Invalid(format!(
                        "model config missing required attribute {:?}",
                        key
                    )))
                }
            }
        }
        for key in DISALLOWED_ATTRIBUTES {
            if self.config.contains_key(*key) {
                return Err(BackendError::Invalid(format!(
                    "attribute {:?} is not allowed in model config",
                    key
                )));
            }
        }
        for key in CONTROLLER_ONLY_ATTRIBUTES {
            if self.config.contains_key(*key) {
                return Err(BackendError::Invalid(format!(
                    "attribute {:?} belongs to the controller, not the model",
                    key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub id: String,
    /// Set for containers
    pub parent: Option<String>,
    pub series: Option<String>,
    pub tools: Option<AgentTools>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl MachineRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            series: None,
            tools: None,
            annotations: Annotations::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn with_tools(mut self, tools: AgentTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn from_description(parent: Option<&str>, machine: &Machine) -> Self {
        Self {
            id: machine.id().to_string(),
            parent: parent.map(str::to_string),
            series: machine.series().map(str::to_string),
            tools: machine.tools().cloned(),
            annotations: machine.annotations().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub name: String,
    pub series: Option<String>,
    pub charm_url: Option<CharmUrl>,
    #[serde(default)]
    pub settings: Attributes,
    #[serde(default)]
    pub annotations: Annotations,
}

impl ApplicationRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: None,
            charm_url: None,
            settings: Attributes::new(),
            annotations: Annotations::new(),
        }
    }

    pub fn with_charm(mut self, url: CharmUrl) -> Self {
        self.charm_url = Some(url);
        self
    }

    pub fn from_description(application: &Application) -> Self {
        Self {
            name: application.name().to_string(),
            series: application.series().map(str::to_string),
            charm_url: application.charm_url().cloned(),
            settings: application.settings().clone(),
            annotations: application.annotations().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub name: String,
    pub application: String,
    pub machine: Option<String>,
    pub tools: Option<AgentTools>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl UnitRecord {
    /// A unit record; the application is taken from the unit name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let application = name
            .split_once('/')
            .map(|(app, _)| app.to_string())
            .unwrap_or_else(|| name.clone());
        Self {
            name,
            application,
            machine: None,
            tools: None,
            annotations: Annotations::new(),
        }
    }

    pub fn on_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    pub fn with_tools(mut self, tools: AgentTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn from_description(application: &str, unit: &Unit) -> Self {
        Self {
            name: unit.name().to_string(),
            application: application.to_string(),
            machine: unit.machine().map(str::to_string),
            tools: unit.tools().cloned(),
            annotations: unit.annotations().clone(),
        }
    }

    /// Position of the unit within its application (`3` for `magic/3`)
    pub fn number(&self) -> u32 {
        self.name
            .rsplit_once('/')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(u32::MAX)
    }
}

/// Stored charm known to a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharmRecord {
    pub url: CharmUrl,
    /// Where the archive lives in controller storage; unset while a charm is
    /// still pending upload
    pub storage_path: Option<String>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
}
