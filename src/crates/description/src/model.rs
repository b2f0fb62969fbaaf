//! The portable model description
//!
//! A [`Model`] is a snapshot of one model's topology: its owner and
//! configuration, the machines (with nested containers) it runs on, the
//! applications and their units, the relations between applications, and the
//! agent tools bound to every machine, container, and unit.
//!
//! Descriptions are built once from live state and are immutable afterwards,
//! except for [`Model::update_config`], which rewrites identity-sensitive
//! attributes (name, uuid) before a description is imported elsewhere.

use crate::charm::CharmUrl;
use crate::version::Binary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current description format version
pub const CURRENT_VERSION: u32 = 1;

/// Model configuration or application settings
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Free-form key/value annotations attached to an entity
pub type Annotations = BTreeMap<String, String>;

/// Configuration key holding the model name
pub const NAME_KEY: &str = "name";

/// Configuration key holding the model uuid
pub const UUID_KEY: &str = "uuid";

/// Arguments for [`Model::new`]
#[derive(Debug, Clone, Default)]
pub struct ModelArgs {
    pub owner: String,
    pub config: Attributes,
}

impl ModelArgs {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            config: Attributes::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Snapshot of a model's entire topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Model {
    pub(crate) version: u32,
    owner: String,
    #[serde(default)]
    config: Attributes,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    machines: Vec<Machine>,
    #[serde(default, alias = "services", skip_serializing_if = "Vec::is_empty")]
    applications: Vec<Application>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    relations: Vec<Relation>,
}

impl Model {
    /// Create an empty model description
    pub fn new(args: ModelArgs) -> Self {
        Self {
            version: CURRENT_VERSION,
            owner: args.owner,
            config: args.config,
            annotations: Annotations::new(),
            machines: Vec::new(),
            applications: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Format version this description was written with
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &Attributes {
        &self.config
    }

    /// Model name from the configuration, if set
    pub fn name(&self) -> Option<&str> {
        self.config.get(NAME_KEY).and_then(|v| v.as_str())
    }

    /// Model uuid from the configuration, if set
    pub fn uuid(&self) -> Option<&str> {
        self.config.get(UUID_KEY).and_then(|v| v.as_str())
    }

    /// Overwrite configuration attributes
    ///
    /// This is the only mutation allowed once a description has been built;
    /// it exists so that identity attributes can be rewritten before import.
    pub fn update_config<I, K>(&mut self, attrs: I)
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (key, value) in attrs {
            self.config.insert(key.into(), value);
        }
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
    }

    /// Top-level machines; containers hang off their parents
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// Every machine and container, parents before their children
    ///
    /// Each entry carries the id of the parent machine for containers.
    pub fn all_machines(&self) -> Vec<(Option<&str>, &Machine)> {
        fn walk<'a>(
            parent: Option<&'a str>,
            machine: &'a Machine,
            out: &mut Vec<(Option<&'a str>, &'a Machine)>,
        ) {
            out.push((parent, machine));
            for container in &machine.containers {
                walk(Some(&machine.id), container, out);
            }
        }

        let mut out = Vec::new();
        for machine in &self.machines {
            walk(None, machine, &mut out);
        }
        out
    }

    pub fn add_machine(&mut self, args: MachineArgs) -> &mut Machine {
        let idx = self.machines.len();
        self.machines.push(Machine::new(args));
        &mut self.machines[idx]
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    pub fn add_application(&mut self, args: ApplicationArgs) -> &mut Application {
        let idx = self.applications.len();
        self.applications.push(Application::new(args));
        &mut self.applications[idx]
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    /// True when the model holds nothing beyond owner and configuration
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.applications.is_empty() && self.relations.is_empty()
    }
}

/// Agent tools bound to a machine, container, or unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct AgentTools {
    #[serde(alias = "tools-version")]
    pub version: Binary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AgentTools {
    pub fn new(version: Binary) -> Self {
        Self {
            version,
            url: None,
            sha256: None,
            size: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Arguments for adding a machine or container
#[derive(Debug, Clone, Default)]
pub struct MachineArgs {
    pub id: String,
    pub series: Option<String>,
}

impl MachineArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            series: None,
        }
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }
}

/// A machine, or a container nested inside one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Machine {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<AgentTools>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    containers: Vec<Machine>,
}

impl Machine {
    fn new(args: MachineArgs) -> Self {
        Self {
            id: args.id,
            series: args.series,
            tools: None,
            annotations: Annotations::new(),
            containers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn tools(&self) -> Option<&AgentTools> {
        self.tools.as_ref()
    }

    pub fn set_tools(&mut self, tools: AgentTools) {
        self.tools = Some(tools);
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
    }

    pub fn containers(&self) -> &[Machine] {
        &self.containers
    }

    pub fn add_container(&mut self, args: MachineArgs) -> &mut Machine {
        let idx = self.containers.len();
        self.containers.push(Machine::new(args));
        &mut self.containers[idx]
    }
}

/// Arguments for adding an application
#[derive(Debug, Clone, Default)]
pub struct ApplicationArgs {
    pub name: String,
    pub series: Option<String>,
    pub charm_url: Option<CharmUrl>,
    pub settings: Attributes,
}

impl ApplicationArgs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_charm(mut self, charm_url: CharmUrl) -> Self {
        self.charm_url = Some(charm_url);
        self
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

/// An application and the units running it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Application {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    series: Option<String>,
    #[serde(default, alias = "charm", skip_serializing_if = "Option::is_none")]
    charm_url: Option<CharmUrl>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    settings: Attributes,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    units: Vec<Unit>,
}

impl Application {
    fn new(args: ApplicationArgs) -> Self {
        Self {
            name: args.name,
            series: args.series,
            charm_url: args.charm_url,
            settings: args.settings,
            annotations: Annotations::new(),
            units: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn charm_url(&self) -> Option<&CharmUrl> {
        self.charm_url.as_ref()
    }

    pub fn settings(&self) -> &Attributes {
        &self.settings
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn add_unit(&mut self, args: UnitArgs) -> &mut Unit {
        let idx = self.units.len();
        self.units.push(Unit::new(args));
        &mut self.units[idx]
    }
}

/// Arguments for adding a unit
#[derive(Debug, Clone, Default)]
pub struct UnitArgs {
    pub name: String,
    pub machine: Option<String>,
}

impl UnitArgs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            machine: None,
        }
    }

    pub fn on_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }
}

/// A unit of an application, optionally assigned to a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Unit {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<AgentTools>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
}

impl Unit {
    fn new(args: UnitArgs) -> Self {
        Self {
            name: args.name,
            machine: args.machine,
            tools: None,
            annotations: Annotations::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application name encoded in the unit name (`magic` for `magic/0`)
    pub fn application_name(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(app, _)| app)
            .unwrap_or(&self.name)
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    pub fn tools(&self) -> Option<&AgentTools> {
        self.tools.as_ref()
    }

    pub fn set_tools(&mut self, tools: AgentTools) {
        self.tools = Some(tools);
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
    }
}

/// Role an endpoint plays in a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Provider,
    Requirer,
    Peer,
}

/// One side of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Endpoint {
    #[serde(alias = "service")]
    pub application: String,
    pub name: String,
    pub role: Role,
}

impl Endpoint {
    pub fn new(application: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            application: application.into(),
            name: name.into(),
            role,
        }
    }
}

/// A relation between application endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Relation {
    pub id: u32,
    pub key: String,
    pub endpoints: Vec<Endpoint>,
}

impl Relation {
    /// Build a relation whose key is derived from its endpoints
    pub fn new(id: u32, endpoints: Vec<Endpoint>) -> Self {
        let key = endpoints
            .iter()
            .map(|ep| format!("{}:{}", ep.application, ep.name))
            .collect::<Vec<_>>()
            .join(" ");
        Self { id, key, endpoints }
    }
}
