//! # model-description - Portable Model Descriptions
//!
//! **Serializable, backend-independent snapshots of a deployed model** used as
//! the payload when a model migrates between controllers.
//!
//! ## Overview
//!
//! A [`Model`] captures one model's topology at a point in time:
//!
//! - **Owner and configuration** - including the identity attributes `name`
//!   and `uuid`
//! - **Machines** - with containers nested under their parent machine
//! - **Applications and units** - units belong to exactly one application and
//!   may be assigned to a machine or container
//! - **Relations** - between application endpoints
//! - **Annotations** - on the model and on every entity
//! - **Agent tools** - the [`Binary`] version bound to each machine,
//!   container, and unit
//!
//! Binary identities ([`Binary`] versions and [`CharmUrl`] locators) are
//! opaque lookup keys; descriptions never carry binary payloads. Use
//! [`Model::artifacts`] to enumerate what has to be copied alongside a
//! description.
//!
//! ## Wire Format
//!
//! [`serialize`] and [`deserialize`] encode descriptions as versioned YAML.
//! Deserialization is the validation gate: unparseable payloads, unknown
//! fields, unsupported versions, and dangling references are all rejected
//! before a description reaches an importer.
//!
//! ```rust
//! use model_description::{deserialize, serialize, AgentTools, MachineArgs, Model, ModelArgs};
//!
//! let mut model = Model::new(ModelArgs::new("admin"));
//! model
//!     .add_machine(MachineArgs::new("0"))
//!     .set_tools(AgentTools::new("2.0.1-trusty-amd64".parse().unwrap()));
//!
//! let bytes = serialize(&model).unwrap();
//! let restored = deserialize(&bytes).unwrap();
//! assert_eq!(restored.tools_versions().len(), 1);
//! ```

pub mod artifacts;
pub mod charm;
pub mod error;
pub mod model;
pub mod serializer;
mod validation;
pub mod version;

pub use artifacts::{ArtifactKind, ArtifactRef, ReferencesArtifacts};
pub use charm::{CharmUrl, Schema};
pub use error::{DescriptionError, Result};
pub use model::{
    AgentTools, Annotations, Application, ApplicationArgs, Attributes, Endpoint, Machine,
    MachineArgs, Model, ModelArgs, Relation, Role, Unit, UnitArgs, CURRENT_VERSION, NAME_KEY,
    UUID_KEY,
};
pub use serializer::{deserialize, serialize};
pub use version::{Binary, Number};
