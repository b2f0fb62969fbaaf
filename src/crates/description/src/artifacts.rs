//! Binary artifacts referenced by a description
//!
//! The description never embeds binaries. Instead machines, containers, and
//! units name the agent tools they run and applications name their charm;
//! those identities are the keys used to copy artifacts between controllers.
//! Many entities may reference the same artifact, so enumeration is always
//! deduplicated by identity.

use crate::charm::CharmUrl;
use crate::model::{AgentTools, Application, Machine, Model, Unit};
use crate::version::Binary;
use std::collections::BTreeSet;
use std::fmt;

/// Kind of binary artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    AgentTools,
    Charm,
}

/// A (kind, identity) reference to a binary artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactRef {
    AgentTools(Binary),
    Charm(CharmUrl),
}

impl ArtifactRef {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactRef::AgentTools(_) => ArtifactKind::AgentTools,
            ArtifactRef::Charm(_) => ArtifactKind::Charm,
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::AgentTools(version) => write!(f, "tools {}", version),
            ArtifactRef::Charm(url) => write!(f, "charm {}", url),
        }
    }
}

/// Entities that reference binary artifacts
pub trait ReferencesArtifacts {
    /// Artifacts referenced directly by this entity (not by its children)
    fn artifacts(&self) -> Vec<ArtifactRef>;
}

impl ReferencesArtifacts for Machine {
    fn artifacts(&self) -> Vec<ArtifactRef> {
        self.tools()
            .map(|t| ArtifactRef::AgentTools(t.version.clone()))
            .into_iter()
            .collect()
    }
}

impl ReferencesArtifacts for Unit {
    fn artifacts(&self) -> Vec<ArtifactRef> {
        self.tools()
            .map(|t| ArtifactRef::AgentTools(t.version.clone()))
            .into_iter()
            .collect()
    }
}

impl ReferencesArtifacts for Application {
    fn artifacts(&self) -> Vec<ArtifactRef> {
        self.charm_url()
            .map(|url| ArtifactRef::Charm(url.clone()))
            .into_iter()
            .collect()
    }
}

impl Model {
    /// Every distinct artifact referenced anywhere in the model
    pub fn artifacts(&self) -> BTreeSet<ArtifactRef> {
        let mut refs = BTreeSet::new();
        for (_, machine) in self.all_machines() {
            refs.extend(machine.artifacts());
        }
        for application in self.applications() {
            refs.extend(application.artifacts());
            for unit in application.units() {
                refs.extend(unit.artifacts());
            }
        }
        refs
    }

    /// Distinct agent tools versions bound to machines, containers, and units
    pub fn tools_versions(&self) -> BTreeSet<Binary> {
        self.artifacts()
            .into_iter()
            .filter_map(|r| match r {
                ArtifactRef::AgentTools(version) => Some(version),
                ArtifactRef::Charm(_) => None,
            })
            .collect()
    }

    /// Distinct charm locators used by applications
    pub fn charm_urls(&self) -> BTreeSet<CharmUrl> {
        self.artifacts()
            .into_iter()
            .filter_map(|r| match r {
                ArtifactRef::Charm(url) => Some(url),
                ArtifactRef::AgentTools(_) => None,
            })
            .collect()
    }

    /// First tools record bound to the given version
    ///
    /// Records for the same version are expected to agree; the first one
    /// found (machines before units) carries the size and digest used to
    /// verify the transferred binary.
    pub fn tools_for(&self, version: &Binary) -> Option<&AgentTools> {
        let machines = self.all_machines().into_iter().filter_map(|(_, m)| m.tools());
        let units = self
            .applications()
            .iter()
            .flat_map(|a| a.units())
            .filter_map(|u| u.tools());
        machines.chain(units).find(|t| &t.version == version)
    }
}
