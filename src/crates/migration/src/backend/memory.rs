//! In-memory controller backend
//!
//! Holds models, stored agent tools, and charm archives in process memory.
//! Suitable for tests and for rehearsing a migration; nothing survives the
//! process.
//!
//! # Example
//!
//! ```rust,no_run
//! use model_migration::backend::memory::Controller;
//! use model_migration::backend::ModelInfo;
//! use model_migration::backend::MachineRecord;
//! use model_description::Attributes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Controller::new();
//! let mut config = Attributes::new();
//! config.insert("name".into(), "default".into());
//! config.insert("uuid".into(), "deadbeef".into());
//!
//! let state = controller
//!     .create_model(ModelInfo::new("admin", config, Default::default())?)
//!     .await?;
//! state.add_machine(MachineRecord::new("0")).await?;
//! # Ok(())
//! # }
//! ```

use super::{
    ApplicationRecord, BackendError, BackendHandle, BackendResult, BinaryStream, CharmRecord,
    CharmUploader, ExportBackend, ImportSession, ImportTarget, MachineRecord, ModelInfo,
    PrecheckBackend, SourceControl, TargetConnection, ToolsUploader, UnitRecord, UploadBackend,
};
use async_trait::async_trait;
use model_description::{AgentTools, Annotations, Binary, CharmUrl, Relation};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stored state of one model
#[derive(Debug, Clone)]
struct ModelDoc {
    info: ModelInfo,
    machines: Vec<MachineRecord>,
    applications: Vec<ApplicationRecord>,
    units: Vec<UnitRecord>,
    relations: Vec<Relation>,
    tools: BTreeMap<Binary, Vec<u8>>,
    charms: BTreeMap<CharmUrl, CharmRecord>,
    pending_cleanups: usize,
    migrated_to: Option<String>,
}

impl ModelDoc {
    fn new(info: ModelInfo) -> Self {
        Self {
            info,
            machines: Vec::new(),
            applications: Vec::new(),
            units: Vec::new(),
            relations: Vec::new(),
            tools: BTreeMap::new(),
            charms: BTreeMap::new(),
            pending_cleanups: 0,
            migrated_to: None,
        }
    }

    fn uuid(&self) -> &str {
        self.info.uuid()
    }

    fn ensure_writable(&self) -> BackendResult<()> {
        match &self.migrated_to {
            Some(target) => Err(BackendError::Invalid(format!(
                "model {} has migrated to controller {} and is read-only",
                self.uuid(),
                target
            ))),
            None => Ok(()),
        }
    }

    fn has_machine(&self, id: &str) -> bool {
        self.machines.iter().any(|m| m.id == id)
    }

    fn has_application(&self, name: &str) -> bool {
        self.applications.iter().any(|a| a.name == name)
    }

    fn insert_machine(&mut self, machine: MachineRecord) -> BackendResult<()> {
        if machine.id.is_empty() {
            return Err(BackendError::Invalid("machine id is empty".into()));
        }
        if self.has_machine(&machine.id) {
            return Err(BackendError::AlreadyExists(format!("machine {}", machine.id)));
        }
        if let Some(parent) = &machine.parent {
            if !self.has_machine(parent) {
                return Err(BackendError::NotFound(format!("parent machine {}", parent)));
            }
            if !machine.id.starts_with(&format!("{}/", parent)) {
                return Err(BackendError::Invalid(format!(
                    "container {} is not nested under machine {}",
                    machine.id, parent
                )));
            }
        }
        self.machines.push(machine);
        Ok(())
    }

    fn insert_application(&mut self, application: ApplicationRecord) -> BackendResult<()> {
        if application.name.is_empty() {
            return Err(BackendError::Invalid("application name is empty".into()));
        }
        if self.has_application(&application.name) {
            return Err(BackendError::AlreadyExists(format!(
                "application {}",
                application.name
            )));
        }
        self.applications.push(application);
        Ok(())
    }

    fn insert_unit(&mut self, unit: UnitRecord) -> BackendResult<()> {
        if !self.has_application(&unit.application) {
            return Err(BackendError::NotFound(format!(
                "application {}",
                unit.application
            )));
        }
        let prefix = format!("{}/", unit.application);
        if !unit.name.starts_with(&prefix) {
            return Err(BackendError::Invalid(format!(
                "unit {} does not belong to application {}",
                unit.name, unit.application
            )));
        }
        if self.units.iter().any(|u| u.name == unit.name) {
            return Err(BackendError::AlreadyExists(format!("unit {}", unit.name)));
        }
        if let Some(machine) = &unit.machine {
            if !self.has_machine(machine) {
                return Err(BackendError::NotFound(format!("machine {}", machine)));
            }
        }
        self.units.push(unit);
        Ok(())
    }

    fn insert_relation(&mut self, relation: Relation) -> BackendResult<()> {
        if self.relations.iter().any(|r| r.id == relation.id) {
            return Err(BackendError::AlreadyExists(format!("relation {}", relation.id)));
        }
        for endpoint in &relation.endpoints {
            if !self.has_application(&endpoint.application) {
                return Err(BackendError::NotFound(format!(
                    "application {}",
                    endpoint.application
                )));
            }
        }
        self.relations.push(relation);
        Ok(())
    }
}

#[derive(Debug)]
struct ControllerInner {
    uuid: String,
    models: HashMap<String, ModelDoc>,
    /// Charm archives keyed by storage path
    blobs: HashMap<String, Vec<u8>>,
    /// Descriptions received for models not yet imported; dropped on commit
    received: HashMap<String, Vec<u8>>,
}

impl ControllerInner {
    fn check_collision(&self, info: &ModelInfo) -> BackendResult<()> {
        if self.models.contains_key(info.uuid()) {
            return Err(BackendError::AlreadyExists(format!(
                "model with uuid {}",
                info.uuid()
            )));
        }
        let clash = self
            .models
            .values()
            .any(|doc| doc.info.owner == info.owner && doc.info.name() == info.name());
        if clash {
            return Err(BackendError::AlreadyExists(format!(
                "model {:?} for {}",
                info.name(),
                info.owner
            )));
        }
        Ok(())
    }

    fn model(&self, uuid: &str) -> BackendResult<&ModelDoc> {
        self.models
            .get(uuid)
            .ok_or_else(|| BackendError::NotFound(format!("model {}", uuid)))
    }

    fn model_mut(&mut self, uuid: &str) -> BackendResult<&mut ModelDoc> {
        self.models
            .get_mut(uuid)
            .ok_or_else(|| BackendError::NotFound(format!("model {}", uuid)))
    }
}

/// In-memory controller hosting any number of models
#[derive(Debug, Clone)]
pub struct Controller {
    inner: Arc<RwLock<ControllerInner>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4().to_string())
    }

    pub fn with_uuid(uuid: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ControllerInner {
                uuid: uuid.into(),
                models: HashMap::new(),
                blobs: HashMap::new(),
                received: HashMap::new(),
            })),
        }
    }

    pub async fn uuid(&self) -> String {
        self.inner.read().await.uuid.clone()
    }

    /// Create an empty model
    pub async fn create_model(&self, info: ModelInfo) -> BackendResult<State> {
        let mut inner = self.inner.write().await;
        inner.check_collision(&info)?;
        let uuid = info.uuid().to_string();
        inner.models.insert(uuid.clone(), ModelDoc::new(info));
        debug!(model = %uuid, "Created model");
        Ok(State::new(self.clone(), uuid))
    }

    /// Open a backend for an existing model
    pub async fn state_for(&self, model_uuid: &str) -> BackendResult<State> {
        self.inner.read().await.model(model_uuid)?;
        Ok(State::new(self.clone(), model_uuid.to_string()))
    }

    pub async fn has_model(&self, model_uuid: &str) -> bool {
        self.inner.read().await.models.contains_key(model_uuid)
    }

    /// Uuids of every hosted model, sorted
    pub async fn model_uuids(&self) -> Vec<String> {
        let mut uuids: Vec<_> = self.inner.read().await.models.keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Remove a model together with its stored binaries
    ///
    /// This is the explicit cleanup for a target left holding the model of an
    /// aborted migration. Nothing calls it automatically.
    pub async fn discard_model(&self, model_uuid: &str) -> BackendResult<()> {
        let mut inner = self.inner.write().await;
        inner.received.remove(model_uuid);
        let doc = inner
            .models
            .remove(model_uuid)
            .ok_or_else(|| BackendError::NotFound(format!("model {}", model_uuid)))?;
        for record in doc.charms.values() {
            if let Some(path) = &record.storage_path {
                inner.blobs.remove(path);
            }
        }
        info!(model = %model_uuid, "Discarded model");
        Ok(())
    }

    /// Description received for a model that has not been imported yet
    pub async fn received_payload(&self, model_uuid: &str) -> Option<Vec<u8>> {
        self.inner.read().await.received.get(model_uuid).cloned()
    }

    /// Number of stored charm archives across all models
    pub async fn blob_count(&self) -> usize {
        self.inner.read().await.blobs.len()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImportTarget for Controller {
    type Session = MemoryImportSession;

    async fn begin_import(&self, info: &ModelInfo) -> BackendResult<MemoryImportSession> {
        self.inner.read().await.check_collision(info)?;
        let staging_id = Uuid::new_v4();
        debug!(model = info.uuid(), staging = %staging_id, "Staging import");
        Ok(MemoryImportSession {
            controller: self.clone(),
            staging_id,
            doc: ModelDoc::new(info.clone()),
        })
    }
}

/// Model being imported into a [`Controller`]
///
/// Entities accumulate in a private staging document that becomes visible
/// only on [`commit`](ImportSession::commit).
#[derive(Debug)]
pub struct MemoryImportSession {
    controller: Controller,
    staging_id: Uuid,
    doc: ModelDoc,
}

#[async_trait]
impl ImportSession for MemoryImportSession {
    type Backend = State;

    async fn add_machine(&mut self, machine: MachineRecord) -> BackendResult<()> {
        self.doc.insert_machine(machine)
    }

    async fn add_application(&mut self, application: ApplicationRecord) -> BackendResult<()> {
        self.doc.insert_application(application)
    }

    async fn add_unit(&mut self, unit: UnitRecord) -> BackendResult<()> {
        self.doc.insert_unit(unit)
    }

    async fn add_relation(&mut self, relation: Relation) -> BackendResult<()> {
        self.doc.insert_relation(relation)
    }

    async fn commit(self) -> BackendResult<(ModelInfo, State)> {
        let mut inner = self.controller.inner.write().await;
        inner.check_collision(&self.doc.info)?;

        let info = self.doc.info.clone();
        let uuid = info.uuid().to_string();
        inner.received.remove(&uuid);
        inner.models.insert(uuid.clone(), self.doc);
        drop(inner);

        debug!(model = %uuid, staging = %self.staging_id, "Committed import");
        Ok((info, State::new(self.controller, uuid)))
    }
}

/// Backend for one model hosted by a [`Controller`]
///
/// Clones share the same closed flag.
#[derive(Debug, Clone)]
pub struct State {
    controller: Controller,
    model_uuid: String,
    closed: Arc<AtomicBool>,
}

impl State {
    fn new(controller: Controller, model_uuid: String) -> Self {
        Self {
            controller,
            model_uuid,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.is_closed() {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    async fn read<R>(&self, f: impl FnOnce(&ModelDoc) -> R) -> BackendResult<R> {
        self.ensure_open()?;
        let inner = self.controller.inner.read().await;
        Ok(f(inner.model(&self.model_uuid)?))
    }

    async fn write<R>(
        &self,
        f: impl FnOnce(&mut ModelDoc) -> BackendResult<R>,
    ) -> BackendResult<R> {
        self.ensure_open()?;
        let mut inner = self.controller.inner.write().await;
        let doc = inner.model_mut(&self.model_uuid)?;
        doc.ensure_writable()?;
        f(doc)
    }

    pub async fn add_machine(&self, machine: MachineRecord) -> BackendResult<()> {
        self.write(|doc| doc.insert_machine(machine)).await
    }

    pub async fn add_application(&self, application: ApplicationRecord) -> BackendResult<()> {
        self.write(|doc| doc.insert_application(application)).await
    }

    pub async fn add_unit(&self, unit: UnitRecord) -> BackendResult<()> {
        self.write(|doc| doc.insert_unit(unit)).await
    }

    pub async fn add_relation(&self, relation: Relation) -> BackendResult<()> {
        self.write(|doc| doc.insert_relation(relation)).await
    }

    pub async fn set_annotations(&self, annotations: Annotations) -> BackendResult<()> {
        self.write(|doc| {
            doc.info.annotations = annotations;
            Ok(())
        })
        .await
    }

    /// Store agent tools, returning a record carrying their size and digest
    pub async fn add_tools(&self, version: Binary, content: Vec<u8>) -> BackendResult<AgentTools> {
        let tools = AgentTools::new(version.clone())
            .with_size(content.len() as u64)
            .with_sha256(format!("{:x}", Sha256::digest(&content)));
        self.write(|doc| {
            doc.tools.insert(version, content);
            Ok(())
        })
        .await?;
        Ok(tools)
    }

    /// Store a charm archive
    pub async fn add_charm(&self, url: CharmUrl, content: Vec<u8>) -> BackendResult<CharmRecord> {
        self.ensure_open()?;
        let mut inner = self.controller.inner.write().await;
        inner.model(&self.model_uuid)?.ensure_writable()?;
        Ok(store_charm(&mut inner, &self.model_uuid, url, content))
    }

    /// Stored agent tools for a version, if present
    pub async fn tools_content(&self, version: &Binary) -> BackendResult<Option<Vec<u8>>> {
        self.read(|doc| doc.tools.get(version).cloned()).await
    }

    /// Stored charm archive for a locator, if present
    pub async fn charm_content(&self, url: &CharmUrl) -> BackendResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let inner = self.controller.inner.read().await;
        let path = inner
            .model(&self.model_uuid)?
            .charms
            .get(url)
            .and_then(|c| c.storage_path.clone());
        Ok(path.and_then(|p| inner.blobs.get(&p).cloned()))
    }

    /// Record a cleanup that has to run before the model can migrate
    pub async fn schedule_cleanup(&self) -> BackendResult<()> {
        self.write(|doc| {
            doc.pending_cleanups += 1;
            Ok(())
        })
        .await
    }

    /// Run every pending cleanup
    pub async fn run_cleanups(&self) -> BackendResult<usize> {
        self.write(|doc| Ok(std::mem::take(&mut doc.pending_cleanups)))
            .await
    }

    /// Controller the model migrated to, if it has
    pub async fn migrated_to(&self) -> BackendResult<Option<String>> {
        self.read(|doc| doc.migrated_to.clone()).await
    }
}

fn store_charm(
    inner: &mut ControllerInner,
    model_uuid: &str,
    url: CharmUrl,
    content: Vec<u8>,
) -> CharmRecord {
    let path = format!("charms/{}-{}", url, Uuid::new_v4());
    let record = CharmRecord {
        url: url.clone(),
        storage_path: Some(path.clone()),
        sha256: Some(format!("{:x}", Sha256::digest(&content))),
        size: Some(content.len() as u64),
    };
    inner.blobs.insert(path, content);

    let previous = inner
        .models
        .get_mut(model_uuid)
        .and_then(|doc| doc.charms.insert(url, record.clone()));
    if let Some(old_path) = previous.and_then(|r| r.storage_path) {
        inner.blobs.remove(&old_path);
    }
    record
}

impl BackendHandle for State {
    fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PrecheckBackend for State {
    async fn needs_cleanup(&self) -> BackendResult<bool> {
        self.read(|doc| doc.pending_cleanups > 0).await
    }
}

#[async_trait]
impl ExportBackend for State {
    async fn model_info(&self) -> BackendResult<ModelInfo> {
        self.read(|doc| doc.info.clone()).await
    }

    async fn machines(&self) -> BackendResult<Vec<MachineRecord>> {
        self.read(|doc| doc.machines.clone()).await
    }

    async fn applications(&self) -> BackendResult<Vec<ApplicationRecord>> {
        self.read(|doc| doc.applications.clone()).await
    }

    async fn units(&self) -> BackendResult<Vec<UnitRecord>> {
        self.read(|doc| doc.units.clone()).await
    }

    async fn relations(&self) -> BackendResult<Vec<Relation>> {
        self.read(|doc| doc.relations.clone()).await
    }
}

#[async_trait]
impl UploadBackend for State {
    async fn open_tools(&self, version: &Binary) -> BackendResult<BinaryStream> {
        let content = self
            .read(|doc| doc.tools.get(version).cloned())
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("tools {}", version)))?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn charm(&self, url: &CharmUrl) -> BackendResult<CharmRecord> {
        self.read(|doc| doc.charms.get(url).cloned())
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("charm {}", url)))
    }

    async fn open_charm(&self, storage_path: &str) -> BackendResult<BinaryStream> {
        self.ensure_open()?;
        let content = self
            .controller
            .inner
            .read()
            .await
            .blobs
            .get(storage_path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("blob {}", storage_path)))?;
        Ok(Box::new(Cursor::new(content)))
    }
}

#[async_trait]
impl SourceControl for State {
    async fn mark_migrated(&self, target_controller: &str) -> BackendResult<()> {
        self.ensure_open()?;
        let mut inner = self.controller.inner.write().await;
        let doc = inner.model_mut(&self.model_uuid)?;
        match &doc.migrated_to {
            Some(existing) if existing == target_controller => Ok(()),
            Some(existing) => Err(BackendError::Invalid(format!(
                "model {} already migrated to controller {}",
                self.model_uuid, existing
            ))),
            None => {
                doc.migrated_to = Some(target_controller.to_string());
                info!(model = %self.model_uuid, target = %target_controller, "Marked model as migrated");
                Ok(())
            }
        }
    }
}

/// Uploads agent tools into one model of a [`Controller`]
#[derive(Debug, Clone)]
pub struct MemoryToolsUploader {
    controller: Controller,
    model_uuid: String,
}

#[async_trait]
impl ToolsUploader for MemoryToolsUploader {
    async fn upload_tools(&self, tools: &AgentTools, mut content: BinaryStream) -> BackendResult<()> {
        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;

        let mut inner = self.controller.inner.write().await;
        let doc = inner.model_mut(&self.model_uuid)?;
        doc.ensure_writable()?;
        match doc.tools.insert(tools.version.clone(), data) {
            Some(previous) if doc.tools.get(&tools.version) == Some(&previous) => {
                debug!(version = %tools.version, "Tools already present");
            }
            Some(_) => warn!(version = %tools.version, "Replaced stored tools"),
            None => {}
        }
        Ok(())
    }
}

/// Uploads charm archives into one model of a [`Controller`]
#[derive(Debug, Clone)]
pub struct MemoryCharmUploader {
    controller: Controller,
    model_uuid: String,
}

#[async_trait]
impl CharmUploader for MemoryCharmUploader {
    async fn upload_charm(&self, url: &CharmUrl, mut content: BinaryStream) -> BackendResult<CharmUrl> {
        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;

        let mut inner = self.controller.inner.write().await;
        inner.model(&self.model_uuid)?.ensure_writable()?;
        let record = store_charm(&mut inner, &self.model_uuid, url.clone(), data);
        Ok(record.url)
    }
}

/// Connection to a [`Controller`] in the same process
#[derive(Debug, Clone)]
pub struct LoopbackConnection {
    target: Controller,
    controller_uuid: String,
}

impl LoopbackConnection {
    pub async fn new(target: Controller) -> Self {
        let controller_uuid = target.uuid().await;
        Self {
            target,
            controller_uuid,
        }
    }
}

#[async_trait]
impl TargetConnection for LoopbackConnection {
    fn controller_uuid(&self) -> String {
        self.controller_uuid.clone()
    }

    async fn transmit(&self, model_uuid: &str, payload: &[u8]) -> BackendResult<String> {
        let digest = format!("{:x}", Sha256::digest(payload));
        self.target
            .inner
            .write()
            .await
            .received
            .insert(model_uuid.to_string(), payload.to_vec());
        Ok(digest)
    }

    fn tools_uploader(&self, model_uuid: &str) -> Arc<dyn ToolsUploader> {
        Arc::new(MemoryToolsUploader {
            controller: self.target.clone(),
            model_uuid: model_uuid.to_string(),
        })
    }

    fn charm_uploader(&self, model_uuid: &str) -> Arc<dyn CharmUploader> {
        Arc::new(MemoryCharmUploader {
            controller: self.target.clone(),
            model_uuid: model_uuid.to_string(),
        })
    }
}
