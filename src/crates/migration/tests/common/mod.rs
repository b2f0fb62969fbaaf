//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use model_description::{
    Annotations, Attributes, Binary, CharmUrl, Endpoint, Relation, Role,
};
use model_migration::backend::memory::{Controller, LoopbackConnection, State};
use model_migration::backend::{
    ApplicationRecord, BackendError, BackendResult, BinaryStream, CharmRecord, CharmUploader,
    ExportBackend, MachineRecord, ModelInfo, PrecheckBackend, SourceControl, TargetConnection,
    ToolsUploader, UnitRecord, UploadBackend,
};
use model_migration::{MigrationSettings, RetryPolicy};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const MODEL_UUID: &str = "deadbeef-0bad-400d-8000-4b1d0d06f00d";
pub const MODEL_NAME: &str = "default";

/// Install a test-friendly tracing subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn binary(v: &str) -> Binary {
    v.parse().expect("valid binary version")
}

pub fn charm(url: &str) -> CharmUrl {
    url.parse().expect("valid charm url")
}

pub fn model_info(name: &str, uuid: &str) -> ModelInfo {
    let mut config = Attributes::new();
    config.insert("name".into(), json!(name));
    config.insert("uuid".into(), json!(uuid));
    config.insert("logging-config".into(), json!("<root>=INFO"));
    let mut annotations = Annotations::new();
    annotations.insert("owner-team".into(), "infra".into());
    ModelInfo::new("admin", config, annotations).expect("valid model info")
}

pub fn tools_content(version: &str) -> Vec<u8> {
    format!("fake tools {}", version).into_bytes()
}

pub fn charm_content(url: &str) -> Vec<u8> {
    format!("fake charm {}", url).into_bytes()
}

/// Settings that retry quickly and without jitter
pub fn fast_retry_settings(max_attempts: usize) -> MigrationSettings {
    MigrationSettings::default().with_retry(
        RetryPolicy::new(max_attempts)
            .with_initial_interval(0.001)
            .with_max_interval(0.01)
            .with_jitter(false),
    )
}

/// A source controller hosting one populated model
///
/// - machines `0` (tools 2.0.1), container `0/lxc/0` (tools 2.0.5), `1` (tools 2.0.1)
/// - application `magic` (`local:trusty/magic`) with units on `0` and `0/lxc/0` (tools 2.0.3)
/// - application `postgresql` (`cs:trusty/postgresql-42`) with one unit on `1` (tools 2.0.1)
/// - relation `magic:db postgresql:db`
pub async fn populated_source() -> (Controller, State) {
    let controller = Controller::with_uuid("source-controller");
    let state = controller
        .create_model(model_info(MODEL_NAME, MODEL_UUID))
        .await
        .expect("create model");

    let mut tools = std::collections::HashMap::new();
    for v in ["2.0.1-trusty-amd64", "2.0.3-trusty-amd64", "2.0.5-trusty-amd64"] {
        let record = state
            .add_tools(binary(v), tools_content(v))
            .await
            .expect("add tools");
        tools.insert(v, record);
    }
    for url in ["local:trusty/magic", "cs:trusty/postgresql-42"] {
        state
            .add_charm(charm(url), charm_content(url))
            .await
            .expect("add charm");
    }

    let mut machine0 = MachineRecord::new("0")
        .with_series("trusty")
        .with_tools(tools["2.0.1-trusty-amd64"].clone());
    machine0.annotations.insert("rack".into(), "r1".into());
    state.add_machine(machine0).await.expect("machine 0");
    state
        .add_machine(
            MachineRecord::new("0/lxc/0")
                .with_parent("0")
                .with_tools(tools["2.0.5-trusty-amd64"].clone()),
        )
        .await
        .expect("container");
    state
        .add_machine(MachineRecord::new("1").with_tools(tools["2.0.1-trusty-amd64"].clone()))
        .await
        .expect("machine 1");

    state
        .add_application(ApplicationRecord::new("magic").with_charm(charm("local:trusty/magic")))
        .await
        .expect("magic");
    let mut postgresql =
        ApplicationRecord::new("postgresql").with_charm(charm("cs:trusty/postgresql-42"));
    postgresql
        .settings
        .insert("max-connections".into(), json!(100));
    state.add_application(postgresql).await.expect("postgresql");

    for (unit, machine, version) in [
        ("magic/0", "0", "2.0.3-trusty-amd64"),
        ("magic/1", "0/lxc/0", "2.0.3-trusty-amd64"),
        ("postgresql/0", "1", "2.0.1-trusty-amd64"),
    ] {
        state
            .add_unit(
                UnitRecord::new(unit)
                    .on_machine(machine)
                    .with_tools(tools[version].clone()),
            )
            .await
            .expect("unit");
    }

    state
        .add_relation(Relation::new(
            0,
            vec![
                Endpoint::new("magic", "db", Role::Requirer),
                Endpoint::new("postgresql", "db", Role::Provider),
            ],
        ))
        .await
        .expect("relation");

    (controller, state)
}

/// Source wrapper whose cleanup query fails a fixed number of times
pub struct FlakySource {
    pub inner: State,
    pub cleanup_failures: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
}

impl FlakySource {
    pub fn new(inner: State, cleanup_failures: usize) -> Self {
        Self {
            inner,
            cleanup_failures: AtomicUsize::new(cleanup_failures),
            cleanup_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PrecheckBackend for FlakySource {
    async fn needs_cleanup(&self) -> BackendResult<bool> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.cleanup_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.cleanup_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("boom".into()));
        }
        self.inner.needs_cleanup().await
    }
}

#[async_trait]
impl ExportBackend for FlakySource {
    async fn model_info(&self) -> BackendResult<ModelInfo> {
        self.inner.model_info().await
    }

    async fn machines(&self) -> BackendResult<Vec<MachineRecord>> {
        self.inner.machines().await
    }

    async fn applications(&self) -> BackendResult<Vec<ApplicationRecord>> {
        self.inner.applications().await
    }

    async fn units(&self) -> BackendResult<Vec<UnitRecord>> {
        self.inner.units().await
    }

    async fn relations(&self) -> BackendResult<Vec<Relation>> {
        self.inner.relations().await
    }
}

#[async_trait]
impl UploadBackend for FlakySource {
    async fn open_tools(&self, version: &Binary) -> BackendResult<BinaryStream> {
        self.inner.open_tools(version).await
    }

    async fn charm(&self, url: &CharmUrl) -> BackendResult<CharmRecord> {
        self.inner.charm(url).await
    }

    async fn open_charm(&self, storage_path: &str) -> BackendResult<BinaryStream> {
        self.inner.open_charm(storage_path).await
    }
}

#[async_trait]
impl SourceControl for FlakySource {
    async fn mark_migrated(&self, target_controller: &str) -> BackendResult<()> {
        self.inner.mark_migrated(target_controller).await
    }
}

/// Connection whose charm uploads fail a fixed number of times
pub struct FlakyConnection {
    pub inner: LoopbackConnection,
    pub charm_failures: Arc<AtomicUsize>,
    pub charm_uploads: Arc<AtomicUsize>,
    pub tools_uploads: Arc<AtomicUsize>,
}

impl FlakyConnection {
    pub async fn new(target: Controller, charm_failures: usize) -> Self {
        Self {
            inner: LoopbackConnection::new(target).await,
            charm_failures: Arc::new(AtomicUsize::new(charm_failures)),
            charm_uploads: Arc::new(AtomicUsize::new(0)),
            tools_uploads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TargetConnection for FlakyConnection {
    fn controller_uuid(&self) -> String {
        self.inner.controller_uuid()
    }

    async fn transmit(&self, model_uuid: &str, payload: &[u8]) -> BackendResult<String> {
        self.inner.transmit(model_uuid, payload).await
    }

    fn tools_uploader(&self, model_uuid: &str) -> Arc<dyn ToolsUploader> {
        Arc::new(CountingToolsUploader {
            inner: self.inner.tools_uploader(model_uuid),
            uploads: self.tools_uploads.clone(),
        })
    }

    fn charm_uploader(&self, model_uuid: &str) -> Arc<dyn CharmUploader> {
        Arc::new(FlakyCharmUploader {
            inner: self.inner.charm_uploader(model_uuid),
            failures: self.charm_failures.clone(),
            uploads: self.charm_uploads.clone(),
        })
    }
}

struct CountingToolsUploader {
    inner: Arc<dyn ToolsUploader>,
    uploads: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolsUploader for CountingToolsUploader {
    async fn upload_tools(
        &self,
        tools: &model_description::AgentTools,
        content: BinaryStream,
    ) -> BackendResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload_tools(tools, content).await
    }
}

struct FlakyCharmUploader {
    inner: Arc<dyn CharmUploader>,
    failures: Arc<AtomicUsize>,
    uploads: Arc<AtomicUsize>,
}

#[async_trait]
impl CharmUploader for FlakyCharmUploader {
    async fn upload_charm(&self, url: &CharmUrl, content: BinaryStream) -> BackendResult<CharmUrl> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("charm upload interrupted".into()));
        }
        self.inner.upload_charm(url, content).await
    }
}
