//! Copying agent tools and charms from the source to the target controller
//!
//! A description only names its binaries. Once it has been imported, every
//! distinct tools version and charm it references is streamed from source
//! storage into the target through the target's uploaders. Each artifact is
//! read and uploaded exactly once no matter how many entities share it.

use crate::backend::{
    BackendError, BinaryStream, CharmRecord, CharmUploader, TargetConnection, ToolsUploader,
    UploadBackend,
};
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::logging::format_bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use model_description::{AgentTools, Binary, CharmUrl, Model};
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};

/// Everything needed to move the binaries referenced by one model
pub struct UploadBinariesConfig<'a> {
    /// Source storage the binaries are read from
    pub source: &'a dyn UploadBackend,
    /// Description whose artifacts are transferred
    pub model: &'a Model,
    pub target: &'a dyn TargetConnection,
    pub tools_uploader: Arc<dyn ToolsUploader>,
    pub charm_uploader: Arc<dyn CharmUploader>,
    /// Maximum uploads in flight at once
    pub concurrency: usize,
    /// Verify size and sha256 where the description records them
    pub verify_checksums: bool,
}

impl<'a> UploadBinariesConfig<'a> {
    /// Upload through the target's uploaders for the model's uuid
    pub fn new(
        source: &'a dyn UploadBackend,
        model: &'a Model,
        target: &'a dyn TargetConnection,
    ) -> Self {
        let model_uuid = model.uuid().unwrap_or_default();
        Self {
            source,
            model,
            target,
            tools_uploader: target.tools_uploader(model_uuid),
            charm_uploader: target.charm_uploader(model_uuid),
            concurrency: 1,
            verify_checksums: true,
        }
    }

    pub fn with_settings(mut self, settings: &MigrationSettings) -> Self {
        self.concurrency = settings.upload_concurrency;
        self.verify_checksums = settings.verify_checksums;
        self
    }

    pub fn with_tools_uploader(mut self, uploader: Arc<dyn ToolsUploader>) -> Self {
        self.tools_uploader = uploader;
        self
    }

    pub fn with_charm_uploader(mut self, uploader: Arc<dyn CharmUploader>) -> Self {
        self.charm_uploader = uploader;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MigrationError::Config(
                "upload concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// What an upload step moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub tools: Vec<Binary>,
    /// Charm locators as recorded by the target
    pub charms: Vec<CharmUrl>,
    pub bytes: u64,
}

/// Transfer every distinct tools version, then every distinct charm
///
/// The first failure stops the step and uploads still in flight are
/// cancelled. Artifacts uploaded before the failure stay on the target;
/// running the step again uploads them again.
pub async fn upload_binaries(config: &UploadBinariesConfig<'_>) -> Result<UploadSummary> {
    config.validate()?;

    let versions: Vec<Binary> = config.model.tools_versions().into_iter().collect();
    let urls: Vec<CharmUrl> = config.model.charm_urls().into_iter().collect();
    let counter = Arc::new(AtomicU64::new(0));
    let counter = &counter;

    info!(
        tools = versions.len(),
        charms = urls.len(),
        concurrency = config.concurrency,
        "Uploading binaries"
    );

    stream::iter(versions.iter().cloned())
        .map(|version| transfer_tools(config, version, counter))
        .buffer_unordered(config.concurrency)
        .try_collect::<Vec<()>>()
        .await?;

    let charms = stream::iter(urls.iter().cloned())
        .map(|url| transfer_charm(config, url, counter))
        .buffer_unordered(config.concurrency)
        .try_collect::<Vec<CharmUrl>>()
        .await?;

    let bytes = counter.load(Ordering::Relaxed);
    info!(size = %format_bytes(bytes), "Uploaded binaries");

    Ok(UploadSummary {
        tools: versions,
        charms,
        bytes,
    })
}

/// Storage path of the archive for a charm in source storage
pub async fn get_charm_storage_path<B>(backend: &B, url: &CharmUrl) -> Result<String>
where
    B: UploadBackend + ?Sized,
{
    let (path, _) = charm_archive(backend, url).await?;
    Ok(path)
}

async fn charm_archive<B>(backend: &B, url: &CharmUrl) -> Result<(String, CharmRecord)>
where
    B: UploadBackend + ?Sized,
{
    let record = backend
        .charm(url)
        .await
        .map_err(|source| MigrationError::CharmRead {
            url: url.clone(),
            source,
        })?;

    match record.storage_path.clone().filter(|p| !p.is_empty()) {
        Some(path) => Ok((path, record)),
        None => Err(MigrationError::CharmRead {
            url: url.clone(),
            source: BackendError::NotFound(format!("stored archive for charm {}", url)),
        }),
    }
}

async fn transfer_tools(
    config: &UploadBinariesConfig<'_>,
    version: Binary,
    counter: &Arc<AtomicU64>,
) -> Result<()> {
    let tools = config
        .model
        .tools_for(&version)
        .cloned()
        .unwrap_or_else(|| AgentTools::new(version.clone()));

    debug!(version = %version, "Reading tools");
    let content = config
        .source
        .open_tools(&version)
        .await
        .map_err(|source| MigrationError::ToolsRead {
            version: version.clone(),
            source,
        })?;

    let reader = TransferReader::new(content, format!("tools {}", version), counter.clone())
        .expecting(tools.size, tools.sha256.clone(), config.verify_checksums);

    config
        .tools_uploader
        .upload_tools(&tools, Box::new(reader))
        .await
        .map_err(|source| MigrationError::ToolsUpload {
            version: version.clone(),
            source,
        })?;

    debug!(version = %version, "Uploaded tools");
    Ok(())
}

async fn transfer_charm(
    config: &UploadBinariesConfig<'_>,
    url: CharmUrl,
    counter: &Arc<AtomicU64>,
) -> Result<CharmUrl> {
    let (path, record) = charm_archive(config.source, &url).await?;

    debug!(charm = %url, path = %path, "Reading charm");
    let content = config
        .source
        .open_charm(&path)
        .await
        .map_err(|source| MigrationError::CharmRead {
            url: url.clone(),
            source,
        })?;

    let reader = TransferReader::new(content, format!("charm {}", url), counter.clone())
        .expecting(record.size, record.sha256, config.verify_checksums);

    let recorded = config
        .charm_uploader
        .upload_charm(&url, Box::new(reader))
        .await
        .map_err(|source| MigrationError::CharmUpload {
            url: url.clone(),
            source,
        })?;

    if recorded != url {
        warn!(charm = %url, recorded = %recorded, "Target recorded charm under a different locator");
    }
    Ok(recorded)
}

/// Stream wrapper counting transferred bytes and checking them at EOF
///
/// When verification is on and the expected size or digest does not match,
/// the final read fails instead of reporting EOF, so an uploader that reads
/// to completion never stores a corrupt binary.
struct TransferReader {
    inner: BinaryStream,
    artifact: String,
    hasher: Sha256,
    read: u64,
    counter: Arc<AtomicU64>,
    expected_size: Option<u64>,
    expected_sha256: Option<String>,
    verify: bool,
}

impl TransferReader {
    fn new(inner: BinaryStream, artifact: String, counter: Arc<AtomicU64>) -> Self {
        Self {
            inner,
            artifact,
            hasher: Sha256::new(),
            read: 0,
            counter,
            expected_size: None,
            expected_sha256: None,
            verify: false,
        }
    }

    fn expecting(mut self, size: Option<u64>, sha256: Option<String>, verify: bool) -> Self {
        self.expected_size = size;
        self.expected_sha256 = sha256;
        self.verify = verify;
        self
    }

    fn check_size(&self, complete: bool) -> std::result::Result<(), BackendError> {
        match self.expected_size {
            Some(expected) if self.read > expected || (complete && self.read != expected) => {
                Err(BackendError::SizeMismatch {
                    artifact: self.artifact.clone(),
                    expected,
                    actual: self.read,
                })
            }
            _ => Ok(()),
        }
    }

    fn check_digest(&self) -> std::result::Result<(), BackendError> {
        let Some(expected) = &self.expected_sha256 else {
            return Ok(());
        };
        let actual = format!("{:x}", self.hasher.clone().finalize());
        if expected.eq_ignore_ascii_case(&actual) {
            Ok(())
        } else {
            Err(BackendError::DigestMismatch {
                artifact: self.artifact.clone(),
                expected: expected.clone(),
                actual,
            })
        }
    }
}

impl AsyncRead for TransferReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let wants_data = buf.remaining() > 0;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            Poll::Ready(Ok(())) => {}
        }

        let chunk = &buf.filled()[before..];
        if chunk.is_empty() {
            if wants_data && this.verify {
                if let Err(err) = this.check_size(true).and_then(|_| this.check_digest()) {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, err)));
                }
            }
            return Poll::Ready(Ok(()));
        }

        this.hasher.update(chunk);
        this.read += chunk.len() as u64;
        this.counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);

        if this.verify {
            if let Err(err) = this.check_size(false) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, err)));
            }
        }
        Poll::Ready(Ok(()))
    }
}
