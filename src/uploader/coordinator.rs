use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::client::{http_client, s3_client};
use super::direct::DirectUploadStrategy;
use super::error::UploadError;
use super::event::{EventEmitter, UploadListener};
use super::facility::{S3TransferFacility, TransferFacility};
use super::managed::{ManagedUploadStrategy, UploadTarget};
use crate::config::{Config, PreSignConfig, StorageConfig};

/// Entry point for callers: one method per strategy
///
/// Holds only the configuration it was built with. Every call spawns its own
/// task and returns an [`UploadHandle`]; outcomes arrive exclusively through
/// the listener. Concurrent uploads of the same file are not deduplicated.
#[derive(Clone)]
pub struct UploadCoordinator {
    direct: Option<DirectUploadSetup>,
    managed: Option<ManagedUploadSetup>,
}

#[derive(Clone)]
struct DirectUploadSetup {
    strategy: DirectUploadStrategy,
    presign: PreSignConfig,
}

#[derive(Clone)]
struct ManagedUploadSetup {
    strategy: ManagedUploadStrategy,
    storage: StorageConfig,
}

/// Handle on a running upload task
pub struct UploadHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl UploadHandle {
    /// Request cancellation
    ///
    /// The managed path forwards the request to the transfer facility, which
    /// reports `CANCELED`. The direct path drops the in-flight PUT, ends its
    /// body stream and reports [`UploadError::Canceled`]. Either way the
    /// listener still sees exactly one terminal event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the upload task to finish
    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}

impl UploadCoordinator {
    /// Build both strategies from configuration
    pub async fn new(config: &Config) -> Result<Self> {
        let direct = match &config.presign {
            Some(presign) => Some(DirectUploadSetup {
                strategy: DirectUploadStrategy::new(http_client(&config.http)?),
                presign: presign.clone(),
            }),
            None => None,
        };

        let managed = match &config.storage {
            Some(storage) => {
                let client = s3_client(storage).await;
                let facility = S3TransferFacility::new(client, storage.bucket.clone());
                Some(ManagedUploadSetup {
                    strategy: ManagedUploadStrategy::new(Arc::new(facility)),
                    storage: storage.clone(),
                })
            }
            None => None,
        };

        Ok(Self { direct, managed })
    }

    /// Assemble a coordinator from already-built parts
    pub fn from_parts(
        direct: Option<(DirectUploadStrategy, PreSignConfig)>,
        managed: Option<(Arc<dyn TransferFacility>, StorageConfig)>,
    ) -> Self {
        Self {
            direct: direct.map(|(strategy, presign)| DirectUploadSetup { strategy, presign }),
            managed: managed.map(|(facility, storage)| ManagedUploadSetup {
                strategy: ManagedUploadStrategy::new(facility),
                storage,
            }),
        }
    }

    pub fn has_direct(&self) -> bool {
        self.direct.is_some()
    }

    pub fn has_managed(&self) -> bool {
        self.managed.is_some()
    }

    /// Upload through the managed transfer facility
    pub fn upload(
        &self,
        local_path: impl Into<PathBuf>,
        listener: Arc<dyn UploadListener>,
    ) -> UploadHandle {
        let local_path = local_path.into();
        let events = Arc::new(EventEmitter::new(listener));
        let cancel = CancellationToken::new();

        let Some(setup) = self.managed.clone() else {
            return Self::not_configured(events, cancel, "Managed");
        };

        let key = setup
            .storage
            .build_object_key(&Uuid::new_v4().to_string());
        let target = UploadTarget {
            region: setup.storage.region.clone(),
            bucket: setup.storage.bucket.clone(),
            key,
        };

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            setup
                .strategy
                .upload(&local_path, &target, events, token)
                .await;
        });

        UploadHandle { task, cancel }
    }

    /// Upload with a single PUT to a URL signed by the application server
    pub fn upload_pre_signed(
        &self,
        local_path: impl Into<PathBuf>,
        listener: Arc<dyn UploadListener>,
    ) -> UploadHandle {
        let local_path = local_path.into();
        let events = Arc::new(EventEmitter::new(listener));
        let cancel = CancellationToken::new();

        let Some(setup) = self.direct.clone() else {
            return Self::not_configured(events, cancel, "Pre-signed");
        };

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            setup
                .strategy
                .upload(
                    &local_path,
                    &setup.presign.api_url,
                    &setup.presign.access_token,
                    events,
                    token,
                )
                .await;
        });

        UploadHandle { task, cancel }
    }

    fn not_configured(
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
        strategy: &'static str,
    ) -> UploadHandle {
        warn!("{} upload requested but not configured", strategy);
        events.fail(UploadError::NotConfigured(strategy));
        UploadHandle {
            task: tokio::spawn(async {}),
            cancel,
        }
    }
}
