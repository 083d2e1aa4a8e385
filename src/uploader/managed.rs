use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::UploadError;
use super::event::{EventEmitter, ProgressState, TransferOutcome};
use super::facility::{TransferFacility, TransferNotification, TransferState};

/// Where a managed upload lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl UploadTarget {
    /// `https://{bucket}.s3.{region}.amazonaws.com/{key}`
    pub fn object_url(&self) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, self.key
        )
    }
}

/// Hands files to a [`TransferFacility`] and adapts its notifications
#[derive(Clone)]
pub struct ManagedUploadStrategy {
    facility: Arc<dyn TransferFacility>,
}

impl ManagedUploadStrategy {
    pub fn new(facility: Arc<dyn TransferFacility>) -> Self {
        Self { facility }
    }

    /// Upload `local_path` to `target`, reporting through `events`
    ///
    /// Returns once a terminal outcome has been delivered or the facility
    /// stopped reporting.
    pub async fn upload(
        &self,
        local_path: &Path,
        target: &UploadTarget,
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
    ) {
        info!(
            "Starting managed upload {} -> s3://{}/{}",
            local_path.display(),
            target.bucket,
            target.key
        );

        let mut observer = self.facility.upload(&target.key, local_path, cancel);
        let object_url = target.object_url();

        while let Some(notification) = observer.next().await {
            if let Some(outcome) = adapt(notification, &object_url) {
                let terminal = outcome.is_terminal();
                if let TransferOutcome::Failed(e) = &outcome {
                    error!("Managed transfer {} failed: {}", observer.id, e);
                }
                events.emit(outcome);
                if terminal {
                    break;
                }
            }
        }
    }
}

/// Map one facility notification onto the listener contract
///
/// Non-terminal states other than progress produce nothing.
pub fn adapt(notification: TransferNotification, object_url: &str) -> Option<TransferOutcome> {
    match notification {
        TransferNotification::ProgressChanged { current, total } => Some(
            TransferOutcome::InProgress(ProgressState::new(current, total).percentage()),
        ),
        TransferNotification::StateChanged(state) => {
            debug!("onStateChanged: State - {}", state);
            match state {
                TransferState::Completed => {
                    Some(TransferOutcome::Completed(object_url.to_string()))
                }
                TransferState::Failed | TransferState::Canceled => Some(TransferOutcome::Failed(
                    UploadError::ManagedTransfer { state },
                )),
                _ => None,
            }
        }
        TransferNotification::Error(e) => Some(TransferOutcome::Failed(UploadError::Transfer(e))),
    }
}
