//! Managed transfer facility: the component that owns chunking, part
//! retries and background execution for the managed upload path.
//!
//! Callers hand a key and a file to a [`TransferFacility`] and get back a
//! [`TransferObserver`] streaming [`TransferNotification`]s. The
//! [`S3TransferFacility`] implementation runs on the AWS SDK: files below
//! [`MULTIPART_THRESHOLD`] go through one `PutObject`, larger files use
//! multipart upload and are aborted on failure or cancel.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    Client,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::helpers::detect_content_type;

// Threshold for using multipart upload (100MB)
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

// Size of each part (10MB) - AWS minimum is 5MB
const PART_SIZE: usize = 10 * 1024 * 1024;

/// Lifecycle states reported by a transfer facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    WaitingForNetwork,
    InProgress,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl TransferState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WaitingForNetwork => "WAITING_FOR_NETWORK",
            Self::InProgress => "IN_PROGRESS",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw notification from a facility, before adaptation
#[derive(Debug)]
pub enum TransferNotification {
    StateChanged(TransferState),
    ProgressChanged { current: u64, total: u64 },
    Error(anyhow::Error),
}

/// Handle on one transfer running inside a facility
pub struct TransferObserver {
    pub id: u64,
    notifications: UnboundedReceiver<TransferNotification>,
    cancel: CancellationToken,
}

impl TransferObserver {
    /// Create an observer together with the sender the facility reports on
    pub fn channel(
        id: u64,
        cancel: CancellationToken,
    ) -> (UnboundedSender<TransferNotification>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                id,
                notifications: rx,
                cancel,
            },
        )
    }

    /// Next notification, or `None` once the facility dropped the transfer
    pub async fn next(&mut self) -> Option<TransferNotification> {
        self.notifications.recv().await
    }

    /// Ask the facility to stop; it answers with a `CANCELED` state
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// External component that performs the actual managed transfer
pub trait TransferFacility: Send + Sync {
    /// Start uploading `local_path` under `object_key`
    ///
    /// The transfer runs on the facility's own schedule. Cancelling `cancel`
    /// requests a transition to [`TransferState::Canceled`].
    fn upload(
        &self,
        object_key: &str,
        local_path: &Path,
        cancel: CancellationToken,
    ) -> TransferObserver;
}

/// [`TransferFacility`] backed by the AWS SDK
#[derive(Clone)]
pub struct S3TransferFacility {
    client: Client,
    bucket: String,
}

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

enum Finished {
    Uploaded,
    Canceled,
}

impl S3TransferFacility {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

impl TransferFacility for S3TransferFacility {
    fn upload(
        &self,
        object_key: &str,
        local_path: &Path,
        cancel: CancellationToken,
    ) -> TransferObserver {
        let id = NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, observer) = TransferObserver::channel(id, cancel.clone());

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = object_key.to_string();
        let path = local_path.to_path_buf();

        tokio::spawn(async move {
            let _ = tx.send(TransferNotification::StateChanged(TransferState::InProgress));
            let result = run_transfer(&client, &bucket, &key, &path, &cancel, &tx).await;

            let state = match result {
                Ok(Finished::Uploaded) => TransferState::Completed,
                Ok(Finished::Canceled) => TransferState::Canceled,
                Err(e) => {
                    warn!("Transfer {} failed: {:#}", id, e);
                    let _ = tx.send(TransferNotification::Error(e));
                    TransferState::Failed
                }
            };
            debug!("Transfer {} finished: {}", id, state);
            let _ = tx.send(TransferNotification::StateChanged(state));
        });

        observer
    }
}

async fn run_transfer(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    cancel: &CancellationToken,
    tx: &UnboundedSender<TransferNotification>,
) -> Result<Finished> {
    let file_size = tokio::fs::metadata(local_path)
        .await
        .context("Failed to get file metadata")?
        .len();

    if file_size >= MULTIPART_THRESHOLD {
        upload_multipart(client, bucket, s3_key, local_path, file_size, cancel, tx).await
    } else {
        upload_single(client, bucket, s3_key, local_path, file_size, cancel, tx).await
    }
}

async fn upload_single(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    file_size: u64,
    cancel: &CancellationToken,
    tx: &UnboundedSender<TransferNotification>,
) -> Result<Finished> {
    let _ = tx.send(TransferNotification::ProgressChanged {
        current: 0,
        total: file_size,
    });

    let body = ByteStream::from_path(local_path)
        .await
        .context("Failed to create byte stream from file")?;

    let request = client
        .put_object()
        .bucket(bucket)
        .key(s3_key)
        .body(body)
        .content_type(detect_content_type(local_path))
        .content_length(file_size as i64)
        .send();

    tokio::select! {
        result = request => {
            result.context("Failed to upload file to S3")?;
        }
        _ = cancel.cancelled() => return Ok(Finished::Canceled),
    }

    let _ = tx.send(TransferNotification::ProgressChanged {
        current: file_size,
        total: file_size,
    });

    info!("Uploaded {} -> s3://{}/{}", local_path.display(), bucket, s3_key);
    Ok(Finished::Uploaded)
}

async fn upload_multipart(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    file_size: u64,
    cancel: &CancellationToken,
    tx: &UnboundedSender<TransferNotification>,
) -> Result<Finished> {
    info!(
        "Starting multipart upload for {} ({} bytes, {} parts)",
        local_path.display(),
        file_size,
        (file_size as usize).div_ceil(PART_SIZE)
    );

    let multipart = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .content_type(detect_content_type(local_path))
        .send()
        .await
        .context("Failed to initiate multipart upload")?;

    let upload_id = multipart
        .upload_id()
        .context("No upload ID returned from S3")?
        .to_string();

    debug!("Multipart upload initiated with ID: {}", upload_id);

    let result = upload_parts(
        client, bucket, s3_key, local_path, file_size, &upload_id, cancel, tx,
    )
    .await;

    match result {
        Ok(Finished::Uploaded) => Ok(Finished::Uploaded),
        other => {
            // abort errors are only logged
            if let Err(e) = abort_multipart_upload(client, bucket, s3_key, &upload_id).await {
                warn!("{:#}", e);
            }
            other
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_parts(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    file_size: u64,
    upload_id: &str,
    cancel: &CancellationToken,
    tx: &UnboundedSender<TransferNotification>,
) -> Result<Finished> {
    let mut file = tokio::fs::File::open(local_path).await?;
    let mut parts = Vec::new();
    let mut part_number = 1i32;
    let mut uploaded_bytes = 0u64;

    let _ = tx.send(TransferNotification::ProgressChanged {
        current: 0,
        total: file_size,
    });

    loop {
        let mut buffer = vec![0u8; PART_SIZE];
        let bytes_read = read_full(&mut file, &mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        buffer.truncate(bytes_read);

        debug!("Uploading part {} ({} bytes)", part_number, buffer.len());

        let request = client
            .upload_part()
            .bucket(bucket)
            .key(s3_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(buffer))
            .send();

        let part_result = tokio::select! {
            result = request => result
                .with_context(|| format!("Failed to upload part {}", part_number))?,
            _ = cancel.cancelled() => return Ok(Finished::Canceled),
        };

        parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .e_tag(part_result.e_tag().unwrap_or(""))
                .build(),
        );

        uploaded_bytes += bytes_read as u64;
        let _ = tx.send(TransferNotification::ProgressChanged {
            current: uploaded_bytes,
            total: file_size,
        });

        part_number += 1;
    }

    debug!(
        "All {} parts uploaded, completing multipart upload",
        parts.len()
    );

    let completed = CompletedMultipartUpload::builder()
        .set_parts(Some(parts))
        .build();

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .upload_id(upload_id)
        .multipart_upload(completed)
        .send()
        .await
        .context("Failed to complete multipart upload")?;

    info!(
        "Successfully completed multipart upload: {} -> s3://{}/{}",
        local_path.display(),
        bucket,
        s3_key
    );

    Ok(Finished::Uploaded)
}

/// Fill `buf` unless EOF comes first; parts other than the last must be full
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn abort_multipart_upload(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
) -> Result<()> {
    client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .upload_id(upload_id)
        .send()
        .await
        .context("Failed to abort multipart upload")?;

    debug!("Aborted multipart upload {}", upload_id);
    Ok(())
}
