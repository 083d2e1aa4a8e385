use futures::StreamExt;
use reqwest::Body;
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::counting::CountingStream;
use super::error::{Result, UploadError};
use super::event::{EventEmitter, ProgressState};
use super::presign::PreSignClient;

/// Uploads a file with a single PUT to a URL signed by the application server
#[derive(Clone)]
pub struct DirectUploadStrategy {
    client: reqwest::Client,
    presign: PreSignClient,
}

impl DirectUploadStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            presign: PreSignClient::new(client.clone()),
            client,
        }
    }

    /// Run one upload attempt, reporting every outcome through `events`
    ///
    /// Never returns an error: failures become a single `Failed` event.
    /// Cancelling `cancel` drops the request, stops the body stream and
    /// reports [`UploadError::Canceled`].
    pub async fn upload(
        &self,
        local_path: &Path,
        api_url: &str,
        access_token: &str,
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
    ) {
        let attempt = self.try_upload(local_path, api_url, access_token, &events, &cancel);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Canceled),
            result = attempt => result,
        };

        match result {
            Ok(object_url) => {
                info!("Upload with pre-signed url successful: {}", object_url);
                events.complete(&object_url);
            }
            Err(UploadError::Canceled) => {
                info!("Pre-signed upload of {} canceled", local_path.display());
                events.fail(UploadError::Canceled);
            }
            Err(e) => {
                error!(
                    "Upload with pre-signed url failed for {}: {}",
                    local_path.display(),
                    e
                );
                events.fail(e);
            }
        }
    }

    async fn try_upload(
        &self,
        local_path: &Path,
        api_url: &str,
        access_token: &str,
        events: &Arc<EventEmitter>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let credentials = self.presign.fetch_credentials(api_url, access_token).await?;

        let file = File::open(local_path).await?;
        let file_size = file.metadata().await?.len();

        // the body may outlive this attempt inside the connection task
        let progress = Arc::downgrade(events);
        let body = CountingStream::new(
            ReaderStream::new(file),
            file_size,
            Box::new(move |written, total| {
                if let Some(events) = progress.upgrade() {
                    events.progress(ProgressState::new(written, total).percentage());
                }
            }),
        )
        .take_until(cancel.clone().cancelled_owned());

        info!(
            "Uploading {} ({} bytes) to pre-signed url",
            local_path.display(),
            file_size
        );

        // The signed URL carries the authorization; only the length is set so
        // the body goes out with a fixed size instead of chunked.
        let response = self
            .client
            .put(&credentials.signed_url)
            .header(CONTENT_LENGTH, file_size)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Status Code: {} Message: {}", status.as_u16(), text);
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                text
            };
            return Err(UploadError::ServerRejection {
                status: status.as_u16(),
                message,
            });
        }

        Ok(credentials.object_url)
    }
}
