use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;

use crate::config::{HttpConfig, StorageConfig};

/// Build an S3 client from explicit static credentials
///
/// Nothing is read from the ambient AWS profile chain.
pub async fn s3_client(storage: &StorageConfig) -> Client {
    let credentials = Credentials::new(
        storage.access_key.clone(),
        storage.secret_key.clone(),
        None,
        None,
        "media-upload",
    );

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(storage.region.clone()))
        .credentials_provider(credentials)
        .load()
        .await;

    Client::new(&sdk_config)
}

/// HTTP client shared by the pre-sign call and the signed-URL PUT
///
/// Connect and read are bounded; there is no overall timeout so large
/// uploads may take as long as they need.
pub fn http_client(http: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(http.connect_timeout)
        .read_timeout(http.read_timeout)
        .build()
        .context("Failed to build HTTP client")
}
