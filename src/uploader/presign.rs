use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, error};

use super::error::{Result, UploadError};

/// Destination and signed upload URL issued by the application server
///
/// Valid for one upload attempt only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PreSignedCredentials {
    #[serde(rename = "destinationUrl")]
    pub object_url: String,
    #[serde(rename = "signedUrl", default)]
    pub signed_url: String,
}

/// Fetches [`PreSignedCredentials`] from the application server
#[derive(Clone)]
pub struct PreSignClient {
    client: reqwest::Client,
}

impl PreSignClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Exchange a bearer token for a signed upload URL
    ///
    /// A single `POST` with an empty body. There is no retry: a transport
    /// error, a non-success status, an unparsable body, a missing destination
    /// or an empty signed URL all fail the attempt.
    pub async fn fetch_credentials(
        &self,
        api_url: &str,
        access_token: &str,
    ) -> Result<PreSignedCredentials> {
        debug!("Requesting pre-signed credentials from {}", api_url);

        let response = self
            .client
            .post(api_url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .body("")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Pre-sign call failed with status {}: {}", status, text);
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                text
            };
            return Err(UploadError::pre_sign(Some(status.as_u16()), message));
        }

        let body = response.bytes().await?;
        let credentials: PreSignedCredentials = serde_json::from_slice(&body).map_err(|e| {
            UploadError::pre_sign(Some(status.as_u16()), format!("Invalid response: {}", e))
        })?;

        if credentials.signed_url.is_empty() {
            error!("No pre signed credentials fetched");
            return Err(UploadError::pre_sign(None, "No pre-signed url provided"));
        }
        if credentials.object_url.is_empty() {
            error!("Pre-sign response has no destination url");
            return Err(UploadError::pre_sign(None, "No destination url provided"));
        }

        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_field_names() {
        let creds: PreSignedCredentials = serde_json::from_str(
            r#"{"destinationUrl":"https://cdn/x","signedUrl":"https://s3/signed","extra":1}"#,
        )
        .unwrap();
        assert_eq!(creds.object_url, "https://cdn/x");
        assert_eq!(creds.signed_url, "https://s3/signed");
    }

    #[test]
    fn test_destination_url_is_required() {
        let decoded =
            serde_json::from_str::<PreSignedCredentials>(r#"{"signedUrl":"https://s3/signed"}"#);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_missing_signed_url_decodes_empty() {
        let creds: PreSignedCredentials =
            serde_json::from_str(r#"{"destinationUrl":"https://cdn/x"}"#).unwrap();
        assert!(creds.signed_url.is_empty());
    }
}
