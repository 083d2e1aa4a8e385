use thiserror::Error;

use super::facility::TransferState;

/// Errors delivered to an [`UploadListener`](super::UploadListener) as the
/// payload of a failed upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// The pre-sign call returned a non-success status, an unreadable body
    /// or an empty signed URL
    #[error("Pre-sign request failed{}: {message}", status_suffix(.status))]
    PreSign {
        status: Option<u16>,
        message: String,
    },

    /// Network-level failure during the pre-sign call or the upload
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The signed-URL PUT completed but was rejected
    #[error("Upload rejected with status {status}: {message}")]
    ServerRejection { status: u16, message: String },

    /// The managed transfer ended in a failed or canceled state
    #[error("Transfer {state}")]
    ManagedTransfer { state: TransferState },

    /// Error reported by the transfer facility
    #[error("Transfer error: {0:#}")]
    Transfer(#[from] anyhow::Error),

    /// Local file could not be opened or read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested strategy has no configuration
    #[error("{0} upload is not configured")]
    NotConfigured(&'static str),

    /// The caller canceled the upload
    #[error("Upload canceled")]
    Canceled,

    /// The worker ended before reporting an outcome
    #[error("Upload interrupted before completion")]
    Interrupted,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl UploadError {
    pub(crate) fn pre_sign(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::PreSign {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::PreSign { status, .. } => *status,
            Self::ServerRejection { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::PreSign { .. } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check PRESIGN_API_URL points at the application server\n  \
                     2. Refresh PRESIGN_ACCESS_TOKEN, it may have expired",
                    self
                )
            }
            Self::Transport(e) => {
                format!(
                    "Network error: {}\n\nPossible solutions:\n  \
                     1. Check your internet connection\n  \
                     2. Raise HTTP_CONNECT_TIMEOUT_SECS or HTTP_READ_TIMEOUT_SECS\n  \
                     3. Check if you're behind a proxy/firewall",
                    e
                )
            }
            Self::ServerRejection { status: 403, .. } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. The signed URL may have expired, retry the upload\n  \
                     2. Verify the application server signs PUT requests",
                    self
                )
            }
            Self::ManagedTransfer { .. } | Self::Transfer(_) => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check your AWS credentials and bucket permissions\n  \
                     2. Check AWS_REGION in .env matches bucket region",
                    self
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;
