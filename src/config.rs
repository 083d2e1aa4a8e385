use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 5 * 60;

/// Configuration for both upload strategies
///
/// Built once and never mutated while an upload runs. Either strategy may be
/// absent, but not both.
#[derive(Debug, Clone)]
pub struct Config {
    pub presign: Option<PreSignConfig>,
    pub storage: Option<StorageConfig>,
    pub http: HttpConfig,
}

/// Application server that hands out signed upload URLs
#[derive(Debug, Clone)]
pub struct PreSignConfig {
    pub api_url: String,
    pub access_token: String,
}

/// Object storage used by the managed transfer path
#[derive(Clone)]
pub struct StorageConfig {
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub target_path: String,
}

// keep the secret out of logs
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("target_path", &self.target_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if no strategy is configured or a value is invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let presign = match lookup("PRESIGN_API_URL") {
            Some(api_url) => {
                Self::validate_api_url(&api_url)?;
                let access_token = lookup("PRESIGN_ACCESS_TOKEN").unwrap_or_default();
                if access_token.trim().is_empty() {
                    anyhow::bail!("PRESIGN_ACCESS_TOKEN must be set when PRESIGN_API_URL is set");
                }
                Some(PreSignConfig {
                    api_url,
                    access_token,
                })
            }
            None => None,
        };

        let storage = match lookup("S3_BUCKET") {
            Some(bucket) => {
                Self::validate_bucket_name(&bucket)?;

                let region = lookup("AWS_REGION")
                    .context("AWS_REGION not found in environment. Please set it in .env file")?;
                Self::validate_region(&region)?;

                let access_key = lookup("AWS_ACCESS_KEY_ID").context(
                    "AWS_ACCESS_KEY_ID not found in environment. Please set it in .env file",
                )?;
                let secret_key = lookup("AWS_SECRET_ACCESS_KEY").context(
                    "AWS_SECRET_ACCESS_KEY not found in environment. Please set it in .env file",
                )?;

                let target_path = lookup("S3_TARGET_PATH").unwrap_or_default();
                Self::validate_target_path(&target_path)?;

                Some(StorageConfig {
                    region,
                    bucket,
                    access_key,
                    secret_key,
                    target_path,
                })
            }
            None => None,
        };

        if presign.is_none() && storage.is_none() {
            anyhow::bail!(
                "No upload strategy configured. Set PRESIGN_API_URL for pre-signed uploads \
                 or S3_BUCKET for managed uploads"
            );
        }

        let http = HttpConfig {
            connect_timeout: Self::parse_secs(
                lookup("HTTP_CONNECT_TIMEOUT_SECS"),
                "HTTP_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            read_timeout: Self::parse_secs(
                lookup("HTTP_READ_TIMEOUT_SECS"),
                "HTTP_READ_TIMEOUT_SECS",
                DEFAULT_READ_TIMEOUT_SECS,
            )?,
        };

        Ok(Self {
            presign,
            storage,
            http,
        })
    }

    fn parse_secs(value: Option<String>, name: &str, default: u64) -> Result<Duration> {
        let secs = match value {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} '{}' is not a number of seconds", name, v))?,
            None => default,
        };
        if secs == 0 {
            anyhow::bail!("{} must be greater than zero", name);
        }
        Ok(Duration::from_secs(secs))
    }

    fn validate_api_url(url: &str) -> Result<()> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("PRESIGN_API_URL '{}' must be an http(s) URL", url);
        }
        Ok(())
    }

    /// Validate AWS region format
    fn validate_region(region: &str) -> Result<()> {
        if region.is_empty() {
            anyhow::bail!("AWS_REGION cannot be empty");
        }

        // Basic validation - ensure it looks like a region (contains a dash)
        if !region.contains('-') {
            anyhow::bail!(
                "AWS_REGION '{}' doesn't look like a valid region (e.g., us-west-2, eu-west-1)",
                region
            );
        }

        Ok(())
    }

    /// Validate S3 bucket name according to AWS rules
    fn validate_bucket_name(bucket: &str) -> Result<()> {
        if bucket.len() < 3 || bucket.len() > 63 {
            anyhow::bail!(
                "S3_BUCKET '{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            );
        }

        let edge_ok =
            |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !edge_ok(bucket.chars().next()) || !edge_ok(bucket.chars().last()) {
            anyhow::bail!(
                "S3_BUCKET '{}' must start and end with a lowercase letter or number",
                bucket
            );
        }

        if let Some(c) = bucket
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
        {
            anyhow::bail!(
                "S3_BUCKET '{}' contains invalid character '{}'. Only lowercase letters, numbers, hyphens, and periods are allowed",
                bucket,
                c
            );
        }

        if bucket.contains("..") {
            anyhow::bail!("S3_BUCKET '{}' cannot contain consecutive periods", bucket);
        }

        if bucket.split('.').all(|part| part.parse::<u8>().is_ok()) {
            anyhow::bail!(
                "S3_BUCKET '{}' cannot be formatted as an IP address",
                bucket
            );
        }

        Ok(())
    }

    /// Validate S3 target path
    fn validate_target_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }

        if path.contains("//") {
            anyhow::bail!(
                "S3_TARGET_PATH '{}' contains consecutive slashes (not allowed)",
                path
            );
        }

        if path.contains("..") {
            anyhow::bail!(
                "S3_TARGET_PATH '{}' contains '..' (not allowed for security)",
                path
            );
        }

        if path.starts_with('/') {
            anyhow::bail!(
                "S3_TARGET_PATH '{}' should not start with '/' (use relative path)",
                path
            );
        }

        Ok(())
    }
}

impl StorageConfig {
    /// Prefix a generated object name with the target path
    pub fn build_object_key(&self, name: &str) -> String {
        if self.target_path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.target_path.trim_end_matches('/'), name)
        }
    }
}
