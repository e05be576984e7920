//! API configuration

use instaflow_cloud::{CloudError, Result};
use std::fmt;

pub const DEFAULT_API_URL: &str = "https://api.instaclustr.com/provisioning/v1";

pub const ENV_ACCESS_KEY: &str = "INSTACLUSTR_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "INSTACLUSTR_SECRET_KEY";
pub const ENV_URL: &str = "INSTACLUSTR_URL";

/// Credentials and endpoint of the provisioning API
#[derive(Clone)]
pub struct ApiConfig {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
}

impl ApiConfig {
    pub fn new(
        url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Create ApiConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let access_key = std::env::var(ENV_ACCESS_KEY)
            .map_err(|_| CloudError::InvalidConfig(format!("{ENV_ACCESS_KEY} is not set")))?;
        let secret_key = std::env::var(ENV_SECRET_KEY)
            .map_err(|_| CloudError::InvalidConfig(format!("{ENV_SECRET_KEY} is not set")))?;
        let url = std::env::var(ENV_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let config = Self::new(url, access_key, secret_key);
        config.validate()?;
        Ok(config)
    }

    /// Reject empty settings before any request is attempted.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("API URL", &self.url),
            ("access key", &self.access_key),
            ("secret key", &self.secret_key),
        ] {
            if value.trim().is_empty() {
                return Err(CloudError::InvalidConfig(format!(
                    "Instaclustr {name} must not be empty"
                )));
            }
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(CloudError::InvalidConfig(format!(
                "Instaclustr API URL '{}' must start with http:// or https://",
                self.url
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("url", &self.url)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
