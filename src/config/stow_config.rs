use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ConfigError;
use crate::stow::HttpContentType;

/// Connection settings of a STOW-RS endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct StowConfig {
    /// Store endpoint, e.g. `https://pacs.example.org/dicom-web/studies`
    pub url: String,

    /// Representation of the metadata part of encapsulated documents
    #[serde(default)]
    pub content_type: HttpContentType,

    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// Sent verbatim with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whole-exchange deadline; unset means no limit
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl StowConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: HttpContentType::default(),
            accept: default_accept(),
            user_agent: None,
            headers: BTreeMap::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                self.url
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "stow.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "stow.request_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }

        for (name, value) in &self.headers {
            http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            http::HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(format!("{}: {}", name, value)))?;
        }
        Ok(())
    }
}

fn default_accept() -> String {
    HttpContentType::Json.as_str().to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
