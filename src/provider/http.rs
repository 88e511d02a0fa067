use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::factory::{Connector, ProviderHandle};
use super::overrides::validate_endpoint;
use super::resolver::ResolvedProviderConfig;
use crate::config::NetworkSettings;
use crate::error::{Error, Result};
use crate::registry::{ChainDescriptor, TargetKey};

/// Header carrying the API key on Blockfrost-style endpoints
const API_KEY_HEADER: &str = "project_id";

/// Builds HTTP providers for REST ledger endpoints
#[derive(Debug, Clone)]
pub struct HttpConnector {
    connect_timeout: Duration,
    request_timeout: Duration,
    probe_on_connect: bool,
}

impl HttpConnector {
    pub fn new(settings: &NetworkSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            probe_on_connect: settings.probe_on_connect,
        }
    }

    fn client(&self, config: &ResolvedProviderConfig) -> Result<Client> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let mut value = HeaderValue::from_str(api_key.expose()).map_err(|_| {
                Error::ProviderConstructionFailed(format!(
                    "API key for {} contains invalid characters",
                    config.key()
                ))
            })?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        Client::builder()
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| Error::ProviderConstructionFailed(format!("failed to build HTTP client: {}", e)))
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(&NetworkSettings::default())
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Provider = HttpProvider;

    async fn connect(
        &self,
        descriptor: &ChainDescriptor,
        config: &ResolvedProviderConfig,
    ) -> Result<HttpProvider> {
        validate_endpoint(&config.endpoint)?;

        let provider = HttpProvider {
            target: descriptor.key(),
            descriptor: descriptor.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            display_name: config
                .display_name
                .clone()
                .unwrap_or_else(|| descriptor.display_name.clone()),
            client: self.client(config)?,
            valid: AtomicBool::new(true),
        };

        if self.probe_on_connect {
            provider.health().await.map_err(|e| {
                Error::ProviderConstructionFailed(format!("{} unreachable: {}", provider.endpoint, e))
            })?;
        }

        Ok(provider)
    }
}

/// Connection to a REST ledger endpoint. The API key is baked into the
/// client's default headers and cannot be read back.
#[derive(Debug)]
pub struct HttpProvider {
    target: TargetKey,
    descriptor: ChainDescriptor,
    endpoint: String,
    display_name: String,
    client: Client,
    valid: AtomicBool,
}

impl HttpProvider {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// GET `path` relative to the endpoint and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::RequestFailed(format!("{}: {}", self.target, e)))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            // Credentials were rejected; rebuild once the user fixes them
            self.valid.store(false, Ordering::SeqCst);
        }
        if !status.is_success() {
            return Err(Error::RequestFailed(format!("{} returned {}", self.target, status)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::RequestFailed(format!("invalid response from {}: {}", self.target, e)))
    }

    /// Query the endpoint's health route
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get_json("health").await
    }
}

impl ProviderHandle for HttpProvider {
    fn target(&self) -> &TargetKey {
        &self.target
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}
