//! Storage account credentials and connection strings

use crate::config::ConfigError;
use crate::utils::Secret;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::BTreeMap;

pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Account name and key for a storage account
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub account_name: String,
    pub account_key: Secret,
    pub protocol: String,
    pub endpoint_suffix: String,
    /// Explicit blob endpoint, e.g. a local emulator
    pub blob_endpoint: Option<String>,
}

impl AzureCredentials {
    pub fn new(account_name: impl Into<String>, account_key: impl Into<Secret>) -> Self {
        Self {
            account_name: account_name.into(),
            account_key: account_key.into(),
            protocol: "https".to_string(),
            endpoint_suffix: DEFAULT_ENDPOINT_SUFFIX.to_string(),
            blob_endpoint: None,
        }
    }

    /// Parse a `Key=Value;...` storage connection string
    pub fn from_connection_string(value: &str) -> Result<Self, ConfigError> {
        let mut fields = BTreeMap::new();
        for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, val) = part.split_once('=').ok_or_else(|| {
                ConfigError::ValidationError(
                    "Malformed connection string: expected Key=Value segments".to_string(),
                )
            })?;
            fields.insert(key.trim().to_lowercase(), val.trim().to_string());
        }

        let required = |name: &str| {
            fields
                .get(&name.to_lowercase())
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingParameter(name.to_string()))
        };

        let mut credentials = Self::new(required("AccountName")?, required("AccountKey")?);
        if let Some(protocol) = fields.get("defaultendpointsprotocol") {
            credentials.protocol = protocol.clone();
        }
        if let Some(suffix) = fields.get("endpointsuffix") {
            credentials.endpoint_suffix = suffix.clone();
        }
        credentials.blob_endpoint = fields.get("blobendpoint").cloned();
        Ok(credentials)
    }

    /// Render the credentials as a connection string
    pub fn connection_string(&self) -> String {
        let mut value = format!(
            "DefaultEndpointsProtocol={};AccountName={};AccountKey={};EndpointSuffix={}",
            self.protocol,
            self.account_name,
            self.account_key.expose(),
            self.endpoint_suffix
        );
        if let Some(endpoint) = &self.blob_endpoint {
            value.push_str(";BlobEndpoint=");
            value.push_str(endpoint);
        }
        value
    }

    /// Base URL of the blob service, without a trailing slash
    pub fn blob_endpoint(&self) -> String {
        match &self.blob_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!(
                "{}://{}.blob.{}",
                self.protocol, self.account_name, self.endpoint_suffix
            ),
        }
    }

    /// Check that the account key decodes as base64
    pub fn validate_key(&self) -> Result<(), ConfigError> {
        STANDARD
            .decode(self.account_key.expose().trim())
            .map(|_| ())
            .map_err(|_| {
                ConfigError::ValidationError("Storage account key is not valid base64".to_string())
            })
    }
}
