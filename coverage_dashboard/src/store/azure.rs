//! Azure Blob Storage connection strings.
//!
//! Accepts the `Key=Value;Key=Value` form the Azure portal hands out:
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net
//! UseDevelopmentStorage=true
//! ```

use std::fmt;

use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};

use super::{StoreError, StoreResult};

#[derive(Clone, PartialEq, Eq)]
pub enum AzureCredentials {
    /// Local Azurite emulator with its well-known account.
    Emulator,
    AccountKey { account: String, access_key: String },
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emulator => f.write_str("Emulator"),
            Self::AccountKey { account, .. } => f
                .debug_struct("AccountKey")
                .field("account", account)
                .field("access_key", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConnection {
    pub credentials: AzureCredentials,
    /// Explicit `BlobEndpoint`, when the account does not live on the public cloud.
    pub blob_endpoint: Option<String>,
}

impl AzureConnection {
    pub fn parse(connection_string: &str) -> StoreResult<Self> {
        let mut account = None;
        let mut access_key = None;
        let mut blob_endpoint = None;
        let mut emulator = false;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            // Account keys are base64 and may end in '='.
            let Some((key, value)) = part.split_once('=') else {
                return Err(StoreError::NotConfigured {
                    message: format!("malformed connection string segment '{part}'"),
                });
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "accountname" => account = Some(value.trim().to_string()),
                "accountkey" => access_key = Some(value.trim().to_string()),
                "blobendpoint" => blob_endpoint = Some(value.trim().to_string()),
                "usedevelopmentstorage" => emulator = value.trim().eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        let credentials = if emulator {
            AzureCredentials::Emulator
        } else {
            match (account, access_key) {
                (Some(account), Some(access_key)) => AzureCredentials::AccountKey {
                    account,
                    access_key,
                },
                _ => {
                    return Err(StoreError::NotConfigured {
                        message: "connection string needs AccountName and AccountKey".to_string(),
                    })
                }
            }
        };

        Ok(Self {
            credentials,
            blob_endpoint,
        })
    }

    pub fn build(&self, container: &str) -> StoreResult<MicrosoftAzure> {
        if container.trim().is_empty() {
            return Err(StoreError::NotConfigured {
                message: "blob container name is empty".to_string(),
            });
        }

        let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);
        builder = match &self.credentials {
            AzureCredentials::Emulator => builder.with_use_emulator(true),
            AzureCredentials::AccountKey {
                account,
                access_key,
            } => builder.with_account(account).with_access_key(access_key),
        };
        if let Some(endpoint) = &self.blob_endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder.build().map_err(|e| StoreError::NotConfigured {
            message: format!("failed to create Azure blob client: {e}"),
        })
    }
}
