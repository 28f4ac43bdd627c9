//! Azure Blob Storage backend.

use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AzureConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Azure Blob Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub account: String,
    pub container: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) fn construct_azure(
        config: AzureConfig,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_container_name(&config.container)
            .with_retry(RetryConfig::default());

        for (key, value) in options {
            let key: AzureConfigKey = key.parse().context(AzureConfigSnafu)?;
            builder = builder.with_config(key, value.clone());
        }

        let mut canonical_url = format!(
            "abfss://{}@{}.dfs.core.windows.net",
            config.container, config.account
        );
        if let Some(key) = &config.key {
            canonical_url = format!("{canonical_url}/{key}");
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(AzureConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::Azure(config),
            object_store,
            canonical_url,
        })
    }
}
