//! Configuration types for sluice-connect
//!
//! Sinks are configured from YAML. `${VAR}` and `${VAR:-default}` references
//! are expanded from the environment before parsing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sluice_cdc::{CdcError, DeleteHandling, EnvelopeDecoder, EnvelopeLayout, RowExtractor};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::{Validate, ValidationError};

#[cfg(feature = "bigquery")]
use crate::bigquery::BigQueryStoreConfig;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Retry and remediation settings of the adaptive writer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate, JsonSchema)]
pub struct WriterConfig {
    /// Resends allowed after the first send of a batch
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 1000))]
    pub max_retries: u32,

    /// Wait between resends in milliseconds
    #[serde(default = "default_retry_wait_ms")]
    #[validate(range(max = 3_600_000))]
    pub retry_wait_ms: u64,

    /// Create missing tables from the registry schema
    #[serde(default)]
    pub auto_create_tables: bool,

    /// Tables written concurrently by a writer pool
    #[serde(default = "default_max_concurrent_tables")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_tables: usize,
}

fn default_max_retries() -> u32 {
    30
}

fn default_retry_wait_ms() -> u64 {
    30_000
}

fn default_max_concurrent_tables() -> usize {
    4
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_wait_ms: default_retry_wait_ms(),
            auto_create_tables: false,
            max_concurrent_tables: default_max_concurrent_tables(),
        }
    }
}

impl WriterConfig {
    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}

/// How inbound change records become rows
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate, JsonSchema)]
pub struct AssemblerConfig {
    /// Slot layout used when a record carries no envelope schema
    #[serde(default)]
    #[validate(custom(function = "validate_layout"))]
    pub layout: EnvelopeLayout,

    /// Prefer the envelope schema embedded in a record over `layout`
    #[serde(default = "default_true")]
    pub use_embedded_schema: bool,

    /// What to do with delete events
    #[serde(default)]
    pub delete_handling: DeleteHandling,

    /// Add the operation code column
    #[serde(default)]
    pub add_op_field: bool,

    /// Add the event timestamp column
    #[serde(default)]
    pub add_ts_field: bool,

    /// Prefix of added columns
    #[serde(default = "default_field_prefix")]
    #[validate(length(min = 1, max = 64))]
    pub field_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_field_prefix() -> String {
    "__".to_string()
}

fn validate_layout(layout: &EnvelopeLayout) -> Result<(), ValidationError> {
    layout.validate().map_err(|e| {
        let mut err = ValidationError::new("envelope_layout");
        err.message = Some(e.to_string().into());
        err
    })
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            layout: EnvelopeLayout::default(),
            use_embedded_schema: default_true(),
            delete_handling: DeleteHandling::default(),
            add_op_field: false,
            add_ts_field: false,
            field_prefix: default_field_prefix(),
        }
    }
}

impl AssemblerConfig {
    /// Build the envelope decoder for this configuration
    pub fn decoder(&self) -> Result<EnvelopeDecoder, CdcError> {
        Ok(EnvelopeDecoder::new(self.layout.clone())?.use_embedded_schema(self.use_embedded_schema))
    }

    /// Build the row extractor for this configuration
    pub fn extractor(&self) -> RowExtractor {
        let mut extractor = RowExtractor::new()
            .delete_handling(self.delete_handling)
            .field_prefix(self.field_prefix.clone());
        if self.add_op_field {
            extractor = extractor.add_op_field();
        }
        if self.add_ts_field {
            extractor = extractor.add_ts_field();
        }
        extractor
    }
}

/// Root sink configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct SinkConfig {
    /// Sink name, used in logs
    #[serde(default = "default_sink_name")]
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[serde(default)]
    #[validate(nested)]
    pub writer: WriterConfig,

    #[serde(default)]
    #[validate(nested)]
    pub assembler: AssemblerConfig,

    /// BigQuery connection settings
    #[cfg(feature = "bigquery")]
    #[serde(default)]
    #[validate(nested)]
    pub bigquery: Option<BigQueryStoreConfig>,
}

fn default_sink_name() -> String {
    "sluice".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: default_sink_name(),
            writer: WriterConfig::default(),
            assembler: AssemblerConfig::default(),
            #[cfg(feature = "bigquery")]
            bigquery: None,
        }
    }
}

impl SinkConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
        Ok(config)
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
