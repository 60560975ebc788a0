//! File-based configuration for a deployed model.
//!
//! ```toml
//! model_id = "abc123"
//! model_version_id = "v1"
//! service_url = "https://model-abc123.api.baseten.co/deployment/v1"
//! api_key = "..."       # optional, falls back to BASETEN_API_KEY
//! timeout_seconds = 60  # optional
//! ```

use crate::{auth::AuthService, error::TrussError};
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use url::Url;

pub(crate) fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let p = url.path().to_string();
        url.set_path(&(p + "/"));
    }
    url
}

fn deserialize_base_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let url = Url::deserialize(deserializer)?;
    Ok(normalize_base_url(url))
}

fn url_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "string",
        "format": "uri"
    })
}

/// Connection settings for one deployed model version.
#[derive(Debug, Clone, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ServiceConfig {
    pub model_id: String,
    pub model_version_id: String,
    /// Whether the target is a development (draft) deployment.
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[schemars(schema_with = "url_schema")]
    #[serde(deserialize_with = "deserialize_base_url")]
    pub service_url: Url,
    /// Request timeout applied by the HTTP transport.
    pub timeout_seconds: Option<u64>,
    /// Local directory of the packaged model, if known.
    pub truss_dir: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, TrussError> {
        let mut cfg: ServiceConfig = toml::from_str(s)?;
        if cfg.api_key.is_empty()
            && let Ok(auth) = AuthService::from_env()
        {
            cfg.api_key = auth.api_key().to_string();
        }
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrussError> {
        let path = path.as_ref();
        log::debug!("loading service config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// JSON schema of the config file.
    pub fn config_schema() -> Result<Value, TrussError> {
        let schema = schema_for!(ServiceConfig);
        Ok(serde_json::to_value(&schema)?)
    }
}
