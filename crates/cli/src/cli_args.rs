use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use truss_remote::{PredictionRequest, ServiceConfig, auth::API_KEY_ENV};
use url::Url;

/// Command line arguments for the prediction client
#[derive(Parser, Debug)]
#[clap(
    name = "truss-predict",
    about = "Invoke a packaged model deployed on Baseten"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a prediction request and print the output
    Predict {
        #[command(flatten)]
        service: ServiceArgs,

        /// JSON object to send as the request body
        #[arg(short, long, value_parser = parse_json_object, conflicts_with = "data_file")]
        data: Option<PredictionRequest>,

        /// Read the JSON request body from a file
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Show which headers authenticate requests (values redacted)
    Headers {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Print the JSON schema of the service config file
    Schema,
}

/// Where to find the deployment. Flags override values from `--config`.
#[derive(Args, Debug, Default)]
pub struct ServiceArgs {
    /// TOML service config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub model_id: Option<String>,

    #[arg(long)]
    pub model_version_id: Option<String>,

    /// Base URL of the deployed model version
    #[arg(long)]
    pub service_url: Option<Url>,

    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Target the development deployment
    #[arg(long)]
    pub draft: bool,

    #[arg(long)]
    pub timeout_seconds: Option<u64>,
}

impl ServiceArgs {
    pub fn resolve(self) -> Result<ServiceConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServiceConfig::load(path)?,
            None => ServiceConfig {
                model_id: self
                    .model_id
                    .clone()
                    .ok_or_else(|| anyhow!("--model-id is required without --config"))?,
                model_version_id: self
                    .model_version_id
                    .clone()
                    .ok_or_else(|| anyhow!("--model-version-id is required without --config"))?,
                is_draft: false,
                api_key: String::new(),
                service_url: self
                    .service_url
                    .clone()
                    .ok_or_else(|| anyhow!("--service-url is required without --config"))?,
                timeout_seconds: None,
                truss_dir: None,
            },
        };

        if let Some(model_id) = self.model_id {
            cfg.model_id = model_id;
        }
        if let Some(version) = self.model_version_id {
            cfg.model_version_id = version;
        }
        if let Some(url) = self.service_url {
            cfg.service_url = url;
        }
        if let Some(key) = self.api_key {
            cfg.api_key = key;
        }
        if self.timeout_seconds.is_some() {
            cfg.timeout_seconds = self.timeout_seconds;
        }
        cfg.is_draft |= self.draft;
        Ok(cfg)
    }
}

/// parse a JSON object argument into a request body
pub fn parse_json_object(s: &str) -> Result<PredictionRequest, String> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("request body must be a JSON object, got `{}`", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}
