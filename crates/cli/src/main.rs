use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::io::{self, Write};
use std::path::Path;
use truss_remote::{BasetenService, PredictionRequest, PredictionResult, ServiceConfig};

mod cli_args;
mod logging;

use cli_args::{CliArgs, Commands, parse_json_object};
use logging::setup_logging;

fn read_body(
    data: Option<PredictionRequest>,
    data_file: Option<&Path>,
) -> Result<PredictionRequest> {
    match (data, data_file) {
        (Some(body), _) => Ok(body),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse_json_object(&raw).map_err(anyhow::Error::msg)
        }
        (None, None) => Ok(PredictionRequest::new()),
    }
}

async fn run_predict(service: &BasetenService, body: &PredictionRequest) -> Result<()> {
    match service.predict(body).await? {
        PredictionResult::Output(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        PredictionResult::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                let mut stdout = io::stdout().lock();
                stdout.write_all(chunk.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(io::stdout())?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let args = CliArgs::parse();

    match args.command {
        Commands::Predict {
            service,
            data,
            data_file,
        } => {
            let cfg = service.resolve()?;
            let service = BasetenService::from_config(&cfg)?;
            log::info!("predicting against {}", service.predict_url()?);
            let body = read_body(data, data_file.as_deref())?;
            run_predict(&service, &body).await?;
        }
        Commands::Headers { service } => {
            let service = BasetenService::from_config(&service.resolve()?)?;
            let mut names: Vec<String> = service.authenticate().into_keys().collect();
            names.sort();
            for name in names {
                println!("{name}: <redacted>");
            }
        }
        Commands::Schema => {
            let schema = ServiceConfig::config_schema()?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{read_body, run_predict};
    use truss_remote::{BasetenService, PredictionRequest, ServiceIdentity};

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn predict_future_can_move_between_threads() {
        let service = BasetenService::new(
            ServiceIdentity {
                model_id: "m1".into(),
                model_version_id: "v1".into(),
                is_draft: false,
                service_url: "https://x.test".parse().unwrap(),
                api_key: "k".into(),
            },
            None,
        )
        .unwrap();
        let body = PredictionRequest::new();
        assert_send(&run_predict(&service, &body));
    }

    #[test]
    fn missing_body_defaults_to_empty_object() {
        assert!(read_body(None, None).unwrap().is_empty());
    }
}
