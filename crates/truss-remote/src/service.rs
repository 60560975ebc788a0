//! Client for a model version deployed on Baseten.

use crate::{
    RemoteService,
    auth::AuthService,
    config::{ServiceConfig, normalize_base_url},
    error::TrussError,
    prediction::{PredictionRequest, PredictionResult},
    stream::{ChunkDecoder, PredictionStream},
    transport::{ReqwestTransport, ResponseBody, Transport},
};
use async_trait::async_trait;
use http::{
    Method, Request, Response,
    header::{CONTENT_TYPE, HeaderName, HeaderValue},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::instrument;
use url::Url;

/// Identity of one deployed model version.
#[derive(Clone)]
pub struct ServiceIdentity {
    pub model_id: String,
    pub model_version_id: String,
    pub is_draft: bool,
    pub service_url: Url,
    pub api_key: String,
}

impl std::fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("model_id", &self.model_id)
            .field("model_version_id", &self.model_version_id)
            .field("is_draft", &self.is_draft)
            .field("service_url", &self.service_url.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Local directory holding the packaged model the deployment was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrussHandle {
    truss_dir: PathBuf,
}

impl TrussHandle {
    pub fn new(truss_dir: impl Into<PathBuf>) -> Self {
        Self {
            truss_dir: truss_dir.into(),
        }
    }

    pub fn truss_dir(&self) -> &Path {
        &self.truss_dir
    }
}

/// Prediction client for a Baseten deployment.
pub struct BasetenService {
    model_id: String,
    model_version_id: String,
    is_draft: bool,
    service_url: Url,
    auth_service: AuthService,
    truss_handle: Option<TrussHandle>,
    transport: Arc<dyn Transport>,
}

impl BasetenService {
    /// Build a client using the default reqwest transport.
    pub fn new(
        identity: ServiceIdentity,
        truss_handle: Option<TrussHandle>,
    ) -> Result<Self, TrussError> {
        let auth_service = AuthService::new(identity.api_key)?;
        Ok(Self {
            model_id: identity.model_id,
            model_version_id: identity.model_version_id,
            is_draft: identity.is_draft,
            service_url: normalize_base_url(identity.service_url),
            auth_service,
            truss_handle,
            transport: Arc::new(ReqwestTransport::new()),
        })
    }

    pub fn from_config(cfg: &ServiceConfig) -> Result<Self, TrussError> {
        let identity = ServiceIdentity {
            model_id: cfg.model_id.clone(),
            model_version_id: cfg.model_version_id.clone(),
            is_draft: cfg.is_draft,
            service_url: cfg.service_url.clone(),
            api_key: cfg.api_key.clone(),
        };
        let service = Self::new(identity, cfg.truss_dir.clone().map(TrussHandle::new))?;
        match cfg.timeout_seconds {
            Some(secs) => Ok(service.with_transport(Arc::new(ReqwestTransport::with_timeout(
                Duration::from_secs(secs),
            )?))),
            None => Ok(service),
        }
    }

    /// Replace the transport used for outbound requests.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_version_id(&self) -> &str {
        &self.model_version_id
    }

    pub fn is_draft(&self) -> bool {
        self.is_draft
    }

    /// Base URL of the deployment, always ending in `/`.
    pub fn service_url(&self) -> &Url {
        &self.service_url
    }

    pub fn truss_handle(&self) -> Option<&TrussHandle> {
        self.truss_handle.as_ref()
    }

    pub fn predict_url(&self) -> Result<Url, TrussError> {
        Ok(self.service_url.join("predict")?)
    }

    /// Header name/value pairs authenticating requests to this deployment.
    pub fn authenticate(&self) -> HashMap<String, String> {
        self.auth_service.authenticate().header()
    }

    /// Build the HTTP request for a prediction.
    pub fn predict_request(
        &self,
        body: &PredictionRequest,
    ) -> Result<Request<Vec<u8>>, TrussError> {
        let json_body = serde_json::to_vec(body)?;
        let url = self.predict_url()?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in self.authenticate() {
            let name = HeaderName::try_from(name).map_err(http::Error::from)?;
            let value = HeaderValue::try_from(value).map_err(http::Error::from)?;
            builder = builder.header(name, value);
        }
        Ok(builder.body(json_body)?)
    }

    /// Send a prediction and normalize the response.
    #[instrument(
        name = "baseten.predict",
        skip_all,
        fields(model_id = %self.model_id, model_version_id = %self.model_version_id)
    )]
    pub async fn predict(
        &self,
        body: &PredictionRequest,
    ) -> Result<PredictionResult, TrussError> {
        let req = self.predict_request(body)?;
        let resp = self.transport.send(req, true).await?;
        log::debug!("prediction response status {}", resp.status());
        parse_prediction(resp)
    }
}

impl std::fmt::Debug for BasetenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasetenService")
            .field("model_id", &self.model_id)
            .field("model_version_id", &self.model_version_id)
            .field("is_draft", &self.is_draft)
            .field("service_url", &self.service_url.as_str())
            .field("auth_service", &self.auth_service)
            .field("truss_handle", &self.truss_handle)
            .finish()
    }
}

/// Turn a deployment response into a [`PredictionResult`].
///
/// A chunked body becomes a lazily decoded stream. A complete body must be a
/// JSON object with a `model_output` field, whose value is returned as-is.
pub fn parse_prediction(resp: Response<ResponseBody>) -> Result<PredictionResult, TrussError> {
    let (parts, body) = resp.into_parts();
    match body {
        ResponseBody::Chunked(stream) => {
            let decoder = ChunkDecoder::for_headers(&parts.headers)?;
            log::trace!("decoding chunked prediction as {}", decoder.name());
            Ok(PredictionResult::Stream(PredictionStream::new(stream, decoder)))
        }
        ResponseBody::Complete(bytes) => {
            let mut json: Value = serde_json::from_slice(&bytes)?;
            match json.get_mut("model_output").map(Value::take) {
                Some(output) => Ok(PredictionResult::Output(output)),
                None => Err(TrussError::MissingModelOutput {
                    raw_response: String::from_utf8_lossy(&bytes).into_owned(),
                }),
            }
        }
    }
}

#[async_trait]
impl RemoteService for BasetenService {
    fn service_url(&self) -> &Url {
        BasetenService::service_url(self)
    }

    fn is_draft(&self) -> bool {
        BasetenService::is_draft(self)
    }

    async fn predict(&self, body: &PredictionRequest) -> Result<PredictionResult, TrussError> {
        BasetenService::predict(self, body).await
    }

    fn authenticate(&self) -> HashMap<String, String> {
        BasetenService::authenticate(self)
    }
}
