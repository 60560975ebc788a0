//! Client for packaged models served from a remote deployment.
//!
//! # Overview
//! A [`service::BasetenService`] sends prediction payloads to a deployed model
//! version and normalizes the answer into a [`prediction::PredictionResult`]:
//!
//! - a complete JSON response yields its `model_output` value,
//! - a chunked response yields a lazily decoded stream of text chunks.
//!
//! Request construction and response parsing are plain functions over
//! [`http`] types; the network round trip is delegated to a
//! [`transport::Transport`], with a `reqwest` implementation provided.

use std::collections::HashMap;
use url::Url;

/// Credential handling
pub mod auth;

/// Service configuration files
pub mod config;

/// Error types and handling
pub mod error;

pub mod prediction;

/// Baseten deployment client
pub mod service;

/// Incremental decoding of streamed output
pub mod stream;

pub mod transport;

pub use config::ServiceConfig;
pub use error::TrussError;
pub use prediction::{PredictionRequest, PredictionResult};
pub use service::{BasetenService, ServiceIdentity, TrussHandle};
pub use stream::{ChunkDecoder, PredictionStream};
pub use transport::{ReqwestTransport, ResponseBody, Transport};

/// A deployment target that serves predictions for a packaged model.
///
/// Liveness and readiness depend on how a specific target exposes them, so
/// the defaults report them as unsupported.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    fn service_url(&self) -> &Url;

    fn is_draft(&self) -> bool;

    async fn predict(
        &self,
        body: &PredictionRequest,
    ) -> Result<PredictionResult, TrussError>;

    /// Headers to attach to requests against this target.
    fn authenticate(&self) -> HashMap<String, String>;

    async fn is_live(&self) -> Result<bool, TrussError> {
        Err(TrussError::NotImplemented("liveness check".into()))
    }

    async fn is_ready(&self) -> Result<bool, TrussError> {
        Err(TrussError::NotImplemented("readiness check".into()))
    }
}
