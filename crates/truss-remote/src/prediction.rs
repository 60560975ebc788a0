use crate::stream::PredictionStream;
use serde_json::{Map, Value};

/// Model invocation payload, forwarded to the deployment as-is.
pub type PredictionRequest = Map<String, Value>;

/// Outcome of a prediction call.
#[derive(Debug)]
pub enum PredictionResult {
    /// The `model_output` of a complete JSON response.
    Output(Value),
    /// Decoded text chunks of a chunked response, produced lazily.
    Stream(PredictionStream),
}

impl PredictionResult {
    pub fn is_stream(&self) -> bool {
        matches!(self, PredictionResult::Stream(_))
    }

    pub fn into_output(self) -> Option<Value> {
        match self {
            PredictionResult::Output(value) => Some(value),
            PredictionResult::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<PredictionStream> {
        match self {
            PredictionResult::Stream(stream) => Some(stream),
            PredictionResult::Output(_) => None,
        }
    }
}
