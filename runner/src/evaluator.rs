use crate::core::{error::RunnerError, state::ScriptView};
use async_trait::async_trait;
use ride_common::account::Address;
use serde_json::{json, Value};
use thiserror::Error;

// Error code carried in evaluation-error JSON results
pub const EVALUATION_ERROR_CODE: i64 = 306;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Script evaluation failed: {0}")]
    Failed(String),
    // Cache miss with the upstream unavailable; poisons this script's
    // result only, never the batch
    #[error("Blockchain state unavailable: {0}")]
    StateUnavailable(#[from] RunnerError),
}

impl EvaluationError {
    pub fn to_json(&self) -> Value {
        json!({
            "error": EVALUATION_ERROR_CODE,
            "message": self.to_string(),
        })
    }
}

// The RIDE compiler/evaluator is an external collaborator: it receives the
// request's chain view and answers with the node-compatible evaluation JSON
// (`result`, `complexity`, optional trace).
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        view: &ScriptView,
        address: &Address,
        request: &Value,
    ) -> Result<Value, EvaluationError>;
}

// Default evaluator of the binary: delegates to a colocated evaluator
// service over HTTP. Anything the service answers is passed through
// untouched; transport problems become per-script evaluation errors.
pub struct RemoteEvaluator {
    client: reqwest::Client,
    url: String,
}

impl RemoteEvaluator {
    pub fn new(url: String) -> Self {
        RemoteEvaluator {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl ScriptEvaluator for RemoteEvaluator {
    async fn evaluate(
        &self,
        view: &ScriptView,
        address: &Address,
        request: &Value,
    ) -> Result<Value, EvaluationError> {
        let body = json!({
            "address": address,
            "request": request,
            "height": view.height(),
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|error| EvaluationError::Failed(error.to_string()))?;
        response
            .json()
            .await
            .map_err(|error| EvaluationError::Failed(error.to_string()))
    }
}
