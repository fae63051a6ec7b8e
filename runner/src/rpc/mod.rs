use crate::{
    config::{RpcConfig, VERSION},
    core::{
        requests::{RequestError, RequestRegistry},
        state::ChainState,
    },
};
use actix_web::{
    dev::ServerHandle,
    get,
    http::StatusCode,
    web::{self, Data, Json},
    App, HttpResponse, HttpServer, Responder, ResponseError,
};
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use ride_common::account::Address;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedApiServer = Arc<ApiServer>;

// Error codes of the validation-error response envelope
pub const API_ERROR_INVALID_ADDRESS: i64 = 199;
pub const API_ERROR_NOT_DAPP: i64 = 306;
pub const API_ERROR_UNAVAILABLE: i64 = 503;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Address {0} is not a dApp")]
    NotDApp(Address),
    #[error("Blockchain state unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    fn code(&self) -> i64 {
        match self {
            ApiError::InvalidAddress(_) => API_ERROR_INVALID_ADDRESS,
            ApiError::NotDApp(_) => API_ERROR_NOT_DAPP,
            ApiError::Unavailable(_) => API_ERROR_UNAVAILABLE,
        }
    }
}

impl From<RequestError> for ApiError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::NotDApp(address) => ApiError::NotDApp(address),
            RequestError::Unavailable(message) => ApiError::Unavailable(message),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}

pub struct ApiServer {
    handle: Mutex<Option<ServerHandle>>,
}

impl ApiServer {
    pub async fn new(
        registry: Arc<RequestRegistry>,
        state: Arc<ChainState>,
        config: RpcConfig,
    ) -> Result<SharedApiServer, anyhow::Error> {
        let prometheus = if config.enable_metrics {
            let (recorder, _) = PrometheusBuilder::new()
                .build()
                .context("Failed to create Prometheus handler")?;
            let handle = recorder.handle();
            metrics::set_global_recorder(Box::new(recorder))
                .context("Failed to set global recorder for Prometheus")?;
            info!("Prometheus metrics enabled on /metrics");
            Some(handle)
        } else {
            None
        };

        let server = Arc::new(ApiServer {
            handle: Mutex::new(None),
        });

        info!("Starting HTTP server on {}", config.bind_address);
        {
            let builder = HttpServer::new(move || {
                App::new()
                    .app_data(Data::new(registry.clone()))
                    .app_data(Data::new(state.clone()))
                    .app_data(Data::new(prometheus.clone()))
                    .route(
                        "/utils/script/evaluate/{address}",
                        web::post().to(evaluate_endpoint),
                    )
                    .route("/status", web::get().to(status_endpoint))
                    .route("/metrics", web::get().to(metrics_endpoint))
                    .service(index)
            })
            .disable_signals()
            .workers(config.threads)
            .bind(&config.bind_address)?;

            let http_server = builder.run();
            {
                // save the server handle to be able to stop it later
                let handle = http_server.handle();
                let mut lock = server.handle.lock().await;
                *lock = Some(handle);
            }
            tokio::spawn(http_server);
        }

        Ok(server)
    }

    pub async fn stop(&self) {
        info!("Stopping HTTP server...");
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            handle.stop(false).await;
            info!("HTTP server is now stopped!");
        } else {
            warn!("HTTP server is not running!");
        }
    }
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(format!("RIDE runner\nRunning on: {}", VERSION))
}

// Evaluate a script expression or invocation against the cached chain view.
// Known requests answer from the last stored result; unknown ones are
// admitted, evaluated once and registered for incremental re-evaluation.
async fn evaluate_endpoint(
    registry: Data<Arc<RequestRegistry>>,
    path: web::Path<String>,
    body: Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let address: Address = path
        .into_inner()
        .parse()
        .map_err(|error| ApiError::InvalidAddress(format!("{}", error)))?;

    let result = registry
        .get_cached_result_or_run(address, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

async fn status_endpoint(
    registry: Data<Arc<RequestRegistry>>,
    state: Data<Arc<ChainState>>,
) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "height": state.height(),
        "requests": registry.len(),
    }))
}

async fn metrics_endpoint(handle: Data<Option<PrometheusHandle>>) -> impl Responder {
    match handle.as_ref() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().body("Prometheus metrics are not enabled"),
    }
}
