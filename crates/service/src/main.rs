use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task;
use tracing::{error, info};

use contract_miner_core::{ChunkConfig, Chunker, MinerError};
use contract_miner_index::{BackendKind, VectorIndex};
use contract_miner_llm::ModelClient;
use contract_miner_rag::{
    AuditStore, EngineConfig, QueryEngine, QueryRequest, StoredAudit,
};

#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
    chunking: ChunkConfig,
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
struct ServiceConfig {
    bind_addr: String,
    vector_path: String,
    audit_db: String,
    api_key: Option<String>,
    chunking: ChunkConfig,
    explain_top_n: usize,
}

impl ServiceConfig {
    fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            vector_path: env::var("VECTOR_PATH").unwrap_or_else(|_| "storage/index".to_string()),
            audit_db: env::var("AUDIT_DB").unwrap_or_else(|_| "storage/audit.sqlite".to_string()),
            api_key: env::var("API_MASTER_KEY").ok(),
            chunking: ChunkConfig {
                window_size: env_usize("CHUNK_WINDOW", 1000),
                overlap: env_usize("CHUNK_OVERLAP", 200),
            },
            explain_top_n: env_usize("EXPLAIN_TOP_N", 5),
        }
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let config = ServiceConfig::from_env();

    let index = Arc::new(VectorIndex::open(
        &config.vector_path,
        BackendKind::from_env(),
    )?);
    let model = ModelClient::from_env().unwrap_or_else(|_| ModelClient::local());
    info!(provider = model.provider().as_str(), model = model.model(), "model adapter ready");
    let audit = AuditStore::open(&config.audit_db)?;
    let engine = QueryEngine::new(
        index,
        Arc::new(model),
        audit,
        EngineConfig {
            explain_top_n: config.explain_top_n,
            ..EngineConfig::default()
        },
    );

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        chunking: config.chunking,
        api_key: config.api_key.clone(),
    });
    let app = Router::new()
        .route("/documents", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/audits/:input_hash", get(handle_audit_lookup))
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    chunks_indexed: usize,
    ids: Vec<String>,
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    check_api_key(&headers, &state.api_key)?;
    let upload = extract_file(&mut multipart).await?;
    let state = state.clone();
    let result = task::spawn_blocking(move || ingest_document(&state, upload))
        .await
        .map_err(AppError::internal)??;
    Ok(Json(result))
}

async fn handle_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Response, AppError> {
    check_api_key(&headers, &state.api_key)?;
    let state = state.clone();
    let outcome = task::spawn_blocking(move || state.engine.query(&request))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::from)?;
    Ok(Json(outcome).into_response())
}

async fn handle_audit_lookup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(input_hash): AxumPath<String>,
) -> Result<Json<Vec<StoredAudit>>, AppError> {
    check_api_key(&headers, &state.api_key)?;
    let state = state.clone();
    let records = task::spawn_blocking(move || {
        state.engine.audit_store().find_by_input_hash(&input_hash)
    })
    .await
    .map_err(AppError::internal)?
    .map_err(AppError::from)?;
    Ok(Json(records))
}

struct UploadedFile {
    data: Vec<u8>,
    filename: Option<String>,
}

async fn extract_file(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::bad_request)?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().map(|s| s.to_string());
            let data = field.bytes().await.map_err(AppError::bad_request)?;
            return Ok(UploadedFile {
                data: data.to_vec(),
                filename,
            });
        }
    }
    Err(AppError::bad_request("missing file"))
}

fn ingest_document(state: &AppState, upload: UploadedFile) -> Result<IngestResponse, AppError> {
    let text = document_text(&upload)?;
    let chunker = Chunker::new(state.chunking).map_err(AppError::internal)?;
    let chunks = chunker.chunk(&text);
    if chunks.is_empty() {
        return Err(AppError::bad_request("document contains no text"));
    }
    let ids = state.engine.ingest(&chunks).map_err(AppError::from)?;
    Ok(IngestResponse {
        status: "ok",
        chunks_indexed: ids.len(),
        ids,
    })
}

fn document_text(upload: &UploadedFile) -> Result<String, AppError> {
    let is_pdf = upload
        .filename
        .as_deref()
        .map(|name| name.to_lowercase().ends_with(".pdf"))
        .unwrap_or(false)
        || upload.data.starts_with(b"%PDF");
    if is_pdf {
        pdf_extract::extract_text_from_mem(&upload.data)
            .map_err(|e| AppError::bad_request(format!("could not extract pdf text: {e}")))
    } else {
        String::from_utf8(upload.data.clone())
            .map_err(|_| AppError::bad_request("upload is neither a pdf nor utf-8 text"))
    }
}

fn check_api_key(headers: &HeaderMap, expected: &Option<String>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("prompt injection detected")]
    InjectionDetected,
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl From<MinerError> for AppError {
    fn from(err: MinerError) -> Self {
        match err {
            MinerError::InjectionDetected => AppError::InjectionDetected,
            MinerError::Embedding(msg) | MinerError::Generation(msg) => AppError::Unavailable(msg),
            MinerError::InvalidChunking(msg) => AppError::BadRequest(msg.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            AppError::BadRequest(msg) => {
                return error_body(StatusCode::BAD_REQUEST, "bad_request", msg).into_response()
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InjectionDetected => (StatusCode::BAD_REQUEST, "prompt_injection_detected"),
            AppError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
            AppError::Internal(err) => {
                error!("internal_error" = %err);
                return error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error",
                )
                .into_response();
            }
        };
        error_body(status, reason, &self.to_string()).into_response()
    }
}

fn error_body(status: StatusCode, reason: &str, detail: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({ "error": reason, "detail": detail })),
    )
}
