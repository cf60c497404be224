use crate::arrow_io::{node_batch, write_stream, ARROW_STREAM_CONTENT_TYPE};
use crate::config::ServiceConfig;
use crate::jobs::ParseJobs;
use crate::models::{CreateDocumentResponse, DocumentMeta, OutlineResponse, ParseQuery};
use crate::storage::DocumentStorage;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use scan_parser::{lines::split_lines, Format, ParsedDocument, ParserRegistry};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<DocumentStorage>,
    pub registry: Arc<ParserRegistry>,
    pub jobs: Arc<ParseJobs>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> std::io::Result<Self> {
        let storage = DocumentStorage::new(&config.data_dir)?;
        let registry = ParserRegistry::with_config(config.parser.clone());
        Ok(Self {
            storage: Arc::new(storage),
            registry: Arc::new(registry),
            jobs: Arc::new(ParseJobs::new()),
            config: Arc::new(config),
        })
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/documents", post(create_document))
        .route(
            "/documents/:id",
            axum::routing::put(update_document).delete(delete_document),
        )
        .route("/documents/:id/meta", get(get_meta))
        .route("/documents/:id/nodes", get(get_nodes))
        .route("/documents/:id/outline", get(get_outline))
        .route("/documents/:id/plot/:node", get(get_plot))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[instrument(skip(state, multipart))]
async fn create_document(
    State(state): State<AppState>,
    Query(query): Query<ParseQuery>,
    mut multipart: Multipart,
) -> Result<Json<CreateDocumentResponse>, (StatusCode, String)> {
    info!("Received file upload request");

    let mut file_data = Vec::new();
    let mut filename = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error!("Multipart error: {}", e);
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            info!("Receiving file: {:?}", filename);

            let data = field.bytes().await.map_err(|e| {
                error!("Failed to read file data: {}", e);
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            file_data = data.to_vec();
            info!("File data received: {} bytes", file_data.len());
        }
    }

    if file_data.is_empty() {
        error!("No file data provided in request");
        return Err((StatusCode::BAD_REQUEST, "No file provided".to_string()));
    }

    let text = String::from_utf8(file_data).map_err(|e| {
        warn!("Upload is not UTF-8: {}", e);
        (StatusCode::BAD_REQUEST, format!("File is not UTF-8 text: {}", e))
    })?;

    let document_id = state.storage.create_document().map_err(|e| {
        error!("Failed to create document: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create document: {}", e),
        )
    })?;
    info!("Created document: {}", document_id);

    let filename = query.filename.or(filename);
    match run_parse(&state, &document_id, filename, query.format, text).await {
        Ok(meta) => Ok(Json(CreateDocumentResponse { document_id, meta })),
        Err(rejection) => {
            state.jobs.forget(&document_id);
            if let Err(e) = state.storage.delete_document(&document_id) {
                warn!("Failed to clean up document {}: {}", document_id, e);
            }
            Err(rejection)
        }
    }
}

/// Replace a document's text. A parse still running for it is cancelled.
#[instrument(skip(state, body), fields(bytes = body.len()))]
async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(query): Query<ParseQuery>,
    body: String,
) -> Result<Json<DocumentMeta>, (StatusCode, String)> {
    if !state.storage.exists(&document_id) {
        return Err(not_found(&document_id));
    }

    // Keep the previous file name when the request does not carry one.
    let filename = match query.filename {
        Some(name) => Some(name),
        None => state
            .storage
            .read_meta(&document_id)
            .ok()
            .and_then(|meta| meta.filename),
    };

    run_parse(&state, &document_id, filename, query.format, body)
        .await
        .map(Json)
}

async fn run_parse(
    state: &AppState,
    document_id: &str,
    filename: Option<String>,
    format: Option<Format>,
    text: String,
) -> Result<DocumentMeta, (StatusCode, String)> {
    let format = format.or_else(|| {
        filename
            .as_deref()
            .and_then(|name| state.registry.resolve_format(name))
    });
    match format {
        Some(format) => info!("Parsing document {} as {}", document_id, format),
        None => info!("Parsing document {} with format detection", document_id),
    }

    let line_count = split_lines(&text).len();
    let ticket = state.jobs.begin(document_id);

    let handle = {
        let registry = state.registry.clone();
        let token = ticket.token.clone();
        tokio::task::spawn_blocking(move || match format {
            Some(format) => registry.parse(&text, format, Some(&token)),
            None => registry.parse_auto(&text, Some(&token)),
        })
    };

    let result = match tokio::time::timeout(state.config.parse_timeout, handle).await {
        Ok(joined) => joined.map_err(|e| {
            error!("Parse task failed: {}", e);
            state.jobs.release(&ticket);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Parse task failed: {}", e),
            )
        })?,
        Err(_) => {
            warn!(
                "Parse of document {} exceeded {:?}, cancelling",
                document_id, state.config.parse_timeout
            );
            ticket.token.cancel();
            state.jobs.release(&ticket);
            return Err((
                StatusCode::GATEWAY_TIMEOUT,
                "Parse timed out".to_string(),
            ));
        }
    };

    let doc = match result {
        Ok(Some(doc)) => doc,
        Ok(None) if ticket.token.is_cancelled() => {
            info!("Parse generation {} of {} was superseded", ticket.generation, document_id);
            state.jobs.release(&ticket);
            return Err(superseded());
        }
        Ok(None) => {
            state.jobs.release(&ticket);
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                "No parsable content found".to_string(),
            ));
        }
        Err(e) => {
            state.jobs.release(&ticket);
            return Err((StatusCode::UNPROCESSABLE_ENTITY, format!("Parse error: {}", e)));
        }
    };

    if !state.jobs.is_current(&ticket) {
        return Err(superseded());
    }

    let meta = DocumentMeta::from_document(document_id, filename, line_count, &doc, ticket.generation);
    debug!(
        "Parsed {} nodes, {} warnings",
        meta.node_count,
        meta.warnings.len()
    );

    match state
        .jobs
        .complete(&ticket, || state.storage.store(document_id, &meta, &doc))
    {
        Some(Ok(())) => {
            info!(
                "Stored generation {} of document {}",
                ticket.generation, document_id
            );
            Ok(meta)
        }
        Some(Err(e)) => {
            error!("Failed to store document {}: {}", document_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to store document: {}", e),
            ))
        }
        None => Err(superseded()),
    }
}

async fn get_meta(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentMeta>, (StatusCode, String)> {
    let meta = state
        .storage
        .read_meta(&document_id)
        .map_err(|e| (StatusCode::NOT_FOUND, format!("Document not found: {}", e)))?;

    Ok(Json(meta))
}

async fn get_nodes(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<ParsedDocument>, (StatusCode, String)> {
    load_document(&state, &document_id).map(Json)
}

async fn get_outline(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<OutlineResponse>, (StatusCode, String)> {
    load_document(&state, &document_id).map(|doc| Json(doc.into()))
}

#[instrument(skip(state))]
async fn get_plot(
    State(state): State<AppState>,
    Path((document_id, node_index)): Path<(String, usize)>,
) -> Result<Response, (StatusCode, String)> {
    let doc = load_document(&state, &document_id)?;
    let node = doc.nodes.get(node_index).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Document has no node {}", node_index),
        )
    })?;

    let batch = node_batch(node)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to build batch: {}", e),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Node {} is a {} node, not scan data", node_index, node.value.type_name()),
            )
        })?;
    debug!("Plot batch: {} columns, {} rows", batch.num_columns(), batch.num_rows());

    let buffer = write_stream(&batch).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to write batch: {}", e),
        )
    })?;

    Ok(([(header::CONTENT_TYPE, ARROW_STREAM_CONTENT_TYPE)], buffer).into_response())
}

async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.jobs.forget(&document_id);
    state
        .storage
        .delete_document(&document_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to delete: {}", e)))?;

    Ok(StatusCode::NO_CONTENT)
}

fn load_document(state: &AppState, document_id: &str) -> Result<ParsedDocument, (StatusCode, String)> {
    if !state.storage.exists(document_id) {
        return Err(not_found(document_id));
    }
    state.storage.read_document(document_id).map_err(|e| {
        error!("Failed to read document {}: {}", document_id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read document: {}", e),
        )
    })
}

fn not_found(document_id: &str) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("Document not found: {}", document_id),
    )
}

fn superseded() -> (StatusCode, String) {
    (
        StatusCode::CONFLICT,
        "Parse superseded by a newer request".to_string(),
    )
}
