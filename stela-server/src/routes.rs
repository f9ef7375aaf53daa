//! HTTP routes: the query endpoint and the status endpoint.

use crate::AppState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use stela_core::MemoryBudget;
use stela_query::{
    construct_ntriples, execute_plan, parse_query, to_csv, to_json, to_tsv, ExecutionContext,
    Planner, QueryError, QueryForm,
};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sparql", get(query_get).post(query_post))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(Deserialize)]
struct QueryParams {
    query: Option<String>,
}

#[derive(Copy, Clone)]
enum OutputFormat {
    Tsv,
    Csv,
    Json,
}

fn negotiate(headers: &HeaderMap) -> OutputFormat {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if accept.contains("text/csv") {
        OutputFormat::Csv
    } else if accept.contains("json") {
        OutputFormat::Json
    } else {
        OutputFormat::Tsv
    }
}

async fn query_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
) -> Response {
    let Some(query) = params.query else {
        return error_response(StatusCode::BAD_REQUEST, "missing ?query parameter");
    };
    run_query(state, query, negotiate(&headers)).await
}

async fn query_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/sparql-query") {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected application/sparql-query",
        );
    }
    run_query(state, body, negotiate(&headers)).await
}

async fn run_query(state: Arc<AppState>, query: String, format: OutputFormat) -> Response {
    // The engine is synchronous; run the pump on a blocking thread and
    // stream the serialised body back through a channel.
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, QueryError>>(8);
    let worker_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || {
        let outcome = evaluate(&worker_state, &query, format);
        match outcome {
            Ok(chunks) => {
                for chunk in chunks {
                    if tx.blocking_send(Ok(chunk)).is_err() {
                        // Client went away; stop producing.
                        break;
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    let mut rx = rx;
    // The first message decides between an error response and a stream.
    match rx.recv().await {
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "query worker vanished"),
        Some(Err(e)) => query_error_response(e),
        Some(Ok(first)) => {
            let content_type = match format {
                OutputFormat::Tsv => "text/tab-separated-values",
                OutputFormat::Csv => "text/csv",
                OutputFormat::Json => "application/sparql-results+json",
            };
            let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(first) })
                .chain(futures::stream::unfold(rx, |mut rx| async move {
                    match rx.recv().await {
                        Some(Ok(chunk)) => Some((Ok(chunk), rx)),
                        // Late errors surface as a truncated stream.
                        Some(Err(_)) | None => None,
                    }
                }));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from_stream(stream))
                .expect("static response parts")
        }
    }
}

/// Parse, plan, execute and serialise; returns the response body in
/// chunks.
fn evaluate(
    state: &AppState,
    query: &str,
    format: OutputFormat,
) -> Result<Vec<String>, QueryError> {
    let parsed = parse_query(query)?;
    let planner = Planner::new(Arc::clone(&state.index), Arc::clone(&state.views));
    let plan = planner.plan(&parsed)?;
    let ctx = ExecutionContext::new(
        Arc::clone(&state.index),
        MemoryBudget::with_limit(state.budget_bytes),
    );
    let result = execute_plan(&plan, &ctx)?;

    let body = match &plan.form {
        QueryForm::Construct { template } => {
            construct_ntriples(&state.index, template, &result)?
        }
        QueryForm::Select { .. } => match format {
            OutputFormat::Tsv => to_tsv(&state.index, &result)?,
            OutputFormat::Csv => to_csv(&state.index, &result)?,
            OutputFormat::Json => to_json(&state.index, &result)?.to_string(),
        },
    };

    // Stream in fixed-size chunks so large results do not sit in one
    // allocation on the async side.
    const CHUNK: usize = 64 * 1024;
    let mut chunks = Vec::with_capacity(body.len() / CHUNK + 1);
    let mut rest = body.as_str();
    while rest.len() > CHUNK {
        let mut cut = CHUNK;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_owned());
        rest = tail;
    }
    chunks.push(rest.to_owned());
    Ok(chunks)
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let count = state.index.delta().snapshot().count();
    let body = serde_json::json!({
        "triples": state.index.triple_count(),
        "delta": count,
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, message.to_owned()).into_response()
}

fn query_error_response(e: QueryError) -> Response {
    let status = match &e {
        QueryError::Parse { .. } => StatusCode::BAD_REQUEST,
        QueryError::UnknownEntity(_) => StatusCode::BAD_REQUEST,
        QueryError::Core(stela_core::Error::Cancelled) => StatusCode::REQUEST_TIMEOUT,
        QueryError::Core(stela_core::Error::MemoryBudgetExceeded { .. }) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %e, "query failed");
    (status, format!("query error: {e}")).into_response()
}
