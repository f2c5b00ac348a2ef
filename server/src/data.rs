//! Handlers for the dataset endpoints
//!
//! `/api/dataset-data` answers with a one-line JSON header (the reply minus
//! its payload), a newline, then the raw little-endian f32 buffer. The other
//! endpoints answer with plain JSON.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use geoexplorer_data::DataManager;
use geoexplorer_shared::{
    BoundingBox, DatasetDataRequest, ErrorResponse, ExplorerError, ExplorerResult, TablePageRequest,
};
use hyper::{body::Body, header, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::metrics::{helpers, Timer};

pub const DATA_ENDPOINT: &str = "/api/dataset-data";
pub const TABLE_ENDPOINT: &str = "/api/dataset-table";
pub const BOUNDARIES_ENDPOINT: &str = "/api/dataset-boundaries";

const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Shared state handed to every request
pub struct AppState {
    pub manager: DataManager,
}

impl AppState {
    pub fn new(manager: DataManager) -> Arc<Self> {
        Arc::new(Self { manager })
    }
}

fn query_map(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn required(params: &HashMap<String, String>, key: &str) -> ExplorerResult<String> {
    params
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| ExplorerError::InvalidRequest {
            message: format!("Missing {key}"),
        })
}

fn list(params: &HashMap<String, String>, key: &str) -> Option<Vec<String>> {
    params.get(key).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn number<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str, default: T) -> ExplorerResult<T>
where
    T::Err: std::fmt::Display,
{
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ExplorerError::InvalidRequest {
            message: format!("Invalid {key}: {e}"),
        }),
    }
}

/// Parse `dataset_id`, `columns`, `bbox`, `filter_columns` and
/// `statistics_columns` from a query string.
pub fn parse_data_query(query: Option<&str>) -> ExplorerResult<DatasetDataRequest> {
    let params = query_map(query);

    let bounding_box = match params.get("bbox") {
        None => None,
        Some(raw) => {
            let values = raw
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ExplorerError::InvalidRequest {
                    message: format!("Invalid bbox: {e}"),
                })?;
            Some(BoundingBox::from_slice(&values)?)
        }
    };

    Ok(DatasetDataRequest {
        dataset_id: required(&params, "dataset_id")?,
        columns: list(&params, "columns").unwrap_or_default(),
        bounding_box,
        filter_columns: list(&params, "filter_columns"),
        statistics_columns: list(&params, "statistics_columns"),
    })
}

pub fn parse_table_query(query: Option<&str>) -> ExplorerResult<TablePageRequest> {
    let params = query_map(query);
    Ok(TablePageRequest {
        dataset_id: required(&params, "dataset_id")?,
        columns: list(&params, "columns").unwrap_or_default(),
        limit: number(&params, "limit", DEFAULT_PAGE_LIMIT)?,
        offset: number(&params, "offset", 0u64)?,
    })
}

pub fn parse_boundaries_query(query: Option<&str>) -> ExplorerResult<String> {
    required(&query_map(query), "dataset_id")
}

/// HTTP status for a core error
pub fn status_for(error: &ExplorerError) -> StatusCode {
    if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn error_response(error: ExplorerError, endpoint: &str) -> Response<Body> {
    let status = status_for(&error);
    helpers::record_fetch_failure(endpoint, error.kind());
    if status.is_server_error() {
        warn!(endpoint, kind = error.kind(), error = %error, "Request failed");
    } else {
        debug!(endpoint, kind = error.kind(), error = %error, "Request rejected");
    }

    let body = ErrorResponse::new(error).with_context("server", endpoint).to_json();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn json_response<T: Serialize>(value: &T, endpoint: &str) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(e) => error_response(e.into(), endpoint),
    }
}

/// Run blocking store work off the async executor.
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> ExplorerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&DataManager) -> ExplorerResult<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state.manager))
        .await
        .map_err(|e| ExplorerError::Internal {
            message: format!("Task join error: {e}"),
        })?
}

/// Main handler for the /api/dataset-data endpoint.
pub async fn handle_dataset_data(state: Arc<AppState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let request = match parse_data_query(req.uri().query()) {
        Ok(r) => r,
        Err(e) => return Ok(error_response(e, DATA_ENDPOINT)),
    };

    let timer = Timer::start();
    let result = blocking(&state, move |manager| manager.fetch_and_compute(&request)).await;
    timer.observe_dataset_fetch();

    let mut reply = match result {
        Ok(reply) => reply,
        Err(e) => return Ok(error_response(e, DATA_ENDPOINT)),
    };

    let payload = std::mem::take(&mut reply.binary_data);
    helpers::record_data_served(DATA_ENDPOINT, payload.len(), reply.total_count);

    let header_str = match serde_json::to_string(&reply) {
        Ok(json) => json + "\n",
        Err(e) => return Ok(error_response(e.into(), DATA_ENDPOINT)),
    };

    let content_length = header_str.len() + payload.len();
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        vec![Ok(Bytes::from(header_str)), Ok(Bytes::from(payload))];
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, content_length)
        .body(Body::wrap_stream(stream::iter(chunks)))
        .unwrap_or_else(|_| Response::new(Body::empty()));

    Ok(response)
}

/// Handler for the /api/dataset-table endpoint.
pub async fn handle_dataset_table(state: Arc<AppState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let request = match parse_table_query(req.uri().query()) {
        Ok(r) => r,
        Err(e) => return Ok(error_response(e, TABLE_ENDPOINT)),
    };

    match blocking(&state, move |manager| manager.table_page(&request)).await {
        Ok(page) => Ok(json_response(&page, TABLE_ENDPOINT)),
        Err(e) => Ok(error_response(e, TABLE_ENDPOINT)),
    }
}

/// Handler for the /api/dataset-boundaries endpoint.
pub async fn handle_dataset_boundaries(
    state: Arc<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let dataset_id = match parse_boundaries_query(req.uri().query()) {
        Ok(id) => id,
        Err(e) => return Ok(error_response(e, BOUNDARIES_ENDPOINT)),
    };

    let lookup_id = dataset_id.clone();
    match blocking(&state, move |manager| manager.boundaries(&lookup_id)).await {
        Ok(boundaries) => Ok(json_response(
            &json!({ "dataset_id": dataset_id, "boundaries": boundaries }),
            BOUNDARIES_ENDPOINT,
        )),
        Err(e) => Ok(error_response(e, BOUNDARIES_ENDPOINT)),
    }
}
