//! HTTP transport for GeoExplorer
//! Thin hyper service over the data-manager core

pub mod config;
pub mod data;
pub mod metrics;

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{body::Body, header, header::HeaderValue, Method, Request, Response, StatusCode};

pub use config::Config;
pub use data::*;

use crate::metrics::MetricsMiddleware;

fn with_cors(mut response: Response<Body>) -> Response<Body> {
    response
        .headers_mut()
        .insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

/// Exact body size, falling back to `Content-Length` for streamed bodies.
pub fn response_size(response: &Response<Body>) -> usize {
    hyper::body::HttpBody::size_hint(response.body())
        .exact()
        .or_else(|| {
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0) as usize
}

async fn metrics_response() -> Response<Body> {
    match metrics::gather_text() {
        Ok((content_type, buffer)) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type)
            .body(Body::from(buffer))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(_) => plain(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics"),
    }
}

/// Top-level service function. Dispatches on method and path.
pub async fn service_handler(state: Arc<AppState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Handle preflight OPTIONS requests.
    if req.method() == Method::OPTIONS {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty()));
        return Ok(response);
    }

    let path = req.uri().path().to_string();
    // Unknown paths share one label
    let endpoint = match path.as_str() {
        DATA_ENDPOINT | TABLE_ENDPOINT | BOUNDARIES_ENDPOINT | "/metrics" => path.as_str(),
        _ => "unknown",
    };
    let middleware = MetricsMiddleware::new(req.method().as_str(), endpoint);

    let response = match (req.method(), path.as_str()) {
        (&Method::GET, DATA_ENDPOINT) => handle_dataset_data(state, req).await?,
        (&Method::GET, TABLE_ENDPOINT) => handle_dataset_table(state, req).await?,
        (&Method::GET, BOUNDARIES_ENDPOINT) => handle_dataset_boundaries(state, req).await?,
        (&Method::GET, "/metrics") => metrics_response().await,
        _ => plain(StatusCode::NOT_FOUND, "Not Found"),
    };

    middleware.complete(response.status().as_u16(), response_size(&response));

    Ok(with_cors(response))
}
