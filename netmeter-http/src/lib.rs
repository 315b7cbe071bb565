//! HTTP endpoints for netmeter.
//!
//! Mount [`router`] into a service to let it take part in measurements on
//! demand, the way a profiling endpoint is mounted for CPU profiles. Each
//! endpoint takes the meter options as a JSON body plus a `client` flag:
//!
//! ```text
//! POST /netmeter/latency     {"addr": "10.0.0.2:13501", "numMsg": 100, "client": true}
//! POST /netmeter/throughput  {"addr": ":13500"}
//! ```
//!
//! Client requests answer with the JSON result. Server requests answer with
//! an empty `200` once the peer has finished.

#![deny(missing_docs)]

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use netmeter::{LatencyMeter, Options, ThroughputMeter};
use serde::Deserialize;
use std::io;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::*;

/// Path of the latency endpoint.
pub const LATENCY_PATH: &str = "/netmeter/latency";
/// Path of the throughput endpoint.
pub const THROUGHPUT_PATH: &str = "/netmeter/throughput";

/// Builds a router with both endpoints.
pub fn router() -> Router {
    Router::new()
        .route(LATENCY_PATH, post(latency))
        .route(THROUGHPUT_PATH, post(throughput))
}

/// Serves [`router`] on `addr` until the listener fails.
pub async fn serve(addr: impl ToSocketAddrs) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("serving netmeter endpoints on {}", listener.local_addr()?);
    axum::serve(listener, router()).await
}

/// Failure of an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The body does not describe a valid run.
    #[error("bad request: {0}")]
    BadRequest(#[source] netmeter::Error),
    /// The meter failed to connect or exchange.
    #[error(transparent)]
    Meter(#[from] netmeter::Error),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Meter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(%status, "{self}");
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Role {
    #[serde(default)]
    client: bool,
}

/// Splits a request body into the options (on top of `profile`) and the role.
fn parse(body: &[u8], profile: Options) -> Result<(Options, bool), HttpError> {
    let role: Role = serde_json::from_slice(body)
        .map_err(|e| HttpError::BadRequest(netmeter::Error::Json(e)))?;
    let options = profile
        .overlay_json(body)
        .and_then(|options| options.validate().map(|()| options))
        .map_err(HttpError::BadRequest)?;
    Ok((options, role.client))
}

async fn latency(body: Bytes) -> Result<Response, HttpError> {
    let (options, client) = parse(&body, Options::latency())?;
    let meter = LatencyMeter::new(options).map_err(HttpError::BadRequest)?;
    if client {
        info!("running latency client");
        let result = meter.client().await?;
        Ok(Json(result).into_response())
    } else {
        info!("running latency server");
        meter.server().await?;
        Ok(StatusCode::OK.into_response())
    }
}

async fn throughput(body: Bytes) -> Result<Response, HttpError> {
    let (options, client) = parse(&body, Options::throughput())?;
    let meter = ThroughputMeter::new(options).map_err(HttpError::BadRequest)?;
    if client {
        info!("running throughput client");
        let result = meter.client().await?;
        Ok(Json(result).into_response())
    } else {
        info!("running throughput server");
        let received = meter.server().await?;
        debug!(received, "throughput server done");
        Ok(StatusCode::OK.into_response())
    }
}
