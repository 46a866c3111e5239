//! HTTP response bodies.

use crate::jsonrpc;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Relay error outside a JSON-RPC call (no id to echo).
impl IntoResponse for crate::Error {
    fn into_response(self) -> Response {
        let status = match &self {
            crate::Error::Parse(_)
            | crate::Error::InvalidRequest(_)
            | crate::Error::BatchSubmitUnsupported => StatusCode::BAD_REQUEST,
            crate::Error::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(jsonrpc::Response::failure(Value::Null, &self))).into_response()
    }
}

/// `GET /` body.
#[derive(Serialize)]
pub struct IndexResponse {
    pub elder_endpoint: String,
    pub endpoints: BTreeMap<String, EndpointInfo>,
}

#[derive(Serialize)]
pub struct EndpointInfo {
    pub endpoint: String,
    pub rpc: String,
    pub elder_registration_id: u64,
}

/// `GET /health` body.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub router_chain: &'static str,
    pub elder_endpoint: String,
    pub uptime_secs: u64,
    pub requests: u64,
    pub identities: usize,
    pub in_flight: u32,
}
