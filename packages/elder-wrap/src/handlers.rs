//! HTTP request handlers.

use crate::jsonrpc::{self, Call};
use crate::metrics::METRICS;
use crate::middleware::RequestId;
use crate::pipeline::SubmitOutcome;
use crate::response::{EndpointInfo, HealthResponse, IndexResponse};
use crate::state::{AppState, RollappRoute};
use crate::verifier::ParsedTransaction;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Inbound body cap.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Configured rollapp endpoints.
pub async fn index(State(state): State<Arc<AppState>>) -> Json<IndexResponse> {
    let endpoints = state
        .rollapps
        .values()
        .map(|r| {
            (
                r.name.clone(),
                EndpointInfo {
                    endpoint: format!("/{}", r.name),
                    rpc: r.rpc_url.clone(),
                    elder_registration_id: r.registration_id,
                },
            )
        })
        .collect();
    Json(IndexResponse {
        elder_endpoint: state.config.elder_endpoint.clone(),
        endpoints,
    })
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = METRICS.render(state.locks.identity_count(), state.locks.total_in_flight());
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Health check with router-chain reachability.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let router_chain = match state.pipeline.router().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "Router chain health check failed");
            "unavailable"
        }
    };
    let registry = state.registry.clone();
    let identities = tokio::task::spawn_blocking(move || registry.list().map(|ids| ids.len()))
        .await
        .unwrap_or_else(|e| Err(crate::Error::KeyStore(format!("Key listing task failed: {e}"))));

    let status = if router_chain == "ok" && identities.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        router_chain,
        elder_endpoint: state.config.elder_endpoint.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
        identities: identities.unwrap_or(0),
        in_flight: state.locks.total_in_flight(),
    })
}

/// `POST /{rollapp}`: relay submits, forward everything else.
pub async fn relay(
    State(state): State<Arc<AppState>>,
    Path(rollapp): Path<String>,
    request: Request,
) -> Response {
    METRICS.relay_requests.fetch_add(1, Ordering::Relaxed);
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let req_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let Some(route) = state.rollapp(&rollapp) else {
        warn!(req_id = %req_id, rollapp = %rollapp, "Unknown rollapp");
        let err = crate::Error::InvalidRequest(format!("unknown rollapp: {rollapp}"));
        return (
            StatusCode::NOT_FOUND,
            Json(jsonrpc::Response::failure(Value::Null, &err)),
        )
            .into_response();
    };

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(req_id = %req_id, error = %e, "Failed to read request body");
            return crate::Error::InvalidRequest(format!("failed to read request: {e}"))
                .into_response();
        }
    };

    match jsonrpc::classify(&body) {
        Ok(Call::Submit(call)) => Json(submit(&state, route, call, &req_id).await).into_response(),
        Ok(Call::Passthrough) => forward(route, body, &req_id).await,
        Err(e) => {
            warn!(req_id = %req_id, rollapp = %rollapp, error = %e, "Rejected request");
            e.into_response()
        }
    }
}

/// Forward verbatim; upstream status and body are relayed unmodified.
async fn forward(route: &RollappRoute, body: axum::body::Bytes, req_id: &str) -> Response {
    METRICS.forward_total.fetch_add(1, Ordering::Relaxed);
    match route.chain.forward_raw(body).await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                upstream.body,
            )
                .into_response()
        }
        Err(e) => {
            METRICS.forward_error.fetch_add(1, Ordering::Relaxed);
            error!(req_id = %req_id, rollapp = %route.name, error = %e, "Forwarding failed");
            crate::Error::Gateway("rollapp RPC unavailable".into()).into_response()
        }
    }
}

/// Verify → lock → submit → confirm. Errors land in the JSON-RPC `error`.
async fn submit(
    state: &AppState,
    route: &RollappRoute,
    call: jsonrpc::Request,
    req_id: &str,
) -> jsonrpc::Response {
    METRICS.submit_total.fetch_add(1, Ordering::Relaxed);
    let start = Instant::now();
    let result = run_submit(state, route, &call).await;
    METRICS.record_submit_duration(start);

    match result {
        Ok((tx, outcome)) => {
            METRICS.submit_success.fetch_add(1, Ordering::Relaxed);
            info!(
                req_id = %req_id,
                rollapp = %route.name,
                tx_hash = %tx.hash,
                router_tx_hash = %outcome.router_tx_hash,
                height = outcome.confirmation.height,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Rollapp tx relayed"
            );
            jsonrpc::Response::success(call.id, Value::String(tx.hash.to_string()))
        }
        Err(e) => {
            METRICS.record_submit_error(&e);
            if e.is_verification() {
                warn!(req_id = %req_id, rollapp = %route.name, error = %e, "Rollapp tx rejected");
            } else {
                error!(
                    req_id = %req_id,
                    rollapp = %route.name,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Rollapp tx relay failed"
                );
            }
            jsonrpc::Response::failure(call.id, &e)
        }
    }
}

async fn run_submit(
    state: &AppState,
    route: &RollappRoute,
    call: &jsonrpc::Request,
) -> Result<(ParsedTransaction, SubmitOutcome), crate::Error> {
    let raw_hex = call.first_string_param()?;
    let (tx, identity) = route.verifier.verify(raw_hex).await?;

    let (identity, raw) = (&identity, tx.raw.as_slice());
    let outcome = state
        .locks
        .with_lock(identity, |guard| async move {
            state
                .pipeline
                .submit(&guard, identity, raw, route.registration_id)
                .await
        })
        .await?;
    Ok((tx, outcome))
}
