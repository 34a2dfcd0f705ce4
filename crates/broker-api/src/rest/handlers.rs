//! Request handlers

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use broker_core::{InstanceDescription, OperationContext};
use serde::Serialize;

use super::error::ApiError;
use crate::AppState;

pub const URI_LIST_CONTENT_TYPE: &str = "text/uri-list";

/// Per-request context; cancelled when the request future is dropped
fn request_context(state: &AppState) -> OperationContext {
    OperationContext::with_timeout(state.request_timeout)
}

/// `GET /v1/instances/:backend`
pub async fn list_instances(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = request_context(&state);
    let _cancel = ctx.cancel_on_drop();

    let names = state.registry.list_instances(&ctx, &backend).await?;
    Ok(Json(names))
}

/// `GET /v1/instances/:backend/:tenant`
pub async fn get_or_create_instance(
    State(state): State<AppState>,
    Path((backend, tenant)): Path<(String, String)>,
) -> Result<Json<InstanceDescription>, ApiError> {
    let ctx = request_context(&state);
    let _cancel = ctx.cancel_on_drop();

    let instance = state
        .registry
        .get_or_create_instance(&ctx, &backend, &tenant)
        .await?;
    Ok(Json(instance.describe()))
}

/// `GET /v1/instances/:backend/:tenant/uri`
pub async fn instance_uri(
    State(state): State<AppState>,
    Path((backend, tenant)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = request_context(&state);
    let _cancel = ctx.cancel_on_drop();

    let instance = state
        .registry
        .get_or_create_instance(&ctx, &backend, &tenant)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, URI_LIST_CONTENT_TYPE)],
        instance.connection_uri(),
    ))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backends: Vec<String>,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backends: state.registry.adapter_names(),
    })
}
