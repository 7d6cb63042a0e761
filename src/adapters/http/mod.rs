// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app::dispatcher::Dispatcher;
use crate::app::types::Spawn;

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/spawn", post(spawn))
        .layer(Extension(dispatcher))
}

async fn health() -> &'static str {
    "jobserver"
}

async fn spawn(Extension(dispatcher): Extension<Arc<Dispatcher>>, body: Bytes) -> Response {
    let request: Spawn = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Error reading request: {err}"),
            )
                .into_response();
        }
    };

    match dispatcher.spawn(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) if err.is_rejection() => (
            StatusCode::BAD_REQUEST,
            format!("Error spawning job: {err}"),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error spawning job: {err}"),
        )
            .into_response(),
    }
}
