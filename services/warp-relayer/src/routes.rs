// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use warp_relayer_context::{PairHealth, RelayerContext};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    healthy: bool,
    pairs: Vec<PairHealth>,
}

/// Handles health requests
///
/// Answers `503 Service Unavailable` as soon as one coordinator is faulted.
pub async fn handle_health(
    State(ctx): State<Arc<RelayerContext>>,
) -> impl IntoResponse {
    let healthy = !ctx.health.any_faulted();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let pairs = ctx.health.snapshot();
    (status, Json(HealthResponse { healthy, pairs }))
}

/// Handles relayer metric requests
///
/// Returns the metrics in the prometheus text format.
pub async fn handle_metrics(
    State(ctx): State<Arc<RelayerContext>>,
) -> Result<String, (StatusCode, String)> {
    ctx.metrics.gather().map_err(|e| {
        tracing::error!(error = %e, "Failed to gather metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}
