//! HTTP face of the status relay.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use store::OrderStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// The order number.
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub success: bool,
}

/// PUT /order/status: apply a status transition.
///
/// `success` is false when the order already had the requested status.
#[tracing::instrument(skip(state, body))]
pub async fn update<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let Json(req) = body?;
    let success = state
        .relay
        .update_status_str(&req.order_id, &req.status)
        .await?;
    Ok(Json(UpdateStatusResponse { success }))
}
