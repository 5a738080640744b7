//! JSON RPC surface for other services.
//!
//! `POST /rpc/{method}` with a JSON object body. Only `UpdateStatus` is
//! served; declared-but-unserved and unknown methods answer 501.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use common::UserId;
use domain::{OrderRpc, RpcMethod};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use store::OrderStore;

use crate::error::ApiError;
use crate::routes::orders::OrderResponse;
use crate::routes::status::{UpdateStatusRequest, UpdateStatusResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct OrderIdRequest {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct UserIdRequest {
    user_id: i64,
}

/// POST /rpc/{method}: dispatch an RPC call.
#[tracing::instrument(skip(state, body))]
pub async fn call<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(method): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let method: RpcMethod = method.parse()?;
    metrics::counter!("rpc_calls_total", "method" => method.as_str()).increment(1);
    let Json(body) = body?;
    let rpc: &dyn OrderRpc = &state.relay;

    let response = match method {
        RpcMethod::UpdateStatus => {
            let req: UpdateStatusRequest = decode(body)?;
            let success = rpc.update_status(&req.order_id, &req.status).await?;
            Json(UpdateStatusResponse { success }).into_response()
        }
        RpcMethod::GetOrder => {
            let req: OrderIdRequest = decode(body)?;
            let order = rpc.get_order(&req.order_id).await?;
            Json(OrderResponse::from(order)).into_response()
        }
        RpcMethod::ListOrders => {
            let req: UserIdRequest = decode(body)?;
            let orders = rpc.list_orders(UserId::new(req.user_id)).await?;
            Json(
                orders
                    .into_iter()
                    .map(OrderResponse::from)
                    .collect::<Vec<_>>(),
            )
            .into_response()
        }
        RpcMethod::CancelOrder => {
            let req: OrderIdRequest = decode(body)?;
            let success = rpc.cancel_order(&req.order_id).await?;
            Json(UpdateStatusResponse { success }).into_response()
        }
    };
    Ok(response)
}

fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}
