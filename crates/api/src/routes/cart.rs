//! Cart endpoints over the key-value cart store.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use common::ProductId;
use serde::{Deserialize, Serialize};
use store::{OrderStore, StoreError};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Confirmation token required by `DELETE /cart`.
pub const CLEAR_CONFIRMATION: &str = "confirm-v1";

#[derive(Debug, Deserialize)]
pub struct ClearCartQuery {
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearCartResponse {
    pub user_id: i64,
    pub cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub user_id: i64,
    pub items: Vec<CartItemResponse>,
}

/// POST /cart/items: add `quantity` of a product to the caller's cart.
#[tracing::instrument(skip(state, body))]
pub async fn add_item<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<AddItemRequest>, JsonRejection>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let Json(req) = body?;
    if !(1..=i64::from(i32::MAX)).contains(&req.quantity) {
        return Err(ApiError::BadRequest(format!(
            "quantity must be between 1 and {}, got {}",
            i32::MAX,
            req.quantity
        )));
    }
    let quantity = state
        .carts
        .add_item(user_id, req.product_id, req.quantity)
        .await
        .map_err(|e| match e {
            StoreError::CartQuantityOverflow(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        })?;
    Ok(Json(CartItemResponse {
        product_id: req.product_id.as_i64(),
        quantity,
    }))
}

/// GET /cart: the caller's cart, ordered by product id.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CartResponse>, ApiError> {
    let items = state
        .carts
        .items(user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut items: Vec<CartItemResponse> = items
        .into_iter()
        .map(|(product_id, quantity)| CartItemResponse {
            product_id: product_id.as_i64(),
            quantity,
        })
        .collect();
    items.sort_by_key(|item| item.product_id);

    Ok(Json(CartResponse {
        user_id: user_id.as_i64(),
        items,
    }))
}

/// DELETE /cart?version=confirm-v1: empty the caller's cart.
///
/// Manual recovery for a cart the reconciler gave up on.
#[tracing::instrument(skip(state, query))]
pub async fn clear<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ClearCartQuery>,
) -> Result<Json<ClearCartResponse>, ApiError> {
    if query.version.as_deref() != Some(CLEAR_CONFIRMATION) {
        return Err(ApiError::BadRequest(format!(
            "clearing a cart requires version={CLEAR_CONFIRMATION}"
        )));
    }
    state
        .carts
        .clear(user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    tracing::info!(%user_id, "cart cleared by user");

    Ok(Json(ClearCartResponse {
        user_id: user_id.as_i64(),
        cleared: true,
    }))
}
