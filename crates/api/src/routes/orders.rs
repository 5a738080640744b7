//! Order creation and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::OrderLine;
use serde::Serialize;
use store::{Order, OrderStore};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    /// Decimal rendering, e.g. `"19.98"`.
    pub amount: String,
    pub amount_cents: i64,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.as_i64(),
            order_no: order.order_no,
            user_id: order.user_id.as_i64(),
            amount: order.amount.to_string(),
            amount_cents: order.amount.cents(),
            status: order.status.to_string(),
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.as_i64(),
                    name: item.name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

// -- Handlers --

/// POST /orders: create an order from `[{product_id, quantity}, ...]`.
#[tracing::instrument(skip(state, body))]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<Vec<OrderLine>>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(items) = body?;
    let order = state.coordinator.create_order(user_id, &items).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{order_no}: load an order by its order number.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_no): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.coordinator.get_order(&order_no).await?;
    Ok(Json(order.into()))
}
