//! Remote procedure surface exposed to other services.
//!
//! The payment service calls `UpdateStatus` after confirming a payment. The
//! remaining methods are declared on the interface but not served by this
//! service yet; they answer [`OrderError::NotImplemented`] so callers can tell
//! "unsupported" apart from a failure.

use async_trait::async_trait;
use common::UserId;
use store::{Order, OrderStore};

use crate::error::OrderError;
use crate::relay::StatusRelay;

/// Methods of the order service RPC interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    UpdateStatus,
    GetOrder,
    ListOrders,
    CancelOrder,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::UpdateStatus => "UpdateStatus",
            RpcMethod::GetOrder => "GetOrder",
            RpcMethod::ListOrders => "ListOrders",
            RpcMethod::CancelOrder => "CancelOrder",
        }
    }
}

impl std::str::FromStr for RpcMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UpdateStatus" => Ok(RpcMethod::UpdateStatus),
            "GetOrder" => Ok(RpcMethod::GetOrder),
            "ListOrders" => Ok(RpcMethod::ListOrders),
            "CancelOrder" => Ok(RpcMethod::CancelOrder),
            other => Err(OrderError::NotImplemented(other.to_string())),
        }
    }
}

/// Server side of the order service RPC interface.
#[async_trait]
pub trait OrderRpc: Send + Sync {
    /// Applies a status change; see [`StatusRelay::update_status`].
    async fn update_status(&self, order_id: &str, status: &str) -> Result<bool, OrderError>;

    async fn get_order(&self, _order_id: &str) -> Result<Order, OrderError> {
        Err(OrderError::NotImplemented(RpcMethod::GetOrder.as_str().into()))
    }

    async fn list_orders(&self, _user_id: UserId) -> Result<Vec<Order>, OrderError> {
        Err(OrderError::NotImplemented(RpcMethod::ListOrders.as_str().into()))
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, OrderError> {
        Err(OrderError::NotImplemented(RpcMethod::CancelOrder.as_str().into()))
    }
}

#[async_trait]
impl<S: OrderStore> OrderRpc for StatusRelay<S> {
    async fn update_status(&self, order_id: &str, status: &str) -> Result<bool, OrderError> {
        self.update_status_str(order_id, status).await
    }
}
