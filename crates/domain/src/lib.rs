//! Order-creation transaction engine.
//!
//! This crate turns a list of cart lines into a durable, uniquely numbered
//! order while keeping stock consistent under concurrent requests:
//! - [`order_number`] issues globally unique order numbers
//! - [`reservation`] locks product rows in a stable order and decrements stock
//! - [`coordinator`] wraps reservation and order insert in one transaction
//! - [`cart`] clears the originating cart after commit, best-effort
//! - [`relay`] applies validated status transitions (e.g. payment confirmation)

pub mod cart;
pub mod coordinator;
pub mod error;
pub mod order_number;
pub mod relay;
pub mod reservation;
pub mod rpc;

pub use cart::{CartReconciler, CartReconcilerHandle, CartWorkerConfig, RetryPolicy, clear_cart};
pub use coordinator::{CoordinatorConfig, OrderCoordinator, OrderLine};
pub use error::OrderError;
pub use order_number::{IdError, MAX_WORKER_ID, OrderNumber, OrderNumberSource, SnowflakeGenerator};
pub use relay::StatusRelay;
pub use reservation::{Reservation, reserve};
pub use rpc::{OrderRpc, RpcMethod};
