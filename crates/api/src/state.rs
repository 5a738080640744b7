//! Shared application state.

use std::sync::Arc;

use domain::{
    CartReconciler, OrderCoordinator, OrderError, SnowflakeGenerator, StatusRelay,
};
use store::{CartStore, OrderStore};

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub coordinator: OrderCoordinator<S>,
    pub relay: StatusRelay<S>,
    pub carts: Arc<dyn CartStore>,
    pub store: S,
}

/// Wires the engine over the given stores and starts the cart reconciler.
///
/// The returned reconciler must be shut down after the server stops so that
/// queued cart cleanups are drained. Fails if the configured worker id is out
/// of range.
pub fn create_default_state<S>(
    store: S,
    carts: Arc<dyn CartStore>,
    config: &Config,
) -> Result<(Arc<AppState<S>>, CartReconciler), OrderError>
where
    S: OrderStore + Clone + 'static,
{
    let order_numbers = Arc::new(SnowflakeGenerator::new(config.worker_id)?);
    let reconciler = CartReconciler::start(carts.clone(), config.cart_workers());

    let state = Arc::new(AppState {
        coordinator: OrderCoordinator::new(
            store.clone(),
            order_numbers,
            reconciler.handle(),
            config.coordinator(),
        ),
        relay: StatusRelay::new(store.clone()),
        carts,
        store,
    });

    Ok((state, reconciler))
}
