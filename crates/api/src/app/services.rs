use std::sync::Arc;

use canopy_dispatch::{
    AnalyticsAdapter, AnalyticsController, CloudRegistry, DispatchConfig, Dispatcher,
    InMemoryObjectStore,
};

/// Engine wiring shared by all route handlers.
pub struct AppServices {
    pub dispatcher: Dispatcher,
}

/// Assemble the dispatch engine behind the HTTP surface.
///
/// The object store backs both job statuses and slow-execution records; the
/// analytics controller and the dispatcher share it.
pub fn build_services(
    config: DispatchConfig,
    registry: CloudRegistry,
    adapter: Arc<dyn AnalyticsAdapter>,
) -> AppServices {
    let store = InMemoryObjectStore::arc();
    let analytics = Arc::new(AnalyticsController::new(
        adapter,
        store.clone(),
        config.slow_tracking,
    ));
    let dispatcher = Dispatcher::new(config, Arc::new(registry), store, analytics);

    AppServices { dispatcher }
}
