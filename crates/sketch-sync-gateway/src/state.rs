//! Gateway shared state.

use std::sync::Arc;

use sketch_sync_actions::ActionSource;
use sketch_sync_core::config::Config;
use sketch_sync_core::store::ElementStore;

use crate::hub::BroadcastHub;
use crate::sync::SyncGateway;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sync: SyncGateway,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        store: Box<dyn ElementStore>,
        action_source: Option<Arc<dyn ActionSource>>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        Self {
            config,
            sync: SyncGateway::new(store, hub, action_source),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        self.sync.hub()
    }
}
