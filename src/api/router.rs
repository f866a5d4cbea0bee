use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};

use crate::app::runtime::PressureMonitor;

use super::admission::admission_gate;
use super::handlers::status;

impl PressureMonitor {
    /// Mounts the status routes, the admission gate and the monitor extension.
    ///
    /// Call after every other route is registered: `Router::layer` only wraps
    /// routes that already exist. The gate is skipped entirely when nothing can
    /// ever produce pressure.
    pub fn attach<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut router = router;

        if let Some(route) = self.status_route() {
            let m = self.clone();
            router = router.route(&route.url, get(move || status::status(m.clone())));

            if let Some(details_url) = route.details_url.as_deref() {
                let m = self.clone();
                router = router.route(details_url, get(move || status::details(m.clone())));
            }
        }

        if self.enforcement_enabled() {
            router = self.gate(router);
        } else {
            tracing::info!(
                component = "admission",
                "no thresholds or health check configured; admission gate not installed"
            );
        }

        router.layer(Extension(self.clone()))
    }

    /// Installs only the admission gate, for hosts that mount status routes themselves.
    pub fn gate<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(from_fn_with_state(self.clone(), admission_gate))
    }
}
