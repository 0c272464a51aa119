//! In-process provider: one fake worker, available almost immediately.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::foundation::error::RayfleetResult;
use crate::provider::{EndpointStream, Provider};
use crate::rpc::{FakeEndpoint, RpcEndpoint};

/// Provider that yields a single in-process [`FakeEndpoint`].
///
/// Used by `--fake` runs and dispatcher tests; costs nothing.
pub struct FakeProvider {
    startup_delay: Duration,
}

impl FakeProvider {
    /// Provider with a short, arbitrary startup delay.
    pub fn new() -> Self {
        Self {
            startup_delay: Duration::from_millis(100),
        }
    }

    /// Provider whose endpoint arrives after `delay` (tests).
    pub fn with_startup_delay(delay: Duration) -> Self {
        Self {
            startup_delay: delay,
        }
    }
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for FakeProvider {
    fn safe_describe(&self) -> String {
        "FakeProvider".to_owned()
    }

    fn prepare(&mut self) -> RayfleetResult<EndpointStream> {
        info!("preparing fake provider");
        let (tx, rx) = crossbeam_channel::unbounded::<Arc<dyn RpcEndpoint>>();
        let delay = self.startup_delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let _ = tx.send(Arc::new(FakeEndpoint::new("fake-worker-0")));
        });
        Ok(rx)
    }

    fn discard(&mut self) {
        info!("discarding fake provider");
    }

    fn calc_bill(&self) -> (String, f64) {
        ("Infinitely powerful computer".to_owned(), 0.0)
    }

    fn notify_useless(&mut self, endpoint_id: &str) {
        info!(endpoint_id, "fake provider ignoring useless-endpoint hint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_yields_one_endpoint() {
        let mut provider = FakeProvider::with_startup_delay(Duration::from_millis(1));
        let stream = provider.prepare().unwrap();
        let ep = stream.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ep.id(), "fake-worker-0");
        // The stream ends after the single endpoint.
        assert!(stream.recv_timeout(Duration::from_millis(200)).is_err());
        provider.discard();
    }
}
