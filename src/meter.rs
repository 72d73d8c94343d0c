//! Background metering.
//!
//! Handlers emit a [`MeterEvent`] per metered request; one background task
//! resolves the dollar cost through the owning adapter and debits the ledger.
//! The client response never waits on (or learns about) this work.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ledger::CostLedger;
use crate::providers::types::{CostContext, Usage};
use crate::providers::AdapterRegistry;

/// One completed request awaiting cost settlement.
#[derive(Debug)]
pub struct MeterEvent {
    pub email: String,
    /// Adapter id the request went through.
    pub provider: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    /// Path suffix of the originating request.
    pub path: String,
    /// Parsed request body, for cost paths that need it.
    pub request_body: Option<serde_json::Value>,
}

/// Spawn the metering loop. It drains the channel and exits when every
/// sender is dropped, so shutdown settles in-flight events.
pub fn spawn_meter_loop(
    ledger: Arc<CostLedger>,
    registry: Arc<AdapterRegistry>,
    mut rx: mpsc::UnboundedReceiver<MeterEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            settle(&ledger, &registry, event).await;
        }
        tracing::info!("Metering loop shutting down");
    })
}

async fn settle(ledger: &CostLedger, registry: &AdapterRegistry, event: MeterEvent) {
    let Some(adapter) = registry.get(&event.provider) else {
        tracing::warn!(provider = %event.provider, "Meter event for unknown adapter");
        return;
    };

    let ctx = CostContext {
        model: event.model,
        usage: event.usage,
        path: event.path,
        request_body: event.request_body,
    };

    let cost = match adapter.cost(&ctx).await {
        Ok(cost) => cost,
        Err(e) => {
            tracing::warn!(
                provider = %event.provider,
                error = %e,
                "Cost resolution failed, nothing recorded"
            );
            return;
        }
    };

    if cost <= 0.0 {
        return;
    }

    match ledger.add(&event.email, cost) {
        Ok(()) => {
            tracing::debug!(
                email = %event.email,
                provider = %event.provider,
                model = ?ctx.model,
                cost_usd = %format!("{cost:.6}"),
                "Metered request"
            );
        }
        Err(e) => {
            tracing::error!(email = %event.email, error = %e, "Ledger write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::http::HttpClient;
    use crate::providers::types::Usage;

    fn fixtures() -> (Arc<CostLedger>, Arc<AdapterRegistry>) {
        let ledger = Arc::new(CostLedger::new(Database::open_in_memory().unwrap()));
        let mut config = Config::with_secret("s");
        config.openai_api_key = Some("sk-server".to_string());
        let registry = Arc::new(AdapterRegistry::standard(&config, &HttpClient::new()));
        (ledger, registry)
    }

    fn event(usage: Option<Usage>) -> MeterEvent {
        MeterEvent {
            email: "a@b.com".to_string(),
            provider: "openai".to_string(),
            model: Some("gpt-4.1-nano".to_string()),
            usage,
            path: "v1/chat/completions".to_string(),
            request_body: None,
        }
    }

    #[tokio::test]
    async fn test_loop_settles_and_drains_on_close() {
        let (ledger, registry) = fixtures();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_meter_loop(Arc::clone(&ledger), registry, rx);

        tx.send(event(Some(Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 0,
            ..Default::default()
        })))
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let sum = ledger.sum("a@b.com", 1).unwrap();
        assert!((sum - 0.10).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_cost_writes_nothing() {
        let (ledger, registry) = fixtures();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_meter_loop(Arc::clone(&ledger), registry, rx);

        // No usage latched: zero cost, no row.
        tx.send(event(None)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(ledger.all_usage().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_adapter_is_ignored() {
        let (ledger, registry) = fixtures();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_meter_loop(Arc::clone(&ledger), registry, rx);

        tx.send(MeterEvent {
            provider: "nonexistent".to_string(),
            ..event(Some(Usage::default()))
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(ledger.all_usage().unwrap().is_empty());
    }
}
