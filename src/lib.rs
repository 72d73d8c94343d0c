pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ledger;
pub mod meter;
pub mod policy;
pub mod providers;
pub mod sse;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{OidcVerifier, TokenService};
use crate::config::Config;
use crate::db::Database;
use crate::http::HttpClient;
use crate::ledger::CostLedger;
use crate::meter::MeterEvent;
use crate::policy::BudgetPolicy;
use crate::providers::AdapterRegistry;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub ledger: Arc<CostLedger>,
    pub policy: Arc<BudgetPolicy>,
    pub tokens: Arc<TokenService>,
    pub oidc: Arc<OidcVerifier>,
    pub registry: Arc<AdapterRegistry>,
    pub http: HttpClient,
    pub meter_tx: mpsc::UnboundedSender<MeterEvent>,
}

impl AppState {
    /// Wire the full state from a config, an opened database, and the
    /// metering channel sender. The policy and salt maps come from their
    /// source-edited tables.
    pub fn new(config: Config, db: Database, meter_tx: mpsc::UnboundedSender<MeterEvent>) -> Self {
        let http = HttpClient::new();
        let registry = Arc::new(AdapterRegistry::standard(&config, &http));
        let tokens = Arc::new(TokenService::new(
            &config.secret,
            policy::salt_map(),
            config.admin_emails.clone(),
        ));
        let oidc = Arc::new(OidcVerifier::new(
            http.clone(),
            config.oidc_certs_url.clone(),
        ));
        let ledger = Arc::new(CostLedger::new(db.clone()));

        Self {
            config: Arc::new(config),
            db,
            ledger,
            policy: Arc::new(BudgetPolicy::builtin()),
            tokens,
            oidc,
            registry,
            http,
            meter_tx,
        }
    }
}
