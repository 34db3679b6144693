//! Application configuration loaded from environment variables.

use std::time::Duration;

use fulfillment::permissions::{actions, modules};
use fulfillment::{GatewayConfig, OrchestratorConfig, StaticPermissions};

/// Grants the fulfillment actor holds when `FULFILLMENT_GRANTS` is unset:
/// every action the pipeline and its reversal perform.
const DEFAULT_GRANTS: &[(&str, &str)] = &[
    (modules::INVENTORY, actions::RESERVE),
    (modules::INVENTORY, actions::CONSUME),
    (modules::INVENTORY, actions::CANCEL),
    (modules::INVOICING, actions::CREATE),
    (modules::INVOICING, actions::CANCEL),
    (modules::FINANCE, actions::CREATE),
    (modules::FINANCE, actions::CANCEL),
    (modules::PRODUCTION, actions::CREATE),
    (modules::SALES, actions::UPDATE),
];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default: `"0.0.0.0"`) and `PORT` (default: `3000`)
/// - `RUST_LOG`, the tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`, `text` or `json` (default: `text`)
/// - `DATABASE_URL`; the in-memory ledger is used when unset
/// - `SALES_URL`, `INVOICING_URL`, `FINANCE_URL`, `PRODUCTION_URL`
/// - `GATEWAY_TOKEN`, sent as a bearer token to every module
/// - `GATEWAY_TIMEOUT_MS` (default: `10000`)
/// - `SWEEP_INTERVAL_SECS` (default: `86400`)
/// - `RESERVATION_TTL_DAYS` (default: `7`)
/// - `FULFILLMENT_ACTOR` (default: `"fulfillment-service"`)
/// - `FULFILLMENT_GRANTS`, comma-separated `module:action` pairs held by the
///   actor; `*` as the action covers the whole module. Entries without a
///   `:` are ignored. Defaults to everything fulfillment performs.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub sales_url: String,
    pub invoicing_url: String,
    pub finance_url: String,
    pub production_url: String,
    pub gateway_token: Option<String>,
    pub gateway_timeout: Duration,
    pub sweep_interval: Duration,
    pub reservation_ttl_days: i64,
    pub actor: String,
    /// `(module, action)` pairs granted to `actor`.
    pub grants: Vec<(String, String)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparsable values fall back
    /// to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            sales_url: lookup("SALES_URL").unwrap_or(defaults.sales_url),
            invoicing_url: lookup("INVOICING_URL").unwrap_or(defaults.invoicing_url),
            finance_url: lookup("FINANCE_URL").unwrap_or(defaults.finance_url),
            production_url: lookup("PRODUCTION_URL").unwrap_or(defaults.production_url),
            gateway_token: lookup("GATEWAY_TOKEN").filter(|t| !t.is_empty()),
            gateway_timeout: parsed("GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            reservation_ttl_days: lookup("RESERVATION_TTL_DAYS")
                .and_then(|d| d.parse().ok())
                .unwrap_or(defaults.reservation_ttl_days),
            actor: lookup("FULFILLMENT_ACTOR").unwrap_or(defaults.actor),
            grants: lookup("FULFILLMENT_GRANTS")
                .map(|list| parse_grants(&list))
                .unwrap_or(defaults.grants),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection settings for a module at `base_url`.
    pub fn gateway(&self, base_url: &str) -> GatewayConfig {
        let config = GatewayConfig::new(base_url).with_timeout(self.gateway_timeout);
        match &self.gateway_token {
            Some(token) => config.with_token(token.clone()),
            None => config,
        }
    }

    /// Default TTL for reservations; `None` when disabled with `0`.
    pub fn reservation_ttl(&self) -> Option<chrono::Duration> {
        if self.reservation_ttl_days > 0 {
            chrono::Duration::try_days(self.reservation_ttl_days)
        } else {
            None
        }
    }

    /// Permission table holding the configured grants for the actor.
    pub fn permissions(&self) -> StaticPermissions {
        self.grants
            .iter()
            .fold(StaticPermissions::new(), |permissions, (module, action)| {
                permissions.grant(&self.actor, module, action)
            })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            actor: self.actor.clone(),
            ..OrchestratorConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            sales_url: "http://localhost:3003".to_string(),
            invoicing_url: "http://localhost:3001".to_string(),
            finance_url: "http://localhost:3004".to_string(),
            production_url: "http://localhost:3000".to_string(),
            gateway_token: None,
            gateway_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            reservation_ttl_days: 7,
            actor: "fulfillment-service".to_string(),
            grants: DEFAULT_GRANTS
                .iter()
                .map(|(module, action)| (module.to_string(), action.to_string()))
                .collect(),
        }
    }
}

fn parse_grants(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter_map(|entry| entry.trim().split_once(':'))
        .map(|(module, action)| (module.trim().to_string(), action.trim().to_string()))
        .filter(|(module, action)| !module.is_empty() && !action.is_empty())
        .collect()
}
