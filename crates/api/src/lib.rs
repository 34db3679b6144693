//! HTTP service for the stock ledger, reservations and order fulfillment.
//!
//! Provides REST endpoints over the reservation manager, the expiration
//! sweeper and the fulfillment orchestrator, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{
    FinanceGateway, FulfillmentOrchestrator, GatewayError, HttpFinanceGateway,
    HttpInvoicingGateway, HttpProductionGateway, HttpSalesGateway, InvoicingGateway,
    PermissionChecker, ProductionGateway, SalesGateway,
};
use inventory::{ExpirationSweeper, ReservationManager};
use ledger::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Orchestrator over boxed module gateways, so HTTP clients and in-memory
/// fakes plug in the same way.
pub type Orchestrator<S> = FulfillmentOrchestrator<
    S,
    Arc<dyn SalesGateway>,
    Arc<dyn InvoicingGateway>,
    Arc<dyn FinanceGateway>,
    Arc<dyn ProductionGateway>,
>;

/// The four external modules fulfillment talks to.
#[derive(Clone)]
pub struct Gateways {
    pub sales: Arc<dyn SalesGateway>,
    pub invoicing: Arc<dyn InvoicingGateway>,
    pub finance: Arc<dyn FinanceGateway>,
    pub production: Arc<dyn ProductionGateway>,
}

impl Gateways {
    /// HTTP clients for the module URLs in `config`.
    pub fn http(config: &Config) -> Result<Self, GatewayError> {
        Ok(Self {
            sales: Arc::new(HttpSalesGateway::new(&config.gateway(&config.sales_url))?),
            invoicing: Arc::new(HttpInvoicingGateway::new(
                &config.gateway(&config.invoicing_url),
            )?),
            finance: Arc::new(HttpFinanceGateway::new(&config.gateway(&config.finance_url))?),
            production: Arc::new(HttpProductionGateway::new(
                &config.gateway(&config.production_url),
            )?),
        })
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: LedgerStore> {
    pub reservations: ReservationManager<S>,
    pub orchestrator: Orchestrator<S>,
    pub sweeper: ExpirationSweeper<S>,
}

/// Builds the application state over a ledger store.
pub fn create_state<S: LedgerStore + Clone + 'static>(
    store: S,
    gateways: Gateways,
    permissions: Arc<dyn PermissionChecker>,
    config: &Config,
) -> Arc<AppState<S>> {
    let mut reservations = ReservationManager::new(store);
    if let Some(ttl) = config.reservation_ttl() {
        reservations = reservations.with_default_ttl(ttl);
    }

    let orchestrator = FulfillmentOrchestrator::new(
        reservations.clone(),
        gateways.sales,
        gateways.invoicing,
        gateways.finance,
        gateways.production,
    )
    .with_permissions(permissions)
    .with_config(config.orchestrator());

    let sweeper = ExpirationSweeper::new(reservations.clone(), config.sweep_interval);

    Arc::new(AppState {
        reservations,
        orchestrator,
        sweeper,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/stock/alerts", get(routes::stock::alerts::<S>))
        .route("/stock/{code}", get(routes::stock::availability::<S>))
        .route(
            "/stock/{code}/reservations",
            get(routes::stock::reservations::<S>),
        )
        .route("/stock/{code}/movements", get(routes::stock::movements::<S>))
        .route("/reservations", post(routes::reservations::create::<S>))
        .route("/reservations/{id}", get(routes::reservations::get::<S>))
        .route(
            "/reservations/{id}/consume",
            post(routes::reservations::consume::<S>),
        )
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<S>),
        )
        .route("/orders/{id}/fulfill", post(routes::orders::fulfill::<S>))
        .route(
            "/orders/{id}/fulfillment",
            get(routes::orders::progress::<S>),
        )
        .route(
            "/orders/{id}/cancel-fulfillment",
            post(routes::orders::cancel_fulfillment::<S>),
        )
        .route("/orders/{id}/ship", post(routes::orders::ship::<S>))
        .route(
            "/orders/{id}/production-status",
            post(routes::orders::production_status::<S>),
        )
        .route("/sweeps", post(routes::sweeps::run::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
