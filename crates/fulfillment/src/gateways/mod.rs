//! Gateways to the external ERP modules.
//!
//! Each module gets a trait, an in-memory implementation with failure
//! injection for tests, and a reqwest client. Gateway calls never hold a
//! ledger lock.

mod finance;
pub(crate) mod http;
mod invoicing;
mod production;
mod sales;

pub use finance::{
    FinanceGateway, HttpFinanceGateway, InMemoryFinanceGateway, Receivable, ReceivableRequest,
    ReceivableStatus, ReceivableUpdate,
};
pub use http::GatewayConfig;
pub use invoicing::{
    HttpInvoicingGateway, InMemoryInvoicingGateway, Invoice, InvoiceRequest, InvoiceStatus,
    InvoicingGateway,
};
pub use production::{
    HttpProductionGateway, InMemoryProductionGateway, ProductionGateway, ProductionLine,
    ProductionOrder, ProductionOrderRequest, ProductionStatus,
};
pub use sales::{HttpSalesGateway, InMemorySalesGateway, SalesGateway};
