//! Order fulfillment across the ERP modules.
//!
//! An approved sales order is fulfilled in steps:
//! 1. Validate the order
//! 2. Check stock availability for every line
//! 3. Reserve the stock
//! 4. Issue the invoice
//! 5. Create one receivable per installment
//! 6. Open a production order when the goods are manufactured
//! 7. Write the resulting status and references back to Sales
//!
//! A failed invoice releases the reservations. Failures after the invoice
//! leave a named [`FulfillmentState`] that a repeated request completes
//! without duplicating documents.

pub mod calendar;
pub mod error;
pub mod gateways;
pub mod installments;
pub mod orchestrator;
pub mod order;
pub mod permissions;
pub mod progress;
pub mod state;
pub mod steps;

pub use error::{FulfillmentError, GatewayError, Result, StepCause};
pub use gateways::{
    FinanceGateway, GatewayConfig, HttpFinanceGateway, HttpInvoicingGateway,
    HttpProductionGateway, HttpSalesGateway, InMemoryFinanceGateway, InMemoryInvoicingGateway,
    InMemoryProductionGateway, InMemorySalesGateway, Invoice, InvoicingGateway, ProductionGateway,
    ProductionOrder, ProductionStatus, Receivable, ReceivableStatus, SalesGateway,
};
pub use installments::Installment;
pub use orchestrator::{FulfillmentOrchestrator, OrchestratorConfig};
pub use order::{DocumentLinks, OrderLine, PaymentTerms, SalesOrder, SalesOrderStatus, StatusUpdate};
pub use permissions::{AllowAll, PermissionChecker, StaticPermissions};
pub use progress::FulfillmentProgress;
pub use state::FulfillmentState;
