//! Invoicing module gateway.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use common::{Money, OrderId};
use serde::{Deserialize, Serialize};

use super::http::{GatewayConfig, JsonClient, external_id};
use crate::error::GatewayError;
use crate::order::OrderLine;
use crate::permissions::modules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[serde(alias = "emitida")]
    Issued,
    #[serde(alias = "cancelada")]
    Cancelled,
}

/// Request to issue an invoice for a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: i64,
    pub customer_name: Option<String>,
    pub lines: Vec<OrderLine>,
    pub total: Money,
}

/// An invoice as held by the Invoicing module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(deserialize_with = "external_id::deserialize")]
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    pub order_id: OrderId,
    pub total: Money,
    pub issued_on: NaiveDate,
    pub status: InvoiceStatus,
}

impl Invoice {
    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }
}

#[derive(Debug, Serialize)]
struct CancelInvoice<'a> {
    justification: &'a str,
}

/// Issues and cancels invoices.
#[async_trait]
pub trait InvoicingGateway: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError>;

    /// Every invoice issued for the order, cancelled ones included.
    async fn invoices_for_order(&self, order_id: OrderId) -> Result<Vec<Invoice>, GatewayError>;

    async fn cancel_invoice(
        &self,
        invoice_id: &str,
        justification: &str,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
impl<T: InvoicingGateway + ?Sized> InvoicingGateway for Arc<T> {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        (**self).create_invoice(request).await
    }

    async fn invoices_for_order(&self, order_id: OrderId) -> Result<Vec<Invoice>, GatewayError> {
        (**self).invoices_for_order(order_id).await
    }

    async fn cancel_invoice(
        &self,
        invoice_id: &str,
        justification: &str,
    ) -> Result<(), GatewayError> {
        (**self).cancel_invoice(invoice_id, justification).await
    }
}

#[derive(Debug, Default)]
struct InMemoryInvoicingState {
    invoices: Vec<Invoice>,
    justifications: Vec<(String, String)>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
}

/// In-memory Invoicing module for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInvoicingGateway {
    state: Arc<RwLock<InMemoryInvoicingState>>,
}

impl InMemoryInvoicingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures invoice creation to time out.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().unwrap().fail_on_cancel = fail;
    }

    /// Returns the number of invoices that are not cancelled.
    pub fn issued_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .invoices
            .iter()
            .filter(|i| !i.is_cancelled())
            .count()
    }

    /// Returns the number of invoices ever created.
    pub fn created_count(&self) -> usize {
        self.state.read().unwrap().invoices.len()
    }

    /// Returns the justification given when `invoice_id` was cancelled.
    pub fn cancel_justification(&self, invoice_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .justifications
            .iter()
            .find(|(id, _)| id == invoice_id)
            .map(|(_, j)| j.clone())
    }
}

#[async_trait]
impl InvoicingGateway for InMemoryInvoicingGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(GatewayError::Timeout {
                module: modules::INVOICING,
                timeout_ms: 10_000,
            });
        }

        state.next_id += 1;
        let invoice = Invoice {
            id: format!("NF-{:04}", state.next_id),
            number: Some(format!("{:06}", state.next_id)),
            order_id: request.order_id,
            total: request.total,
            issued_on: Utc::now().date_naive(),
            status: InvoiceStatus::Issued,
        };
        state.invoices.push(invoice.clone());

        Ok(invoice)
    }

    async fn invoices_for_order(&self, order_id: OrderId) -> Result<Vec<Invoice>, GatewayError> {
        Ok(self
            .state
            .read()
            .unwrap()
            .invoices
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn cancel_invoice(
        &self,
        invoice_id: &str,
        justification: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_cancel {
            return Err(GatewayError::Unavailable {
                module: modules::INVOICING,
                message: "connection reset".to_string(),
            });
        }

        let invoice = state
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice_id)
            .ok_or_else(|| GatewayError::NotFound {
                module: modules::INVOICING,
                resource: format!("invoice {invoice_id}"),
            })?;
        invoice.status = InvoiceStatus::Cancelled;
        state
            .justifications
            .push((invoice_id.to_string(), justification.to_string()));
        Ok(())
    }
}

/// Invoicing module over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInvoicingGateway {
    client: JsonClient,
}

impl HttpInvoicingGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: JsonClient::new(modules::INVOICING, config)?,
        })
    }
}

#[async_trait]
impl InvoicingGateway for HttpInvoicingGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        self.client
            .post("/api/faturamento/invoices", request)
            .await
    }

    async fn invoices_for_order(&self, order_id: OrderId) -> Result<Vec<Invoice>, GatewayError> {
        self.client
            .get(
                "/api/faturamento/invoices",
                &[("order_id", order_id.to_string())],
            )
            .await
    }

    async fn cancel_invoice(
        &self,
        invoice_id: &str,
        justification: &str,
    ) -> Result<(), GatewayError> {
        self.client
            .post_ignoring_body(
                &format!("/api/faturamento/invoices/{invoice_id}/cancel"),
                &CancelInvoice { justification },
            )
            .await
    }
}
