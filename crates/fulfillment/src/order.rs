//! Sales order as read from and written to the Sales module.
//!
//! Field names on the wire follow the Sales module's JSON; the Rust names are
//! the ones used throughout this crate.

use chrono::NaiveDate;
use common::{MaterialCode, Money, OrderId};
use inventory::ReservationLine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::gateways::http::external_id;

/// Status of a sales order in the Sales module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SalesOrderStatus {
    #[serde(rename = "orcamento", alias = "draft")]
    Draft,
    #[serde(rename = "aprovado", alias = "approved")]
    Approved,
    #[serde(rename = "faturado", alias = "invoiced")]
    Invoiced,
    #[serde(rename = "em_producao", alias = "in_production")]
    InProduction,
    #[serde(rename = "produzido", alias = "produced")]
    Produced,
    #[serde(rename = "pronto_faturar", alias = "ready_to_invoice")]
    ReadyToInvoice,
    #[serde(rename = "cancelado", alias = "cancelled")]
    Cancelled,
}

impl SalesOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesOrderStatus::Draft => "draft",
            SalesOrderStatus::Approved => "approved",
            SalesOrderStatus::Invoiced => "invoiced",
            SalesOrderStatus::InProduction => "in_production",
            SalesOrderStatus::Produced => "produced",
            SalesOrderStatus::ReadyToInvoice => "ready_to_invoice",
            SalesOrderStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true once fulfillment has moved the order past `approved`.
    pub fn is_past_approval(&self) -> bool {
        matches!(
            self,
            SalesOrderStatus::Invoiced
                | SalesOrderStatus::InProduction
                | SalesOrderStatus::Produced
                | SalesOrderStatus::ReadyToInvoice
        )
    }
}

impl std::fmt::Display for SalesOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One item line of a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(rename = "codigo", alias = "material_code")]
    pub material_code: MaterialCode,
    #[serde(rename = "descricao", alias = "description", default)]
    pub description: Option<String>,
    #[serde(rename = "quantidade", alias = "quantity")]
    pub quantity: Decimal,
    #[serde(rename = "unidade", alias = "unit", default)]
    pub unit: Option<String>,
}

impl OrderLine {
    pub fn new(material_code: impl Into<MaterialCode>, quantity: Decimal) -> Self {
        Self {
            material_code: material_code.into(),
            description: None,
            quantity,
            unit: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&OrderLine> for ReservationLine {
    fn from(line: &OrderLine) -> Self {
        ReservationLine::new(line.material_code.clone(), line.quantity)
    }
}

/// References to the documents fulfillment created for an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLinks {
    #[serde(
        rename = "nfe_id",
        default,
        deserialize_with = "external_id::deserialize_option"
    )]
    pub invoice_id: Option<String>,
    #[serde(rename = "numero_nf", default)]
    pub invoice_number: Option<String>,
    #[serde(
        rename = "ordem_producao_id",
        default,
        deserialize_with = "external_id::deserialize_option"
    )]
    pub production_order_id: Option<String>,
}

impl DocumentLinks {
    pub fn is_empty(&self) -> bool {
        self.invoice_id.is_none()
            && self.invoice_number.is_none()
            && self.production_order_id.is_none()
    }
}

/// Installment plan for the receivables of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    #[serde(rename = "parcelas", alias = "installments")]
    pub installments: u32,
    #[serde(rename = "dias_primeiro_vencimento", alias = "first_due_days")]
    pub first_due_days: u32,
    #[serde(rename = "intervalo_dias", alias = "interval_days")]
    pub interval_days: u32,
}

impl Default for PaymentTerms {
    fn default() -> Self {
        Self {
            installments: 1,
            first_due_days: 30,
            interval_days: 30,
        }
    }
}

/// A sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub id: OrderId,
    #[serde(rename = "numero", alias = "number", default)]
    pub number: Option<String>,
    pub status: SalesOrderStatus,
    #[serde(rename = "cliente_id", alias = "empresa_id", default)]
    pub customer_id: Option<i64>,
    #[serde(rename = "cliente_nome", alias = "empresa_nome", default)]
    pub customer_name: Option<String>,
    #[serde(rename = "itens", alias = "lines", default)]
    pub lines: Vec<OrderLine>,
    #[serde(rename = "valor_total", alias = "total")]
    pub total: Money,
    #[serde(rename = "data_previsao", alias = "delivery_date", default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(rename = "requer_producao", alias = "requires_production", default)]
    pub requires_production: bool,
    #[serde(rename = "condicoes_pagamento", alias = "payment_terms", default)]
    pub payment_terms: Option<PaymentTerms>,
    #[serde(flatten)]
    pub links: DocumentLinks,
}

impl SalesOrder {
    /// Creates an approved order with no lines and no customer.
    pub fn new(id: OrderId, total: Money) -> Self {
        Self {
            id,
            number: None,
            status: SalesOrderStatus::Approved,
            customer_id: None,
            customer_name: None,
            lines: Vec::new(),
            total,
            delivery_date: None,
            requires_production: false,
            payment_terms: None,
            links: DocumentLinks::default(),
        }
    }

    pub fn with_customer(mut self, id: i64, name: impl Into<String>) -> Self {
        self.customer_id = Some(id);
        self.customer_name = Some(name.into());
        self
    }

    pub fn with_line(mut self, line: OrderLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_status(mut self, status: SalesOrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_payment_terms(mut self, terms: PaymentTerms) -> Self {
        self.payment_terms = Some(terms);
        self
    }

    pub fn requiring_production(mut self) -> Self {
        self.requires_production = true;
        self
    }

    pub fn with_delivery_date(mut self, date: NaiveDate) -> Self {
        self.delivery_date = Some(date);
        self
    }

    /// Human-readable document number, falling back to the id.
    pub fn document_number(&self) -> String {
        self.number
            .clone()
            .unwrap_or_else(|| format!("PV-{}", self.id))
    }

    /// Lists every rule that keeps the order from being fulfilled.
    ///
    /// `resuming` accepts orders that fulfillment already moved past
    /// `approved`, so an interrupted run can be completed.
    pub fn violations(&self, resuming: bool) -> Vec<String> {
        let mut violations = Vec::new();

        let status_ok = self.status == SalesOrderStatus::Approved
            || (resuming && self.status.is_past_approval());
        if !status_ok {
            violations.push(format!(
                "order status is {}, expected approved",
                self.status
            ));
        }
        if self.customer_id.is_none() {
            violations.push("order has no customer".to_string());
        }
        if self.lines.is_empty() {
            violations.push("order has no items".to_string());
        }
        if self.lines.iter().any(|l| l.quantity <= Decimal::ZERO) {
            violations.push("order has items with non-positive quantity".to_string());
        }
        if !self.total.is_positive() {
            violations.push(format!("order total must be positive, got {}", self.total));
        }

        violations
    }
}

/// Status write-back to the Sales module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SalesOrderStatus,
    #[serde(flatten)]
    pub links: DocumentLinks,
}

impl StatusUpdate {
    pub fn new(status: SalesOrderStatus, links: DocumentLinks) -> Self {
        Self { status, links }
    }
}
