//! Production (PCP) module gateway.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{MaterialCode, OrderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::http::{GatewayConfig, JsonClient, external_id};
use crate::error::GatewayError;
use crate::order::{OrderLine, SalesOrderStatus};
use crate::permissions::modules;

/// Status of a production order on the shop floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductionStatus {
    #[serde(rename = "a_produzir", alias = "to_produce")]
    ToProduce,
    #[serde(rename = "produzindo", alias = "producing")]
    Producing,
    #[serde(rename = "qualidade", alias = "quality")]
    Quality,
    #[serde(rename = "conferido", alias = "checked")]
    Checked,
    #[serde(rename = "concluido", alias = "finished")]
    Finished,
    #[serde(rename = "armazenado", alias = "stored")]
    Stored,
    #[serde(rename = "cancelado", alias = "cancelled")]
    Cancelled,
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::ToProduce => "to_produce",
            ProductionStatus::Producing => "producing",
            ProductionStatus::Quality => "quality",
            ProductionStatus::Checked => "checked",
            ProductionStatus::Finished => "finished",
            ProductionStatus::Stored => "stored",
            ProductionStatus::Cancelled => "cancelled",
        }
    }

    /// The sales status this production status is reported as, if any.
    pub fn sales_status(&self) -> Option<SalesOrderStatus> {
        match self {
            ProductionStatus::ToProduce
            | ProductionStatus::Producing
            | ProductionStatus::Quality
            | ProductionStatus::Checked => Some(SalesOrderStatus::InProduction),
            ProductionStatus::Finished => Some(SalesOrderStatus::Produced),
            ProductionStatus::Stored => Some(SalesOrderStatus::ReadyToInvoice),
            ProductionStatus::Cancelled => None,
        }
    }
}

impl std::fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLine {
    #[serde(rename = "produto_codigo")]
    pub material_code: MaterialCode,
    #[serde(rename = "produto_descricao")]
    pub description: Option<String>,
    #[serde(rename = "quantidade")]
    pub quantity: Decimal,
    #[serde(rename = "unidade")]
    pub unit: String,
}

impl From<&OrderLine> for ProductionLine {
    fn from(line: &OrderLine) -> Self {
        Self {
            material_code: line.material_code.clone(),
            description: line.description.clone(),
            quantity: line.quantity,
            unit: line.unit.clone().unwrap_or_else(|| "UN".to_string()),
        }
    }
}

/// Request to open a production order for a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionOrderRequest {
    #[serde(rename = "pedido_vendas_id")]
    pub sales_order_id: OrderId,
    #[serde(rename = "cliente_id")]
    pub customer_id: i64,
    #[serde(rename = "cliente_nome")]
    pub customer_name: Option<String>,
    #[serde(rename = "prioridade")]
    pub priority: String,
    #[serde(rename = "data_previsao")]
    pub due_date: NaiveDate,
    #[serde(rename = "observacoes")]
    pub notes: String,
    #[serde(rename = "itens")]
    pub lines: Vec<ProductionLine>,
    pub status: ProductionStatus,
}

/// A production order as held by the Production module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionOrder {
    #[serde(deserialize_with = "external_id::deserialize")]
    pub id: String,
    #[serde(rename = "numero", default)]
    pub number: Option<String>,
    #[serde(rename = "pedido_vendas_id")]
    pub sales_order_id: OrderId,
    pub status: ProductionStatus,
    #[serde(rename = "data_previsao", default)]
    pub due_date: Option<NaiveDate>,
}

/// Opens production orders.
///
/// The Production module offers no cancellation, so a reversal leaves its
/// orders in place.
#[async_trait]
pub trait ProductionGateway: Send + Sync {
    async fn create_production_order(
        &self,
        request: &ProductionOrderRequest,
    ) -> Result<ProductionOrder, GatewayError>;

    async fn production_orders_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ProductionOrder>, GatewayError>;
}

#[async_trait]
impl<T: ProductionGateway + ?Sized> ProductionGateway for Arc<T> {
    async fn create_production_order(
        &self,
        request: &ProductionOrderRequest,
    ) -> Result<ProductionOrder, GatewayError> {
        (**self).create_production_order(request).await
    }

    async fn production_orders_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ProductionOrder>, GatewayError> {
        (**self).production_orders_for_order(order_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryProductionState {
    orders: Vec<ProductionOrder>,
    requests: Vec<ProductionOrderRequest>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory Production module for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductionGateway {
    state: Arc<RwLock<InMemoryProductionState>>,
}

impl InMemoryProductionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures creation to be rejected.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Returns the requests received, oldest first.
    pub fn requests(&self) -> Vec<ProductionOrderRequest> {
        self.state.read().unwrap().requests.clone()
    }
}

#[async_trait]
impl ProductionGateway for InMemoryProductionGateway {
    async fn create_production_order(
        &self,
        request: &ProductionOrderRequest,
    ) -> Result<ProductionOrder, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(GatewayError::Rejected {
                module: modules::PRODUCTION,
                status: 422,
                message: "product has no bill of materials".to_string(),
            });
        }

        state.next_id += 1;
        let order = ProductionOrder {
            id: format!("OP-{:04}", state.next_id),
            number: Some(format!("OP-{:04}", state.next_id)),
            sales_order_id: request.sales_order_id,
            status: request.status,
            due_date: Some(request.due_date),
        };
        state.orders.push(order.clone());
        state.requests.push(request.clone());

        Ok(order)
    }

    async fn production_orders_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ProductionOrder>, GatewayError> {
        Ok(self
            .state
            .read()
            .unwrap()
            .orders
            .iter()
            .filter(|o| o.sales_order_id == order_id)
            .cloned()
            .collect())
    }
}

/// Production module over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProductionGateway {
    client: JsonClient,
}

impl HttpProductionGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: JsonClient::new(modules::PRODUCTION, config)?,
        })
    }
}

#[async_trait]
impl ProductionGateway for HttpProductionGateway {
    async fn create_production_order(
        &self,
        request: &ProductionOrderRequest,
    ) -> Result<ProductionOrder, GatewayError> {
        self.client.post("/api/pcp/ordens-producao", request).await
    }

    async fn production_orders_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ProductionOrder>, GatewayError> {
        self.client
            .get(
                "/api/pcp/ordens-producao",
                &[("pedido_vendas_id", order_id.to_string())],
            )
            .await
    }
}
