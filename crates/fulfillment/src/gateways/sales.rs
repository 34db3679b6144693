//! Sales module gateway.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;

use super::http::{GatewayConfig, JsonClient};
use crate::error::GatewayError;
use crate::order::{SalesOrder, StatusUpdate};
use crate::permissions::modules;

/// Reads sales orders and writes their fulfillment status back.
#[async_trait]
pub trait SalesGateway: Send + Sync {
    /// Fetches an order. A missing order is `GatewayError::NotFound`.
    async fn get_order(&self, order_id: OrderId) -> Result<SalesOrder, GatewayError>;

    /// Replaces the order's status and document links.
    async fn update_status(
        &self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
impl<T: SalesGateway + ?Sized> SalesGateway for Arc<T> {
    async fn get_order(&self, order_id: OrderId) -> Result<SalesOrder, GatewayError> {
        (**self).get_order(order_id).await
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<(), GatewayError> {
        (**self).update_status(order_id, update).await
    }
}

#[derive(Debug, Default)]
struct InMemorySalesState {
    orders: HashMap<OrderId, SalesOrder>,
    updates: Vec<(OrderId, StatusUpdate)>,
    fail_on_update: bool,
}

/// In-memory Sales module for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemorySalesGateway {
    state: Arc<RwLock<InMemorySalesState>>,
}

impl InMemorySalesGateway {
    /// Creates an empty in-memory Sales module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) an order.
    pub fn insert_order(&self, order: SalesOrder) {
        self.state.write().unwrap().orders.insert(order.id, order);
    }

    /// Returns the current copy of an order.
    pub fn order(&self, order_id: OrderId) -> Option<SalesOrder> {
        self.state.read().unwrap().orders.get(&order_id).cloned()
    }

    /// Configures status updates to fail with `Unavailable`.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update = fail;
    }

    /// Returns every status update received, oldest first.
    pub fn updates(&self) -> Vec<(OrderId, StatusUpdate)> {
        self.state.read().unwrap().updates.clone()
    }
}

#[async_trait]
impl SalesGateway for InMemorySalesGateway {
    async fn get_order(&self, order_id: OrderId) -> Result<SalesOrder, GatewayError> {
        self.state
            .read()
            .unwrap()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                module: modules::SALES,
                resource: format!("order {order_id}"),
            })
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_update {
            return Err(GatewayError::Unavailable {
                module: modules::SALES,
                message: "connection refused".to_string(),
            });
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| GatewayError::NotFound {
                module: modules::SALES,
                resource: format!("order {order_id}"),
            })?;
        order.status = update.status;
        order.links = update.links.clone();
        state.updates.push((order_id, update.clone()));
        Ok(())
    }
}

/// Sales module over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSalesGateway {
    client: JsonClient,
}

impl HttpSalesGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: JsonClient::new(modules::SALES, config)?,
        })
    }
}

#[async_trait]
impl SalesGateway for HttpSalesGateway {
    async fn get_order(&self, order_id: OrderId) -> Result<SalesOrder, GatewayError> {
        self.client
            .get(&format!("/api/vendas/pedidos/{order_id}"), &[])
            .await
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<(), GatewayError> {
        self.client
            .put_ignoring_body(&format!("/api/vendas/pedidos/{order_id}/status"), update)
            .await
    }
}
