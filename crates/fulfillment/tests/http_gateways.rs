//! HTTP gateway tests against stub module servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use common::{Money, OrderId};
use fulfillment::{
    DocumentLinks, FinanceGateway, GatewayConfig, GatewayError, HttpFinanceGateway,
    HttpInvoicingGateway, HttpProductionGateway, HttpSalesGateway, InvoicingGateway,
    ProductionGateway, SalesGateway, SalesOrderStatus, StatusUpdate,
};
use serde_json::{Value, json};

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct Recorded {
    status_updates: Arc<Mutex<Vec<Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn get_order(Path(id): Path<i64>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"erro": "token ausente"}))).into_response();
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    }
    Json(json!({
        "id": id,
        "numero": format!("PV-{id:04}"),
        "status": "aprovado",
        "cliente_id": 12,
        "cliente_nome": "ACME Ltda",
        "itens": [{"codigo": "ALU-001", "quantidade": 10, "unidade": "KG"}],
        "valor_total": "1500.50",
        "requer_producao": true,
        "condicoes_pagamento": {
            "parcelas": 2,
            "dias_primeiro_vencimento": 15,
            "intervalo_dias": 30
        },
        "nfe_id": 55,
        "numero_nf": "000055",
        "ordem_producao_id": null
    }))
    .into_response()
}

async fn put_status(
    State(recorded): State<Recorded>,
    Path(_id): Path<i64>,
    Json(body): Json<Value>,
) -> StatusCode {
    recorded.status_updates.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn reject_invoice() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({"erro": "CFOP not configured for customer"})),
    )
        .into_response()
}

async fn list_invoices(Query(query): Query<std::collections::HashMap<String, String>>) -> Json<Value> {
    let order_id = query.get("order_id").cloned().unwrap_or_default();
    Json(json!([{
        "id": 55,
        "number": "000055",
        "order_id": order_id.parse::<i64>().unwrap_or_default(),
        "total": "1500.50",
        "issued_on": "2026-10-19",
        "status": "emitida"
    }]))
}

async fn finance_down() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn slow_production() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!([]))
}

async fn garbled_production() -> &'static str {
    "<html>maintenance</html>"
}

async fn spawn_stub() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/vendas/pedidos/{id}", get(get_order))
        .route("/api/vendas/pedidos/{id}/status", put(put_status))
        .route(
            "/api/faturamento/invoices",
            post(reject_invoice).get(list_invoices),
        )
        .route("/api/financeiro/contas-receber", get(finance_down))
        .route(
            "/api/pcp/ordens-producao",
            get(slow_production).post(garbled_production),
        )
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/"), recorded)
}

fn config(base_url: &str) -> GatewayConfig {
    GatewayConfig::new(base_url).with_token(TOKEN)
}

#[tokio::test]
async fn test_sales_order_is_read_with_bearer_token() {
    let (base_url, _) = spawn_stub().await;
    let sales = HttpSalesGateway::new(&config(&base_url)).unwrap();

    let order = sales.get_order(OrderId::new(700)).await.unwrap();

    assert_eq!(order.status, SalesOrderStatus::Approved);
    assert_eq!(order.total, Money::from_cents(150_050));
    assert_eq!(order.lines[0].unit.as_deref(), Some("KG"));
    assert!(order.requires_production);
    assert_eq!(order.payment_terms.map(|t| t.installments), Some(2));
    assert_eq!(order.links.invoice_id.as_deref(), Some("55"));
    assert_eq!(order.document_number(), "PV-0700");
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let (base_url, _) = spawn_stub().await;
    let sales = HttpSalesGateway::new(&GatewayConfig::new(base_url)).unwrap();

    let err = sales.get_order(OrderId::new(700)).await.unwrap_err();

    match err {
        GatewayError::Rejected {
            module,
            status,
            message,
        } => {
            assert_eq!(module, "sales");
            assert_eq!(status, 401);
            assert_eq!(message, "token ausente");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_order_maps_to_not_found() {
    let (base_url, _) = spawn_stub().await;
    let sales = HttpSalesGateway::new(&config(&base_url)).unwrap();

    let err = sales.get_order(OrderId::new(404)).await.unwrap_err();

    assert!(matches!(err, GatewayError::NotFound { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_status_update_body() {
    let (base_url, recorded) = spawn_stub().await;
    let sales = HttpSalesGateway::new(&config(&base_url)).unwrap();
    let update = StatusUpdate::new(
        SalesOrderStatus::Invoiced,
        DocumentLinks {
            invoice_id: Some("55".to_string()),
            invoice_number: Some("000055".to_string()),
            production_order_id: None,
        },
    );

    sales.update_status(OrderId::new(700), &update).await.unwrap();

    let bodies = recorded.status_updates.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["status"], "faturado");
    assert_eq!(bodies[0]["nfe_id"], "55");
    assert!(bodies[0]["ordem_producao_id"].is_null());
}

#[tokio::test]
async fn test_invoice_rejection_keeps_module_message() {
    let (base_url, _) = spawn_stub().await;
    let invoicing = HttpInvoicingGateway::new(&config(&base_url)).unwrap();
    let request = fulfillment::gateways::InvoiceRequest {
        order_id: OrderId::new(700),
        order_number: "PV-0700".to_string(),
        customer_id: 12,
        customer_name: None,
        lines: Vec::new(),
        total: Money::from_cents(150_050),
    };

    let err = invoicing.create_invoice(&request).await.unwrap_err();

    assert!(matches!(
        &err,
        GatewayError::Rejected { status: 422, message, .. } if message == "CFOP not configured for customer"
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_invoices_for_order_accept_numeric_ids() {
    let (base_url, _) = spawn_stub().await;
    let invoicing = HttpInvoicingGateway::new(&config(&base_url)).unwrap();

    let invoices = invoicing.invoices_for_order(OrderId::new(700)).await.unwrap();

    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].id, "55");
    assert_eq!(invoices[0].order_id, OrderId::new(700));
    assert!(!invoices[0].is_cancelled());
}

#[tokio::test]
async fn test_outage_is_retryable() {
    let (base_url, _) = spawn_stub().await;
    let finance = HttpFinanceGateway::new(&config(&base_url)).unwrap();

    let err = finance
        .receivables_for_order(OrderId::new(700))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable { module: "finance", .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_slow_module_times_out() {
    let (base_url, _) = spawn_stub().await;
    let production =
        HttpProductionGateway::new(&config(&base_url).with_timeout(Duration::from_millis(100)))
            .unwrap();

    let err = production
        .production_orders_for_order(OrderId::new(700))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Timeout {
            module: "production",
            timeout_ms: 100
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreadable_body_is_decode_error() {
    let (base_url, _) = spawn_stub().await;
    let production = HttpProductionGateway::new(&config(&base_url)).unwrap();
    let request = fulfillment::gateways::ProductionOrderRequest {
        sales_order_id: OrderId::new(700),
        customer_id: 12,
        customer_name: None,
        priority: "normal".to_string(),
        due_date: chrono::NaiveDate::from_ymd_opt(2026, 10, 28).unwrap(),
        notes: String::new(),
        lines: Vec::new(),
        status: fulfillment::ProductionStatus::ToProduce,
    };

    let err = production.create_production_order(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_module_is_unavailable() {
    let sales = HttpSalesGateway::new(&config("http://127.0.0.1:1")).unwrap();

    let err = sales.get_order(OrderId::new(1)).await.unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable { .. }));
}
