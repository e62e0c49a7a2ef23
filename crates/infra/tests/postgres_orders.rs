//! Order workflow against a real Postgres database.
//!
//! Skipped unless `BAKESHOP_TEST_DATABASE_URL` points at a disposable database.
//! Every test seeds its own products, so tests can share one database.

use std::sync::Arc;
use std::time::Duration;

use bakeshop_core::{Money, OrderId, ProductId};
use bakeshop_infra::{DatabaseConfig, OrderWorkflow, OrderWorkflowError, PostgresPersistence};
use bakeshop_orders::{CustomerDetails, OrderLine, OrderStatus, PlaceOrder};

async fn connect() -> Option<PostgresPersistence> {
    let Ok(url) = std::env::var("BAKESHOP_TEST_DATABASE_URL") else {
        eprintln!("BAKESHOP_TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let persistence = PostgresPersistence::connect(&DatabaseConfig {
        url,
        max_connections: 5,
        acquire_timeout: Duration::from_secs(10),
    })
    .await
    .expect("failed to connect to test database");
    persistence.migrate().await.expect("failed to run migrations");
    Some(persistence)
}

async fn seed_product(persistence: &PostgresPersistence, cents: i64, stock: i64) -> ProductId {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO products (name, price, stock, active) VALUES ($1, $2, $3, TRUE) RETURNING id",
    )
    .bind(format!("test-product-{cents}-{stock}"))
    .bind(cents)
    .bind(stock)
    .fetch_one(persistence.pool())
    .await
    .expect("failed to seed product");
    ProductId::new(id)
}

async fn stock_of(persistence: &PostgresPersistence, id: ProductId) -> i64 {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(id.get())
        .fetch_one(persistence.pool())
        .await
        .expect("failed to read stock")
}

async fn order_exists(persistence: &PostgresPersistence, id: OrderId) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE id = $1")
        .bind(id.get())
        .fetch_one(persistence.pool())
        .await
        .expect("failed to count orders")
        > 0
}

fn cmd(lines: &[(ProductId, i64)]) -> PlaceOrder {
    PlaceOrder {
        customer: CustomerDetails::new("Joana", "21988887777", "Av. Atlântica, 500"),
        lines: lines
            .iter()
            .map(|(product_id, quantity)| OrderLine {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect(),
        client_total: None,
    }
}

#[tokio::test]
async fn two_item_order_commits_header_items_and_stock() {
    let Some(persistence) = connect().await else { return };
    let a = seed_product(&persistence, 1000, 10).await;
    let b = seed_product(&persistence, 500, 10).await;
    let workflow = OrderWorkflow::new(Arc::new(persistence.clone()));

    let order = workflow.place_order(cmd(&[(a, 2), (b, 1)])).await.unwrap();

    assert_eq!(order.total, Money::from_minor(2500).unwrap());
    assert_eq!(order.items.len(), 2);
    assert_eq!(stock_of(&persistence, a).await, 8);
    assert_eq!(stock_of(&persistence, b).await, 9);
    assert_eq!(workflow.get_order(order.id).await.unwrap(), order);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_everything() {
    let Some(persistence) = connect().await else { return };
    let a = seed_product(&persistence, 1000, 10).await;
    let b = seed_product(&persistence, 500, 0).await;
    let workflow = OrderWorkflow::new(Arc::new(persistence.clone()));

    let before: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM orders")
        .fetch_one(persistence.pool())
        .await
        .unwrap();

    let err = workflow.place_order(cmd(&[(a, 2), (b, 1)])).await.unwrap_err();
    assert!(matches!(err, OrderWorkflowError::InsufficientStock { product_id, .. } if product_id == b));
    assert_eq!(stock_of(&persistence, a).await, 10);

    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM order_items WHERE order_id > $1 AND product_id = $2",
    )
    .bind(before)
    .bind(a.get())
    .fetch_one(persistence.pool())
    .await
    .unwrap();
    assert_eq!(orphans, 0);
}

#[tokio::test]
async fn concurrent_orders_cannot_oversell() {
    let Some(persistence) = connect().await else { return };
    let product = seed_product(&persistence, 700, 5).await;
    let workflow = OrderWorkflow::new(Arc::new(persistence.clone()));

    let (first, second) = tokio::join!(
        workflow.place_order(cmd(&[(product, 5)])),
        workflow.place_order(cmd(&[(product, 5)])),
    );

    let successes = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    let failure = first.err().or(second.err()).unwrap();
    assert!(matches!(failure, OrderWorkflowError::InsufficientStock { .. }));
    assert_eq!(stock_of(&persistence, product).await, 0);
}

#[tokio::test]
async fn status_update_bumps_updated_at_and_delete_removes_items_first() {
    let Some(persistence) = connect().await else { return };
    let product = seed_product(&persistence, 350, 3).await;
    let workflow = OrderWorkflow::new(Arc::new(persistence.clone()));

    let placed = workflow.place_order(cmd(&[(product, 1)])).await.unwrap();
    let confirmed = workflow
        .advance_status(placed.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    assert!(confirmed.updated_at > placed.updated_at);

    let again = workflow
        .advance_status(placed.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    assert!(again.updated_at > confirmed.updated_at);

    workflow.delete_order(placed.id).await.unwrap();
    assert!(!order_exists(&persistence, placed.id).await);
    assert!(matches!(
        workflow.advance_status(placed.id, OrderStatus::Cancelled).await,
        Err(OrderWorkflowError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_line_order_does_not_deadlock() {
    let Some(persistence) = connect().await else { return };
    let a = seed_product(&persistence, 120, 1000).await;
    let b = seed_product(&persistence, 240, 1000).await;
    let workflow = OrderWorkflow::new(Arc::new(persistence.clone()));

    for _ in 0..50 {
        let forward = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(a, 1), (b, 1)])).await }
        });
        let backward = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(b, 1), (a, 1)])).await }
        });

        let forward = forward.await.unwrap();
        let backward = backward.await.unwrap();
        assert!(forward.is_ok(), "{forward:?}");
        assert!(backward.is_ok(), "{backward:?}");
    }

    assert_eq!(stock_of(&persistence, a).await, 900);
    assert_eq!(stock_of(&persistence, b).await, 900);
}
