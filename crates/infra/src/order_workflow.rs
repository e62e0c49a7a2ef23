//! Order workflow: the only entry point that changes orders and inventory
//! together.
//!
//! Every mutating operation runs inside one [`UnitOfWork`]. On any failure the
//! unit of work is rolled back before the error is returned, so callers never
//! observe a partial order or a partial stock deduction.

use std::sync::Arc;

use thiserror::Error;
use tracing::{Span, instrument};

use bakeshop_core::{DomainError, OrderId, ProductId};
use bakeshop_orders::{
    Order, OrderStatus, PlaceOrder, PricedLine, TotalPolicy, TransitionPolicy, Unrestricted,
    order_total, stock_deductions,
};
use bakeshop_products::Product;

use crate::store::{NewOrderHeader, Persistence, StockDecrement, StoreError, UnitOfWork};

/// Why a workflow operation failed.
#[derive(Debug, Error)]
pub enum OrderWorkflowError {
    /// Bad input, reported before any storage work (or rolled back).
    #[error("{0}")]
    Validation(String),

    #[error("product {0} does not exist")]
    UnknownProduct(ProductId),

    #[error("product {0} is not available for sale")]
    ProductUnavailable(ProductId),

    #[error("insufficient stock for product {product_id} (requested {requested})")]
    InsufficientStock { product_id: ProductId, requested: i64 },

    /// The configured transition policy refused the status change.
    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl OrderWorkflowError {
    fn order_not_found(order_id: OrderId) -> Self {
        Self::NotFound(format!("order {order_id}"))
    }
}

impl From<DomainError> for OrderWorkflowError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::Conflict(msg) => OrderWorkflowError::Validation(msg),
            DomainError::InvariantViolation(msg) => OrderWorkflowError::InvalidTransition(msg),
        }
    }
}

pub type WorkflowResult<T> = Result<T, OrderWorkflowError>;

/// Orchestrates the order store, inventory ledger and catalog reader.
#[derive(Clone)]
pub struct OrderWorkflow {
    persistence: Arc<dyn Persistence>,
    total_policy: TotalPolicy,
    transition_policy: Arc<dyn TransitionPolicy>,
}

impl core::fmt::Debug for OrderWorkflow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderWorkflow")
            .field("total_policy", &self.total_policy)
            .field("transition_policy", &self.transition_policy)
            .finish_non_exhaustive()
    }
}

impl OrderWorkflow {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            total_policy: TotalPolicy::default(),
            transition_policy: Arc::new(Unrestricted),
        }
    }

    pub fn with_total_policy(mut self, policy: TotalPolicy) -> Self {
        self.total_policy = policy;
        self
    }

    pub fn with_transition_policy(mut self, policy: Arc<dyn TransitionPolicy>) -> Self {
        self.transition_policy = policy;
        self
    }

    /// Place an order: price every line from the catalog, persist header and
    /// items, and decrement stock, all in one unit of work.
    #[instrument(
        skip_all,
        fields(line_count = cmd.lines.len(), order_id = tracing::field::Empty)
    )]
    pub async fn place_order(&self, cmd: PlaceOrder) -> WorkflowResult<Order> {
        cmd.validate()?;

        let mut uow = self.persistence.begin().await?;
        let placed = self.place_in(uow.as_mut(), &cmd).await;
        match placed {
            Ok(order_id) => {
                let order = uow.get_by_id(order_id).await;
                match order {
                    Ok(Some(order)) => {
                        uow.commit().await?;
                        Span::current().record("order_id", order.id.get());
                        tracing::info!(
                            order_id = %order.id,
                            total = %order.total,
                            items = order.items.len(),
                            "order placed"
                        );
                        Ok(order)
                    }
                    Ok(None) => {
                        rollback(uow).await;
                        Err(StoreError::Database(format!("order {order_id} vanished before commit")).into())
                    }
                    Err(e) => {
                        rollback(uow).await;
                        Err(e.into())
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "order placement rolled back");
                rollback(uow).await;
                Err(err)
            }
        }
    }

    async fn place_in(&self, uow: &mut dyn UnitOfWork, cmd: &PlaceOrder) -> WorkflowResult<OrderId> {
        let mut priced = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            let product = uow
                .product(line.product_id)
                .await?
                .ok_or(OrderWorkflowError::UnknownProduct(line.product_id))?;
            if !product.can_be_sold() {
                return Err(OrderWorkflowError::ProductUnavailable(product.id));
            }
            priced.push(PricedLine::snapshot(line, &product));
        }

        let computed = order_total(&priced)?;
        if let Some(client) = cmd.client_total {
            if client != computed && self.total_policy == TotalPolicy::Recompute {
                tracing::warn!(
                    client_total = %client,
                    computed_total = %computed,
                    "client total disagrees with catalog prices; using computed total"
                );
            }
        }
        let total = self.total_policy.reconcile(computed, cmd.client_total)?;

        let inserted = uow
            .insert_order(&NewOrderHeader {
                customer: cmd.customer.clone(),
                total,
                status: OrderStatus::Pending,
            })
            .await?;

        for line in &priced {
            uow.insert_item(inserted.id, line.product_id, line.quantity, line.unit_price)
                .await?;
        }

        // Stock rows are locked in ascending product id order.
        for (product_id, quantity) in stock_deductions(&priced)? {
            match uow.decrement(product_id, quantity).await? {
                StockDecrement::Applied => {}
                StockDecrement::Insufficient => {
                    return Err(OrderWorkflowError::InsufficientStock {
                        product_id,
                        requested: quantity,
                    });
                }
            }
        }

        Ok(inserted.id)
    }

    /// Set an order's status. The transition policy sees the status locked
    /// inside the same unit of work.
    #[instrument(skip_all, fields(order_id = %order_id, status = %status))]
    pub async fn advance_status(&self, order_id: OrderId, status: OrderStatus) -> WorkflowResult<Order> {
        let mut uow = self.persistence.begin().await?;
        let advanced = self.advance_in(uow.as_mut(), order_id, status).await;
        match advanced {
            Ok(order) => {
                uow.commit().await?;
                tracing::info!(order_id = %order_id, status = %status, "order status updated");
                Ok(order)
            }
            Err(err) => {
                rollback(uow).await;
                Err(err)
            }
        }
    }

    async fn advance_in(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        status: OrderStatus,
    ) -> WorkflowResult<Order> {
        let current = uow
            .status_for_update(order_id)
            .await?
            .ok_or_else(|| OrderWorkflowError::order_not_found(order_id))?;

        self.transition_policy.check(current, status)?;

        if !uow.update_status(order_id, status).await? {
            return Err(OrderWorkflowError::order_not_found(order_id));
        }

        uow.get_by_id(order_id)
            .await?
            .ok_or_else(|| OrderWorkflowError::order_not_found(order_id))
    }

    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: OrderId) -> WorkflowResult<Order> {
        let mut uow = self.persistence.begin().await?;
        let order = uow.get_by_id(order_id).await;
        rollback(uow).await;
        order?.ok_or_else(|| OrderWorkflowError::order_not_found(order_id))
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self) -> WorkflowResult<Vec<Order>> {
        let mut uow = self.persistence.begin().await?;
        let orders = uow.list().await;
        rollback(uow).await;
        Ok(orders?)
    }

    /// Remove an order and its items. Stock is left untouched.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: OrderId) -> WorkflowResult<()> {
        let mut uow = self.persistence.begin().await?;
        match uow.delete(order_id).await {
            Ok(true) => {
                uow.commit().await?;
                tracing::info!(order_id = %order_id, "order deleted");
                Ok(())
            }
            Ok(false) => {
                rollback(uow).await;
                Err(OrderWorkflowError::order_not_found(order_id))
            }
            Err(e) => {
                rollback(uow).await;
                Err(e.into())
            }
        }
    }

    pub async fn list_products(&self) -> WorkflowResult<Vec<Product>> {
        let mut uow = self.persistence.begin().await?;
        let products = uow.products().await;
        rollback(uow).await;
        Ok(products?)
    }

    pub async fn get_product(&self, product_id: ProductId) -> WorkflowResult<Product> {
        let mut uow = self.persistence.begin().await?;
        let product = uow.product(product_id).await;
        rollback(uow).await;
        product?.ok_or_else(|| OrderWorkflowError::NotFound(format!("product {product_id}")))
    }

    pub async fn ping(&self) -> WorkflowResult<()> {
        Ok(self.persistence.ping().await?)
    }

    /// Close the underlying persistence handle.
    pub async fn close(&self) {
        self.persistence.close().await;
    }
}

// A failed rollback only means the connection is already gone; the
// transaction is discarded either way.
async fn rollback(uow: Box<dyn UnitOfWork>) {
    if let Err(err) = uow.rollback().await {
        tracing::error!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bakeshop_core::Money;
    use bakeshop_orders::{CustomerDetails, Lifecycle, OrderLine};

    use crate::store::InMemoryPersistence;

    const BROWNIE: i64 = 1;
    const CROISSANT: i64 = 2;
    const RETIRED: i64 = 3;

    fn product(id: i64, cents: i64, stock: i64, active: bool) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("product-{id}"),
            description: None,
            image: Some(format!("/uploads/{id}.png")),
            price: Money::from_minor(cents).unwrap(),
            stock,
            active,
        }
    }

    fn setup(brownie_stock: i64, croissant_stock: i64) -> (Arc<InMemoryPersistence>, OrderWorkflow) {
        let store = Arc::new(InMemoryPersistence::with_products([
            product(BROWNIE, 1000, brownie_stock, true),
            product(CROISSANT, 500, croissant_stock, true),
            product(RETIRED, 300, 10, false),
        ]));
        let workflow = OrderWorkflow::new(store.clone());
        (store, workflow)
    }

    fn cmd(lines: &[(i64, i64)]) -> PlaceOrder {
        PlaceOrder {
            customer: CustomerDetails::new("Maria Silva", "11999887766", "Rua das Flores, 123"),
            lines: lines
                .iter()
                .map(|(id, qty)| OrderLine {
                    product_id: ProductId::new(*id),
                    quantity: *qty,
                })
                .collect(),
            client_total: None,
        }
    }

    async fn stock(store: &InMemoryPersistence, id: i64) -> i64 {
        store.stock(ProductId::new(id)).await.unwrap()
    }

    #[tokio::test]
    async fn two_item_order_totals_25_and_decrements_both_products() {
        let (store, workflow) = setup(10, 10);

        let order = workflow.place_order(cmd(&[(BROWNIE, 2), (CROISSANT, 1)])).await.unwrap();

        assert_eq!(order.total, Money::from_minor(2500).unwrap());
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items_total().unwrap(), order.total);
        assert_eq!(stock(&store, BROWNIE).await, 8);
        assert_eq!(stock(&store, CROISSANT).await, 9);
    }

    #[tokio::test]
    async fn failing_second_line_restores_first_line_stock() {
        let (store, workflow) = setup(10, 0);

        let err = workflow
            .place_order(cmd(&[(BROWNIE, 2), (CROISSANT, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderWorkflowError::InsufficientStock { product_id, requested: 1 } if product_id == ProductId::new(CROISSANT)
        ));
        assert_eq!(stock(&store, BROWNIE).await, 10);
        assert!(workflow.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn selling_out_then_ordering_again_fails() {
        let (store, workflow) = setup(5, 0);

        workflow.place_order(cmd(&[(BROWNIE, 5)])).await.unwrap();
        assert_eq!(stock(&store, BROWNIE).await, 0);

        let err = workflow.place_order(cmd(&[(BROWNIE, 1)])).await.unwrap_err();
        assert!(matches!(err, OrderWorkflowError::InsufficientStock { .. }));
        assert_eq!(stock(&store, BROWNIE).await, 0);
        assert_eq!(workflow.list_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_product_lines_are_checked_against_combined_quantity() {
        let (store, workflow) = setup(5, 10);

        let err = workflow
            .place_order(cmd(&[(BROWNIE, 3), (CROISSANT, 1), (BROWNIE, 3)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderWorkflowError::InsufficientStock { product_id, requested: 6 } if product_id == ProductId::new(BROWNIE)
        ));
        assert_eq!(stock(&store, CROISSANT).await, 10);

        let order = workflow
            .place_order(cmd(&[(CROISSANT, 1), (BROWNIE, 2), (CROISSANT, 2)]))
            .await
            .unwrap();
        let products: Vec<i64> = order.items.iter().map(|i| i.product_id.get()).collect();
        assert_eq!(products, vec![CROISSANT, BROWNIE, CROISSANT]);
        assert_eq!(stock(&store, BROWNIE).await, 3);
        assert_eq!(stock(&store, CROISSANT).await, 7);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn rejected_orders_log_a_single_warning_and_no_errors() {
        let (_, workflow) = setup(1, 1);

        let err = workflow.place_order(cmd(&[(BROWNIE, 2)])).await.unwrap_err();
        assert!(matches!(err, OrderWorkflowError::InsufficientStock { .. }));

        let mut missing = cmd(&[(BROWNIE, 1)]);
        missing.customer.phone = String::new();
        assert!(workflow.place_order(missing).await.is_err());

        assert!(logs_contain("order placement rolled back"));
        logs_assert(|lines: &[&str]| {
            let warnings = lines
                .iter()
                .filter(|line| line.contains("order placement rolled back"))
                .count();
            match lines.iter().find(|line| line.contains("ERROR")) {
                Some(line) => Err(format!("unexpected error event: {line}")),
                None if warnings != 1 => Err(format!("expected one rollback warning, got {warnings}")),
                None => Ok(()),
            }
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_in_opposite_line_order_both_succeed() {
        let (store, workflow) = setup(100, 100);

        let forward = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(BROWNIE, 1), (CROISSANT, 1)])).await }
        });
        let backward = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(CROISSANT, 1), (BROWNIE, 1)])).await }
        });

        assert!(forward.await.unwrap().is_ok());
        assert!(backward.await.unwrap().is_ok());
        assert_eq!(stock(&store, BROWNIE).await, 98);
        assert_eq!(stock(&store, CROISSANT).await, 98);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_for_whole_stock_never_both_succeed() {
        let (store, workflow) = setup(5, 0);

        let a = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(BROWNIE, 5)])).await }
        });
        let b = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.place_order(cmd(&[(BROWNIE, 5)])).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let shortages = results
            .iter()
            .filter(|r| matches!(r, Err(OrderWorkflowError::InsufficientStock { .. })))
            .count();
        assert_eq!((successes, shortages), (1, 1));
        assert_eq!(stock(&store, BROWNIE).await, 0);
        assert_eq!(workflow.list_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_failures_touch_nothing() {
        let (store, workflow) = setup(5, 5);

        let mut blank_name = cmd(&[(BROWNIE, 1)]);
        blank_name.customer.name = "   ".to_string();

        for bad in [blank_name, cmd(&[]), cmd(&[(BROWNIE, 0)])] {
            let err = workflow.place_order(bad).await.unwrap_err();
            assert!(matches!(err, OrderWorkflowError::Validation(_)), "{err:?}");
        }
        assert_eq!(stock(&store, BROWNIE).await, 5);
        assert!(workflow.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_inactive_products_roll_back() {
        let (store, workflow) = setup(5, 5);

        let err = workflow.place_order(cmd(&[(BROWNIE, 1), (99, 1)])).await.unwrap_err();
        assert!(matches!(err, OrderWorkflowError::UnknownProduct(id) if id == ProductId::new(99)));

        let err = workflow.place_order(cmd(&[(BROWNIE, 1), (RETIRED, 1)])).await.unwrap_err();
        assert!(matches!(err, OrderWorkflowError::ProductUnavailable(_)));

        assert_eq!(stock(&store, BROWNIE).await, 5);
        assert!(workflow.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn client_total_is_ignored_or_rejected_per_policy() {
        let (_, workflow) = setup(10, 10);
        let mut lying = cmd(&[(BROWNIE, 1)]);
        lying.client_total = Some(Money::from_minor(1).unwrap());

        let order = workflow.place_order(lying.clone()).await.unwrap();
        assert_eq!(order.total.minor(), 1000);

        let strict = workflow.clone().with_total_policy(TotalPolicy::RejectMismatch);
        let err = strict.place_order(lying).await.unwrap_err();
        assert!(matches!(err, OrderWorkflowError::Validation(msg) if msg.contains("total mismatch")));
        assert_eq!(strict.list_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_price_survives_catalog_price_change() {
        let (store, workflow) = setup(10, 10);
        let order = workflow.place_order(cmd(&[(BROWNIE, 1)])).await.unwrap();

        store.upsert_product(product(BROWNIE, 9999, 9, true)).await;

        let reread = workflow.get_order(order.id).await.unwrap();
        assert_eq!(reread.total.minor(), 1000);
        assert_eq!(reread.items[0].unit_price.minor(), 1000);
    }

    #[tokio::test]
    async fn advance_status_sets_status_and_bumps_updated_at() {
        let (store, workflow) = setup(10, 10);
        let placed = workflow.place_order(cmd(&[(BROWNIE, 3)])).await.unwrap();

        let mut previous = placed.updated_at;
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Delivered,
            OrderStatus::Pending,
            OrderStatus::Cancelled,
        ] {
            let updated = workflow.advance_status(placed.id, status).await.unwrap();
            assert_eq!(updated.status, status);
            assert!(updated.updated_at > previous);
            assert_eq!(updated.created_at, placed.created_at);
            assert_eq!(workflow.get_order(placed.id).await.unwrap().status, status);
            previous = updated.updated_at;
        }

        // cancelling does not restock
        assert_eq!(stock(&store, BROWNIE).await, 7);
    }

    #[tokio::test]
    async fn advance_status_on_missing_order_is_not_found() {
        let (_, workflow) = setup(1, 1);
        let err = workflow
            .advance_status(OrderId::new(42), OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderWorkflowError::NotFound(_)));
        assert!(workflow.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_policy_rejects_backwards_moves() {
        let (_, workflow) = setup(10, 10);
        let workflow = workflow.with_transition_policy(Arc::new(Lifecycle));
        let placed = workflow.place_order(cmd(&[(BROWNIE, 1)])).await.unwrap();

        workflow.advance_status(placed.id, OrderStatus::Confirmed).await.unwrap();
        workflow.advance_status(placed.id, OrderStatus::Delivered).await.unwrap();

        let err = workflow
            .advance_status(placed.id, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderWorkflowError::InvalidTransition(_)));
        assert_eq!(workflow.get_order(placed.id).await.unwrap().status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn get_order_is_stable_without_writes() {
        let (_, workflow) = setup(10, 10);
        let placed = workflow.place_order(cmd(&[(BROWNIE, 1), (CROISSANT, 2)])).await.unwrap();

        let first = workflow.get_order(placed.id).await.unwrap();
        let second = workflow.get_order(placed.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, placed);
    }

    #[tokio::test]
    async fn delete_removes_order_and_reports_missing() {
        let (store, workflow) = setup(10, 10);
        let placed = workflow.place_order(cmd(&[(BROWNIE, 1)])).await.unwrap();

        workflow.delete_order(placed.id).await.unwrap();
        assert!(matches!(
            workflow.get_order(placed.id).await,
            Err(OrderWorkflowError::NotFound(_))
        ));
        assert!(matches!(
            workflow.delete_order(placed.id).await,
            Err(OrderWorkflowError::NotFound(_))
        ));
        assert_eq!(stock(&store, BROWNIE).await, 9);
    }

    #[tokio::test]
    async fn list_orders_is_newest_first() {
        let (_, workflow) = setup(10, 10);
        let first = workflow.place_order(cmd(&[(BROWNIE, 1)])).await.unwrap();
        let second = workflow.place_order(cmd(&[(CROISSANT, 1)])).await.unwrap();

        let ids: Vec<OrderId> = workflow.list_orders().await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn catalog_reads_and_health() {
        let (_, workflow) = setup(4, 6);

        let products = workflow.list_products().await.unwrap();
        assert_eq!(products.len(), 3);
        assert_eq!(workflow.get_product(ProductId::new(CROISSANT)).await.unwrap().stock, 6);
        assert!(matches!(
            workflow.get_product(ProductId::new(77)).await,
            Err(OrderWorkflowError::NotFound(_))
        ));

        workflow.ping().await.unwrap();
        workflow.close().await;
        assert!(matches!(
            workflow.ping().await,
            Err(OrderWorkflowError::Storage(StoreError::Unavailable(_)))
        ));
    }
}
