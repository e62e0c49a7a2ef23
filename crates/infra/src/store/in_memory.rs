use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use bakeshop_core::{Entity, Money, OrderId, ProductId};
use bakeshop_orders::{CustomerDetails, Order, OrderItem, OrderStatus};
use bakeshop_products::Product;

use super::{
    CatalogReader, InsertedOrder, InventoryLedger, NewOrderHeader, OrderStore, Persistence,
    StockDecrement, StoreError, UnitOfWork,
};

#[derive(Debug, Clone)]
struct StoredItem {
    product_id: ProductId,
    quantity: i64,
    unit_price: Money,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    customer: CustomerDetails,
    total: Money,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    items: Vec<StoredItem>,
}

#[derive(Debug, Clone, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, StoredOrder>,
    last_order_id: i64,
}

impl State {
    fn materialize(&self, id: OrderId, stored: &StoredOrder) -> Order {
        let items = stored
            .items
            .iter()
            .map(|item| {
                let product = self.products.get(&item.product_id);
                OrderItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    product_name: product.map(|p| p.name.clone()),
                    product_description: product.and_then(|p| p.description.clone()),
                    product_image: product.and_then(|p| p.image.clone()),
                }
            })
            .collect();

        Order {
            id,
            customer: stored.customer.clone(),
            items,
            total: stored.total,
            status: stored.status,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// In-memory persistence.
///
/// Intended for tests/dev. A unit of work holds the store lock from `begin`
/// until commit or rollback. Its first write takes a private copy of the
/// state, so transactions are fully serialized and an abandoned one leaves no
/// trace. Read-only units of work never copy.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: Arc<Mutex<State>>,
    closed: AtomicBool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the catalog.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = State {
            products: products.into_iter().map(|p| (*p.id(), p)).collect(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert or replace a catalog row (catalog maintenance happens outside
    /// the order pipeline).
    pub async fn upsert_product(&self, product: Product) {
        self.state.lock().await.products.insert(*product.id(), product);
    }

    /// Current stock of a product, `None` if it does not exist.
    pub async fn stock(&self, product_id: ProductId) -> Option<i64> {
        self.state.lock().await.products.get(&product_id).map(|p| p.stock)
    }

    fn ensure_open(&self, operation: &str) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Unavailable(operation.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.ensure_open("begin")?;
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working: None,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open("ping")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Exclusive access to the store plus the uncommitted working copy, if any
/// write has happened yet.
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: Option<State>,
}

impl InMemoryUnitOfWork {
    fn read(&self) -> &State {
        self.working.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut State {
        let guard = &self.guard;
        self.working.get_or_insert_with(|| State::clone(&**guard))
    }
}

#[async_trait]
impl OrderStore for InMemoryUnitOfWork {
    async fn insert_order(&mut self, header: &NewOrderHeader) -> Result<InsertedOrder, StoreError> {
        let state = self.write();
        state.last_order_id += 1;
        let id = OrderId::new(state.last_order_id);
        let now = Utc::now();

        state.orders.insert(
            id,
            StoredOrder {
                customer: header.customer.clone(),
                total: header.total,
                status: header.status,
                created_at: now,
                updated_at: now,
                items: Vec::new(),
            },
        );

        Ok(InsertedOrder {
            id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn insert_item(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<(), StoreError> {
        if quantity <= 0 {
            return Err(StoreError::Constraint {
                operation: "insert_item".to_string(),
                message: format!("quantity must be positive, got {quantity}"),
            });
        }

        let order = self
            .write()
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::Constraint {
                operation: "insert_item".to_string(),
                message: format!("order {order_id} does not exist"),
            })?;

        order.items.push(StoredItem {
            product_id,
            quantity,
            unit_price,
        });
        Ok(())
    }

    async fn get_by_id(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let state = self.read();
        Ok(state
            .orders
            .get(&order_id)
            .map(|stored| state.materialize(order_id, stored)))
    }

    async fn list(&mut self) -> Result<Vec<Order>, StoreError> {
        let state = self.read();
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .map(|(id, stored)| state.materialize(*id, stored))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn status_for_update(&mut self, order_id: OrderId) -> Result<Option<OrderStatus>, StoreError> {
        Ok(self.read().orders.get(&order_id).map(|o| o.status))
    }

    async fn update_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<bool, StoreError> {
        if !self.read().orders.contains_key(&order_id) {
            return Ok(false);
        }
        let Some(order) = self.write().orders.get_mut(&order_id) else {
            return Ok(false);
        };
        order.status = status;
        order.updated_at = Utc::now().max(order.updated_at + Duration::microseconds(1));
        Ok(true)
    }

    async fn delete(&mut self, order_id: OrderId) -> Result<bool, StoreError> {
        if !self.read().orders.contains_key(&order_id) {
            return Ok(false);
        }
        Ok(self.write().orders.remove(&order_id).is_some())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryUnitOfWork {
    async fn decrement(&mut self, product_id: ProductId, quantity: i64) -> Result<StockDecrement, StoreError> {
        let covered = self
            .read()
            .products
            .get(&product_id)
            .is_some_and(|product| product.stock >= quantity);
        if !covered {
            return Ok(StockDecrement::Insufficient);
        }
        match self.write().products.get_mut(&product_id) {
            Some(product) => {
                product.stock -= quantity;
                Ok(StockDecrement::Applied)
            }
            _ => Ok(StockDecrement::Insufficient),
        }
    }
}

#[async_trait]
impl CatalogReader for InMemoryUnitOfWork {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read().products.get(&product_id).cloned())
    }

    async fn products(&mut self) -> Result<Vec<Product>, StoreError> {
        Ok(self.read().products.values().cloned().collect())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork { mut guard, working } = *self;
        if let Some(working) = working {
            *guard = working;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
