//! Persistence boundary for the order pipeline.
//!
//! The workflow never talks to a database directly. It asks a [`Persistence`]
//! handle for a [`UnitOfWork`] and issues every read and write through it; the
//! unit of work is committed or rolled back as a whole.
//!
//! ## Capabilities
//!
//! - [`OrderStore`]: order headers and line items
//! - [`InventoryLedger`]: conditional stock decrement (the only stock writer)
//! - [`CatalogReader`]: read-only product lookups used for price snapshots
//!
//! Two backends implement these traits: [`PostgresPersistence`] (sqlx) and
//! [`InMemoryPersistence`] (dev/tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bakeshop_core::{Money, OrderId, ProductId};
use bakeshop_orders::{CustomerDetails, Order, OrderStatus};
use bakeshop_products::Product;

pub mod error;
pub mod in_memory;
pub mod postgres;

pub use error::StoreError;
pub use in_memory::InMemoryPersistence;
pub use postgres::PostgresPersistence;

/// Outcome of a conditional stock decrement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockDecrement {
    /// Stock covered the quantity and was reduced.
    Applied,
    /// Stock was lower than the quantity; nothing changed (zero rows affected).
    Insufficient,
}

/// Order header as written by `insert_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderHeader {
    pub customer: CustomerDetails,
    pub total: Money,
    pub status: OrderStatus,
}

/// Server-assigned parts of a freshly inserted header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InsertedOrder {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable representation of orders and their items.
#[async_trait]
pub trait OrderStore: Send {
    async fn insert_order(&mut self, header: &NewOrderHeader) -> Result<InsertedOrder, StoreError>;

    async fn insert_item(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<(), StoreError>;

    /// Header plus items, items joined with current product display fields.
    async fn get_by_id(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// All orders with items attached, newest first.
    async fn list(&mut self) -> Result<Vec<Order>, StoreError>;

    /// Current status, locking the row for the rest of the unit of work.
    async fn status_for_update(&mut self, order_id: OrderId) -> Result<Option<OrderStatus>, StoreError>;

    /// Set status and refresh `updated_at`. `false` when no row matched.
    async fn update_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<bool, StoreError>;

    /// Remove items, then the header. `false` when no header matched.
    async fn delete(&mut self, order_id: OrderId) -> Result<bool, StoreError>;
}

/// Guards stock against overselling.
#[async_trait]
pub trait InventoryLedger: Send {
    /// Reduce stock by `quantity` only if current stock >= `quantity`, as a
    /// single atomic conditional update.
    async fn decrement(&mut self, product_id: ProductId, quantity: i64) -> Result<StockDecrement, StoreError>;
}

/// Read-only view of the catalog.
#[async_trait]
pub trait CatalogReader: Send {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    /// All products ordered by id.
    async fn products(&mut self) -> Result<Vec<Product>, StoreError>;
}

/// One all-or-nothing transaction over every capability.
///
/// Dropping a unit of work without committing discards its writes.
#[async_trait]
pub trait UnitOfWork: OrderStore + InventoryLedger + CatalogReader {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Explicitly constructed persistence handle (open at startup, closed at shutdown).
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release pooled resources. Further `begin` calls fail.
    async fn close(&self);
}
