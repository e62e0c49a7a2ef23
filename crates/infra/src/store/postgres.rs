//! Postgres-backed persistence.
//!
//! Every unit of work is one SQL transaction on a pooled connection. Stock is
//! only ever changed by the conditional update in [`InventoryLedger::decrement`],
//! so two transactions racing for the last units cannot both succeed: the
//! second one blocks on the row lock, re-evaluates `stock >= $2` and affects
//! zero rows.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique / FK / not-null / check) | `23505` `23503` `23502` `23514` | `Constraint` |
//! | Database (other) | any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | ColumnDecode / ColumnNotFound / Decode | N/A | `Decode` |

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use bakeshop_core::{Money, OrderId, ProductId};
use bakeshop_orders::{CustomerDetails, Order, OrderItem, OrderStatus};
use bakeshop_products::Product;

use super::error::map_sqlx_error;
use super::{
    CatalogReader, InsertedOrder, InventoryLedger, NewOrderHeader, OrderStore, Persistence,
    StockDecrement, StoreError, UnitOfWork,
};
use crate::config::DatabaseConfig;

/// Postgres persistence handle wrapping a connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Open a pool with the configured limits. Fails fast if the database is
    /// unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected to postgres"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migrate: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    #[instrument(skip_all, fields(operation = "begin"), err)]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    #[instrument(skip_all, fields(operation = "ping"), err)]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("postgres pool closed");
    }
}

/// A single open transaction. Dropping it without `commit` rolls back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PostgresUnitOfWork {
    async fn items_for(&mut self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderItem>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                i.order_id,
                i.product_id,
                i.quantity,
                i.price,
                p.name AS product_name,
                p.description AS product_description,
                p.image AS product_image
            FROM order_items i
            LEFT JOIN products p ON p.id = i.product_id
            WHERE i.order_id = ANY($1)
            ORDER BY i.order_id, i.id
            "#,
        )
        .bind(order_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let item = ItemRow::from_row(&row).map_err(|e| map_sqlx_error("load_items", e))?;
            let order_id = item.order_id;
            items.entry(order_id).or_default().push(item.try_into()?);
        }
        Ok(items)
    }
}

#[async_trait]
impl OrderStore for PostgresUnitOfWork {
    #[instrument(
        skip_all,
        fields(operation = "insert_order", total = %header.total, order_id = tracing::field::Empty),
        err
    )]
    async fn insert_order(&mut self, header: &NewOrderHeader) -> Result<InsertedOrder, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (customer_name, customer_phone, customer_address, total, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(&header.customer.name)
        .bind(&header.customer.phone)
        .bind(&header.customer.address)
        .bind(header.total.minor())
        .bind(header.status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert_order", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("insert_order", e))?;
        let updated_at: DateTime<Utc> = row
            .try_get("updated_at")
            .map_err(|e| map_sqlx_error("insert_order", e))?;

        Span::current().record("order_id", id);
        Ok(InsertedOrder {
            id: OrderId::new(id),
            created_at,
            updated_at,
        })
    }

    #[instrument(
        skip_all,
        fields(operation = "insert_item", order_id = %order_id, product_id = %product_id),
        err
    )]
    async fn insert_item(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_id.get())
        .bind(product_id.get())
        .bind(quantity)
        .bind(unit_price.minor())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(operation = "get_order", order_id = %order_id), err)]
    async fn get_by_id(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_name, customer_phone, customer_address, total, status,
                   created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let header = OrderRow::from_row(&row).map_err(|e| map_sqlx_error("get_order", e))?;
        let mut items = self.items_for(&[header.id]).await?;
        let items = items.remove(&header.id).unwrap_or_default();
        Ok(Some(header.into_order(items)?))
    }

    #[instrument(skip_all, fields(operation = "list_orders", order_count = tracing::field::Empty), err)]
    async fn list(&mut self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_name, customer_phone, customer_address, total, status,
                   created_at, updated_at
            FROM orders
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        let mut headers = Vec::with_capacity(rows.len());
        for row in rows {
            headers.push(OrderRow::from_row(&row).map_err(|e| map_sqlx_error("list_orders", e))?);
        }

        let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let mut items = self.items_for(&ids).await?;

        let mut orders = Vec::with_capacity(headers.len());
        for header in headers {
            let order_items = items.remove(&header.id).unwrap_or_default();
            orders.push(header.into_order(order_items)?);
        }

        Span::current().record("order_count", orders.len());
        Ok(orders)
    }

    #[instrument(skip_all, fields(operation = "lock_order_status", order_id = %order_id), err)]
    async fn status_for_update(&mut self, order_id: OrderId) -> Result<Option<OrderStatus>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_order_status", e))?;

        status
            .map(|s| s.parse::<OrderStatus>().map_err(|e| StoreError::decode(e.to_string())))
            .transpose()
    }

    #[instrument(skip_all, fields(operation = "update_status", order_id = %order_id, status = %status), err)]
    async fn update_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1
            "#,
        )
        .bind(order_id.get())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(operation = "delete_order", order_id = %order_id), err)]
    async fn delete(&mut self, order_id: OrderId) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order_items", e))?;

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl InventoryLedger for PostgresUnitOfWork {
    #[instrument(
        skip_all,
        fields(operation = "decrement_stock", product_id = %product_id, quantity = quantity),
        err
    )]
    async fn decrement(&mut self, product_id: ProductId, quantity: i64) -> Result<StockDecrement, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $2
            WHERE id = $1 AND stock >= $2
            "#,
        )
        .bind(product_id.get())
        .bind(quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("decrement_stock", e))?;

        if result.rows_affected() == 0 {
            Ok(StockDecrement::Insufficient)
        } else {
            Ok(StockDecrement::Applied)
        }
    }
}

#[async_trait]
impl CatalogReader for PostgresUnitOfWork {
    #[instrument(skip_all, fields(operation = "get_product", product_id = %product_id), err)]
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, image, price, stock, active FROM products WHERE id = $1",
        )
        .bind(product_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        row.map(|row| {
            let product = ProductRow::from_row(&row).map_err(|e| map_sqlx_error("get_product", e))?;
            Product::try_from(product)
        })
        .transpose()
    }

    #[instrument(skip_all, fields(operation = "list_products"), err)]
    async fn products(&mut self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, image, price, stock, active FROM products ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let product = ProductRow::from_row(&row).map_err(|e| map_sqlx_error("list_products", e))?;
            products.push(product.try_into()?);
        }
        Ok(products)
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip_all, fields(operation = "commit"), err)]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

struct OrderRow {
    id: i64,
    customer_name: String,
    customer_phone: String,
    customer_address: String,
    total: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            customer_name: row.try_get("customer_name")?,
            customer_phone: row.try_get("customer_phone")?,
            customer_address: row.try_get("customer_address")?,
            total: row.try_get("total")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        Ok(Order {
            id: OrderId::new(self.id),
            customer: CustomerDetails::new(self.customer_name, self.customer_phone, self.customer_address),
            items,
            total: Money::from_minor(self.total).map_err(|e| StoreError::decode(e.to_string()))?,
            status: self
                .status
                .parse()
                .map_err(|e: bakeshop_core::DomainError| StoreError::decode(e.to_string()))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ItemRow {
    order_id: i64,
    product_id: i64,
    quantity: i64,
    price: i64,
    product_name: Option<String>,
    product_description: Option<String>,
    product_image: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            order_id: row.try_get("order_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            price: row.try_get("price")?,
            product_name: row.try_get("product_name")?,
            product_description: row.try_get("product_description")?,
            product_image: row.try_get("product_image")?,
        })
    }
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(OrderItem {
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
            unit_price: Money::from_minor(row.price).map_err(|e| StoreError::decode(e.to_string()))?,
            product_name: row.product_name,
            product_description: row.product_description,
            product_image: row.product_image,
        })
    }
}

struct ProductRow {
    id: i64,
    name: String,
    description: Option<String>,
    image: Option<String>,
    price: i64,
    stock: i64,
    active: bool,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image: row.try_get("image")?,
            price: row.try_get("price")?,
            stock: row.try_get("stock")?,
            active: row.try_get("active")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            image: row.image,
            price: Money::from_minor(row.price).map_err(|e| StoreError::decode(e.to_string()))?,
            stock: row.stock,
            active: row.active,
        })
    }
}
