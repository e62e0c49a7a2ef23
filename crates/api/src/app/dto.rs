use serde::Deserialize;

use bakeshop_core::{DomainError, DomainResult, Money, ProductId};
use bakeshop_orders::{CustomerDetails, Order, OrderItem, OrderLine, OrderStatus, PlaceOrder};
use bakeshop_products::Product;

// -------------------------
// Request DTOs
// -------------------------

/// Checkout payload sent by the storefront.
///
/// Missing fields deserialize to empty values so that they are reported as
/// validation errors (400) instead of extractor rejections.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub items: Vec<CartItemRequest>,
    /// Client-computed total in major units.
    pub total: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CartItemRequest {
    pub product: CartProductRef,
    pub quantity: i64,
}

/// Only the id is read; any other product fields the cart carries are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CartProductRef {
    pub id: i64,
}

impl CreateOrderRequest {
    pub fn into_command(self) -> DomainResult<PlaceOrder> {
        let lines = self
            .items
            .into_iter()
            .map(|item| {
                if item.product.id <= 0 {
                    return Err(DomainError::validation("every item needs a valid product id"));
                }
                Ok(OrderLine {
                    product_id: ProductId::new(item.product.id),
                    quantity: item.quantity,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let client_total = self.total.map(Money::from_major).transpose()?;

        Ok(PlaceOrder {
            customer: CustomerDetails::new(
                self.customer_name,
                self.customer_phone,
                self.customer_address,
            ),
            lines,
            client_total,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateStatusRequest {
    pub status: String,
}

impl UpdateStatusRequest {
    pub fn status(&self) -> DomainResult<OrderStatus> {
        self.status.parse()
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn product_to_json(product: &Product) -> serde_json::Value {
    serde_json::json!({
        "id": product.id,
        "name": product.name,
        "description": product.description,
        "image": product.image,
        "price": product.price,
        "stock": product.stock,
        "active": product.active,
    })
}

/// Item as the storefront renders it: `price` is the price paid, display
/// fields come from the current catalog row.
pub fn order_item_to_json(item: &OrderItem) -> serde_json::Value {
    serde_json::json!({
        "product": {
            "id": item.product_id,
            "name": item.product_name,
            "price": item.unit_price,
            "description": item.product_description,
            "image": item.product_image,
        },
        "quantity": item.quantity,
    })
}

pub fn order_to_json(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "id": order.id,
        "customerName": order.customer.name,
        "customerPhone": order.customer.phone,
        "customerAddress": order.customer.address,
        "items": order.items.iter().map(order_item_to_json).collect::<Vec<_>>(),
        "total": order.total,
        "status": order.status,
        "createdAt": order.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "updatedAt": order.updated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}
