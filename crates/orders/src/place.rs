//! The "place order" command and its pricing rules.

use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bakeshop_core::{DomainError, DomainResult, Money, ProductId};
use bakeshop_products::Product;

use crate::order::CustomerDetails;

/// Requested line: which product, how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Command: PlaceOrder.
///
/// `client_total` is the figure the storefront computed from its cart. It is
/// never persisted as-is; see [`TotalPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer: CustomerDetails,
    pub lines: Vec<OrderLine>,
    pub client_total: Option<Money>,
}

impl PlaceOrder {
    /// Synchronous checks, run before any storage work starts.
    pub fn validate(&self) -> DomainResult<()> {
        self.customer.validate()?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }

        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
        }

        Ok(())
    }
}

/// A requested line priced from the catalog at order time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

impl PricedLine {
    /// Capture the product's current price.
    pub fn snapshot(line: &OrderLine, product: &Product) -> Self {
        Self {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: product.price,
        }
    }

    pub fn line_total(&self) -> DomainResult<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Stock to deduct per product, one entry per distinct product in ascending
/// id order.
///
/// Concurrent orders touching the same products must lock stock rows in the
/// same order, otherwise two transactions can wait on each other.
pub fn stock_deductions(lines: &[PricedLine]) -> DomainResult<Vec<(ProductId, i64)>> {
    let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
    for line in lines {
        let quantity = merged.entry(line.product_id).or_insert(0);
        *quantity = quantity.checked_add(line.quantity).ok_or_else(|| {
            DomainError::conflict(format!("quantity overflow for product {}", line.product_id))
        })?;
    }
    Ok(merged.into_iter().collect())
}

/// Sum of `unit_price * quantity` over priced lines.
pub fn order_total(lines: &[PricedLine]) -> DomainResult<Money> {
    lines
        .iter()
        .try_fold(Money::ZERO, |acc, line| acc.checked_add(line.line_total()?))
}

/// How the server total relates to the client-supplied total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TotalPolicy {
    /// Persist the server total; the client figure is informational.
    #[default]
    Recompute,
    /// Fail the order when the client figure disagrees with the server total.
    RejectMismatch,
}

impl TotalPolicy {
    /// Decide the total to persist. The result is always `computed`.
    pub fn reconcile(self, computed: Money, client_total: Option<Money>) -> DomainResult<Money> {
        match (self, client_total) {
            (TotalPolicy::RejectMismatch, Some(client)) if client != computed => {
                Err(DomainError::validation(format!(
                    "total mismatch: client sent {client}, server computed {computed}"
                )))
            }
            _ => Ok(computed),
        }
    }
}

impl FromStr for TotalPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recompute" => Ok(TotalPolicy::Recompute),
            "reject-mismatch" => Ok(TotalPolicy::RejectMismatch),
            other => Err(DomainError::validation(format!(
                "unknown total policy '{other}' (expected recompute or reject-mismatch)"
            ))),
        }
    }
}
