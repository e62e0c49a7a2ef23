use serde::{Deserialize, Serialize};

use bakeshop_core::{Entity, Money, ProductId};

/// Product as supplied by the catalog.
///
/// `stock` is owned by the inventory ledger: the order pipeline never writes it
/// directly, it only issues conditional decrements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Current unit price.
    pub price: Money,
    pub stock: i64,
    pub active: bool,
}

impl Product {
    /// Check if product can be sold (must be active).
    pub fn can_be_sold(&self) -> bool {
        self.active
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cake(stock: i64, active: bool) -> Product {
        Product {
            id: ProductId::new(1),
            name: "Chocolate cake".to_string(),
            description: Some("Ganache frosting".to_string()),
            image: None,
            price: Money::from_minor(4590).unwrap(),
            stock,
            active,
        }
    }

    #[test]
    fn inactive_products_cannot_be_sold() {
        assert!(cake(3, true).can_be_sold());
        assert!(!cake(3, false).can_be_sold());
    }

    #[test]
    fn serializes_camel_case_with_major_unit_price() {
        let json = serde_json::to_value(cake(2, true)).unwrap();
        assert_eq!(json["price"], serde_json::json!(45.9));
        assert_eq!(json["active"], serde_json::json!(true));
        assert_eq!(json["id"], serde_json::json!(1));
    }
}
