//! Infrastructure wiring: persistence handle and the order workflow built on it.

use std::sync::Arc;

use bakeshop_core::{Money, ProductId};
use bakeshop_infra::{
    AppConfig, InMemoryPersistence, OrderWorkflow, Persistence, PostgresPersistence, StoreError,
};
use bakeshop_orders::{TotalPolicy, TransitionPolicyKind};
use bakeshop_products::Product;

/// Shared services handed to every handler through an `Extension`.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub workflow: OrderWorkflow,
}

impl AppServices {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        total_policy: TotalPolicy,
        status_policy: TransitionPolicyKind,
    ) -> Self {
        let workflow = OrderWorkflow::new(persistence)
            .with_total_policy(total_policy)
            .with_transition_policy(status_policy.build());
        Self { workflow }
    }
}

/// Open the configured persistence backend and wire the workflow on top of it.
///
/// With `DATABASE_URL` set this connects to Postgres and applies migrations;
/// otherwise an in-memory store seeded with a small demo catalog is used.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let persistence: Arc<dyn Persistence> = match &config.database {
        Some(db) => {
            let postgres = PostgresPersistence::connect(db).await?;
            postgres.migrate().await?;
            Arc::new(postgres)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on exit)");
            Arc::new(InMemoryPersistence::with_products(demo_catalog()?))
        }
    };

    tracing::info!(
        total_policy = ?config.total_policy,
        status_policy = ?config.status_policy,
        "order workflow ready"
    );
    Ok(AppServices::new(
        persistence,
        config.total_policy,
        config.status_policy,
    ))
}

fn demo_catalog() -> Result<Vec<Product>, StoreError> {
    let rows = [
        (1, "Bolo de Chocolate", "Chocolate cake with ganache frosting.", 4590, 10),
        (2, "Bolo Red Velvet", "Red velvet cake with cream cheese frosting.", 5590, 8),
        (3, "Bolo de Cenoura", "Carrot cake with chocolate topping.", 3990, 15),
        (4, "Cheesecake", "Cheesecake with red fruit coulis.", 5990, 12),
    ];

    rows.into_iter()
        .map(|(id, name, description, cents, stock)| {
            Ok(Product {
                id: ProductId::new(id),
                name: name.to_string(),
                description: Some(description.to_string()),
                image: None,
                price: Money::from_minor(cents).map_err(|e| StoreError::decode(e.to_string()))?,
                stock,
                active: true,
            })
        })
        .collect()
}
