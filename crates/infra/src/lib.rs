//! Infrastructure layer: persistence backends, configuration and the order
//! workflow that runs on top of them.

pub mod config;
pub mod order_workflow;
pub mod store;

pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use order_workflow::{OrderWorkflow, OrderWorkflowError, WorkflowResult};
pub use store::{
    CatalogReader, InMemoryPersistence, InventoryLedger, OrderStore, Persistence,
    PostgresPersistence, StockDecrement, StoreError, UnitOfWork,
};
