//! Orders domain module.
//!
//! This crate contains business rules for customer orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Persistence and the
//! transactional workflow live in `bakeshop-infra`.

pub mod order;
pub mod place;
pub mod transition;

pub use order::{CustomerDetails, Order, OrderItem, OrderStatus};
pub use place::{order_total, stock_deductions, OrderLine, PlaceOrder, PricedLine, TotalPolicy};
pub use transition::{Lifecycle, TransitionPolicy, TransitionPolicyKind, Unrestricted};
