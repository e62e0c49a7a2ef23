//! Catalog products, as seen by the order pipeline.
//!
//! Catalog maintenance (create/edit/delete) lives outside this workspace; the
//! order pipeline only reads products to snapshot prices and display fields.

pub mod product;

pub use product::Product;
