//! Shopping cart state container with slice-by-slice key-value persistence.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::CartStore`]:
//! ```
//! use cartstore::{core::store::CartStore, item::CatalogItem};
//! use rust_decimal::Decimal;
//!
//! let mut store = CartStore::new();
//! store.add_to_cart(CatalogItem::new(1, "Sencha", Decimal::new(1899, 2)), 2).expect("add");
//! store.add_to_cart(CatalogItem::new(2, "Genmaicha", Decimal::new(1699, 2)), 1).expect("add");
//! assert_eq!(store.cart_count(), 3);
//! assert_eq!(store.cart_total(), Decimal::new(5497, 2));
//!
//! assert!(store.apply_discount("onsen15"));
//! assert_eq!(store.final_total(), Decimal::new(4672, 2));
//! ```
//!
//! Runtime usage with a SQLite boundary:
//! ```no_run
//! use cartstore::{
//!     item::CatalogItem,
//!     persist::{load_store, sqlite::SqliteKvStore},
//!     runtime::{config::RuntimeConfig, handle::spawn_cart},
//! };
//! use rust_decimal::Decimal;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let kv = SqliteKvStore::open("cart.db").expect("open sqlite");
//! let store = load_store(&kv);
//! let handle = spawn_cart(store, Some(Box::new(kv)), RuntimeConfig::from_env());
//! handle
//!     .add_one(CatalogItem::new(1, "Sencha", Decimal::new(1899, 2)))
//!     .await
//!     .expect("add");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Core in-memory store and discount table.
pub mod core;
/// Catalog item snapshots and cart lines.
pub mod item;
/// Change records and persistence wrapper types.
pub mod op;
/// Persistence boundary, slice codec, and implementations.
pub mod persist;
/// Single-writer runtime handle, config, and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
