//! # modelview-db
//!
//! Storage contract for the modelview serializer layer.
//!
//! The serializer crate never talks to a concrete database. It works against
//! the [`Database`] and [`Entity`] traits defined here, describes reads with
//! [`Query`], and learns model structure from a [`ModelCatalog`].
//!
//! ## Features
//!
//! - `memory` (default): [`memory::MemoryDatabase`], an in-process backend
//!   with query counting, used by the test suites
//!
//! ## Quick start
//!
//! ```
//! use modelview_db::memory::MemoryDatabase;
//! use modelview_db::meta::{ModelCatalog, ModelMeta, RelationMeta};
//! use modelview_db::{Database, Query};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), modelview_db::DatabaseError> {
//! let catalog = ModelCatalog::new()
//!     .register(
//!         ModelMeta::new("BookShelf")
//!             .column("name")
//!             .with_relation(RelationMeta::backward_foreign_key("books", "Book", "shelf_id")),
//!     )
//!     .register(
//!         ModelMeta::new("Book")
//!             .column("title")
//!             .with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable()),
//!     );
//! let db = MemoryDatabase::new(catalog);
//!
//! db.insert("BookShelf", json!({"name": "fantasy"})).await?;
//! let shelves = db.fetch(&Query::new("BookShelf").prefetch_related(&["books"])).await?;
//! assert_eq!(shelves.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod entity;
pub mod error;
pub mod meta;
pub mod query;
pub mod transaction;

#[cfg(feature = "memory")]
pub mod memory;

pub use database::{Database, DatabaseRef};
pub use entity::{Entity, EntityRef, Related, Row};
pub use error::{DatabaseError, DatabaseResult};
pub use meta::{ColumnMeta, ModelCatalog, ModelMeta, RelationKind, RelationMeta};
pub use query::{Filter, FilterOperator, OrderBy, Query};
pub use transaction::{TransactionScope, atomic};
