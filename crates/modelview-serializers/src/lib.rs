//! # modelview-serializers
//!
//! Typed views over persisted entities.
//!
//! A serializer class declares an ordered set of typed fields. Reading an
//! entity runs one resolver per field (an explicit resolver, a
//! `resolve_<field>` method, or plain attribute access), recursing into
//! nested serializers for related rows. Writing walks an instance tree and
//! creates or patches rows, ordering writes by foreign-key dependency.
//!
//! ## Layout
//!
//! - [`registry`]: declaration ([`SerializerBuilder`]) and the built
//!   [`SerializerRegistry`]
//! - [`fields`]: field types and schema introspection
//! - [`resolver`] / [`guard`]: per-field value production and visibility
//! - prefetch planning: relation paths to load in bulk, exposed through
//!   [`Serializer::prefetch_paths`]
//! - [`serializer`]: the [`Serializer`] handle tying reads and writes together
//! - [`settings`]: depth, fan-out and type strictness
//!
//! ## Quick start
//!
//! ```
//! use modelview_db::memory::MemoryDatabase;
//! use modelview_db::{ModelCatalog, ModelMeta, Query, RelationMeta};
//! use modelview_serializers::{Context, LoadOptions, SerializerBuilder, SerializerRegistry, TypeDescriptor};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
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
//!
//! let registry = SerializerRegistry::builder()
//!     .catalog(catalog.clone())
//!     .register(
//!         SerializerBuilder::new("BookSerializer")
//!             .model("Book")
//!             .field("id", TypeDescriptor::int().optional())
//!             .field("title", TypeDescriptor::string()),
//!     )
//!     .register(
//!         SerializerBuilder::new("BookShelfSerializer")
//!             .model("BookShelf")
//!             .field("id", TypeDescriptor::int().optional())
//!             .field("name", TypeDescriptor::string())
//!             .field("books", TypeDescriptor::nested("BookSerializer").list()),
//!     )
//!     .build()?;
//!
//! let db = MemoryDatabase::new(catalog);
//! let shelf = db.insert("BookShelf", json!({"name": "fantasy"})).await?;
//! db.insert("Book", json!({"title": "Dune", "shelf_id": shelf.pk()})).await?;
//!
//! let serializer = registry.serializer("BookShelfSerializer")?;
//! let shelves = serializer
//!     .from_query(&db, Query::new("BookShelf"), &Context::new(), LoadOptions::prefetch())
//!     .await?;
//! assert_eq!(shelves[0].nested_list("books").map(|b| b.len()), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod fields;
pub mod guard;
pub mod instance;
mod materialize;
mod prefetch;
pub mod registry;
pub mod resolver;
pub mod serializer;
pub mod settings;
pub mod state;
pub mod value;
mod writer;

pub use context::Context;
pub use error::{ConfigurationError, RelationError, SerializerError, SerializerResult, ValidationError};
pub use fields::{ClassId, FieldBinding, FieldKind, FieldSpec, ScalarType, TypeDescriptor};
pub use guard::Guard;
pub use instance::{InstanceBuilder, SerializerInstance};
pub use registry::{RegistryBuilder, SerializerBuilder, SerializerClass, SerializerRegistry};
pub use resolver::{Resolved, Resolver, ResolverEntry, ResolverKind, ensure_fetched};
pub use serializer::{LoadOptions, Serializer};
pub use settings::{SerializerSettings, SettingsError};
pub use state::FieldState;
pub use value::FieldValue;
