//! # modelview
//!
//! Declarative serializers over persisted entities.
//!
//! A serializer declares typed fields; reading an entity resolves each field
//! through an explicit resolver, a `resolve_<field>` method, or the
//! same-named attribute, nesting related rows through other serializers.
//! Writing goes the other way: an instance tree is persisted in foreign-key
//! dependency order, or applied sparsely onto an existing row.
//!
//! ## Crates
//!
//! - [`db`] (`modelview-db`): storage contract (`Database`, `Entity`, `Query`,
//!   model metadata) and, behind the `memory` feature, an in-process backend
//! - [`serializers`] (`modelview-serializers`): declaration, resolution,
//!   prefetch planning, materialization and writes
//!
//! ## Feature Flags
//!
//! - `memory` (default): re-exports `db::memory::MemoryDatabase`
//!
//! ## Example
//!
//! ```
//! use modelview::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ModelCatalog::new().register(ModelMeta::new("Tag").column("name"));
//! let registry = SerializerRegistry::builder()
//!     .catalog(catalog.clone())
//!     .register(
//!         SerializerBuilder::new("TagSerializer")
//!             .model("Tag")
//!             .field("id", TypeDescriptor::int().optional())
//!             .field("name", TypeDescriptor::string()),
//!     )
//!     .build()?;
//!
//! let db = MemoryDatabase::new(catalog);
//! let tags = registry.serializer("TagSerializer")?;
//! let mut tag = tags.from_json(json!({"name": "rust"}))?;
//! tags.create(&db, &mut tag).await?;
//! assert_eq!(tag.value("id"), Some(&json!(1)));
//! # Ok(())
//! # }
//! ```

pub use modelview_db as db;
pub use modelview_serializers as serializers;

pub mod prelude {
	pub use modelview_db::{
		Database, DatabaseError, Entity, EntityRef, ModelCatalog, ModelMeta, Query, Related,
		RelationMeta, atomic,
	};
	pub use modelview_serializers::{
		Context, FieldValue, Guard, LoadOptions, Resolved, Resolver, Serializer, SerializerBuilder,
		SerializerError, SerializerInstance, SerializerRegistry, SerializerResult, SerializerSettings,
		TypeDescriptor, ensure_fetched,
	};

	#[cfg(feature = "memory")]
	pub use modelview_db::memory::MemoryDatabase;
}
