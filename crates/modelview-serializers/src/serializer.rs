//! Serializer handle
//!
//! [`Serializer`] is a cheap borrowed view of one class inside a
//! [`SerializerRegistry`]. It is the entry point for reading entities into
//! instances and for writing instances back.

use crate::context::Context;
use crate::error::{ConfigurationError, SerializerResult};
use crate::fields::FieldSpec;
use crate::instance::{InstanceBuilder, SerializerInstance, parse_payload};
use crate::materialize::{materialize_many, materialize_one};
use crate::prefetch::{model_field_paths, prefetch_plan, projection};
use crate::registry::{SerializerClass, SerializerRegistry};
use crate::writer;
use modelview_db::{Database, EntityRef, Query, Row};
use serde_json::Value;
use std::sync::Arc;

/// How [`Serializer::from_query`] loads related rows
///
/// `prefetch` loads every planned relation in bulk after the main query.
/// `select_only` restricts the main query to the columns the serializer
/// reads and joins single-valued relations into it. The two are mutually
/// exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
	pub prefetch: bool,
	pub select_only: bool,
}

impl LoadOptions {
	pub fn prefetch() -> Self {
		Self {
			prefetch: true,
			select_only: false,
		}
	}

	pub fn select_only() -> Self {
		Self {
			prefetch: false,
			select_only: true,
		}
	}
}

/// Handle for one serializer class
///
/// # Examples
///
/// ```
/// use modelview_serializers::{Context, SerializerBuilder, SerializerRegistry, TypeDescriptor};
/// use serde_json::json;
///
/// let registry = SerializerRegistry::builder()
///     .register(SerializerBuilder::new("PointSerializer").field("x", TypeDescriptor::int()))
///     .build()
///     .unwrap();
///
/// let point = registry.serializer("PointSerializer").unwrap();
/// let instance = point.from_json(json!({ "x": 3 })).unwrap();
/// assert!(instance.has_been_set("x"));
/// assert_eq!(instance.to_json(), json!({ "x": 3 }));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Serializer<'r> {
	registry: &'r SerializerRegistry,
	class: &'r Arc<SerializerClass>,
}

impl<'r> Serializer<'r> {
	pub(crate) fn new(registry: &'r SerializerRegistry, class: &'r Arc<SerializerClass>) -> Self {
		Self { registry, class }
	}

	pub fn name(&self) -> &'r str {
		self.class.name()
	}

	pub fn class(&self) -> &'r Arc<SerializerClass> {
		self.class
	}

	pub fn registry(&self) -> &'r SerializerRegistry {
		self.registry
	}

	pub fn field_names(&self) -> Vec<&'r str> {
		self.class.field_names()
	}

	pub fn field(&self, name: &str) -> Option<&'r FieldSpec> {
		self.class.field(name)
	}

	pub fn is_nested(&self, name: &str) -> bool {
		self.class.is_nested(name)
	}

	pub fn required_fields(&self) -> Vec<&'r str> {
		self.class.required_fields()
	}

	/// Relation paths loaded in bulk before materializing many entities
	///
	/// Computed once per class and cached; repeated calls return the same
	/// slice.
	pub fn prefetch_paths(&self) -> &'r [String] {
		prefetch_plan(self.registry, self.class)
	}

	/// Backing-entity field paths the serializer reads by default
	pub fn model_field_paths(&self) -> &'r [String] {
		model_field_paths(self.registry, self.class)
	}

	/// Materialize a single entity
	pub async fn from_entity(&self, entity: &EntityRef, context: &Context) -> SerializerResult<SerializerInstance> {
		tracing::debug!(serializer = self.name(), model = entity.model_name(), "materializing entity");
		materialize_one(self.registry, self.class, entity.clone(), context, 0).await
	}

	/// Materialize entities, preserving input order
	pub async fn from_entities(
		&self,
		entities: &[EntityRef],
		context: &Context,
	) -> SerializerResult<Vec<SerializerInstance>> {
		tracing::debug!(serializer = self.name(), count = entities.len(), "materializing entities");
		materialize_many(self.registry, self.class, entities, context).await
	}

	/// Bulk-load the planned relations for already fetched entities
	pub async fn prefetch(&self, db: &dyn Database, entities: &[EntityRef]) -> SerializerResult<()> {
		let paths = self.prefetch_paths();
		if paths.is_empty() || entities.is_empty() {
			return Ok(());
		}
		db.prefetch(entities, paths).await?;
		Ok(())
	}

	/// Run `query` with the requested loading strategy and materialize the rows
	///
	/// Conflicting options are rejected before the database is touched.
	pub async fn from_query(
		&self,
		db: &dyn Database,
		query: Query,
		context: &Context,
		options: LoadOptions,
	) -> SerializerResult<Vec<SerializerInstance>> {
		if options.prefetch && options.select_only {
			return Err(ConfigurationError::ConflictingLoadOptions.into());
		}

		let query = if options.select_only {
			let columns = projection(self.registry, self.class)?;
			let relations = joined_relations(&columns);
			query
				.select_related(&relations.iter().map(String::as_str).collect::<Vec<_>>())
				.only(&columns.iter().map(String::as_str).collect::<Vec<_>>())
		} else if options.prefetch {
			let paths = self.prefetch_paths();
			query.prefetch_related(&paths.iter().map(String::as_str).collect::<Vec<_>>())
		} else {
			query
		};

		let entities = db.fetch(&query).await?;
		tracing::debug!(
			serializer = self.name(),
			rows = entities.len(),
			paths = ?query.prefetch_paths(),
			select_only = options.select_only,
			"loaded rows for serializer"
		);
		self.from_entities(&entities, context).await
	}

	/// Start a typed construction of an instance of this class
	pub fn instance(&self) -> InstanceBuilder {
		InstanceBuilder::new(self.class.clone())
	}

	/// Parse and validate a JSON payload
	pub fn from_json(&self, payload: Value) -> SerializerResult<SerializerInstance> {
		parse_payload(self.registry, self.class, payload)
	}

	/// Persist `instance` and its nested instances
	///
	/// Generated primary keys are written back into every created instance.
	/// A primary key already carried by `instance` becomes the new row's key.
	pub async fn create(&self, db: &dyn Database, instance: &mut SerializerInstance) -> SerializerResult<EntityRef> {
		writer::ensure_class(self.class, instance)?;
		writer::validate_for_create(instance)?;
		writer::create_tree(db, instance, Row::new()).await
	}

	/// Apply the explicitly set fields of `instance` to `entity`
	///
	/// Returns whether anything was written.
	pub async fn partial_update(
		&self,
		db: &dyn Database,
		instance: &mut SerializerInstance,
		entity: &EntityRef,
	) -> SerializerResult<bool> {
		writer::ensure_class(self.class, instance)?;
		let changed = writer::partial_update(db, instance, entity).await?;
		tracing::debug!(serializer = self.name(), changed, "partial update applied");
		Ok(changed)
	}
}

/// Every relation prefix of the dotted column paths
fn joined_relations(columns: &[String]) -> Vec<String> {
	let mut out: Vec<String> = Vec::new();
	for column in columns {
		let mut end = 0;
		while let Some(offset) = column[end..].find('.') {
			end += offset;
			let prefix = &column[..end];
			if !out.iter().any(|p| p == prefix) {
				out.push(prefix.to_string());
			}
			end += 1;
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_load_options_constructors() {
		assert!(LoadOptions::prefetch().prefetch);
		assert!(!LoadOptions::prefetch().select_only);
		assert!(LoadOptions::select_only().select_only);
		assert_eq!(LoadOptions::default(), LoadOptions { prefetch: false, select_only: false });
	}

	#[rstest]
	#[case(&["title"], &[])]
	#[case(&["title", "shelf.name"], &["shelf"])]
	#[case(&["shelf.owner.name", "shelf.id"], &["shelf", "shelf.owner"])]
	fn test_joined_relations(#[case] columns: &[&str], #[case] expected: &[&str]) {
		let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
		assert_eq!(joined_relations(&columns), expected);
	}
}
