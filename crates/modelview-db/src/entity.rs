//! Entity access
//!
//! An [`Entity`] is one persisted row as seen by the serializer layer:
//! attribute reads, a per-entity relation cache filled by prefetching, and a
//! suspending relation accessor.

use crate::error::DatabaseResult;
use crate::meta::ModelMeta;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Shared handle to an entity
pub type EntityRef = Arc<dyn Entity>;

/// A row's attribute values keyed by column name
pub type Row = Map<String, Value>;

/// Loaded value of a relation
#[derive(Clone)]
pub enum Related {
	/// Single-valued relation (`None` when the FK is null or no row points back)
	One(Option<EntityRef>),
	/// Collection relation in storage order
	Many(Vec<EntityRef>),
}

impl Related {
	/// Number of related rows
	pub fn len(&self) -> usize {
		match self {
			Related::One(Some(_)) => 1,
			Related::One(None) => 0,
			Related::Many(items) => items.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Iterate over the related entities
	pub fn entities(&self) -> Vec<EntityRef> {
		match self {
			Related::One(Some(e)) => vec![e.clone()],
			Related::One(None) => Vec::new(),
			Related::Many(items) => items.clone(),
		}
	}
}

impl fmt::Debug for Related {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Related::One(Some(e)) => f.debug_tuple("One").field(&e.pk()).finish(),
			Related::One(None) => f.write_str("One(None)"),
			Related::Many(items) => f
				.debug_tuple("Many")
				.field(&items.iter().map(|e| e.pk()).collect::<Vec<_>>())
				.finish(),
		}
	}
}

/// A persisted row
#[async_trait]
pub trait Entity: Send + Sync + fmt::Debug {
	/// Metadata of the model this row belongs to
	fn meta(&self) -> &Arc<ModelMeta>;

	/// Primary key value, `None` if the column was not loaded
	fn pk(&self) -> Option<Value> {
		self.get(self.meta().primary_key_column())
	}

	/// Read a loaded attribute
	///
	/// Returns `None` when the column does not exist or was not loaded
	/// (column projection); a SQL NULL is `Some(Value::Null)`.
	fn get(&self, attribute: &str) -> Option<Value>;

	/// Snapshot of every loaded attribute
	fn values(&self) -> Row;

	/// Overwrite local attribute values after a successful save
	fn apply(&self, changes: &Row);

	/// Relation value loaded by prefetching or an earlier fetch
	fn cached_related(&self, relation: &str) -> Option<Related>;

	/// Store a loaded relation value
	fn set_related_cache(&self, relation: &str, related: Related);

	/// Drop a cached relation so the next access reloads it
	fn invalidate_related(&self, relation: &str);

	/// Load a relation, issuing a query only when it is not cached
	async fn fetch_related(&self, relation: &str) -> DatabaseResult<Related>;

	/// Make sure every named relation is loaded
	async fn ensure_fetched(&self, relations: &[&str]) -> DatabaseResult<()> {
		for relation in relations {
			if self.cached_related(relation).is_none() {
				self.fetch_related(relation).await?;
			}
		}
		Ok(())
	}

	/// Model name shortcut
	fn model_name(&self) -> &str {
		self.meta().name()
	}
}
