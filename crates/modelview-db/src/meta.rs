//! Static model metadata
//!
//! Describes persisted models the way the serializer layer needs to see them:
//! primary key, columns and the relations reachable from each model. The
//! metadata is declared once and shared read-only afterwards.

use crate::error::{DatabaseError, DatabaseResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Relationship kinds, seen from the model declaring the relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
	/// Many-to-one; the declaring row stores the foreign key column
	ForeignKey,
	/// One-to-many; the related rows store a foreign key to this row
	BackwardForeignKey,
	/// Many-to-many through a junction table
	ManyToMany,
	/// One-to-one; the declaring row stores the foreign key column
	OneToOne,
	/// Reverse side of a one-to-one
	BackwardOneToOne,
}

impl RelationKind {
	/// Whether the relation yields at most one related row
	pub fn is_single(&self) -> bool {
		matches!(
			self,
			RelationKind::ForeignKey | RelationKind::OneToOne | RelationKind::BackwardOneToOne
		)
	}

	/// Whether the declaring row holds the foreign key (it depends on the related row)
	pub fn is_forward(&self) -> bool {
		matches!(self, RelationKind::ForeignKey | RelationKind::OneToOne)
	}

	/// Whether the related rows hold a foreign key to the declaring row
	pub fn is_backward(&self) -> bool {
		matches!(
			self,
			RelationKind::BackwardForeignKey | RelationKind::BackwardOneToOne
		)
	}
}

/// A relation declared on a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMeta {
	/// Relation (accessor) name, e.g. `shelf` or `books`
	pub name: String,
	pub kind: RelationKind,
	/// Name of the related model
	pub target: String,
	/// Forward: local FK column. Many-to-many: junction column pointing at this model.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub column: Option<String>,
	/// Backward: FK column on the related model. Many-to-many: junction column
	/// pointing at the target model.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_column: Option<String>,
	/// Junction table for many-to-many relations
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub through: Option<String>,
	/// Whether a forward relation may be null
	#[serde(default)]
	pub nullable: bool,
}

impl RelationMeta {
	/// Many-to-one relation stored in `column`
	///
	/// # Examples
	///
	/// ```
	/// use modelview_db::meta::{RelationKind, RelationMeta};
	///
	/// let rel = RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable();
	/// assert_eq!(rel.kind, RelationKind::ForeignKey);
	/// assert_eq!(rel.column.as_deref(), Some("shelf_id"));
	/// assert!(rel.nullable);
	/// ```
	pub fn foreign_key(
		name: impl Into<String>,
		target: impl Into<String>,
		column: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			kind: RelationKind::ForeignKey,
			target: target.into(),
			column: Some(column.into()),
			remote_column: None,
			through: None,
			nullable: false,
		}
	}

	/// One-to-many relation; `remote_column` is the FK on the related model
	pub fn backward_foreign_key(
		name: impl Into<String>,
		target: impl Into<String>,
		remote_column: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			kind: RelationKind::BackwardForeignKey,
			target: target.into(),
			column: None,
			remote_column: Some(remote_column.into()),
			through: None,
			nullable: true,
		}
	}

	/// Many-to-many relation through `through`, with `column` pointing at the
	/// declaring model and `remote_column` at the target
	pub fn many_to_many(
		name: impl Into<String>,
		target: impl Into<String>,
		through: impl Into<String>,
		column: impl Into<String>,
		remote_column: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			kind: RelationKind::ManyToMany,
			target: target.into(),
			column: Some(column.into()),
			remote_column: Some(remote_column.into()),
			through: Some(through.into()),
			nullable: true,
		}
	}

	/// One-to-one relation stored in `column`
	pub fn one_to_one(
		name: impl Into<String>,
		target: impl Into<String>,
		column: impl Into<String>,
	) -> Self {
		Self {
			kind: RelationKind::OneToOne,
			..Self::foreign_key(name, target, column)
		}
	}

	/// Reverse side of a one-to-one
	pub fn backward_one_to_one(
		name: impl Into<String>,
		target: impl Into<String>,
		remote_column: impl Into<String>,
	) -> Self {
		Self {
			kind: RelationKind::BackwardOneToOne,
			..Self::backward_foreign_key(name, target, remote_column)
		}
	}

	/// Mark a forward relation as nullable
	pub fn nullable(mut self) -> Self {
		self.nullable = true;
		self
	}
}

/// A persisted column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
	pub name: String,
	#[serde(default)]
	pub nullable: bool,
}

/// Metadata for one persisted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
	name: String,
	#[serde(default = "default_primary_key")]
	primary_key: String,
	#[serde(default)]
	columns: Vec<ColumnMeta>,
	#[serde(default)]
	relations: Vec<RelationMeta>,
}

fn default_primary_key() -> String {
	"id".to_string()
}

impl ModelMeta {
	/// Create model metadata with an `id` primary key column
	///
	/// # Examples
	///
	/// ```
	/// use modelview_db::meta::{ModelMeta, RelationMeta};
	///
	/// let book = ModelMeta::new("Book")
	///     .column("title")
	///     .with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable());
	///
	/// assert!(book.has_column("shelf_id"));
	/// assert!(book.relation("shelf").is_some());
	/// ```
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			primary_key: "id".to_string(),
			columns: vec![ColumnMeta {
				name: "id".to_string(),
				nullable: true,
			}],
			relations: Vec::new(),
		}
	}

	/// Rename the primary key column
	pub fn primary_key(mut self, name: impl Into<String>) -> Self {
		let name = name.into();
		if let Some(col) = self.columns.iter_mut().find(|c| c.name == self.primary_key) {
			col.name = name.clone();
		}
		self.primary_key = name;
		self
	}

	/// Add a NOT NULL column
	pub fn column(mut self, name: impl Into<String>) -> Self {
		self.push_column(name.into(), false);
		self
	}

	/// Add a nullable column
	pub fn nullable_column(mut self, name: impl Into<String>) -> Self {
		self.push_column(name.into(), true);
		self
	}

	/// Add a relation; forward relations also declare their FK column
	pub fn with_relation(mut self, relation: RelationMeta) -> Self {
		if relation.kind.is_forward()
			&& let Some(column) = relation.column.clone()
		{
			self.push_column(column, relation.nullable);
		}
		self.relations.retain(|r| r.name != relation.name);
		self.relations.push(relation);
		self
	}

	/// Rebuild deserialized metadata through the builder so forward
	/// relations declare their FK columns
	fn normalized(self) -> Self {
		let primary_key = self.primary_key;
		let mut meta = ModelMeta::new(self.name).primary_key(primary_key.clone());
		for column in self.columns.into_iter().filter(|c| c.name != primary_key) {
			meta.push_column(column.name, column.nullable);
		}
		self.relations.into_iter().fold(meta, ModelMeta::with_relation)
	}

	fn push_column(&mut self, name: String, nullable: bool) {
		match self.columns.iter_mut().find(|c| c.name == name) {
			Some(existing) => existing.nullable = nullable,
			None => self.columns.push(ColumnMeta { name, nullable }),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn primary_key_column(&self) -> &str {
		&self.primary_key
	}

	pub fn columns(&self) -> &[ColumnMeta] {
		&self.columns
	}

	pub fn relations(&self) -> &[RelationMeta] {
		&self.relations
	}

	pub fn column_meta(&self, name: &str) -> Option<&ColumnMeta> {
		self.columns.iter().find(|c| c.name == name)
	}

	pub fn has_column(&self, name: &str) -> bool {
		self.column_meta(name).is_some()
	}

	pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
		self.relations.iter().find(|r| r.name == name)
	}

	/// Look up a relation, failing with [`DatabaseError::UnknownRelation`]
	pub fn require_relation(&self, name: &str) -> DatabaseResult<&RelationMeta> {
		self.relation(name)
			.ok_or_else(|| DatabaseError::UnknownRelation {
				model: self.name.clone(),
				relation: name.to_string(),
			})
	}

	/// Whether `name` is either a column or a relation of this model
	pub fn has_attribute(&self, name: &str) -> bool {
		self.has_column(name) || self.relation(name).is_some()
	}
}

/// Registry of every model known to a database
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
	models: HashMap<String, Arc<ModelMeta>>,
}

impl ModelCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a model, replacing any earlier registration with the same name
	pub fn register(mut self, meta: ModelMeta) -> Self {
		self.models.insert(meta.name.clone(), Arc::new(meta));
		self
	}

	/// Load a catalog from a JSON list of model declarations
	///
	/// Omitted primary keys default to `id`; relation targets must be
	/// declared in the same list.
	///
	/// # Examples
	///
	/// ```
	/// use modelview_db::meta::ModelCatalog;
	/// use serde_json::json;
	///
	/// let catalog = ModelCatalog::from_json(json!([
	///     {"name": "Tag", "columns": [{"name": "label"}]},
	/// ]))
	/// .unwrap();
	///
	/// assert!(catalog.require("Tag").unwrap().has_column("label"));
	/// ```
	pub fn from_json(declarations: Value) -> DatabaseResult<Self> {
		let models: Vec<ModelMeta> = serde_json::from_value(declarations)
			.map_err(|e| DatabaseError::InvalidCatalog(e.to_string()))?;
		let catalog = models
			.into_iter()
			.fold(Self::new(), |catalog, meta| catalog.register(meta.normalized()));
		catalog.validate()?;
		Ok(catalog)
	}

	pub fn get(&self, name: &str) -> Option<&Arc<ModelMeta>> {
		self.models.get(name)
	}

	/// Look up a model, failing with [`DatabaseError::UnknownModel`]
	pub fn require(&self, name: &str) -> DatabaseResult<&Arc<ModelMeta>> {
		self.get(name)
			.ok_or_else(|| DatabaseError::UnknownModel(name.to_string()))
	}

	pub fn model_names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.models.keys().map(|k| k.as_str()).collect();
		names.sort_unstable();
		names
	}

	/// Check every relation points at a registered model
	pub fn validate(&self) -> DatabaseResult<()> {
		for meta in self.models.values() {
			for relation in &meta.relations {
				if !self.models.contains_key(&relation.target) {
					return Err(DatabaseError::UnknownModel(relation.target.clone()));
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn library() -> ModelCatalog {
		ModelCatalog::new()
			.register(
				ModelMeta::new("BookShelf")
					.column("name")
					.with_relation(RelationMeta::backward_foreign_key("books", "Book", "shelf_id")),
			)
			.register(
				ModelMeta::new("Book")
					.column("title")
					.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable()),
			)
	}

	#[rstest]
	fn test_forward_relation_declares_column() {
		let catalog = library();
		let book = catalog.require("Book").unwrap();

		let column = book.column_meta("shelf_id").unwrap();
		assert!(column.nullable);
		assert!(book.has_attribute("shelf"));
		assert!(book.has_attribute("title"));
		assert!(!book.has_attribute("books"));
	}

	#[rstest]
	#[case(RelationKind::ForeignKey, true, true)]
	#[case(RelationKind::OneToOne, true, true)]
	#[case(RelationKind::BackwardOneToOne, true, false)]
	#[case(RelationKind::BackwardForeignKey, false, false)]
	#[case(RelationKind::ManyToMany, false, false)]
	fn test_relation_kind_shape(
		#[case] kind: RelationKind,
		#[case] single: bool,
		#[case] forward: bool,
	) {
		assert_eq!(kind.is_single(), single);
		assert_eq!(kind.is_forward(), forward);
	}

	#[rstest]
	fn test_catalog_validate_reports_missing_target() {
		let catalog = ModelCatalog::new().register(
			ModelMeta::new("Book").with_relation(RelationMeta::foreign_key("shelf", "Shelf", "shelf_id")),
		);

		assert_eq!(
			catalog.validate(),
			Err(DatabaseError::UnknownModel("Shelf".to_string()))
		);
		assert!(library().validate().is_ok());
	}

	#[rstest]
	fn test_builder_and_lookup_share_relation_name() {
		let book = ModelMeta::new("Book")
			.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id"))
			.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable());

		assert_eq!(book.relations().len(), 1);
		assert!(book.relation("shelf").unwrap().nullable);
		assert!(book.column_meta("shelf_id").unwrap().nullable);
		assert!(book.relation("tags").is_none());
	}

	#[rstest]
	fn test_catalog_from_json_declares_fk_columns() {
		let catalog = ModelCatalog::from_json(serde_json::json!([
			{
				"name": "BookShelf",
				"columns": [{"name": "name"}],
				"relations": [
					{"name": "books", "kind": "backward_foreign_key", "target": "Book", "remote_column": "shelf_id"}
				]
			},
			{
				"name": "Book",
				"columns": [{"name": "title"}],
				"relations": [
					{"name": "shelf", "kind": "foreign_key", "target": "BookShelf", "column": "shelf_id", "nullable": true}
				]
			}
		]))
		.unwrap();

		let book = catalog.require("Book").unwrap();
		assert_eq!(book.primary_key_column(), "id");
		assert!(book.column_meta("shelf_id").unwrap().nullable);
		assert_eq!(book.relation("shelf").unwrap().kind, RelationKind::ForeignKey);
		assert_eq!(**book, **library().require("Book").unwrap());
	}

	#[rstest]
	fn test_catalog_from_json_rejects_bad_declarations() {
		let missing_target = ModelCatalog::from_json(serde_json::json!([
			{"name": "Book", "relations": [{"name": "shelf", "kind": "foreign_key", "target": "Shelf", "column": "shelf_id"}]}
		]));
		assert_eq!(missing_target.unwrap_err(), DatabaseError::UnknownModel("Shelf".to_string()));

		let malformed = ModelCatalog::from_json(serde_json::json!({"name": "Book"}));
		assert!(matches!(malformed, Err(DatabaseError::InvalidCatalog(_))));
	}

	#[rstest]
	fn test_custom_primary_key() {
		let meta = ModelMeta::new("Tag").primary_key("slug").column("label");
		assert_eq!(meta.primary_key_column(), "slug");
		assert!(meta.has_column("slug"));
		assert!(!meta.has_column("id"));
	}
}
