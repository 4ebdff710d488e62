//! In-memory database
//!
//! A complete [`Database`] implementation backed by ordered in-process
//! tables. Rows are kept in primary-key order, which is the storage order
//! every unordered fetch and collection relation follows. Integer primary keys
//! are generated when a row is created without one.
//!
//! Every read round trip (fetch, count, relation load, prefetch segment)
//! increments a counter so tests can assert that bulk loading keeps query
//! counts flat.
//!
//! # Examples
//!
//! ```
//! use modelview_db::memory::MemoryDatabase;
//! use modelview_db::meta::{ModelCatalog, ModelMeta, RelationMeta};
//! use modelview_db::{Database, Query};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), modelview_db::DatabaseError> {
//! let db = MemoryDatabase::new(
//!     ModelCatalog::new()
//!         .register(ModelMeta::new("BookShelf").column("name"))
//!         .register(
//!             ModelMeta::new("Book")
//!                 .column("title")
//!                 .with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable()),
//!         ),
//! );
//!
//! let shelf = db.insert("BookShelf", json!({"name": "fantasy"})).await?;
//! db.insert("Book", json!({"title": "LOTR", "shelf_id": shelf.pk()})).await?;
//!
//! let books = db.fetch(&Query::new("Book").prefetch_related(&["shelf"])).await?;
//! assert_eq!(books.len(), 1);
//! assert_eq!(db.query_count(), 2);
//! # Ok(())
//! # }
//! ```

use crate::database::Database;
use crate::entity::{Entity, EntityRef, Related, Row};
use crate::error::{DatabaseError, DatabaseResult};
use crate::meta::{ModelCatalog, ModelMeta, RelationKind, RelationMeta};
use crate::query::{compare_values, values_equal, Query};
use crate::transaction::TransactionScope;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Table key; integers sort before strings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum PkKey {
	Int(i64),
	Str(String),
}

impl PkKey {
	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Number(n) => n.as_i64().map(PkKey::Int),
			Value::String(s) => Some(PkKey::Str(s.clone())),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Default)]
struct Store {
	tables: HashMap<String, BTreeMap<PkKey, Row>>,
	sequences: HashMap<String, i64>,
	junctions: HashMap<String, Vec<Row>>,
}

struct Shared {
	catalog: ModelCatalog,
	store: RwLock<Store>,
	queries: AtomicUsize,
	writes: AtomicUsize,
}

impl Shared {
	fn count_query(&self) {
		self.queries.fetch_add(1, AtomicOrdering::SeqCst);
	}

	fn count_write(&self) {
		self.writes.fetch_add(1, AtomicOrdering::SeqCst);
	}
}

/// In-memory [`Database`]
#[derive(Clone)]
pub struct MemoryDatabase {
	shared: Arc<Shared>,
}

impl fmt::Debug for MemoryDatabase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryDatabase")
			.field("models", &self.shared.catalog.model_names())
			.field("queries", &self.query_count())
			.finish()
	}
}

impl MemoryDatabase {
	/// Create an empty database for the given models
	pub fn new(catalog: ModelCatalog) -> Self {
		Self {
			shared: Arc::new(Shared {
				catalog,
				store: RwLock::new(Store::default()),
				queries: AtomicUsize::new(0),
				writes: AtomicUsize::new(0),
			}),
		}
	}

	/// Number of read round trips since creation or the last reset
	pub fn query_count(&self) -> usize {
		self.shared.queries.load(AtomicOrdering::SeqCst)
	}

	/// Number of write round trips since creation or the last reset
	pub fn write_count(&self) -> usize {
		self.shared.writes.load(AtomicOrdering::SeqCst)
	}

	pub fn reset_query_count(&self) {
		self.shared.queries.store(0, AtomicOrdering::SeqCst);
		self.shared.writes.store(0, AtomicOrdering::SeqCst);
	}

	/// Number of stored rows for a model
	pub fn row_count(&self, model: &str) -> usize {
		self.shared
			.store
			.read()
			.tables
			.get(model)
			.map(|t| t.len())
			.unwrap_or(0)
	}

	/// Convenience wrapper over [`Database::create`] taking a JSON object
	pub async fn insert(&self, model: &str, values: Value) -> DatabaseResult<EntityRef> {
		let row = match values {
			Value::Object(map) => map,
			other => {
				return Err(DatabaseError::Query(format!(
					"expected a JSON object for {model}, got {other}"
				)));
			}
		};
		self.create(model, row).await
	}
}

/// Row handle produced by [`MemoryDatabase`]
pub struct MemoryEntity {
	meta: Arc<ModelMeta>,
	row: RwLock<Row>,
	cache: RwLock<HashMap<String, Related>>,
	shared: Arc<Shared>,
}

impl fmt::Debug for MemoryEntity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryEntity")
			.field("model", &self.meta.name())
			.field("row", &*self.row.read())
			.finish()
	}
}

#[async_trait]
impl Entity for MemoryEntity {
	fn meta(&self) -> &Arc<ModelMeta> {
		&self.meta
	}

	fn get(&self, attribute: &str) -> Option<Value> {
		self.row.read().get(attribute).cloned()
	}

	fn values(&self) -> Row {
		self.row.read().clone()
	}

	fn apply(&self, changes: &Row) {
		let mut row = self.row.write();
		for (key, value) in changes {
			row.insert(key.clone(), value.clone());
		}
		drop(row);

		// Forward relations whose FK changed are stale now
		let mut cache = self.cache.write();
		for relation in self.meta.relations() {
			if relation.kind.is_forward()
				&& let Some(column) = &relation.column
				&& changes.contains_key(column)
			{
				cache.remove(&relation.name);
			}
		}
	}

	fn cached_related(&self, relation: &str) -> Option<Related> {
		self.cache.read().get(relation).cloned()
	}

	fn set_related_cache(&self, relation: &str, related: Related) {
		self.cache.write().insert(relation.to_string(), related);
	}

	fn invalidate_related(&self, relation: &str) {
		self.cache.write().remove(relation);
	}

	async fn fetch_related(&self, relation: &str) -> DatabaseResult<Related> {
		if let Some(related) = self.cached_related(relation) {
			return Ok(related);
		}
		tracing::trace!(model = self.meta.name(), relation, "loading relation");
		let mut loaded = load_relation(&self.shared, &self.meta, &[self as &dyn Entity], relation)?;
		let related = loaded.pop().unwrap_or(Related::Many(Vec::new()));
		self.set_related_cache(relation, related.clone());
		Ok(related)
	}
}

fn make_entity(shared: &Arc<Shared>, meta: &Arc<ModelMeta>, row: Row) -> EntityRef {
	Arc::new(MemoryEntity {
		meta: meta.clone(),
		row: RwLock::new(row),
		cache: RwLock::new(HashMap::new()),
		shared: shared.clone(),
	})
}

fn pk_key_of(entity: &dyn Entity) -> Option<PkKey> {
	entity.pk().as_ref().and_then(PkKey::from_value)
}

/// Load one relation for several parents of the same model in one round trip
fn load_relation(
	shared: &Arc<Shared>,
	meta: &Arc<ModelMeta>,
	parents: &[&dyn Entity],
	relation: &str,
) -> DatabaseResult<Vec<Related>> {
	let rel = meta.require_relation(relation)?.clone();
	let target = shared.catalog.require(&rel.target)?.clone();
	shared.count_query();

	let store = shared.store.read();
	let empty = BTreeMap::new();
	let table = store.tables.get(target.name()).unwrap_or(&empty);

	let related: Vec<Related> = match rel.kind {
		RelationKind::ForeignKey | RelationKind::OneToOne => {
			let column = forward_column(meta, &rel)?;
			let mut built: HashMap<PkKey, EntityRef> = HashMap::new();
			parents
				.iter()
				.map(|parent| {
					let key = parent.get(column).as_ref().and_then(PkKey::from_value);
					let entity = key.and_then(|key| {
						if let Some(existing) = built.get(&key) {
							return Some(existing.clone());
						}
						let row = table.get(&key)?.clone();
						let entity = make_entity(shared, &target, row);
						built.insert(key, entity.clone());
						Some(entity)
					});
					Related::One(entity)
				})
				.collect()
		}
		RelationKind::BackwardForeignKey | RelationKind::BackwardOneToOne => {
			let remote = remote_column(meta, &rel)?;
			let mut grouped: HashMap<PkKey, Vec<EntityRef>> = HashMap::new();
			let wanted: HashSet<PkKey> = parents.iter().filter_map(|p| pk_key_of(*p)).collect();
			for row in table.values() {
				if let Some(key) = row.get(remote).and_then(PkKey::from_value)
					&& wanted.contains(&key)
				{
					grouped
						.entry(key)
						.or_default()
						.push(make_entity(shared, &target, row.clone()));
				}
			}
			parents
				.iter()
				.map(|parent| {
					let children = pk_key_of(*parent)
						.and_then(|key| grouped.get(&key).cloned())
						.unwrap_or_default();
					if rel.kind == RelationKind::BackwardOneToOne {
						Related::One(children.into_iter().next())
					} else {
						Related::Many(children)
					}
				})
				.collect()
		}
		RelationKind::ManyToMany => {
			let (through, column, remote) = junction(meta, &rel)?;
			let links = store.junctions.get(through).cloned().unwrap_or_default();
			let mut built: HashMap<PkKey, EntityRef> = HashMap::new();
			parents
				.iter()
				.map(|parent| {
					let Some(source) = parent.pk() else {
						return Related::Many(Vec::new());
					};
					let mut keys: Vec<PkKey> = links
						.iter()
						.filter(|link| link.get(column).is_some_and(|v| values_equal(v, &source)))
						.filter_map(|link| link.get(remote).and_then(PkKey::from_value))
						.collect();
					keys.sort();
					keys.dedup();
					let items = keys
						.into_iter()
						.filter_map(|key| {
							if let Some(existing) = built.get(&key) {
								return Some(existing.clone());
							}
							let row = table.get(&key)?.clone();
							let entity = make_entity(shared, &target, row);
							built.insert(key, entity.clone());
							Some(entity)
						})
						.collect();
					Related::Many(items)
				})
				.collect()
		}
	};

	Ok(related)
}

fn forward_column<'a>(meta: &ModelMeta, rel: &'a RelationMeta) -> DatabaseResult<&'a str> {
	rel.column.as_deref().ok_or_else(|| DatabaseError::UnknownRelation {
		model: meta.name().to_string(),
		relation: rel.name.clone(),
	})
}

fn remote_column<'a>(meta: &ModelMeta, rel: &'a RelationMeta) -> DatabaseResult<&'a str> {
	rel.remote_column
		.as_deref()
		.ok_or_else(|| DatabaseError::UnknownRelation {
			model: meta.name().to_string(),
			relation: rel.name.clone(),
		})
}

fn junction<'a>(
	meta: &ModelMeta,
	rel: &'a RelationMeta,
) -> DatabaseResult<(&'a str, &'a str, &'a str)> {
	match (&rel.through, &rel.column, &rel.remote_column) {
		(Some(through), Some(column), Some(remote)) => Ok((through, column, remote)),
		_ => Err(DatabaseError::UnsupportedRelationOperation {
			model: meta.name().to_string(),
			relation: rel.name.clone(),
			operation: "junction access",
		}),
	}
}

/// Columns and joined relations to materialize for each fetched row
#[derive(Debug, Default)]
struct JoinTree {
	/// `None` loads every column
	columns: Option<Vec<String>>,
	children: BTreeMap<String, JoinTree>,
}

impl JoinTree {
	fn from_query(query: &Query) -> Self {
		let mut tree = JoinTree::default();
		for path in query.select_related_paths() {
			tree.insert_relation(path.split('.'));
		}
		if query.is_projection() {
			tree.project(query.only_fields().iter().map(|f| f.as_str()));
		}
		tree
	}

	fn insert_relation<'a>(&mut self, mut segments: impl Iterator<Item = &'a str>) {
		if let Some(first) = segments.next() {
			self.children
				.entry(first.to_string())
				.or_default()
				.insert_relation(segments);
		}
	}

	fn project<'a>(&mut self, fields: impl Iterator<Item = &'a str>) {
		let mut local = Vec::new();
		let mut nested: BTreeMap<String, Vec<&'a str>> = BTreeMap::new();
		for field in fields {
			match field.split_once('.') {
				Some((relation, rest)) => nested.entry(relation.to_string()).or_default().push(rest),
				None => local.push(field.to_string()),
			}
		}
		self.columns = Some(local);
		for (relation, rest) in nested {
			self.children
				.entry(relation)
				.or_default()
				.project(rest.into_iter());
		}
	}
}

/// Resolve a `__`-separated filter path against a stored row
fn resolve_path(
	store: &Store,
	catalog: &ModelCatalog,
	meta: &ModelMeta,
	row: &Row,
	path: &str,
) -> DatabaseResult<Option<Value>> {
	let (head, rest) = match path.split_once("__") {
		Some((head, rest)) => (head, Some(rest)),
		None => (path, None),
	};
	match rest {
		None if meta.has_column(head) => Ok(row.get(head).cloned()),
		None => match meta.relation(head) {
			// Filtering on a forward relation compares its FK
			Some(rel) if rel.kind.is_forward() => {
				Ok(row.get(forward_column(meta, rel)?).cloned())
			}
			_ => Err(DatabaseError::UnknownColumn {
				model: meta.name().to_string(),
				column: head.to_string(),
			}),
		},
		Some(rest) => {
			let rel = meta.require_relation(head)?;
			if !rel.kind.is_forward() {
				return Err(DatabaseError::Query(format!(
					"filter path '{path}' traverses non-forward relation '{head}'"
				)));
			}
			let target = catalog.require(&rel.target)?;
			let key = row
				.get(forward_column(meta, rel)?)
				.and_then(PkKey::from_value);
			let Some(related) = key.and_then(|k| store.tables.get(target.name())?.get(&k)) else {
				return Ok(None);
			};
			resolve_path(store, catalog, target, related, rest)
		}
	}
}

/// Build an entity for `row`, projecting columns and joining single relations
fn build_joined(
	shared: &Arc<Shared>,
	store: &Store,
	meta: &Arc<ModelMeta>,
	row: &Row,
	tree: &JoinTree,
) -> DatabaseResult<EntityRef> {
	let mut projected = match &tree.columns {
		None => row.clone(),
		Some(columns) => {
			let mut out = Row::new();
			let pk = meta.primary_key_column();
			out.insert(pk.to_string(), row.get(pk).cloned().unwrap_or(Value::Null));
			for column in columns {
				if !meta.has_column(column) {
					return Err(DatabaseError::UnknownColumn {
						model: meta.name().to_string(),
						column: column.clone(),
					});
				}
				out.insert(column.clone(), row.get(column).cloned().unwrap_or(Value::Null));
			}
			out
		}
	};

	let mut joined = Vec::new();
	for (relation, subtree) in &tree.children {
		let rel = meta.require_relation(relation)?;
		if !rel.kind.is_single() {
			return Err(DatabaseError::Query(format!(
				"cannot join collection relation '{}.{}' into a flat row",
				meta.name(),
				relation
			)));
		}
		let target = shared.catalog.require(&rel.target)?.clone();
		let empty = BTreeMap::new();
		let target_table = store.tables.get(target.name()).unwrap_or(&empty);
		let related_row = if rel.kind.is_forward() {
			let column = forward_column(meta, rel)?;
			if let Some(fk) = row.get(column) {
				projected.insert(column.to_string(), fk.clone());
			}
			row.get(column)
				.and_then(PkKey::from_value)
				.and_then(|key| target_table.get(&key))
		} else {
			let remote = remote_column(meta, rel)?;
			let pk = row.get(meta.primary_key_column()).cloned().unwrap_or(Value::Null);
			target_table
				.values()
				.find(|r| r.get(remote).is_some_and(|v| values_equal(v, &pk)))
		};
		let entity = match related_row {
			Some(r) => Some(build_joined(shared, store, &target, r, subtree)?),
			None => None,
		};
		joined.push((relation.clone(), Related::One(entity)));
	}

	let entity = make_entity(shared, meta, projected);
	for (relation, related) in joined {
		entity.set_related_cache(&relation, related);
	}
	Ok(entity)
}

fn matching_rows(
	shared: &Shared,
	store: &Store,
	meta: &ModelMeta,
	query: &Query,
) -> DatabaseResult<Vec<Row>> {
	let empty = BTreeMap::new();
	let table = store.tables.get(meta.name()).unwrap_or(&empty);

	let mut rows = Vec::new();
	for row in table.values() {
		let mut keep = true;
		for filter in query.filters() {
			let actual = resolve_path(store, &shared.catalog, meta, row, &filter.field)?;
			if !filter.matches(actual.as_ref()) {
				keep = false;
				break;
			}
		}
		if keep {
			rows.push(row.clone());
		}
	}

	if !query.ordering().is_empty() {
		let mut keyed = Vec::with_capacity(rows.len());
		for row in rows {
			let mut keys = Vec::with_capacity(query.ordering().len());
			for order in query.ordering() {
				keys.push(
					resolve_path(store, &shared.catalog, meta, &row, &order.field)?
						.unwrap_or(Value::Null),
				);
			}
			keyed.push((keys, row));
		}
		keyed.sort_by(|(a, _), (b, _)| {
			for (idx, order) in query.ordering().iter().enumerate() {
				let ord = compare_values(&a[idx], &b[idx]).unwrap_or(Ordering::Equal);
				let ord = if order.descending { ord.reverse() } else { ord };
				if ord != Ordering::Equal {
					return ord;
				}
			}
			Ordering::Equal
		});
		rows = keyed.into_iter().map(|(_, row)| row).collect();
	}

	if let Some(limit) = query.limit_value() {
		rows.truncate(limit);
	}
	Ok(rows)
}

fn check_row(
	store: &Store,
	meta: &ModelMeta,
	values: &Row,
	creating: bool,
) -> DatabaseResult<()> {
	for key in values.keys() {
		if !meta.has_column(key) {
			return Err(DatabaseError::UnknownColumn {
				model: meta.name().to_string(),
				column: key.clone(),
			});
		}
	}
	for column in meta.columns() {
		if column.nullable || column.name == meta.primary_key_column() {
			continue;
		}
		let value = values.get(&column.name);
		let violates = match value {
			Some(Value::Null) => true,
			None => creating,
			Some(_) => false,
		};
		if violates {
			return Err(DatabaseError::Constraint {
				model: meta.name().to_string(),
				column: column.name.clone(),
				message: "NOT NULL constraint failed".to_string(),
			});
		}
	}
	for rel in meta.relations().iter().filter(|r| r.kind.is_forward()) {
		let column = forward_column(meta, rel)?;
		let Some(value) = values.get(column).filter(|v| !v.is_null()) else {
			continue;
		};
		let exists = PkKey::from_value(value)
			.and_then(|key| store.tables.get(&rel.target)?.get(&key))
			.is_some();
		if !exists {
			return Err(DatabaseError::Constraint {
				model: meta.name().to_string(),
				column: column.to_string(),
				message: format!("FOREIGN KEY constraint failed: no {} with pk={}", rel.target, value),
			});
		}
	}
	Ok(())
}

#[async_trait]
impl Database for MemoryDatabase {
	fn catalog(&self) -> &ModelCatalog {
		&self.shared.catalog
	}

	async fn fetch(&self, query: &Query) -> DatabaseResult<Vec<EntityRef>> {
		let meta = self.shared.catalog.require(query.model())?.clone();
		let tree = JoinTree::from_query(query);
		let entities = {
			let store = self.shared.store.read();
			let rows = matching_rows(&self.shared, &store, &meta, query)?;
			self.shared.count_query();
			rows.iter()
				.map(|row| build_joined(&self.shared, &store, &meta, row, &tree))
				.collect::<DatabaseResult<Vec<_>>>()?
		};
		tracing::debug!(
			model = query.model(),
			rows = entities.len(),
			projection = query.is_projection(),
			"fetched rows"
		);

		if !query.prefetch_paths().is_empty() {
			self.prefetch(&entities, query.prefetch_paths()).await?;
		}
		Ok(entities)
	}

	async fn count(&self, query: &Query) -> DatabaseResult<usize> {
		let meta = self.shared.catalog.require(query.model())?.clone();
		let store = self.shared.store.read();
		let rows = matching_rows(&self.shared, &store, &meta, query)?;
		self.shared.count_query();
		Ok(rows.len())
	}

	async fn get(&self, model: &str, pk: &Value) -> DatabaseResult<EntityRef> {
		let meta = self.shared.catalog.require(model)?.clone();
		let query = Query::new(model).eq(meta.primary_key_column(), pk.clone());
		self.fetch(&query)
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| DatabaseError::NotFound {
				model: model.to_string(),
				pk: pk.to_string(),
			})
	}

	async fn prefetch(&self, entities: &[EntityRef], paths: &[String]) -> DatabaseResult<()> {
		for path in paths {
			let mut level: Vec<EntityRef> = entities.to_vec();
			for segment in path.split('.') {
				// Group by model so each group costs one round trip
				let mut groups: BTreeMap<String, Vec<EntityRef>> = BTreeMap::new();
				for entity in &level {
					groups
						.entry(entity.model_name().to_string())
						.or_default()
						.push(entity.clone());
				}

				let mut next: Vec<EntityRef> = Vec::new();
				let mut seen: HashSet<usize> = HashSet::new();
				for (model, group) in groups {
					let meta = self.shared.catalog.require(&model)?.clone();
					let missing: Vec<&dyn Entity> = group
						.iter()
						.filter(|e| e.cached_related(segment).is_none())
						.map(|e| &**e)
						.collect();
					if !missing.is_empty() {
						let loaded = load_relation(&self.shared, &meta, &missing, segment)?;
						for (entity, related) in missing.iter().zip(loaded) {
							entity.set_related_cache(segment, related);
						}
					}
					for entity in &group {
						if let Some(related) = entity.cached_related(segment) {
							for child in related.entities() {
								let ptr = Arc::as_ptr(&child) as *const () as usize;
								if seen.insert(ptr) {
									next.push(child);
								}
							}
						}
					}
				}
				tracing::trace!(path = path.as_str(), segment, loaded = next.len(), "prefetched segment");
				level = next;
				if level.is_empty() {
					break;
				}
			}
		}
		Ok(())
	}

	async fn create(&self, model: &str, values: Row) -> DatabaseResult<EntityRef> {
		let meta = self.shared.catalog.require(model)?.clone();
		let pk_column = meta.primary_key_column().to_string();
		let row = {
			let mut store = self.shared.store.write();
			check_row(&store, &meta, &values, true)?;

			let mut row = Row::new();
			for column in meta.columns() {
				row.insert(
					column.name.clone(),
					values.get(&column.name).cloned().unwrap_or(Value::Null),
				);
			}

			let key = match row.get(&pk_column).and_then(PkKey::from_value) {
				Some(key) => key,
				None => {
					let table_max = store
						.tables
						.get(model)
						.and_then(|t| t.keys().rev().find_map(|k| match k {
							PkKey::Int(i) => Some(*i),
							PkKey::Str(_) => None,
						}))
						.unwrap_or(0);
					let seq = store.sequences.entry(model.to_string()).or_insert(0);
					*seq = (*seq).max(table_max) + 1;
					row.insert(pk_column.clone(), Value::from(*seq));
					PkKey::Int(*seq)
				}
			};

			let table = store.tables.entry(model.to_string()).or_default();
			if table.contains_key(&key) {
				return Err(DatabaseError::Constraint {
					model: model.to_string(),
					column: pk_column,
					message: "UNIQUE constraint failed".to_string(),
				});
			}
			table.insert(key, row.clone());
			row
		};
		self.shared.count_write();
		tracing::debug!(model, pk = ?row.get(&pk_column), "created row");
		Ok(make_entity(&self.shared, &meta, row))
	}

	async fn save(&self, entity: &EntityRef, changes: Row) -> DatabaseResult<()> {
		let meta = entity.meta().clone();
		let key = pk_key_of(entity.as_ref())
			.ok_or_else(|| DatabaseError::MissingPrimaryKey(meta.name().to_string()))?;
		{
			let mut store = self.shared.store.write();
			check_row(&store, &meta, &changes, false)?;
			let row = store
				.tables
				.get_mut(meta.name())
				.and_then(|t| t.get_mut(&key))
				.ok_or_else(|| DatabaseError::NotFound {
					model: meta.name().to_string(),
					pk: format!("{key:?}"),
				})?;
			for (column, value) in &changes {
				row.insert(column.clone(), value.clone());
			}
		}
		self.shared.count_write();
		entity.apply(&changes);
		tracing::debug!(model = meta.name(), columns = changes.len(), "saved row");
		Ok(())
	}

	async fn m2m_add(
		&self,
		entity: &EntityRef,
		relation: &str,
		targets: &[EntityRef],
	) -> DatabaseResult<()> {
		let meta = entity.meta().clone();
		let rel = m2m_relation(&meta, relation, "m2m_add")?;
		let (through, column, remote) = junction(&meta, &rel)?;
		let source = entity
			.pk()
			.ok_or_else(|| DatabaseError::MissingPrimaryKey(meta.name().to_string()))?;
		{
			let mut store = self.shared.store.write();
			let links = store.junctions.entry(through.to_string()).or_default();
			for target in targets {
				let target_pk = target
					.pk()
					.ok_or_else(|| DatabaseError::MissingPrimaryKey(rel.target.clone()))?;
				let exists = links.iter().any(|link| {
					link.get(column).is_some_and(|v| values_equal(v, &source))
						&& link.get(remote).is_some_and(|v| values_equal(v, &target_pk))
				});
				if !exists {
					let mut link = Row::new();
					link.insert(column.to_string(), source.clone());
					link.insert(remote.to_string(), target_pk);
					links.push(link);
				}
			}
		}
		self.shared.count_write();
		entity.invalidate_related(relation);
		Ok(())
	}

	async fn m2m_remove(
		&self,
		entity: &EntityRef,
		relation: &str,
		targets: &[EntityRef],
	) -> DatabaseResult<()> {
		let meta = entity.meta().clone();
		let rel = m2m_relation(&meta, relation, "m2m_remove")?;
		let (through, column, remote) = junction(&meta, &rel)?;
		let source = entity
			.pk()
			.ok_or_else(|| DatabaseError::MissingPrimaryKey(meta.name().to_string()))?;
		let target_pks: Vec<Value> = targets.iter().filter_map(|t| t.pk()).collect();
		{
			let mut store = self.shared.store.write();
			if let Some(links) = store.junctions.get_mut(through) {
				links.retain(|link| {
					let same_source = link.get(column).is_some_and(|v| values_equal(v, &source));
					let targeted = link
						.get(remote)
						.is_some_and(|v| target_pks.iter().any(|t| values_equal(v, t)));
					!(same_source && targeted)
				});
			}
		}
		self.shared.count_write();
		entity.invalidate_related(relation);
		Ok(())
	}

	async fn begin(&self) -> DatabaseResult<Box<dyn TransactionScope>> {
		let snapshot = self.shared.store.read().clone();
		tracing::debug!("transaction started");
		Ok(Box::new(MemoryTransaction {
			shared: self.shared.clone(),
			snapshot: Some(snapshot),
		}))
	}
}

fn m2m_relation(
	meta: &ModelMeta,
	relation: &str,
	operation: &'static str,
) -> DatabaseResult<RelationMeta> {
	let rel = meta.require_relation(relation)?;
	if rel.kind != RelationKind::ManyToMany {
		return Err(DatabaseError::UnsupportedRelationOperation {
			model: meta.name().to_string(),
			relation: relation.to_string(),
			operation,
		});
	}
	Ok(rel.clone())
}

/// Snapshot-based transaction; rolls back on drop unless committed
struct MemoryTransaction {
	shared: Arc<Shared>,
	snapshot: Option<Store>,
}

impl MemoryTransaction {
	fn restore(&mut self) {
		if let Some(snapshot) = self.snapshot.take() {
			*self.shared.store.write() = snapshot;
			tracing::debug!("transaction rolled back");
		}
	}
}

#[async_trait]
impl TransactionScope for MemoryTransaction {
	async fn commit(mut self: Box<Self>) -> DatabaseResult<()> {
		if self.snapshot.take().is_none() {
			return Err(DatabaseError::Transaction("transaction already finished".to_string()));
		}
		tracing::debug!("transaction committed");
		Ok(())
	}

	async fn rollback(mut self: Box<Self>) -> DatabaseResult<()> {
		if self.snapshot.is_none() {
			return Err(DatabaseError::Transaction("transaction already finished".to_string()));
		}
		self.restore();
		Ok(())
	}
}

impl Drop for MemoryTransaction {
	fn drop(&mut self) {
		self.restore();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::RelationMeta;
	use crate::query::FilterOperator;
	use rstest::{fixture, rstest};
	use serde_json::json;

	#[fixture]
	fn db() -> MemoryDatabase {
		MemoryDatabase::new(
			ModelCatalog::new()
				.register(
					ModelMeta::new("BookShelf")
						.column("name")
						.with_relation(RelationMeta::backward_foreign_key("books", "Book", "shelf_id")),
				)
				.register(
					ModelMeta::new("Book")
						.column("title")
						.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable())
						.with_relation(RelationMeta::many_to_many("tags", "Tag", "book_tags", "book_id", "tag_id")),
				)
				.register(ModelMeta::new("Tag").column("name")),
		)
	}

	#[rstest]
	#[tokio::test]
	async fn test_create_assigns_sequential_keys(db: MemoryDatabase) {
		let a = db.insert("Tag", json!({"name": "a"})).await.unwrap();
		let b = db.insert("Tag", json!({"name": "b"})).await.unwrap();

		assert_eq!(a.pk(), Some(json!(1)));
		assert_eq!(b.pk(), Some(json!(2)));
		assert_eq!(db.row_count("Tag"), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_create_rejects_missing_required_column(db: MemoryDatabase) {
		let err = db.insert("Book", json!({})).await.unwrap_err();
		assert!(matches!(err, DatabaseError::Constraint { ref column, .. } if column == "title"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_create_rejects_dangling_foreign_key(db: MemoryDatabase) {
		let err = db
			.insert("Book", json!({"title": "x", "shelf_id": 99}))
			.await
			.unwrap_err();
		assert!(matches!(err, DatabaseError::Constraint { ref column, .. } if column == "shelf_id"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_fetch_filters_across_relation_and_orders(db: MemoryDatabase) {
		let fantasy = db.insert("BookShelf", json!({"name": "fantasy"})).await.unwrap();
		let other = db.insert("BookShelf", json!({"name": "other"})).await.unwrap();
		db.insert("Book", json!({"title": "B", "shelf_id": fantasy.pk()})).await.unwrap();
		db.insert("Book", json!({"title": "A", "shelf_id": fantasy.pk()})).await.unwrap();
		db.insert("Book", json!({"title": "C", "shelf_id": other.pk()})).await.unwrap();

		let books = db
			.fetch(
				&Query::new("Book")
					.filter("shelf__name", FilterOperator::Eq, json!("fantasy"))
					.order_by(&["-title"]),
			)
			.await
			.unwrap();

		let titles: Vec<Value> = books.iter().map(|b| b.get("title").unwrap()).collect();
		assert_eq!(titles, vec![json!("B"), json!("A")]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_prefetch_costs_one_query_per_segment(db: MemoryDatabase) {
		let shelf = db.insert("BookShelf", json!({"name": "s"})).await.unwrap();
		for i in 0..5 {
			db.insert("Book", json!({"title": format!("b{i}"), "shelf_id": shelf.pk()}))
				.await
				.unwrap();
		}
		db.reset_query_count();

		let books = db
			.fetch(&Query::new("Book").prefetch_related(&["shelf", "shelf.books"]))
			.await
			.unwrap();
		assert_eq!(db.query_count(), 3);

		for book in &books {
			let Related::One(Some(shelf)) = book.fetch_related("shelf").await.unwrap() else {
				panic!("shelf should be prefetched");
			};
			assert_eq!(shelf.fetch_related("books").await.unwrap().len(), 5);
		}
		assert_eq!(db.query_count(), 3);
	}

	#[rstest]
	#[tokio::test]
	async fn test_projection_with_joined_relation(db: MemoryDatabase) {
		let shelf = db.insert("BookShelf", json!({"name": "s"})).await.unwrap();
		db.insert("Book", json!({"title": "t", "shelf_id": shelf.pk()})).await.unwrap();
		db.reset_query_count();

		let books = db
			.fetch(&Query::new("Book").only(&["title", "shelf.name"]))
			.await
			.unwrap();
		assert_eq!(db.query_count(), 1);

		let book = &books[0];
		assert_eq!(book.get("title"), Some(json!("t")));
		let Some(Related::One(Some(joined))) = book.cached_related("shelf") else {
			panic!("shelf should be joined");
		};
		assert_eq!(joined.get("name"), Some(json!("s")));
	}

	#[rstest]
	#[tokio::test]
	async fn test_projection_rejects_collection(db: MemoryDatabase) {
		db.insert("BookShelf", json!({"name": "s"})).await.unwrap();
		let err = db
			.fetch(&Query::new("BookShelf").only(&["name", "books.title"]))
			.await
			.unwrap_err();
		assert!(matches!(err, DatabaseError::Query(_)));
	}

	#[rstest]
	#[tokio::test]
	async fn test_m2m_add_and_remove(db: MemoryDatabase) {
		let book = db.insert("Book", json!({"title": "t"})).await.unwrap();
		let rust = db.insert("Tag", json!({"name": "rust"})).await.unwrap();
		let web = db.insert("Tag", json!({"name": "web"})).await.unwrap();

		db.m2m_add(&book, "tags", &[web.clone(), rust.clone(), rust.clone()])
			.await
			.unwrap();
		let tags = book.fetch_related("tags").await.unwrap();
		let names: Vec<Value> = tags.entities().iter().map(|t| t.get("name").unwrap()).collect();
		assert_eq!(names, vec![json!("rust"), json!("web")]);

		db.m2m_remove(&book, "tags", &[rust]).await.unwrap();
		assert_eq!(book.fetch_related("tags").await.unwrap().len(), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_dropped_transaction_rolls_back(db: MemoryDatabase) {
		{
			let _scope = db.begin().await.unwrap();
			db.insert("Tag", json!({"name": "temp"})).await.unwrap();
			assert_eq!(db.row_count("Tag"), 1);
		}
		assert_eq!(db.row_count("Tag"), 0);

		let scope = db.begin().await.unwrap();
		db.insert("Tag", json!({"name": "kept"})).await.unwrap();
		scope.commit().await.unwrap();
		assert_eq!(db.row_count("Tag"), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_save_updates_store_and_entity(db: MemoryDatabase) {
		let tag = db.insert("Tag", json!({"name": "old"})).await.unwrap();
		let mut changes = Row::new();
		changes.insert("name".to_string(), json!("new"));
		db.save(&tag, changes).await.unwrap();

		assert_eq!(tag.get("name"), Some(json!("new")));
		let reloaded = db.get("Tag", &tag.pk().unwrap()).await.unwrap();
		assert_eq!(reloaded.get("name"), Some(json!("new")));
	}
}
