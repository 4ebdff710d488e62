//! Serializer declaration and registry
//!
//! Serializers are declared with [`SerializerBuilder`] and collected by a
//! [`RegistryBuilder`]. Nested fields refer to other serializers by name, so
//! classes may reference themselves or each other. [`RegistryBuilder::build`]
//! then, for every class:
//!
//! 1. merges the `extends` chain (base fields first, most-derived wins),
//! 2. resolves nested references and introspects the field table,
//! 3. builds the resolver table (explicit, then `resolve_<field>` methods,
//!    then default attribute access) and attaches guards,
//! 4. checks writable classes against their backing model.
//!
//! The resulting [`SerializerRegistry`] is immutable and `Send + Sync`.

use crate::context::Context;
use crate::error::{ConfigurationError, SerializerError, SerializerResult};
use crate::fields::{ClassId, FieldBinding, FieldDecl, FieldSpec, TypeDescriptor, introspect};
use crate::guard::Guard;
use crate::resolver::{Resolved, Resolver, ResolverEntry, ResolverKind};
use crate::serializer::Serializer;
use crate::settings::SerializerSettings;
use modelview_db::{EntityRef, ModelCatalog, ModelMeta};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

const CONVENTION_PREFIX: &str = "resolve_";

/// Declaration of one serializer class
///
/// # Examples
///
/// ```
/// use modelview_serializers::{Guard, Resolved, SerializerBuilder, TypeDescriptor};
/// use serde_json::json;
///
/// let book = SerializerBuilder::new("BookSerializer")
///     .model("Book")
///     .field("id", TypeDescriptor::int().optional())
///     .field("title", TypeDescriptor::string())
///     .field("shelf", TypeDescriptor::nested("BookShelfSerializer").optional())
///     .field("price", TypeDescriptor::float().optional())
///     .method("resolve_price", |_entity, _ctx| async { Ok(Resolved::from(json!(9.5))) })
///     .guard("price", Guard::permission("view_price"));
/// assert_eq!(book.name(), "BookSerializer");
/// ```
#[derive(Clone)]
pub struct SerializerBuilder {
	name: String,
	model: Option<String>,
	extends: Option<String>,
	fields: Vec<FieldDecl>,
	resolvers: Vec<(String, Resolver)>,
	methods: Vec<(String, Resolver)>,
	guards: Vec<(String, Guard)>,
}

impl SerializerBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			model: None,
			extends: None,
			fields: Vec::new(),
			resolvers: Vec::new(),
			methods: Vec::new(),
			guards: Vec::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Back this serializer with a model, enabling writes
	pub fn model(mut self, model: impl Into<String>) -> Self {
		self.model = Some(model.into());
		self
	}

	/// Inherit fields, resolvers, guards and backing model from `base`
	pub fn extends(mut self, base: impl Into<String>) -> Self {
		self.extends = Some(base.into());
		self
	}

	/// Declare a field; redeclaring replaces the type but keeps the position
	pub fn field(self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
		self.push_field(name.into(), ty, None)
	}

	pub fn field_with_default(self, name: impl Into<String>, ty: TypeDescriptor, default: Value) -> Self {
		self.push_field(name.into(), ty, Some(default))
	}

	fn push_field(mut self, name: String, ty: TypeDescriptor, default: Option<Value>) -> Self {
		let decl = FieldDecl { name, ty, default };
		merge_field(&mut self.fields, decl);
		self
	}

	/// Register an explicit resolver; the last registration for a field wins
	pub fn resolver<F, Fut>(self, field: impl Into<String>, f: F) -> Self
	where
		F: Fn(EntityRef, Context) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = SerializerResult<Resolved>> + Send + 'static,
	{
		self.resolver_with(field, Resolver::new(f))
	}

	pub fn resolver_sync<F>(self, field: impl Into<String>, f: F) -> Self
	where
		F: Fn(&EntityRef, &Context) -> SerializerResult<Resolved> + Send + Sync + 'static,
	{
		self.resolver_with(field, Resolver::from_sync(f))
	}

	/// Register a prebuilt [`Resolver`], e.g. one wrapped by [`ensure_fetched`](crate::ensure_fetched)
	pub fn resolver_with(mut self, field: impl Into<String>, resolver: Resolver) -> Self {
		let field = field.into();
		self.resolvers.retain(|(f, _)| *f != field);
		self.resolvers.push((field, resolver));
		self
	}

	/// Register a resolver together with a guard
	pub fn guarded_resolver<F, Fut>(self, field: impl Into<String>, guard: Guard, f: F) -> Self
	where
		F: Fn(EntityRef, Context) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = SerializerResult<Resolved>> + Send + 'static,
	{
		let field = field.into();
		self.resolver(field.clone(), f).guard(field, guard)
	}

	/// Add a named method
	///
	/// Methods called `resolve_<field>` become convention resolvers for a
	/// declared `<field>`; others are ignored by the resolver table.
	pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(EntityRef, Context) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = SerializerResult<Resolved>> + Send + 'static,
	{
		let name = name.into();
		self.methods.retain(|(m, _)| *m != name);
		self.methods.push((name, Resolver::new(f)));
		self
	}

	/// Attach a guard to a field, whatever its resolver kind
	pub fn guard(mut self, field: impl Into<String>, guard: Guard) -> Self {
		let field = field.into();
		self.guards.retain(|(f, _)| *f != field);
		self.guards.push((field, guard));
		self
	}

	/// Overlay `self` on top of an already merged base declaration
	fn merged_over(&self, base: &SerializerBuilder) -> SerializerBuilder {
		let mut merged = base.clone();
		merged.name = self.name.clone();
		merged.extends = self.extends.clone();
		if self.model.is_some() {
			merged.model = self.model.clone();
		}
		for decl in &self.fields {
			merge_field(&mut merged.fields, decl.clone());
		}
		for (field, resolver) in &self.resolvers {
			merged = merged.resolver_with(field.clone(), resolver.clone());
		}
		for (name, method) in &self.methods {
			merged.methods.retain(|(m, _)| m != name);
			merged.methods.push((name.clone(), method.clone()));
		}
		for (field, guard) in &self.guards {
			merged = merged.guard(field.clone(), guard.clone());
		}
		merged
	}
}

impl fmt::Debug for SerializerBuilder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SerializerBuilder")
			.field("name", &self.name)
			.field("model", &self.model)
			.field("extends", &self.extends)
			.field("fields", &self.fields.iter().map(|d| &d.name).collect::<Vec<_>>())
			.finish()
	}
}

fn merge_field(fields: &mut Vec<FieldDecl>, decl: FieldDecl) {
	match fields.iter_mut().find(|d| d.name == decl.name) {
		Some(existing) => *existing = decl,
		None => fields.push(decl),
	}
}

/// A built serializer class: field table plus resolver table
pub struct SerializerClass {
	id: ClassId,
	name: String,
	base: Option<String>,
	model: Option<Arc<ModelMeta>>,
	fields: Vec<FieldSpec>,
	positions: HashMap<String, usize>,
	entries: Vec<ResolverEntry>,
	methods: HashMap<String, Resolver>,
	strict_types: bool,
	pub(crate) prefetch_plan: OnceCell<Vec<String>>,
	pub(crate) field_paths: OnceCell<Vec<String>>,
}

impl fmt::Debug for SerializerClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SerializerClass")
			.field("name", &self.name)
			.field("model", &self.model.as_ref().map(|m| m.name()))
			.field("fields", &self.field_names())
			.finish()
	}
}

impl SerializerClass {
	pub fn id(&self) -> ClassId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn base(&self) -> Option<&str> {
		self.base.as_deref()
	}

	/// Backing model, present for writable serializers
	pub fn model(&self) -> Option<&Arc<ModelMeta>> {
		self.model.as_ref()
	}

	pub fn fields(&self) -> &[FieldSpec] {
		&self.fields
	}

	pub fn field(&self, name: &str) -> Option<&FieldSpec> {
		self.field_position(name).map(|i| &self.fields[i])
	}

	pub fn field_position(&self, name: &str) -> Option<usize> {
		self.positions.get(name).copied()
	}

	/// Declared field names in declaration order
	pub fn field_names(&self) -> Vec<&str> {
		self.fields.iter().map(|f| f.name.as_str()).collect()
	}

	pub fn is_nested(&self, name: &str) -> bool {
		self.field(name).is_some_and(FieldSpec::is_nested)
	}

	/// Fields that must be supplied when creating a row
	pub fn required_fields(&self) -> Vec<&str> {
		self.fields
			.iter()
			.zip(&self.entries)
			.filter(|(spec, entry)| spec.is_required() && self.is_writable_field(spec, entry))
			.map(|(spec, _)| spec.name.as_str())
			.collect()
	}

	pub fn entries(&self) -> &[ResolverEntry] {
		&self.entries
	}

	pub fn resolver_entry(&self, field: &str) -> Option<&ResolverEntry> {
		self.field_position(field).map(|i| &self.entries[i])
	}

	/// Named method, convention-matched or not
	pub fn method(&self, name: &str) -> Option<&Resolver> {
		self.methods.get(name)
	}

	pub fn strict_types(&self) -> bool {
		self.strict_types
	}

	/// Whether the writer persists this field
	///
	/// Resolver-backed fields are read-only, as are scalars without a
	/// backing column and the primary key column.
	pub(crate) fn is_writable_field(&self, spec: &FieldSpec, entry: &ResolverEntry) -> bool {
		if !entry.is_default() {
			return false;
		}
		match &spec.binding {
			FieldBinding::Column => self
				.model
				.as_ref()
				.is_some_and(|m| m.primary_key_column() != spec.name),
			FieldBinding::Relation(_) => true,
			FieldBinding::Unbound => false,
		}
	}
}

/// Collects serializer declarations and builds a [`SerializerRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
	declarations: Vec<SerializerBuilder>,
	catalog: ModelCatalog,
	settings: SerializerSettings,
}

impl RegistryBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Models writable serializers may be backed by
	pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
		self.catalog = catalog;
		self
	}

	pub fn settings(mut self, settings: SerializerSettings) -> Self {
		self.settings = settings;
		self
	}

	pub fn register(mut self, serializer: SerializerBuilder) -> Self {
		self.declarations.push(serializer);
		self
	}

	pub fn build(self) -> SerializerResult<SerializerRegistry> {
		let mut index: HashMap<String, ClassId> = HashMap::new();
		for (id, decl) in self.declarations.iter().enumerate() {
			if index.insert(decl.name.clone(), id).is_some() {
				return Err(ConfigurationError::DuplicateSerializer(decl.name.clone()).into());
			}
		}

		let mut classes = Vec::with_capacity(self.declarations.len());
		for (id, decl) in self.declarations.iter().enumerate() {
			let merged = resolve_inheritance(&self.declarations, &index, decl)?;
			let class = build_class(id, &merged, &index, &self.catalog, &self.settings)?;
			tracing::debug!(
				serializer = class.name(),
				fields = class.fields().len(),
				writable = class.model().is_some(),
				"serializer class built"
			);
			classes.push(Arc::new(class));
		}

		Ok(SerializerRegistry {
			classes,
			index,
			catalog: self.catalog,
			settings: self.settings,
		})
	}
}

fn resolve_inheritance(
	declarations: &[SerializerBuilder],
	index: &HashMap<String, ClassId>,
	decl: &SerializerBuilder,
) -> SerializerResult<SerializerBuilder> {
	// Collect the chain from most-derived to root
	let mut chain = vec![decl];
	let mut seen: HashSet<&str> = HashSet::from([decl.name.as_str()]);
	let mut current = decl;
	while let Some(base) = &current.extends {
		let base_id = index
			.get(base)
			.copied()
			.ok_or_else(|| ConfigurationError::UnknownBaseSerializer {
				class: current.name.clone(),
				base: base.clone(),
			})?;
		let base_decl = &declarations[base_id];
		if !seen.insert(base_decl.name.as_str()) {
			return Err(ConfigurationError::InheritanceCycle(decl.name.clone()).into());
		}
		chain.push(base_decl);
		current = base_decl;
	}

	let mut chain = chain.into_iter().rev();
	let Some(root) = chain.next() else {
		return Ok(decl.clone());
	};
	let mut merged = root.clone();
	for derived in chain {
		merged = derived.merged_over(&merged);
	}
	Ok(merged)
}

fn build_class(
	id: ClassId,
	decl: &SerializerBuilder,
	index: &HashMap<String, ClassId>,
	catalog: &ModelCatalog,
	settings: &SerializerSettings,
) -> SerializerResult<SerializerClass> {
	let model = match &decl.model {
		Some(model) => Some(
			catalog
				.get(model)
				.cloned()
				.ok_or_else(|| ConfigurationError::UnknownModel {
					class: decl.name.clone(),
					model: model.clone(),
				})?,
		),
		None => None,
	};

	let fields = introspect(&decl.name, &decl.fields, index, model.as_deref())?;
	let positions: HashMap<String, usize> = fields
		.iter()
		.enumerate()
		.map(|(i, f)| (f.name.clone(), i))
		.collect();

	for field in decl
		.resolvers
		.iter()
		.map(|(f, _)| f)
		.chain(decl.guards.iter().map(|(f, _)| f))
	{
		if !positions.contains_key(field) {
			return Err(ConfigurationError::UndeclaredField {
				class: decl.name.clone(),
				field: field.clone(),
			}
			.into());
		}
	}

	let methods: HashMap<String, Resolver> = decl.methods.iter().cloned().collect();
	let explicit: HashMap<&str, &Resolver> = decl.resolvers.iter().map(|(f, r)| (f.as_str(), r)).collect();
	let guards: HashMap<&str, &Guard> = decl.guards.iter().map(|(f, g)| (f.as_str(), g)).collect();

	let mut entries = Vec::with_capacity(fields.len());
	for spec in &fields {
		let convention = methods.get(&format!("{CONVENTION_PREFIX}{}", spec.name));
		let (kind, resolver) = match (explicit.get(spec.name.as_str()), convention) {
			(Some(resolver), _) => (ResolverKind::Explicit, Some((*resolver).clone())),
			(None, Some(method)) => (ResolverKind::Convention, Some(method.clone())),
			(None, None) => (ResolverKind::Default, None),
		};

		if kind == ResolverKind::Default
			&& spec.binding == FieldBinding::Unbound
			&& let Some(meta) = &model
		{
			return Err(ConfigurationError::UnknownAttribute {
				class: decl.name.clone(),
				field: spec.name.clone(),
				model: meta.name().to_string(),
			}
			.into());
		}

		entries.push(ResolverEntry {
			field: spec.name.clone(),
			kind,
			resolver,
			guard: guards.get(spec.name.as_str()).map(|g| (*g).clone()),
		});
	}

	Ok(SerializerClass {
		id,
		name: decl.name.clone(),
		base: decl.extends.clone(),
		model,
		fields,
		positions,
		entries,
		methods,
		strict_types: settings.strict_types,
		prefetch_plan: OnceCell::new(),
		field_paths: OnceCell::new(),
	})
}

/// Immutable set of built serializer classes
///
/// # Examples
///
/// ```
/// use modelview_serializers::{SerializerBuilder, SerializerRegistry, TypeDescriptor};
///
/// let registry = SerializerRegistry::builder()
///     .register(
///         SerializerBuilder::new("NodeSerializer")
///             .field("name", TypeDescriptor::string())
///             .field("children", TypeDescriptor::nested("NodeSerializer").list()),
///     )
///     .build()
///     .unwrap();
///
/// let node = registry.serializer("NodeSerializer").unwrap();
/// assert_eq!(node.field_names(), vec!["name", "children"]);
/// assert!(node.is_nested("children"));
/// ```
pub struct SerializerRegistry {
	classes: Vec<Arc<SerializerClass>>,
	index: HashMap<String, ClassId>,
	catalog: ModelCatalog,
	settings: SerializerSettings,
}

impl fmt::Debug for SerializerRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SerializerRegistry")
			.field("classes", &self.classes.iter().map(|c| c.name()).collect::<Vec<_>>())
			.field("settings", &self.settings)
			.finish()
	}
}

impl SerializerRegistry {
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::new()
	}

	/// Handle for one serializer class
	pub fn serializer(&self, name: &str) -> SerializerResult<Serializer<'_>> {
		let id = self
			.index
			.get(name)
			.copied()
			.ok_or_else(|| ConfigurationError::UnknownSerializer(name.to_string()))?;
		Ok(Serializer::new(self, &self.classes[id]))
	}

	pub fn class(&self, name: &str) -> Option<&Arc<SerializerClass>> {
		self.index.get(name).map(|id| &self.classes[*id])
	}

	pub(crate) fn class_by_id(&self, id: ClassId) -> SerializerResult<&Arc<SerializerClass>> {
		self.classes
			.get(id)
			.ok_or_else(|| SerializerError::from(ConfigurationError::UnknownSerializer(format!("#{id}"))))
	}

	/// Registered serializer names in declaration order
	pub fn names(&self) -> Vec<&str> {
		self.classes.iter().map(|c| c.name()).collect()
	}

	pub fn catalog(&self) -> &ModelCatalog {
		&self.catalog
	}

	pub fn settings(&self) -> &SerializerSettings {
		&self.settings
	}
}
