//! Field resolvers
//!
//! A [`Resolver`] turns a source entity into the raw value of one field. The
//! materializer then shapes that raw value: related entities are converted
//! through the field's nested serializer, scalars are type checked.
//!
//! Resolvers receive owned handles (`EntityRef`, [`Context`]) so the
//! returned future is `'static` and `Send`.

use crate::context::Context;
use crate::error::SerializerResult;
use crate::guard::Guard;
use crate::instance::SerializerInstance;
use futures::FutureExt;
use futures::future::BoxFuture;
use modelview_db::{EntityRef, Related};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Raw result of a resolver
#[derive(Debug, Clone)]
pub enum Resolved {
	Unset,
	Null,
	Scalar(Value),
	/// Related entity, materialized through the nested serializer
	Entity(EntityRef),
	/// Related collection, materialized through the nested serializer
	Entities(Vec<EntityRef>),
	/// Already materialized nested instance
	Instance(SerializerInstance),
	Instances(Vec<SerializerInstance>),
}

impl From<Value> for Resolved {
	fn from(value: Value) -> Self {
		if value.is_null() {
			Resolved::Null
		} else {
			Resolved::Scalar(value)
		}
	}
}

impl From<Option<Value>> for Resolved {
	fn from(value: Option<Value>) -> Self {
		value.map(Resolved::from).unwrap_or(Resolved::Null)
	}
}

impl From<EntityRef> for Resolved {
	fn from(entity: EntityRef) -> Self {
		Resolved::Entity(entity)
	}
}

impl From<Option<EntityRef>> for Resolved {
	fn from(entity: Option<EntityRef>) -> Self {
		entity.map(Resolved::Entity).unwrap_or(Resolved::Null)
	}
}

impl From<Vec<EntityRef>> for Resolved {
	fn from(entities: Vec<EntityRef>) -> Self {
		Resolved::Entities(entities)
	}
}

impl From<Related> for Resolved {
	fn from(related: Related) -> Self {
		match related {
			Related::One(entity) => entity.into(),
			Related::Many(entities) => Resolved::Entities(entities),
		}
	}
}

impl From<SerializerInstance> for Resolved {
	fn from(instance: SerializerInstance) -> Self {
		Resolved::Instance(instance)
	}
}

impl From<Vec<SerializerInstance>> for Resolved {
	fn from(instances: Vec<SerializerInstance>) -> Self {
		Resolved::Instances(instances)
	}
}

type ResolverFn = dyn Fn(EntityRef, Context) -> BoxFuture<'static, SerializerResult<Resolved>> + Send + Sync;

/// Callable producing a field value
///
/// # Examples
///
/// ```
/// use modelview_serializers::{Resolved, Resolver};
/// use serde_json::json;
///
/// let upper = Resolver::from_sync(|entity, _ctx| {
///     let title = entity.get("title").and_then(|t| t.as_str().map(str::to_uppercase));
///     Ok(Resolved::from(title.map(|t| json!(t))))
/// });
/// # let _ = upper;
/// ```
#[derive(Clone)]
pub struct Resolver {
	func: Arc<ResolverFn>,
}

impl Resolver {
	/// Wrap a suspending resolver
	pub fn new<F, Fut>(f: F) -> Self
	where
		F: Fn(EntityRef, Context) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = SerializerResult<Resolved>> + Send + 'static,
	{
		Self {
			func: Arc::new(move |entity, ctx| f(entity, ctx).boxed()),
		}
	}

	/// Wrap a synchronous resolver
	pub fn from_sync<F>(f: F) -> Self
	where
		F: Fn(&EntityRef, &Context) -> SerializerResult<Resolved> + Send + Sync + 'static,
	{
		Self {
			func: Arc::new(move |entity, ctx| {
				let result = f(&entity, &ctx);
				futures::future::ready(result).boxed()
			}),
		}
	}

	pub async fn call(&self, entity: EntityRef, context: Context) -> SerializerResult<Resolved> {
		(self.func)(entity, context).await
	}
}

impl fmt::Debug for Resolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Resolver")
	}
}

/// Load `relations` on the entity before running `resolver`
///
/// A no-op for relations that were already prefetched.
///
/// # Examples
///
/// ```
/// use modelview_serializers::{Resolved, Resolver, ensure_fetched};
///
/// let children = ensure_fetched(
///     &["children"],
///     Resolver::from_sync(|entity, _ctx| {
///         let loaded = entity.cached_related("children");
///         Ok(loaded.map(|r| r.entities().into_iter().take(1).collect::<Vec<_>>().into()).unwrap_or(Resolved::Null))
///     }),
/// );
/// # let _ = children;
/// ```
pub fn ensure_fetched(relations: &[&str], resolver: Resolver) -> Resolver {
	let relations: Arc<Vec<String>> = Arc::new(relations.iter().map(|r| r.to_string()).collect());
	Resolver::new(move |entity: EntityRef, ctx: Context| {
		let relations = relations.clone();
		let resolver = resolver.clone();
		async move {
			let names: Vec<&str> = relations.iter().map(String::as_str).collect();
			entity.ensure_fetched(&names).await?;
			resolver.call(entity, ctx).await
		}
	})
}

/// How a field's resolver was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
	/// Registered for the field by name
	Explicit,
	/// A `resolve_<field>` method
	Convention,
	/// Read the same-named attribute or relation off the entity
	Default,
}

/// Resolver table entry for one field
#[derive(Debug, Clone)]
pub struct ResolverEntry {
	pub field: String,
	pub kind: ResolverKind,
	/// `None` for [`ResolverKind::Default`]
	pub resolver: Option<Resolver>,
	pub guard: Option<Guard>,
}

impl ResolverEntry {
	pub fn is_default(&self) -> bool {
		self.kind == ResolverKind::Default
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use modelview_db::memory::MemoryDatabase;
	use modelview_db::{ModelCatalog, ModelMeta, RelationMeta};
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	#[case(json!(null), true)]
	#[case(json!(3), false)]
	fn test_resolved_from_value(#[case] value: Value, #[case] is_null: bool) {
		assert_eq!(matches!(Resolved::from(value), Resolved::Null), is_null);
	}

	#[rstest]
	#[tokio::test]
	async fn test_sync_resolver_sees_context() {
		let db = MemoryDatabase::new(ModelCatalog::new().register(ModelMeta::new("Tag").column("name")));
		let tag = db.insert("Tag", json!({"name": "rust"})).await.unwrap();
		let resolver = Resolver::from_sync(|_, ctx| Ok(Resolved::from(ctx.get("lang").cloned())));

		let resolved = resolver
			.call(tag, Context::new().with("lang", json!("en")))
			.await
			.unwrap();

		assert!(matches!(resolved, Resolved::Scalar(v) if v == json!("en")));
	}

	#[rstest]
	#[tokio::test]
	async fn test_ensure_fetched_loads_once() {
		let db = MemoryDatabase::new(
			ModelCatalog::new().register(
				ModelMeta::new("Node")
					.column("name")
					.with_relation(RelationMeta::foreign_key("parent", "Node", "parent_id").nullable())
					.with_relation(RelationMeta::backward_foreign_key("children", "Node", "parent_id")),
			),
		);
		let root = db.insert("Node", json!({"name": "root"})).await.unwrap();
		db.insert("Node", json!({"name": "a", "parent_id": root.pk()})).await.unwrap();
		db.reset_query_count();

		let resolver = ensure_fetched(
			&["children"],
			Resolver::from_sync(|entity, _| {
				Ok(Resolved::from(json!(entity.cached_related("children").map(|r| r.len()))))
			}),
		);

		let first = resolver.call(root.clone(), Context::new()).await.unwrap();
		resolver.call(root, Context::new()).await.unwrap();

		assert!(matches!(first, Resolved::Scalar(v) if v == json!(1)));
		assert_eq!(db.query_count(), 1);
	}
}
