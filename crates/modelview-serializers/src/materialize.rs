//! Instance materialization
//!
//! Runs each field's resolver against a source entity and shapes the result
//! into a [`SerializerInstance`], recursing through nested serializers.
//! Fields of one instance are resolved in declaration order; independent
//! top-level entities fan out concurrently up to `settings.fan_out`.

use crate::context::Context;
use crate::error::{ConfigurationError, SerializerError, SerializerResult, ValidationError};
use crate::fields::{FieldKind, FieldSpec};
use crate::instance::{SerializerInstance, check_value};
use crate::registry::{SerializerClass, SerializerRegistry};
use crate::resolver::{Resolved, ResolverKind};
use crate::value::FieldValue;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use modelview_db::{EntityRef, Related};
use std::sync::Arc;

/// Materialize one entity at the given nesting depth
pub(crate) fn materialize_one<'a>(
	registry: &'a SerializerRegistry,
	class: &'a Arc<SerializerClass>,
	entity: EntityRef,
	context: &'a Context,
	depth: usize,
) -> BoxFuture<'a, SerializerResult<SerializerInstance>> {
	async move {
		let max_depth = registry.settings().max_depth;
		if depth > max_depth {
			return Err(SerializerError::DepthExceeded {
				class: class.name().to_string(),
				max_depth,
			});
		}

		let mut instance = SerializerInstance::empty(class.clone());
		for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
			if let Some(guard) = &entry.guard
				&& !guard.check(&entity, context)
			{
				tracing::trace!(
					serializer = class.name(),
					field = spec.name.as_str(),
					guard = guard.label(),
					"guard denied field"
				);
				continue;
			}

			let resolved = match (&entry.kind, &entry.resolver) {
				(ResolverKind::Explicit | ResolverKind::Convention, Some(resolver)) => {
					resolver.call(entity.clone(), context.clone()).await?
				}
				_ => resolve_default(class, spec, &entity).await?,
			};

			let value = shape(registry, class, spec, resolved, context, depth).await?;
			let set = !value.is_unset();
			instance.assign(position, value, set);
		}
		instance.set_pk(entity.pk());
		Ok(instance)
	}
	.boxed()
}

/// Materialize entities in input order, fanning out concurrently
pub(crate) async fn materialize_many(
	registry: &SerializerRegistry,
	class: &Arc<SerializerClass>,
	entities: &[EntityRef],
	context: &Context,
) -> SerializerResult<Vec<SerializerInstance>> {
	let fan_out = registry.settings().fan_out.max(1);
	futures::stream::iter(
		entities
			.iter()
			.cloned()
			.map(|entity| materialize_one(registry, class, entity, context, 0)),
	)
	.buffered(fan_out)
	.try_collect()
	.await
}

/// Read the same-named attribute, or load the same-named relation
async fn resolve_default(
	class: &SerializerClass,
	spec: &FieldSpec,
	entity: &EntityRef,
) -> SerializerResult<Resolved> {
	let meta = entity.meta();
	if spec.is_nested() || (meta.relation(&spec.name).is_some() && !meta.has_column(&spec.name)) {
		if meta.relation(&spec.name).is_none() {
			return Err(missing_attribute(class, spec, entity));
		}
		let related = entity.fetch_related(&spec.name).await?;
		return Ok(match related {
			Related::One(one) => one.into(),
			Related::Many(many) => Resolved::Entities(many),
		});
	}

	match entity.get(&spec.name) {
		Some(value) => Ok(value.into()),
		// Known column that was not loaded (projection)
		None if meta.has_column(&spec.name) => Ok(Resolved::Unset),
		None => Err(missing_attribute(class, spec, entity)),
	}
}

fn missing_attribute(class: &SerializerClass, spec: &FieldSpec, entity: &EntityRef) -> SerializerError {
	ConfigurationError::UnknownAttribute {
		class: class.name().to_string(),
		field: spec.name.clone(),
		model: entity.model_name().to_string(),
	}
	.into()
}

/// Turn a raw resolver result into a field value matching the declaration
async fn shape(
	registry: &SerializerRegistry,
	class: &Arc<SerializerClass>,
	spec: &FieldSpec,
	resolved: Resolved,
	context: &Context,
	depth: usize,
) -> SerializerResult<FieldValue> {
	let value = match (&spec.kind, resolved) {
		(_, Resolved::Unset) => FieldValue::Unset,
		(_, Resolved::Null) => FieldValue::Null,
		(_, Resolved::Scalar(value)) => FieldValue::Value(value),
		(FieldKind::Nested { class: nested, .. }, Resolved::Entity(entity)) if !spec.list => {
			let nested = registry.class_by_id(*nested)?;
			FieldValue::One(Box::new(
				materialize_one(registry, nested, entity, context, depth + 1).await?,
			))
		}
		(FieldKind::Nested { class: nested, .. }, Resolved::Entities(entities)) if spec.list => {
			let nested = registry.class_by_id(*nested)?;
			let mut items = Vec::with_capacity(entities.len());
			for entity in entities {
				items.push(materialize_one(registry, nested, entity, context, depth + 1).await?);
			}
			FieldValue::Many(items)
		}
		(_, Resolved::Instance(instance)) => FieldValue::One(Box::new(instance)),
		(_, Resolved::Instances(instances)) => FieldValue::Many(instances),
		(_, Resolved::Entity(_)) => {
			return Err(shape_mismatch(class, spec, "a related entity"));
		}
		(_, Resolved::Entities(_)) => {
			return Err(shape_mismatch(class, spec, "a related collection"));
		}
	};

	check_value(class, spec, &value)?;
	Ok(value)
}

fn shape_mismatch(class: &SerializerClass, spec: &FieldSpec, found: &str) -> SerializerError {
	let expected = match &spec.kind {
		FieldKind::Scalar(scalar) => scalar.name().to_string(),
		FieldKind::Nested { serializer, .. } if spec.list => format!("list of {serializer}"),
		FieldKind::Nested { serializer, .. } => format!("instance of {serializer}"),
	};
	ValidationError::TypeMismatch {
		class: class.name().to_string(),
		field: spec.name.clone(),
		expected,
		found: found.to_string(),
	}
	.into()
}
