//! Writing instance graphs back to the database
//!
//! `create` persists rows depth-first: forward relations the parent row
//! depends on are written first, then the parent, then rows that depend on
//! the parent's identity (backward foreign keys) and many-to-many links.
//! Nested instances that already carry a primary key are linked, not
//! re-created. A top-level instance that carries a primary key is inserted
//! under that key, whether or not the class declares the key field.
//! Generated keys are written back into every instance involved.
//!
//! Read-only fields (resolver-backed, or scalars without a column) are
//! skipped by both operations, even when they hold nested values.
//!
//! `partial_update` applies only fields that were explicitly set and are not
//! `Unset`.
//!
//! Neither operation opens a transaction; wrap calls in
//! [`atomic`](modelview_db::atomic) when a multi-row write must be atomic.

use crate::error::{ConfigurationError, RelationError, SerializerError, SerializerResult, ValidationError};
use crate::fields::{FieldBinding, FieldSpec};
use crate::instance::SerializerInstance;
use crate::registry::SerializerClass;
use crate::value::FieldValue;
use futures::FutureExt;
use futures::future::BoxFuture;
use modelview_db::query::values_equal;
use modelview_db::{Database, DatabaseError, EntityRef, ModelMeta, RelationKind, RelationMeta, Row};
use serde_json::Value;
use std::sync::Arc;

fn backing_model(class: &SerializerClass) -> SerializerResult<Arc<ModelMeta>> {
	class
		.model()
		.cloned()
		.ok_or_else(|| ConfigurationError::NoBackingModel(class.name().to_string()).into())
}

fn relation_column<'r>(model: &ModelMeta, rel: &'r RelationMeta, remote: bool) -> SerializerResult<&'r str> {
	let column = if remote { &rel.remote_column } else { &rel.column };
	column.as_deref().ok_or_else(|| {
		DatabaseError::UnknownRelation {
			model: model.name().to_string(),
			relation: rel.name.clone(),
		}
		.into()
	})
}

fn nested_instances_mut(value: &mut FieldValue) -> Vec<&mut SerializerInstance> {
	match value {
		FieldValue::One(instance) => vec![instance.as_mut()],
		FieldValue::Many(items) => items.iter_mut().collect(),
		_ => Vec::new(),
	}
}

fn nested_instances(value: &FieldValue) -> Vec<&SerializerInstance> {
	match value {
		FieldValue::One(instance) => vec![instance.as_ref()],
		FieldValue::Many(items) => items.iter().collect(),
		_ => Vec::new(),
	}
}

/// Nested values of a writable relation field must be rows of its target model
fn check_nested_targets(class: &SerializerClass, spec: &FieldSpec, value: &FieldValue) -> SerializerResult<()> {
	let Some(rel) = spec.relation() else {
		return Ok(());
	};
	for child in nested_instances(value) {
		let child_model = backing_model(child.class())?;
		if child_model.name() != rel.target {
			return Err(RelationError::TargetModelMismatch {
				class: class.name().to_string(),
				field: spec.name.clone(),
				target: rel.target.clone(),
				found: child_model.name().to_string(),
			}
			.into());
		}
	}
	Ok(())
}

/// Check the whole tree before the first write
pub(crate) fn validate_for_create(instance: &SerializerInstance) -> SerializerResult<()> {
	let class = instance.class();
	backing_model(class)?;
	for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
		if !class.is_writable_field(spec, entry) {
			continue;
		}
		let value = instance.value_at(position);
		if spec.is_required() && value.is_unset() {
			return Err(ValidationError::RequiredFieldUnset {
				class: class.name().to_string(),
				field: spec.name.clone(),
			}
			.into());
		}
		check_nested_targets(class, spec, value)?;
		for child in nested_instances(value).into_iter().filter(|c| c.pk().is_none()) {
			validate_for_create(child)?;
		}
	}
	Ok(())
}

/// Record a generated key on the instance and its declared pk field
fn write_back(instance: &mut SerializerInstance, entity: &EntityRef) {
	let pk = entity.pk();
	let pk_position = instance
		.class()
		.model()
		.and_then(|m| instance.class().field_position(m.primary_key_column()));
	if let (Some(position), Some(pk)) = (pk_position, pk.clone()) {
		instance.assign(position, FieldValue::Value(pk), true);
	}
	instance.set_pk(pk);
}

/// Fetch the row a nested instance refers to, or create it
async fn link_or_create(
	db: &dyn Database,
	instance: &mut SerializerInstance,
) -> SerializerResult<EntityRef> {
	let model = backing_model(instance.class())?;
	match instance.pk().cloned() {
		Some(pk) => Ok(db.get(model.name(), &pk).await?),
		None => {
			validate_for_create(instance)?;
			create_tree(db, instance, Row::new()).await
		}
	}
}

/// Create `instance` and everything below it; `extra` adds FK columns
pub(crate) fn create_tree<'a>(
	db: &'a dyn Database,
	instance: &'a mut SerializerInstance,
	extra: Row,
) -> BoxFuture<'a, SerializerResult<EntityRef>> {
	async move {
		let class = instance.class().clone();
		let model = backing_model(&class)?;
		let mut row = extra;

		for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
			if spec.name == model.primary_key_column() {
				if let FieldValue::Value(pk) = instance.value_at(position) {
					row.insert(spec.name.clone(), pk.clone());
				}
				continue;
			}
			if !class.is_writable_field(spec, entry) {
				continue;
			}
			match &spec.binding {
				FieldBinding::Column => match instance.value_at(position) {
					FieldValue::Null => {
						row.insert(spec.name.clone(), Value::Null);
					}
					FieldValue::Value(v) => {
						row.insert(spec.name.clone(), v.clone());
					}
					_ => {}
				},
				FieldBinding::Relation(rel) if rel.kind.is_forward() => {
					let column = relation_column(&model, rel, false)?;
					match instance.value_at_mut(position) {
						FieldValue::Null => {
							row.insert(column.to_string(), Value::Null);
						}
						FieldValue::One(nested) => {
							let parent = link_or_create(db, nested).await?;
							let fk = parent
								.pk()
								.ok_or_else(|| DatabaseError::MissingPrimaryKey(rel.target.clone()))?;
							row.insert(column.to_string(), fk);
						}
						_ => {}
					}
				}
				_ => {}
			}
		}
		if !row.contains_key(model.primary_key_column())
			&& let Some(pk) = instance.pk()
		{
			row.insert(model.primary_key_column().to_string(), pk.clone());
		}

		let entity = db.create(model.name(), row).await?;
		write_back(instance, &entity);
		let parent_pk = entity
			.pk()
			.ok_or_else(|| DatabaseError::MissingPrimaryKey(model.name().to_string()))?;

		for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
			if !class.is_writable_field(spec, entry) {
				continue;
			}
			let FieldBinding::Relation(rel) = &spec.binding else {
				continue;
			};
			match rel.kind {
				RelationKind::BackwardForeignKey | RelationKind::BackwardOneToOne => {
					let remote = relation_column(&model, rel, true)?;
					for child in nested_instances_mut(instance.value_at_mut(position)) {
						attach_child(db, child, remote, &parent_pk).await?;
					}
				}
				RelationKind::ManyToMany => {
					let mut targets = Vec::new();
					for item in nested_instances_mut(instance.value_at_mut(position)) {
						targets.push(link_or_create(db, item).await?);
					}
					if !targets.is_empty() {
						db.m2m_add(&entity, &rel.name, &targets).await?;
					}
				}
				RelationKind::ForeignKey | RelationKind::OneToOne => {}
			}
		}

		tracing::debug!(
			serializer = class.name(),
			model = model.name(),
			pk = %parent_pk,
			"created row from serializer"
		);
		Ok(entity)
	}
	.boxed()
}

/// Point a child at its parent, creating the child if it has no key yet
async fn attach_child(
	db: &dyn Database,
	child: &mut SerializerInstance,
	remote: &str,
	parent_pk: &Value,
) -> SerializerResult<bool> {
	let mut link = Row::new();
	link.insert(remote.to_string(), parent_pk.clone());
	match child.pk().cloned() {
		Some(pk) => {
			let model = backing_model(child.class())?;
			let existing = db.get(model.name(), &pk).await?;
			let already = existing
				.get(remote)
				.is_some_and(|current| values_equal(&current, parent_pk));
			if !already {
				db.save(&existing, link).await?;
			}
			let patched = partial_update(db, child, &existing).await?;
			Ok(!already || patched)
		}
		None => {
			validate_for_create(child)?;
			create_tree(db, child, link).await?;
			Ok(true)
		}
	}
}

/// Apply the explicitly set fields of `instance` to `entity`
pub(crate) fn partial_update<'a>(
	db: &'a dyn Database,
	instance: &'a mut SerializerInstance,
	entity: &'a EntityRef,
) -> BoxFuture<'a, SerializerResult<bool>> {
	async move {
		let class = instance.class().clone();
		let model = backing_model(&class)?;
		if entity.model_name() != model.name() {
			return Err(ConfigurationError::InstanceClassMismatch {
				expected: model.name().to_string(),
				found: entity.model_name().to_string(),
			}
			.into());
		}

		// Relation checks before the first write
		for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
			if instance.field_state().is_set(position) && class.is_writable_field(spec, entry) {
				check_nested_targets(&class, spec, instance.value_at(position))?;
			}
		}

		let mut changes = Row::new();
		let mut changed = false;

		for (position, (spec, entry)) in class.fields().iter().zip(class.entries()).enumerate() {
			if !instance.field_state().is_set(position)
				|| instance.value_at(position).is_unset()
				|| !class.is_writable_field(spec, entry)
			{
				continue;
			}

			match &spec.binding {
				FieldBinding::Column => {
					let new_value = match instance.value_at(position) {
						FieldValue::Null => Value::Null,
						FieldValue::Value(v) => v.clone(),
						_ => continue,
					};
					let same = entity
						.get(&spec.name)
						.is_some_and(|current| values_equal(&current, &new_value));
					if !same {
						changes.insert(spec.name.clone(), new_value);
					}
				}
				FieldBinding::Relation(rel) if rel.kind.is_forward() => {
					let column = relation_column(&model, rel, false)?;
					let current_fk = entity.get(column).filter(|v| !v.is_null());
					match instance.value_at_mut(position) {
						FieldValue::Null => {
							if current_fk.is_some() {
								changes.insert(column.to_string(), Value::Null);
							}
						}
						FieldValue::One(nested) => {
							let nested: &mut SerializerInstance = nested;
							changed |= update_forward(db, entity, rel, column, current_fk, nested, &mut changes).await?;
						}
						_ => {}
					}
				}
				FieldBinding::Relation(rel) if rel.kind.is_backward() => {
					let remote = relation_column(&model, rel, true)?;
					let parent_pk = entity
						.pk()
						.ok_or_else(|| DatabaseError::MissingPrimaryKey(model.name().to_string()))?;
					let existing = entity.fetch_related(&rel.name).await?.entities();
					let mut touched = false;
					for child in nested_instances_mut(instance.value_at_mut(position)) {
						let current = child.pk().and_then(|pk| {
							existing
								.iter()
								.find(|e| e.pk().is_some_and(|p| values_equal(&p, pk)))
								.cloned()
						});
						touched |= match current {
							Some(current) => partial_update(db, child, &current).await?,
							None => attach_child(db, child, remote, &parent_pk).await?,
						};
					}
					if touched {
						entity.invalidate_related(&rel.name);
						changed = true;
					}
				}
				FieldBinding::Relation(rel) => {
					changed |= update_many_to_many(db, entity, rel, instance.value_at_mut(position)).await?;
				}
				FieldBinding::Unbound => {}
			}
		}

		if !changes.is_empty() {
			tracing::debug!(
				serializer = class.name(),
				model = model.name(),
				columns = ?changes.keys().collect::<Vec<_>>(),
				"applying partial update"
			);
			db.save(entity, changes).await?;
			changed = true;
		}
		if instance.pk().is_none() {
			instance.set_pk(entity.pk());
		}
		Ok(changed)
	}
	.boxed()
}

async fn update_forward(
	db: &dyn Database,
	entity: &EntityRef,
	rel: &RelationMeta,
	column: &str,
	current_fk: Option<Value>,
	nested: &mut SerializerInstance,
	changes: &mut Row,
) -> SerializerResult<bool> {
	match nested.pk().cloned() {
		// Same row: patch it in place
		Some(pk) if current_fk.as_ref().is_some_and(|fk| values_equal(fk, &pk)) => {
			let current = db.get(&rel.target, &pk).await?;
			partial_update(db, nested, &current).await
		}
		// Different row: re-point the foreign key
		Some(pk) => {
			let target = db.get(&rel.target, &pk).await?;
			let patched = partial_update(db, nested, &target).await?;
			changes.insert(column.to_string(), pk);
			Ok(patched)
		}
		None => match entity.fetch_related(&rel.name).await?.entities().into_iter().next() {
			Some(current) => partial_update(db, nested, &current).await,
			None => {
				validate_for_create(nested)?;
				let created = create_tree(db, nested, Row::new()).await?;
				let fk = created
					.pk()
					.ok_or_else(|| DatabaseError::MissingPrimaryKey(rel.target.clone()))?;
				changes.insert(column.to_string(), fk);
				Ok(true)
			}
		},
	}
}

/// Set semantics: the payload becomes the full association list
async fn update_many_to_many(
	db: &dyn Database,
	entity: &EntityRef,
	rel: &RelationMeta,
	value: &mut FieldValue,
) -> SerializerResult<bool> {
	let mut changed = false;
	let mut desired: Vec<EntityRef> = Vec::new();
	for item in nested_instances_mut(value) {
		match item.pk().cloned() {
			Some(pk) => {
				let target = db.get(&rel.target, &pk).await?;
				changed |= partial_update(db, item, &target).await?;
				desired.push(target);
			}
			None => {
				validate_for_create(item)?;
				desired.push(create_tree(db, item, Row::new()).await?);
			}
		}
	}

	let current = entity.fetch_related(&rel.name).await?.entities();
	let contains = |list: &[EntityRef], e: &EntityRef| {
		let pk = e.pk();
		list.iter().any(|x| match (x.pk(), &pk) {
			(Some(a), Some(b)) => values_equal(&a, b),
			_ => false,
		})
	};
	let to_add: Vec<EntityRef> = desired.iter().filter(|e| !contains(&current, *e)).cloned().collect();
	let to_remove: Vec<EntityRef> = current.iter().filter(|e| !contains(&desired, *e)).cloned().collect();

	if !to_remove.is_empty() {
		db.m2m_remove(entity, &rel.name, &to_remove).await?;
	}
	if !to_add.is_empty() {
		db.m2m_add(entity, &rel.name, &to_add).await?;
	}
	Ok(changed || !to_add.is_empty() || !to_remove.is_empty())
}

/// Reject writes of an instance through a serializer of another class
pub(crate) fn ensure_class(class: &SerializerClass, instance: &SerializerInstance) -> SerializerResult<()> {
	if instance.class_name() != class.name() {
		return Err(SerializerError::from(ConfigurationError::InstanceClassMismatch {
			expected: class.name().to_string(),
			found: instance.class_name().to_string(),
		}));
	}
	Ok(())
}
