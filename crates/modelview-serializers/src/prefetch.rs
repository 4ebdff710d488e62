//! Prefetch planning
//!
//! Both plans are pure functions of the class graph and are cached on the
//! class after the first computation.

use crate::error::{ConfigurationError, SerializerResult};
use crate::fields::{ClassId, FieldBinding, FieldSpec};
use crate::registry::{SerializerClass, SerializerRegistry};
use crate::resolver::ResolverEntry;

/// Ordered, deduplicated relation paths to load before bulk resolution
///
/// Depth-first over default-resolved nested fields. A class already on the
/// current walk path is not entered again, but the path reaching it is still
/// emitted once.
pub(crate) fn prefetch_plan<'r>(registry: &'r SerializerRegistry, class: &'r SerializerClass) -> &'r [String] {
	class.prefetch_plan.get_or_init(|| {
		let mut out = Vec::new();
		let mut stack = vec![class.id()];
		walk_relations(registry, class, "", &mut stack, &mut out);
		tracing::trace!(serializer = class.name(), paths = ?out, "prefetch plan computed");
		out
	})
}

fn is_genuine_relation(class: &SerializerClass, spec: &FieldSpec, entry: &ResolverEntry) -> bool {
	if !spec.is_nested() || !entry.is_default() {
		return false;
	}
	match class.model() {
		Some(_) => matches!(spec.binding, FieldBinding::Relation(_)),
		None => true,
	}
}

fn join(prefix: &str, name: &str) -> String {
	if prefix.is_empty() {
		name.to_string()
	} else {
		format!("{prefix}.{name}")
	}
}

fn walk_relations(
	registry: &SerializerRegistry,
	class: &SerializerClass,
	prefix: &str,
	stack: &mut Vec<ClassId>,
	out: &mut Vec<String>,
) {
	for (spec, entry) in class.fields().iter().zip(class.entries()) {
		if !is_genuine_relation(class, spec, entry) {
			continue;
		}
		let path = join(prefix, &spec.name);
		if !out.contains(&path) {
			out.push(path.clone());
		}
		let Some(nested_id) = spec.nested_class() else {
			continue;
		};
		if stack.contains(&nested_id) {
			continue;
		}
		let Ok(nested) = registry.class_by_id(nested_id) else {
			continue;
		};
		stack.push(nested_id);
		walk_relations(registry, nested, &path, stack, out);
		stack.pop();
	}
}

/// Backing-entity field paths implied by the schema
///
/// Default-resolved scalars appear as `name`, nested relations recursively as
/// `relation.field`. Collection relations are listed too; see
/// [`projection`] for the select-only variant that rejects them.
pub(crate) fn model_field_paths<'r>(
	registry: &'r SerializerRegistry,
	class: &'r SerializerClass,
) -> &'r [String] {
	class.field_paths.get_or_init(|| {
		let mut out = Vec::new();
		let mut stack = vec![class.id()];
		let mut collections = Vec::new();
		walk_fields(registry, class, "", &mut stack, &mut out, &mut collections);
		out
	})
}

/// Column projection for select-only loading
pub(crate) fn projection(
	registry: &SerializerRegistry,
	class: &SerializerClass,
) -> SerializerResult<Vec<String>> {
	let mut out = Vec::new();
	let mut stack = vec![class.id()];
	let mut collections = Vec::new();
	walk_fields(registry, class, "", &mut stack, &mut out, &mut collections);
	if let Some(path) = collections.into_iter().next() {
		return Err(ConfigurationError::SelectOnlyCollection {
			class: class.name().to_string(),
			path,
		}
		.into());
	}
	Ok(out)
}

fn walk_fields(
	registry: &SerializerRegistry,
	class: &SerializerClass,
	prefix: &str,
	stack: &mut Vec<ClassId>,
	out: &mut Vec<String>,
	collections: &mut Vec<String>,
) {
	for (spec, entry) in class.fields().iter().zip(class.entries()) {
		if !entry.is_default() {
			continue;
		}
		if !spec.is_nested() {
			let is_column = match class.model() {
				Some(_) => spec.binding == FieldBinding::Column,
				None => true,
			};
			if is_column {
				out.push(join(prefix, &spec.name));
			}
			continue;
		}
		if !is_genuine_relation(class, spec, entry) {
			continue;
		}

		let path = join(prefix, &spec.name);
		let single = match spec.relation() {
			Some(rel) => rel.kind.is_single(),
			None => !spec.list,
		};
		if !single {
			collections.push(path.clone());
		}

		let Some(nested_id) = spec.nested_class() else {
			continue;
		};
		let Ok(nested) = registry.class_by_id(nested_id) else {
			continue;
		};
		let pk_path = join(
			&path,
			nested.model().map(|m| m.primary_key_column()).unwrap_or("id"),
		);
		if stack.contains(&nested_id) {
			out.push(pk_path);
			continue;
		}

		let before = out.len();
		stack.push(nested_id);
		walk_fields(registry, nested, &path, stack, out, collections);
		stack.pop();
		if out.len() == before {
			out.push(pk_path);
		}
	}
}
