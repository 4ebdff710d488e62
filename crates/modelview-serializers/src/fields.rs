//! Field introspection
//!
//! Turns the `(name, type)` pairs a serializer declares into an ordered,
//! immutable table of [`FieldSpec`]s. Each spec records whether the field is
//! scalar or nested, its nullability and list-ness, and, for serializers with
//! a backing model, which column or relation it is bound to.

use crate::error::{ConfigurationError, SerializerResult, ValidationError};
use modelview_db::{ModelMeta, RelationMeta};
use serde_json::Value;
use std::collections::HashMap;

/// Index of a serializer class inside its registry
pub type ClassId = usize;

/// Scalar value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
	Bool,
	Int,
	Float,
	Str,
	/// RFC 3339 timestamp carried as a string
	DateTime,
	/// Any JSON value
	Json,
}

impl ScalarType {
	pub fn name(&self) -> &'static str {
		match self {
			ScalarType::Bool => "bool",
			ScalarType::Int => "int",
			ScalarType::Float => "float",
			ScalarType::Str => "string",
			ScalarType::DateTime => "datetime",
			ScalarType::Json => "json",
		}
	}

	/// Whether a non-null JSON value has this type
	pub fn accepts(&self, value: &Value) -> bool {
		match self {
			ScalarType::Bool => value.is_boolean(),
			ScalarType::Int => value.is_i64() || value.is_u64(),
			ScalarType::Float => value.is_number(),
			ScalarType::Str => value.is_string(),
			ScalarType::DateTime => value
				.as_str()
				.is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
			ScalarType::Json => true,
		}
	}
}

/// Declared type of a field
///
/// # Examples
///
/// ```
/// use modelview_serializers::TypeDescriptor;
///
/// let shelf = TypeDescriptor::nested("BookShelfSerializer").optional();
/// assert!(shelf.is_optional());
/// assert_eq!(shelf.serializer_name(), Some("BookShelfSerializer"));
///
/// let tags = TypeDescriptor::string().list();
/// assert!(tags.is_list());
/// assert_eq!(tags.serializer_name(), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
	Scalar(ScalarType),
	/// Reference to another serializer by name
	Serializer(String),
	Optional(Box<TypeDescriptor>),
	List(Box<TypeDescriptor>),
}

impl TypeDescriptor {
	pub fn bool() -> Self {
		Self::Scalar(ScalarType::Bool)
	}

	pub fn int() -> Self {
		Self::Scalar(ScalarType::Int)
	}

	pub fn float() -> Self {
		Self::Scalar(ScalarType::Float)
	}

	pub fn string() -> Self {
		Self::Scalar(ScalarType::Str)
	}

	pub fn datetime() -> Self {
		Self::Scalar(ScalarType::DateTime)
	}

	pub fn json() -> Self {
		Self::Scalar(ScalarType::Json)
	}

	pub fn nested(serializer: impl Into<String>) -> Self {
		Self::Serializer(serializer.into())
	}

	pub fn optional(self) -> Self {
		Self::Optional(Box::new(self))
	}

	pub fn list(self) -> Self {
		Self::List(Box::new(self))
	}

	/// Outer nullability (`Optional(List(_))` is optional, `List(Optional(_))` is not)
	pub fn is_optional(&self) -> bool {
		matches!(self, Self::Optional(_))
	}

	pub fn is_list(&self) -> bool {
		match self {
			Self::List(_) => true,
			Self::Optional(inner) => inner.is_list(),
			_ => false,
		}
	}

	/// Innermost serializer reference after unwrapping optional and list layers
	pub fn serializer_name(&self) -> Option<&str> {
		match self.base() {
			Self::Serializer(name) => Some(name),
			_ => None,
		}
	}

	fn base(&self) -> &TypeDescriptor {
		match self {
			Self::Optional(inner) | Self::List(inner) => inner.base(),
			other => other,
		}
	}

	/// Whether list items may be null
	fn items_optional(&self) -> bool {
		match self {
			Self::Optional(inner) => inner.items_optional(),
			Self::List(inner) => inner.is_optional(),
			_ => false,
		}
	}
}

/// Scalar or nested classification of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
	Scalar(ScalarType),
	Nested { serializer: String, class: ClassId },
}

/// What a field maps to on the backing model
#[derive(Debug, Clone, PartialEq)]
pub enum FieldBinding {
	/// No backing model, or nothing on it with this name
	Unbound,
	Column,
	Relation(RelationMeta),
}

/// One declared field, built at registry build time
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
	pub name: String,
	pub ty: TypeDescriptor,
	pub kind: FieldKind,
	pub optional: bool,
	pub list: bool,
	pub items_optional: bool,
	pub default: Option<Value>,
	pub binding: FieldBinding,
}

impl FieldSpec {
	pub fn is_nested(&self) -> bool {
		matches!(self.kind, FieldKind::Nested { .. })
	}

	pub fn nested_class(&self) -> Option<ClassId> {
		match self.kind {
			FieldKind::Nested { class, .. } => Some(class),
			FieldKind::Scalar(_) => None,
		}
	}

	pub fn relation(&self) -> Option<&RelationMeta> {
		match &self.binding {
			FieldBinding::Relation(rel) => Some(rel),
			_ => None,
		}
	}

	/// Non-optional and without a declared default
	pub fn is_required(&self) -> bool {
		!self.optional && self.default.is_none()
	}

	/// Check a scalar JSON value (or scalar list) against this field
	pub(crate) fn check_scalar(
		&self,
		class: &str,
		value: &Value,
		strict: bool,
	) -> Result<(), ValidationError> {
		let FieldKind::Scalar(scalar) = self.kind else {
			return Err(self.mismatch(class, "a nested serializer", value));
		};
		if value.is_null() {
			if self.optional || !strict {
				return Ok(());
			}
			return Err(self.mismatch(class, scalar.name(), value));
		}
		if !strict {
			return Ok(());
		}
		if self.list {
			let Some(items) = value.as_array() else {
				return Err(self.mismatch(class, &format!("list of {}", scalar.name()), value));
			};
			for item in items {
				let ok = (item.is_null() && self.items_optional) || scalar.accepts(item);
				if !ok {
					return Err(self.mismatch(class, &format!("list of {}", scalar.name()), item));
				}
			}
			return Ok(());
		}
		if scalar.accepts(value) {
			Ok(())
		} else {
			Err(self.mismatch(class, scalar.name(), value))
		}
	}

	pub(crate) fn mismatch(&self, class: &str, expected: &str, found: &Value) -> ValidationError {
		ValidationError::TypeMismatch {
			class: class.to_string(),
			field: self.name.clone(),
			expected: expected.to_string(),
			found: describe_json(found),
		}
	}
}

pub(crate) fn describe_json(value: &Value) -> String {
	match value {
		Value::Null => "null".to_string(),
		Value::Bool(_) => "bool".to_string(),
		Value::Number(n) if n.is_f64() => "float".to_string(),
		Value::Number(_) => "int".to_string(),
		Value::String(_) => "string".to_string(),
		Value::Array(_) => "list".to_string(),
		Value::Object(_) => "object".to_string(),
	}
}

/// A field as written on the builder, before introspection
#[derive(Debug, Clone)]
pub(crate) struct FieldDecl {
	pub name: String,
	pub ty: TypeDescriptor,
	pub default: Option<Value>,
}

/// Build the field table of one serializer class
pub(crate) fn introspect(
	class: &str,
	decls: &[FieldDecl],
	index: &HashMap<String, ClassId>,
	model: Option<&ModelMeta>,
) -> SerializerResult<Vec<FieldSpec>> {
	let mut specs = Vec::with_capacity(decls.len());
	for decl in decls {
		let kind = match decl.ty.base() {
			TypeDescriptor::Scalar(scalar) => FieldKind::Scalar(*scalar),
			TypeDescriptor::Serializer(target) => {
				let class_id = index.get(target).copied().ok_or_else(|| {
					ConfigurationError::UnresolvedNestedType {
						class: class.to_string(),
						field: decl.name.clone(),
						target: target.clone(),
					}
				})?;
				FieldKind::Nested {
					serializer: target.clone(),
					class: class_id,
				}
			}
			// base() strips every wrapper, so this arm is never taken
			TypeDescriptor::Optional(_) | TypeDescriptor::List(_) => {
				FieldKind::Scalar(ScalarType::Json)
			}
		};
		let list = decl.ty.is_list();

		let binding = match (model, &kind) {
			(None, _) => FieldBinding::Unbound,
			(Some(meta), FieldKind::Nested { .. }) => match meta.relation(&decl.name) {
				Some(rel) => {
					if rel.kind.is_single() == list {
						return Err(ConfigurationError::RelationShapeMismatch {
							class: class.to_string(),
							field: decl.name.clone(),
							kind: format!("{:?}", rel.kind),
						}
						.into());
					}
					FieldBinding::Relation(rel.clone())
				}
				None => FieldBinding::Unbound,
			},
			(Some(meta), FieldKind::Scalar(_)) if meta.has_column(&decl.name) => FieldBinding::Column,
			(Some(_), FieldKind::Scalar(_)) => FieldBinding::Unbound,
		};

		specs.push(FieldSpec {
			name: decl.name.clone(),
			ty: decl.ty.clone(),
			kind,
			optional: decl.ty.is_optional(),
			list,
			items_optional: decl.ty.items_optional(),
			default: decl.default.clone(),
			binding,
		});
	}
	Ok(specs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use modelview_db::RelationMeta;
	use rstest::rstest;
	use serde_json::json;

	fn decl(name: &str, ty: TypeDescriptor) -> FieldDecl {
		FieldDecl {
			name: name.to_string(),
			ty,
			default: None,
		}
	}

	#[rstest]
	#[case(TypeDescriptor::string(), false, false)]
	#[case(TypeDescriptor::string().optional(), true, false)]
	#[case(TypeDescriptor::int().list(), false, true)]
	#[case(TypeDescriptor::int().list().optional(), true, true)]
	#[case(TypeDescriptor::nested("X").optional().list(), false, true)]
	fn test_descriptor_shape(#[case] ty: TypeDescriptor, #[case] optional: bool, #[case] list: bool) {
		assert_eq!(ty.is_optional(), optional);
		assert_eq!(ty.is_list(), list);
	}

	#[rstest]
	#[case(ScalarType::Int, json!(3), true)]
	#[case(ScalarType::Int, json!(3.5), false)]
	#[case(ScalarType::Float, json!(3), true)]
	#[case(ScalarType::Str, json!(1), false)]
	#[case(ScalarType::DateTime, json!("2024-05-01T10:00:00Z"), true)]
	#[case(ScalarType::DateTime, json!("yesterday"), false)]
	#[case(ScalarType::Json, json!({"a": 1}), true)]
	fn test_scalar_accepts(#[case] scalar: ScalarType, #[case] value: Value, #[case] ok: bool) {
		assert_eq!(scalar.accepts(&value), ok);
	}

	#[rstest]
	fn test_introspect_binds_columns_and_relations() {
		let meta = ModelMeta::new("Book")
			.column("title")
			.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable());
		let index = HashMap::from([("ShelfSerializer".to_string(), 1)]);

		let specs = introspect(
			"BookSerializer",
			&[
				decl("title", TypeDescriptor::string()),
				decl("shelf", TypeDescriptor::nested("ShelfSerializer").optional()),
				decl("price", TypeDescriptor::float()),
			],
			&index,
			Some(&meta),
		)
		.unwrap();

		assert_eq!(specs[0].binding, FieldBinding::Column);
		assert_eq!(specs[1].nested_class(), Some(1));
		assert!(specs[1].relation().is_some());
		assert_eq!(specs[2].binding, FieldBinding::Unbound);
	}

	#[rstest]
	fn test_introspect_rejects_unknown_nested_type() {
		let err = introspect(
			"BookSerializer",
			&[decl("shelf", TypeDescriptor::nested("Missing"))],
			&HashMap::new(),
			None,
		)
		.unwrap_err();

		assert!(matches!(
			err,
			crate::SerializerError::Configuration(ConfigurationError::UnresolvedNestedType { .. })
		));
	}

	#[rstest]
	fn test_introspect_rejects_list_over_forward_relation() {
		let meta = ModelMeta::new("Book").with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id"));
		let index = HashMap::from([("ShelfSerializer".to_string(), 0)]);

		let err = introspect(
			"BookSerializer",
			&[decl("shelf", TypeDescriptor::nested("ShelfSerializer").list())],
			&index,
			Some(&meta),
		)
		.unwrap_err();

		assert!(matches!(
			err,
			crate::SerializerError::Configuration(ConfigurationError::RelationShapeMismatch { .. })
		));
	}

	#[rstest]
	fn test_check_scalar_strictness() {
		let spec = FieldSpec {
			name: "count".into(),
			ty: TypeDescriptor::int(),
			kind: FieldKind::Scalar(ScalarType::Int),
			optional: false,
			list: false,
			items_optional: false,
			default: None,
			binding: FieldBinding::Unbound,
		};

		assert!(spec.check_scalar("S", &json!(1), true).is_ok());
		assert!(spec.check_scalar("S", &json!("1"), true).is_err());
		assert!(spec.check_scalar("S", &json!("1"), false).is_ok());
		assert!(spec.check_scalar("S", &Value::Null, true).is_err());
	}
}
