//! Serializer instances
//!
//! A [`SerializerInstance`] holds one [`FieldValue`] per declared field, in
//! declaration order, plus a [`FieldState`] recording which fields were
//! explicitly supplied. Instances come from three places: materialization
//! from entities, the typed [`InstanceBuilder`], and JSON payload parsing.

use crate::error::{SerializerResult, ValidationError};
use crate::fields::{FieldKind, FieldSpec, describe_json};
use crate::registry::{SerializerClass, SerializerRegistry};
use crate::state::FieldState;
use crate::value::FieldValue;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Materialized or constructed view of one entity
#[derive(Clone)]
pub struct SerializerInstance {
	class: Arc<SerializerClass>,
	values: Vec<FieldValue>,
	state: FieldState,
	pk: Option<Value>,
}

impl PartialEq for SerializerInstance {
	fn eq(&self, other: &Self) -> bool {
		self.class.name() == other.class.name()
			&& self.values == other.values
			&& self.state == other.state
			&& self.pk == other.pk
	}
}

impl fmt::Debug for SerializerInstance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut out = f.debug_struct(self.class.name());
		for (spec, value) in self.class.fields().iter().zip(&self.values) {
			out.field(&spec.name, value);
		}
		out.field("pk", &self.pk).finish()
	}
}

impl SerializerInstance {
	/// Instance with every field `Unset` and nothing marked as set
	pub(crate) fn empty(class: Arc<SerializerClass>) -> Self {
		let len = class.fields().len();
		Self {
			class,
			values: vec![FieldValue::Unset; len],
			state: FieldState::new(len),
			pk: None,
		}
	}

	pub fn class_name(&self) -> &str {
		self.class.name()
	}

	pub fn class(&self) -> &Arc<SerializerClass> {
		&self.class
	}

	pub fn get(&self, field: &str) -> Option<&FieldValue> {
		self.class.field_position(field).map(|i| &self.values[i])
	}

	/// Scalar value of a field, if it holds one
	pub fn value(&self, field: &str) -> Option<&Value> {
		self.get(field).and_then(FieldValue::as_value)
	}

	pub fn nested(&self, field: &str) -> Option<&SerializerInstance> {
		self.get(field).and_then(FieldValue::as_instance)
	}

	pub fn nested_list(&self, field: &str) -> Option<&[SerializerInstance]> {
		self.get(field).and_then(FieldValue::as_instances)
	}

	/// Whether the field was explicitly supplied (an explicit `null` counts)
	pub fn has_been_set(&self, field: &str) -> bool {
		self.class
			.field_position(field)
			.is_some_and(|i| self.state.is_set(i))
	}

	/// Assign a field and mark it as set
	pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> SerializerResult<()> {
		let position = self.position(field)?;
		let value = value.into();
		check_value(&self.class, &self.class.fields()[position], &value)?;
		self.values[position] = value;
		self.state.mark(position);
		Ok(())
	}

	/// Reset a field to `Unset` and clear its set flag
	pub fn unset(&mut self, field: &str) -> SerializerResult<()> {
		let position = self.position(field)?;
		self.values[position] = FieldValue::Unset;
		self.state.clear(position);
		Ok(())
	}

	/// Primary key of the row this instance was read from or written to
	pub fn pk(&self) -> Option<&Value> {
		self.pk.as_ref()
	}

	pub fn field_state(&self) -> &FieldState {
		&self.state
	}

	/// Declared fields in order with their values
	pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
		self.class
			.fields()
			.iter()
			.map(|spec| spec.name.as_str())
			.zip(self.values.iter())
	}

	/// Render as a JSON object in declaration order, omitting `Unset` fields
	pub fn to_json(&self) -> Value {
		let mut map = Map::new();
		for (name, value) in self.fields() {
			if let Some(json) = value.to_json() {
				map.insert(name.to_string(), json);
			}
		}
		Value::Object(map)
	}

	/// Convert into a typed struct through serde
	pub fn deserialize<T: DeserializeOwned>(&self) -> SerializerResult<T> {
		serde_json::from_value(self.to_json()).map_err(|e| {
			ValidationError::Deserialize {
				class: self.class.name().to_string(),
				message: e.to_string(),
			}
			.into()
		})
	}

	fn position(&self, field: &str) -> Result<usize, ValidationError> {
		self.class
			.field_position(field)
			.ok_or_else(|| ValidationError::UnknownField {
				class: self.class.name().to_string(),
				field: field.to_string(),
			})
	}

	pub(crate) fn value_at(&self, position: usize) -> &FieldValue {
		&self.values[position]
	}

	pub(crate) fn value_at_mut(&mut self, position: usize) -> &mut FieldValue {
		&mut self.values[position]
	}

	pub(crate) fn assign(&mut self, position: usize, value: FieldValue, mark: bool) {
		self.values[position] = value;
		if mark {
			self.state.mark(position);
		}
	}

	pub(crate) fn set_pk(&mut self, pk: Option<Value>) {
		self.pk = pk;
	}
}

fn describe_field_value(value: &FieldValue) -> String {
	match value {
		FieldValue::Unset => "unset".to_string(),
		FieldValue::Null => "null".to_string(),
		FieldValue::Value(v) => describe_json(v),
		FieldValue::One(i) => format!("instance of {}", i.class_name()),
		FieldValue::Many(_) => "list of instances".to_string(),
	}
}

/// Check that a value fits the declared shape and type of a field
pub(crate) fn check_value(
	class: &SerializerClass,
	spec: &FieldSpec,
	value: &FieldValue,
) -> Result<(), ValidationError> {
	let strict = class.strict_types();
	let mismatch = |expected: &str| ValidationError::TypeMismatch {
		class: class.name().to_string(),
		field: spec.name.clone(),
		expected: expected.to_string(),
		found: describe_field_value(value),
	};

	match (&spec.kind, value) {
		(_, FieldValue::Unset) => Ok(()),
		(FieldKind::Scalar(_), FieldValue::Null) => spec.check_scalar(class.name(), &Value::Null, strict),
		(FieldKind::Scalar(_), FieldValue::Value(v)) => spec.check_scalar(class.name(), v, strict),
		(FieldKind::Scalar(scalar), _) => Err(mismatch(scalar.name())),
		(FieldKind::Nested { serializer, .. }, FieldValue::Null) => {
			if spec.optional || !strict {
				Ok(())
			} else {
				Err(mismatch(&format!("instance of {serializer}")))
			}
		}
		(FieldKind::Nested { serializer, .. }, FieldValue::One(instance)) => {
			if !spec.list && instance.class_name() == serializer {
				Ok(())
			} else if spec.list {
				Err(mismatch(&format!("list of {serializer}")))
			} else {
				Err(mismatch(&format!("instance of {serializer}")))
			}
		}
		(FieldKind::Nested { serializer, .. }, FieldValue::Many(items)) => {
			if spec.list && items.iter().all(|i| i.class_name() == serializer) {
				Ok(())
			} else if spec.list {
				Err(mismatch(&format!("list of {serializer}")))
			} else {
				Err(mismatch(&format!("instance of {serializer}")))
			}
		}
		(FieldKind::Nested { serializer, .. }, FieldValue::Value(_)) => {
			Err(mismatch(&format!("instance of {serializer}")))
		}
	}
}

/// Parse a JSON payload into an instance, recursing into nested fields
///
/// Keys present in the payload are marked as set, including explicit
/// `null`s. Omitted keys take their declared default (unmarked) or `Unset`.
pub(crate) fn parse_payload(
	registry: &SerializerRegistry,
	class: &Arc<SerializerClass>,
	payload: Value,
) -> SerializerResult<SerializerInstance> {
	let Value::Object(mut map) = payload else {
		return Err(ValidationError::NotAnObject {
			class: class.name().to_string(),
		}
		.into());
	};

	let mut instance = SerializerInstance::empty(class.clone());
	if let Some(key) = map.keys().find(|k| class.field_position(k).is_none()) {
		return Err(ValidationError::UnknownField {
			class: class.name().to_string(),
			field: key.clone(),
		}
		.into());
	}

	for (position, spec) in class.fields().iter().enumerate() {
		let Some(raw) = map.remove(&spec.name) else {
			if let Some(default) = &spec.default {
				instance.assign(position, FieldValue::from(default.clone()), false);
			}
			continue;
		};

		let value = match (&spec.kind, raw) {
			(_, Value::Null) => FieldValue::Null,
			(FieldKind::Scalar(_), raw) => FieldValue::Value(raw),
			(FieldKind::Nested { class: nested, .. }, Value::Array(items)) if spec.list => {
				let nested = registry.class_by_id(*nested)?;
				let parsed = items
					.into_iter()
					.map(|item| parse_payload(registry, nested, item))
					.collect::<SerializerResult<Vec<_>>>()?;
				FieldValue::Many(parsed)
			}
			(FieldKind::Nested { class: nested, .. }, raw @ Value::Object(_)) if !spec.list => {
				let nested = registry.class_by_id(*nested)?;
				FieldValue::One(Box::new(parse_payload(registry, nested, raw)?))
			}
			(FieldKind::Nested { serializer, .. }, raw) => {
				return Err(spec
					.mismatch(
						class.name(),
						&if spec.list {
							format!("list of {serializer}")
						} else {
							format!("{serializer} object")
						},
						&raw,
					)
					.into());
			}
		};
		check_value(class, spec, &value)?;
		instance.assign(position, value, true);
	}

	if let Some(model) = class.model()
		&& let Some(pk) = instance.value(model.primary_key_column()).cloned()
	{
		instance.set_pk(Some(pk));
	}
	Ok(instance)
}

/// Typed construction of an instance
///
/// Obtained from [`Serializer::instance`](crate::Serializer::instance).
///
/// # Examples
///
/// ```
/// use modelview_serializers::{SerializerBuilder, SerializerRegistry, TypeDescriptor};
///
/// let registry = SerializerRegistry::builder()
///     .register(
///         SerializerBuilder::new("TagSerializer")
///             .field("name", TypeDescriptor::string())
///             .field_with_default("weight", TypeDescriptor::int(), serde_json::json!(1)),
///     )
///     .build()
///     .unwrap();
///
/// let tag = registry
///     .serializer("TagSerializer")
///     .unwrap()
///     .instance()
///     .set("name", "rust")
///     .build()
///     .unwrap();
///
/// assert!(tag.has_been_set("name"));
/// assert!(!tag.has_been_set("weight"));
/// assert_eq!(tag.value("weight"), Some(&serde_json::json!(1)));
/// ```
pub struct InstanceBuilder {
	class: Arc<SerializerClass>,
	values: Vec<(String, FieldValue)>,
	pk: Option<Value>,
}

impl InstanceBuilder {
	pub(crate) fn new(class: Arc<SerializerClass>) -> Self {
		Self {
			class,
			values: Vec::new(),
			pk: None,
		}
	}

	/// Supply a field value; it is marked as set
	pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
		self.values.push((field.into(), value.into()));
		self
	}

	/// Primary key of an existing row this instance refers to
	pub fn pk(mut self, pk: Value) -> Self {
		self.pk = Some(pk);
		self
	}

	pub fn build(self) -> SerializerResult<SerializerInstance> {
		let mut instance = SerializerInstance::empty(self.class.clone());
		for (position, spec) in self.class.fields().iter().enumerate() {
			if let Some(default) = &spec.default {
				instance.assign(position, FieldValue::from(default.clone()), false);
			}
		}
		for (field, value) in self.values {
			instance.set(&field, value)?;
		}

		let declared_pk = self
			.class
			.model()
			.and_then(|m| instance.value(m.primary_key_column()).cloned());
		instance.set_pk(self.pk.or(declared_pk));
		Ok(instance)
	}
}

