//! Three-state field values

use crate::instance::SerializerInstance;
use serde_json::Value;

/// Value held by one field of a [`SerializerInstance`]
///
/// `Unset` is distinct from `Null`: it means nothing was resolved or
/// supplied, and such fields are skipped when rendering and writing.
///
/// # Examples
///
/// ```
/// use modelview_serializers::FieldValue;
/// use serde_json::json;
///
/// assert_eq!(FieldValue::from(json!(null)), FieldValue::Null);
/// assert_eq!(FieldValue::from(json!("x")), FieldValue::Value(json!("x")));
/// assert!(FieldValue::Unset.is_unset());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
	#[default]
	Unset,
	Null,
	/// Scalar or scalar list
	Value(Value),
	One(Box<SerializerInstance>),
	Many(Vec<SerializerInstance>),
}

impl FieldValue {
	pub fn is_unset(&self) -> bool {
		matches!(self, FieldValue::Unset)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, FieldValue::Null)
	}

	pub fn as_value(&self) -> Option<&Value> {
		match self {
			FieldValue::Value(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_instance(&self) -> Option<&SerializerInstance> {
		match self {
			FieldValue::One(instance) => Some(instance),
			_ => None,
		}
	}

	pub fn as_instances(&self) -> Option<&[SerializerInstance]> {
		match self {
			FieldValue::Many(items) => Some(items),
			_ => None,
		}
	}

	/// JSON rendering; `None` for `Unset`
	pub fn to_json(&self) -> Option<Value> {
		match self {
			FieldValue::Unset => None,
			FieldValue::Null => Some(Value::Null),
			FieldValue::Value(v) => Some(v.clone()),
			FieldValue::One(instance) => Some(instance.to_json()),
			FieldValue::Many(items) => Some(Value::Array(items.iter().map(|i| i.to_json()).collect())),
		}
	}
}

impl From<Value> for FieldValue {
	fn from(value: Value) -> Self {
		if value.is_null() {
			FieldValue::Null
		} else {
			FieldValue::Value(value)
		}
	}
}

impl From<SerializerInstance> for FieldValue {
	fn from(instance: SerializerInstance) -> Self {
		FieldValue::One(Box::new(instance))
	}
}

impl From<Vec<SerializerInstance>> for FieldValue {
	fn from(items: Vec<SerializerInstance>) -> Self {
		FieldValue::Many(items)
	}
}

impl From<Option<SerializerInstance>> for FieldValue {
	fn from(instance: Option<SerializerInstance>) -> Self {
		instance.map(FieldValue::from).unwrap_or(FieldValue::Null)
	}
}

macro_rules! impl_from_scalar {
	($($ty:ty),*) => {
		$(
			impl From<$ty> for FieldValue {
				fn from(value: $ty) -> Self {
					FieldValue::Value(Value::from(value))
				}
			}
		)*
	};
}

impl_from_scalar!(bool, i32, i64, u32, u64, f64, String, &str);
