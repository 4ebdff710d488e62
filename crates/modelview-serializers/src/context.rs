//! Caller-owned resolution context

use serde_json::{Map, Value};
use std::sync::Arc;

/// Read-only bag of values passed to every resolver and guard
///
/// Built by the caller before materialization; cloning is an `Arc` bump and
/// the engine never writes to it.
///
/// # Examples
///
/// ```
/// use modelview_serializers::Context;
/// use serde_json::json;
///
/// let ctx = Context::new()
///     .with("user", json!("alice"))
///     .with("permissions", json!(["view_price"]));
///
/// assert_eq!(ctx.get("user"), Some(&json!("alice")));
/// assert!(ctx.has_permission("view_price"));
/// assert!(!ctx.has_permission("edit"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
	values: Arc<Map<String, Value>>,
}

impl Context {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_map(values: Map<String, Value>) -> Self {
		Self {
			values: Arc::new(values),
		}
	}

	/// Add a value while building the context
	pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
		Arc::make_mut(&mut self.values).insert(key.into(), value);
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.values.contains_key(key)
	}

	/// Whether the `permissions` array contains `name`
	pub fn has_permission(&self, name: &str) -> bool {
		self.values
			.get("permissions")
			.and_then(Value::as_array)
			.is_some_and(|perms| perms.iter().any(|p| p.as_str() == Some(name)))
	}

	/// Whether two handles share the same underlying map
	pub fn same_as(&self, other: &Context) -> bool {
		Arc::ptr_eq(&self.values, &other.values)
	}
}
