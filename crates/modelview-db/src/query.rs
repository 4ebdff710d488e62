//! Query description
//!
//! A [`Query`] names a model plus filters, ordering and loading options. It
//! is plain data; executing it is the [`Database`](crate::Database)'s job.

use serde_json::Value;
use std::cmp::Ordering;

/// Comparison used by a [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
	Eq,
	Ne,
	Gt,
	Gte,
	Lt,
	Lte,
	/// Value is a JSON array; matches when the column equals any element
	In,
	/// Value is a JSON bool; matches NULL (or non-NULL for `false`)
	IsNull,
}

/// One filter condition
///
/// `field` may traverse forward relations with Django-style `__` separators,
/// e.g. `shelf__name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
	pub field: String,
	pub operator: FilterOperator,
	pub value: Value,
}

impl Filter {
	pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
		Self {
			field: field.into(),
			operator,
			value,
		}
	}

	/// Evaluate this filter against an already-resolved column value
	///
	/// A missing value behaves like SQL NULL.
	pub fn matches(&self, actual: Option<&Value>) -> bool {
		let actual = actual.unwrap_or(&Value::Null);
		match self.operator {
			FilterOperator::IsNull => {
				let want_null = self.value.as_bool().unwrap_or(true);
				actual.is_null() == want_null
			}
			_ if actual.is_null() => false,
			FilterOperator::Eq => values_equal(actual, &self.value),
			FilterOperator::Ne => !values_equal(actual, &self.value),
			FilterOperator::In => self
				.value
				.as_array()
				.map(|items| items.iter().any(|v| values_equal(actual, v)))
				.unwrap_or(false),
			FilterOperator::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
			FilterOperator::Gte => matches!(
				compare_values(actual, &self.value),
				Some(Ordering::Greater | Ordering::Equal)
			),
			FilterOperator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
			FilterOperator::Lte => matches!(
				compare_values(actual, &self.value),
				Some(Ordering::Less | Ordering::Equal)
			),
		}
	}
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
			(Some(x), Some(y)) => x == y,
			_ => x.as_f64() == y.as_f64(),
		},
		_ => a == b,
	}
}

/// Ordering between two JSON scalars of the same kind
///
/// NULL sorts before every other value; mismatched kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
	match (a, b) {
		(Value::Null, Value::Null) => Some(Ordering::Equal),
		(Value::Null, _) => Some(Ordering::Less),
		(_, Value::Null) => Some(Ordering::Greater),
		(Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
			(Some(x), Some(y)) => Some(x.cmp(&y)),
			_ => x.as_f64()?.partial_cmp(&y.as_f64()?),
		},
		(Value::String(x), Value::String(y)) => Some(x.cmp(y)),
		(Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
		_ => None,
	}
}

/// Sort key; `descending` comes from a leading `-` in `order_by`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
	pub field: String,
	pub descending: bool,
}

impl OrderBy {
	/// Parse `"name"` / `"-name"`
	pub fn parse(spec: &str) -> Self {
		match spec.strip_prefix('-') {
			Some(field) => Self {
				field: field.to_string(),
				descending: true,
			},
			None => Self {
				field: spec.to_string(),
				descending: false,
			},
		}
	}
}

/// Query over one model
///
/// # Examples
///
/// ```
/// use modelview_db::query::{FilterOperator, Query};
/// use serde_json::json;
///
/// let query = Query::new("Book")
///     .filter("shelf__name", FilterOperator::Eq, json!("fantasy"))
///     .order_by(&["-title"])
///     .prefetch_related(&["shelf"]);
///
/// assert_eq!(query.model(), "Book");
/// assert_eq!(query.prefetch_paths(), &["shelf".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
	model: String,
	filters: Vec<Filter>,
	ordering: Vec<OrderBy>,
	limit: Option<usize>,
	prefetch_related: Vec<String>,
	select_related: Vec<String>,
	only: Vec<String>,
}

impl Query {
	pub fn new(model: impl Into<String>) -> Self {
		Self {
			model: model.into(),
			..Default::default()
		}
	}

	/// Add a filter condition (conditions are AND-ed)
	pub fn filter(mut self, field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
		self.filters.push(Filter::new(field, operator, value));
		self
	}

	/// Equality shortcut
	pub fn eq(self, field: impl Into<String>, value: Value) -> Self {
		self.filter(field, FilterOperator::Eq, value)
	}

	/// Set the ordering; fields prefixed with `-` sort descending
	pub fn order_by(mut self, fields: &[&str]) -> Self {
		self.ordering = fields.iter().map(|f| OrderBy::parse(f)).collect();
		self
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	/// Relation paths (dotted) to load in bulk after the main query
	pub fn prefetch_related(mut self, paths: &[&str]) -> Self {
		for path in paths {
			if !self.prefetch_related.iter().any(|p| p == path) {
				self.prefetch_related.push(path.to_string());
			}
		}
		self
	}

	/// Single-valued relation paths (dotted) to join into the main query
	pub fn select_related(mut self, paths: &[&str]) -> Self {
		for path in paths {
			if !self.select_related.iter().any(|p| p == path) {
				self.select_related.push(path.to_string());
			}
		}
		self
	}

	/// Restrict loaded columns; dotted paths project joined single relations
	pub fn only(mut self, fields: &[&str]) -> Self {
		self.only = fields.iter().map(|f| f.to_string()).collect();
		self
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	pub fn filters(&self) -> &[Filter] {
		&self.filters
	}

	pub fn ordering(&self) -> &[OrderBy] {
		&self.ordering
	}

	pub fn limit_value(&self) -> Option<usize> {
		self.limit
	}

	pub fn prefetch_paths(&self) -> &[String] {
		&self.prefetch_related
	}

	pub fn select_related_paths(&self) -> &[String] {
		&self.select_related
	}

	pub fn only_fields(&self) -> &[String] {
		&self.only
	}

	/// Whether the query projects a subset of columns
	pub fn is_projection(&self) -> bool {
		!self.only.is_empty()
	}
}
