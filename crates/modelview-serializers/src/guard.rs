//! Field guards
//!
//! A guard is a synchronous predicate over `(entity, context)` evaluated
//! before a field's resolver runs. When it returns `false` the field is
//! `Unset` and the resolver is never invoked.

use crate::context::Context;
use modelview_db::EntityRef;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&EntityRef, &Context) -> bool + Send + Sync>;

/// Reusable, composable guard predicate
///
/// # Examples
///
/// ```
/// use modelview_serializers::Guard;
///
/// let staff_only = Guard::condition(|_entity, ctx| ctx.get("is_staff").is_some());
/// let price_visible = Guard::permission("view_price").or(staff_only);
/// assert_eq!(price_visible.label(), "(permission(view_price) or condition)");
/// ```
#[derive(Clone)]
pub struct Guard {
	predicate: Predicate,
	label: String,
}

impl Guard {
	/// Condition-or-unset: pass when `f` returns true
	pub fn condition<F>(f: F) -> Self
	where
		F: Fn(&EntityRef, &Context) -> bool + Send + Sync + 'static,
	{
		Self {
			predicate: Arc::new(f),
			label: "condition".to_string(),
		}
	}

	/// Permission-or-unset: pass when the context's `permissions` contain `name`
	pub fn permission(name: impl Into<String>) -> Self {
		let name = name.into();
		let label = format!("permission({name})");
		Self {
			predicate: Arc::new(move |_, ctx| ctx.has_permission(&name)),
			label,
		}
	}

	pub fn and(self, other: Guard) -> Self {
		let label = format!("({} and {})", self.label, other.label);
		Self {
			predicate: Arc::new(move |e, c| self.check(e, c) && other.check(e, c)),
			label,
		}
	}

	pub fn or(self, other: Guard) -> Self {
		let label = format!("({} or {})", self.label, other.label);
		Self {
			predicate: Arc::new(move |e, c| self.check(e, c) || other.check(e, c)),
			label,
		}
	}

	pub fn check(&self, entity: &EntityRef, context: &Context) -> bool {
		(self.predicate)(entity, context)
	}

	pub fn label(&self) -> &str {
		&self.label
	}
}

impl fmt::Debug for Guard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Guard").field(&self.label).finish()
	}
}
