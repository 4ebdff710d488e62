//! Per-instance record of explicitly supplied fields

/// Tracks, per field position, whether the caller supplied a value
///
/// An explicit `null` counts as supplied; falling back to a declared default
/// does not.
///
/// # Examples
///
/// ```
/// use modelview_serializers::FieldState;
///
/// let mut state = FieldState::new(3);
/// state.mark(1);
/// assert!(state.is_set(1));
/// assert!(!state.is_set(0));
/// assert_eq!(state.set_positions().collect::<Vec<_>>(), vec![1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldState {
	flags: Vec<bool>,
}

impl FieldState {
	pub fn new(fields: usize) -> Self {
		Self {
			flags: vec![false; fields],
		}
	}

	pub fn mark(&mut self, position: usize) {
		if let Some(flag) = self.flags.get_mut(position) {
			*flag = true;
		}
	}

	pub fn clear(&mut self, position: usize) {
		if let Some(flag) = self.flags.get_mut(position) {
			*flag = false;
		}
	}

	pub fn is_set(&self, position: usize) -> bool {
		self.flags.get(position).copied().unwrap_or(false)
	}

	pub fn set_positions(&self) -> impl Iterator<Item = usize> + '_ {
		self.flags
			.iter()
			.enumerate()
			.filter_map(|(i, set)| set.then_some(i))
	}

	pub fn any_set(&self) -> bool {
		self.flags.iter().any(|f| *f)
	}
}
