//! Serializer error types
//!
//! Configuration errors are raised at registry build time or at call entry,
//! before any I/O. Storage errors pass through untouched in
//! [`SerializerError::Database`].

use modelview_db::DatabaseError;
use thiserror::Error;

/// Invalid declaration or call shape
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
	#[error("Serializer '{0}' is declared more than once")]
	DuplicateSerializer(String),

	#[error("Unknown serializer '{0}'")]
	UnknownSerializer(String),

	/// A nested field names a serializer that was never declared
	#[error("Field '{class}.{field}' refers to undeclared serializer '{target}'")]
	UnresolvedNestedType {
		class: String,
		field: String,
		target: String,
	},

	#[error("Serializer '{class}' extends undeclared serializer '{base}'")]
	UnknownBaseSerializer { class: String, base: String },

	#[error("Inheritance cycle through serializer '{0}'")]
	InheritanceCycle(String),

	#[error("Serializer '{class}' is backed by unknown model '{model}'")]
	UnknownModel { class: String, model: String },

	/// Field maps to no attribute, relation or resolver
	#[error("Field '{class}.{field}' is neither an attribute of '{model}' nor resolver-backed")]
	UnknownAttribute {
		class: String,
		field: String,
		model: String,
	},

	#[error("Resolver or guard registered for undeclared field '{class}.{field}'")]
	UndeclaredField { class: String, field: String },

	/// A list field over a single relation or the other way round
	#[error("Field '{class}.{field}' does not match the shape of relation kind {kind}")]
	RelationShapeMismatch {
		class: String,
		field: String,
		kind: String,
	},

	#[error("prefetch and select-only loading are mutually exclusive")]
	ConflictingLoadOptions,

	#[error("Select-only loading for '{class}' crosses collection relation '{path}'")]
	SelectOnlyCollection { class: String, path: String },

	#[error("Serializer '{0}' has no backing model and cannot be written")]
	NoBackingModel(String),

	#[error("Serializer '{expected}' cannot handle an instance of '{found}'")]
	InstanceClassMismatch { expected: String, found: String },
}

/// Invalid field values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
	#[error("Field '{class}.{field}' is required")]
	RequiredFieldUnset { class: String, field: String },

	#[error("Unknown field '{field}' for serializer '{class}'")]
	UnknownField { class: String, field: String },

	#[error("Field '{class}.{field}' expects {expected}, got {found}")]
	TypeMismatch {
		class: String,
		field: String,
		expected: String,
		found: String,
	},

	#[error("Payload for serializer '{class}' must be a JSON object")]
	NotAnObject { class: String },

	#[error("Cannot deserialize '{class}': {message}")]
	Deserialize { class: String, message: String },
}

/// Relation field whose nested values do not map onto the backing relation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelationError {
	/// The nested serializer writes a model other than the relation's target
	#[error("Field '{class}.{field}' relates to model '{target}' but its nested serializer writes '{found}'")]
	TargetModelMismatch {
		class: String,
		field: String,
		target: String,
		found: String,
	},
}

/// Umbrella error for every serializer operation
#[derive(Debug, Error)]
pub enum SerializerError {
	#[error(transparent)]
	Configuration(#[from] ConfigurationError),

	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error(transparent)]
	Relation(#[from] RelationError),

	/// Storage collaborator failure, propagated unchanged
	#[error(transparent)]
	Database(#[from] DatabaseError),

	#[error("Maximum nesting depth {max_depth} exceeded in serializer '{class}'")]
	DepthExceeded { class: String, max_depth: usize },

	/// Failure raised by user resolver code
	#[error(transparent)]
	Custom(#[from] anyhow::Error),
}

impl SerializerError {
	/// Build a [`SerializerError::Custom`] from a message
	pub fn custom(message: impl std::fmt::Display) -> Self {
		Self::Custom(anyhow::anyhow!("{message}"))
	}

	pub fn is_configuration(&self) -> bool {
		matches!(self, Self::Configuration(_))
	}

	pub fn is_validation(&self) -> bool {
		matches!(self, Self::Validation(_))
	}
}

pub type SerializerResult<T> = Result<T, SerializerError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_database_errors_pass_through() {
		let err: SerializerError = DatabaseError::UnknownModel("Book".into()).into();
		assert_eq!(err.to_string(), "Unknown model 'Book'");
		assert!(matches!(err, SerializerError::Database(DatabaseError::UnknownModel(_))));
	}

	#[test]
	fn test_custom_error_message() {
		let err = SerializerError::custom("price service unavailable");
		assert_eq!(err.to_string(), "price service unavailable");
		assert!(!err.is_configuration());
	}
}
