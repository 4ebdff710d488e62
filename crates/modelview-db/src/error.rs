//! Errors raised by the storage layer

use thiserror::Error;

/// Error type for storage operations
///
/// Serializers propagate these unchanged; they are never translated or
/// retried by the layers above.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
	/// The model is not registered in the catalog
	#[error("Unknown model '{0}'")]
	UnknownModel(String),

	/// The model has no relation with this name
	#[error("Unknown relation '{relation}' on model '{model}'")]
	UnknownRelation { model: String, relation: String },

	/// The model has no column with this name
	#[error("Unknown column '{column}' on model '{model}'")]
	UnknownColumn { model: String, column: String },

	/// No row matched the requested primary key
	#[error("{model} matching pk={pk} does not exist")]
	NotFound { model: String, pk: String },

	/// The entity has not been persisted yet
	#[error("Entity of model '{0}' has no primary key")]
	MissingPrimaryKey(String),

	/// A NOT NULL or type constraint was violated
	#[error("Constraint violation on {model}.{column}: {message}")]
	Constraint {
		model: String,
		column: String,
		message: String,
	},

	/// The relation exists but does not support the requested operation
	#[error("Relation '{relation}' on model '{model}' does not support {operation}")]
	UnsupportedRelationOperation {
		model: String,
		relation: String,
		operation: &'static str,
	},

	/// Malformed query (bad filter path, bad ordering, ...)
	#[error("Query error: {0}")]
	Query(String),

	/// Model declarations could not be parsed
	#[error("Invalid model catalog: {0}")]
	InvalidCatalog(String),

	/// Transaction state error (commit after rollback, ...)
	#[error("Transaction error: {0}")]
	Transaction(String),
}

/// Result alias for storage operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;
