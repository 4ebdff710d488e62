//! # Transaction Management
//!
//! Serializers never open transactions themselves. Callers that write a
//! multi-row graph wrap the call in a scope obtained from
//! [`Database::begin`], or use the closure-based [`atomic()`] helper:
//!
//! ```rust
//! use modelview_db::memory::MemoryDatabase;
//! use modelview_db::meta::{ModelCatalog, ModelMeta};
//! use modelview_db::transaction::atomic;
//! use modelview_db::{Database, DatabaseError};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), DatabaseError> {
//! let db = MemoryDatabase::new(ModelCatalog::new().register(ModelMeta::new("Tag").column("name")));
//!
//! let created = atomic(&db, || async {
//!     let row = json!({"name": "rust"}).as_object().cloned().unwrap_or_default();
//!     db.create("Tag", row).await
//! })
//! .await?;
//! assert!(created.pk().is_some());
//! # Ok(())
//! # }
//! ```

use crate::database::Database;
use crate::error::{DatabaseError, DatabaseResult};
use async_trait::async_trait;
use std::future::Future;

/// An open transaction
///
/// Dropping a scope that was neither committed nor rolled back rolls it back.
#[async_trait]
pub trait TransactionScope: Send {
	/// Make every write since `begin` durable
	async fn commit(self: Box<Self>) -> DatabaseResult<()>;

	/// Discard every write since `begin`
	async fn rollback(self: Box<Self>) -> DatabaseResult<()>;
}

/// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`
///
/// The error type only needs to absorb [`DatabaseError`], so serializer
/// errors can flow through unchanged.
pub async fn atomic<D, F, Fut, T, E>(db: &D, f: F) -> Result<T, E>
where
	D: Database + ?Sized,
	F: FnOnce() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: From<DatabaseError>,
{
	let scope = db.begin().await?;
	match f().await {
		Ok(value) => {
			scope.commit().await?;
			Ok(value)
		}
		Err(err) => {
			if let Err(rollback_err) = scope.rollback().await {
				tracing::warn!(error = %rollback_err, "rollback after failed atomic block failed");
			}
			Err(err)
		}
	}
}
