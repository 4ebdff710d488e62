//! The storage collaborator contract

use crate::entity::{EntityRef, Row};
use crate::error::DatabaseResult;
use crate::meta::ModelCatalog;
use crate::query::Query;
use crate::transaction::TransactionScope;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Shared handle to a database
pub type DatabaseRef = Arc<dyn Database>;

/// Persistence operations the serializer layer relies on
///
/// Every method may suspend on I/O. None of them opens a transaction on its
/// own; callers that need atomicity wrap calls in [`Database::begin`] or
/// [`atomic`](crate::transaction::atomic).
#[async_trait]
pub trait Database: Send + Sync {
	/// Models known to this database
	fn catalog(&self) -> &ModelCatalog;

	/// Execute a query, applying `select_related`, `only` and `prefetch_related`
	async fn fetch(&self, query: &Query) -> DatabaseResult<Vec<EntityRef>>;

	/// Count rows matching the query's filters
	async fn count(&self, query: &Query) -> DatabaseResult<usize>;

	/// Fetch one row by primary key
	async fn get(&self, model: &str, pk: &Value) -> DatabaseResult<EntityRef>;

	/// Load dotted relation paths in bulk onto already fetched entities
	///
	/// Costs one round trip per path segment that is not already cached,
	/// regardless of how many entities are passed.
	async fn prefetch(&self, entities: &[EntityRef], paths: &[String]) -> DatabaseResult<()>;

	/// Insert one row and return it with its generated primary key
	async fn create(&self, model: &str, values: Row) -> DatabaseResult<EntityRef>;

	/// Insert several rows of the same model, preserving input order
	async fn bulk_create(&self, model: &str, rows: Vec<Row>) -> DatabaseResult<Vec<EntityRef>> {
		let mut created = Vec::with_capacity(rows.len());
		for row in rows {
			created.push(self.create(model, row).await?);
		}
		Ok(created)
	}

	/// Persist changed attributes of an existing row
	async fn save(&self, entity: &EntityRef, changes: Row) -> DatabaseResult<()>;

	/// Record many-to-many associations (existing ones are kept)
	async fn m2m_add(
		&self,
		entity: &EntityRef,
		relation: &str,
		targets: &[EntityRef],
	) -> DatabaseResult<()>;

	/// Remove many-to-many associations
	async fn m2m_remove(
		&self,
		entity: &EntityRef,
		relation: &str,
		targets: &[EntityRef],
	) -> DatabaseResult<()>;

	/// Open a transaction scope
	async fn begin(&self) -> DatabaseResult<Box<dyn TransactionScope>>;
}
