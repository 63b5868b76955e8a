use async_trait::async_trait;

use super::error::RepositoryResult;

/// Explicit transaction demarcation.
///
/// Batch tools run inside exactly one transaction opened by
/// [`run_in_transaction`](crate::db::run_in_transaction). Nesting is not
/// supported: `begin_transaction` on an open transaction is a
/// `TransactionError`.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn begin_transaction(&self) -> RepositoryResult<()>;

    async fn commit_transaction(&self) -> RepositoryResult<()>;

    async fn rollback_transaction(&self) -> RepositoryResult<()>;

    async fn in_transaction(&self) -> RepositoryResult<bool>;
}
