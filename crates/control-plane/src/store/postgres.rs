use async_trait::async_trait;
use uuid::Uuid;

use super::{ExecutionFilter, ExecutionStore};
use crate::db::{queries, DbPool};
use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionStatus, Owner, StatusFields};

/// [`ExecutionStore`] backed by the `nbforge.execution` table.
///
/// Transitions lock the row with `SELECT ... FOR UPDATE` so concurrent
/// callbacks and cancellations are serialized per record.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: DbPool,
}

impl PgExecutionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: &Execution) -> AppResult<()> {
        queries::execution::insert_execution(&self.pool, execution).await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Execution>> {
        queries::execution::get_execution(&self.pool, id)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    async fn list(&self, filter: &ExecutionFilter) -> AppResult<Vec<Execution>> {
        let rows = queries::execution::list_executions(
            &self.pool,
            filter.notebook_path.as_deref(),
            filter.status,
            filter.owner.as_ref(),
            filter.limit,
            filter.offset,
        )
        .await?;
        rows.into_iter().map(Execution::try_from).collect()
    }

    async fn find_latest_completed(
        &self,
        execution_hash: &str,
        owner: Option<&Owner>,
    ) -> AppResult<Option<Execution>> {
        queries::execution::find_latest_completed(&self.pool, execution_hash, owner)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        next: ExecutionStatus,
        fields: StatusFields,
    ) -> AppResult<Execution> {
        let mut tx = self.pool.begin().await?;

        let row = queries::execution::lock_execution(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))?;
        let mut execution = Execution::try_from(row)?;
        execution.apply_transition(next, fields)?;

        queries::execution::update_lifecycle(&mut tx, &execution).await?;
        tx.commit().await?;

        Ok(execution)
    }
}
