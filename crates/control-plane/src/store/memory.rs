use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionFilter, ExecutionStore};
use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionStatus, Owner, StatusFields};

/// Process-local [`ExecutionStore`] for tests and local development.
#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(executions: &mut [Execution]) {
    executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create(&self, execution: &Execution) -> AppResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(AppError::Conflict(format!(
                "Execution {} already exists",
                execution.id
            )));
        }
        let mut stored = execution.clone();
        stored.notebook_name = None;
        executions.insert(stored.id, stored);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Execution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &ExecutionFilter) -> AppResult<Vec<Execution>> {
        let mut matching: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        newest_first(&mut matching);
        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn find_latest_completed(
        &self,
        execution_hash: &str,
        owner: Option<&Owner>,
    ) -> AppResult<Option<Execution>> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| e.hashes.execution_hash == execution_hash && e.is_successful())
            .filter(|e| owner.map_or(true, |owner| &e.owner == owner))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: ExecutionStatus,
        fields: StatusFields,
    ) -> AppResult<Execution> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))?;
        execution.apply_transition(next, fields)?;
        Ok(execution.clone())
    }
}
