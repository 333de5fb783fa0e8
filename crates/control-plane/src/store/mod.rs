//! Execution record persistence.
//!
//! [`ExecutionStore`] is the storage seam with PostgreSQL and in-memory
//! implementations. Both enforce the forward-only state machine atomically
//! per record. [`ExecutionRecords`] wraps a store and fires completion
//! notifications after successful transitions.

mod memory;
mod postgres;

pub use memory::MemoryExecutionStore;
pub use postgres::PgExecutionStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionStatus, Owner, StatusFields};
use crate::notify::{self, ExecutionNotice, Notifier};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Filter and paging for execution listings. Results are newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub notebook_path: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(skip)]
    pub owner: Option<Owner>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            notebook_path: None,
            status: None,
            owner: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl ExecutionFilter {
    /// Clamp paging to sane bounds.
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.offset = self.offset.max(0);
        self
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        self.notebook_path
            .as_ref()
            .map_or(true, |path| &execution.notebook_path == path)
            && self.status.map_or(true, |status| execution.status == status)
            && self.owner.as_ref().map_or(true, |owner| &execution.owner == owner)
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new `pending` record.
    async fn create(&self, execution: &Execution) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Execution>>;

    async fn list(&self, filter: &ExecutionFilter) -> AppResult<Vec<Execution>>;

    /// Most recently created successful execution with this hash.
    async fn find_latest_completed(
        &self,
        execution_hash: &str,
        owner: Option<&Owner>,
    ) -> AppResult<Option<Execution>>;

    /// Atomically move a record to `next`.
    ///
    /// Fails with `NotFound` for an unknown id and `Conflict` when the move
    /// is not allowed from the stored state.
    async fn transition(
        &self,
        id: Uuid,
        next: ExecutionStatus,
        fields: StatusFields,
    ) -> AppResult<Execution>;
}

/// Record store plus the notification side effect of transitions.
#[derive(Clone)]
pub struct ExecutionRecords {
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn Notifier>,
}

impl ExecutionRecords {
    pub fn new(store: Arc<dyn ExecutionStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn create(&self, execution: &Execution) -> AppResult<()> {
        if execution.status != ExecutionStatus::Pending {
            return Err(AppError::Validation(format!(
                "New executions must be pending, got {}",
                execution.status
            )));
        }
        self.store.create(execution).await
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Execution>> {
        self.store.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Execution> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))
    }

    pub async fn list(&self, filter: &ExecutionFilter) -> AppResult<Vec<Execution>> {
        self.store.list(filter).await
    }

    pub async fn find_latest_completed(
        &self,
        execution_hash: &str,
        owner: Option<&Owner>,
    ) -> AppResult<Option<Execution>> {
        self.store.find_latest_completed(execution_hash, owner).await
    }

    pub async fn transition(
        &self,
        id: Uuid,
        next: ExecutionStatus,
        fields: StatusFields,
    ) -> AppResult<Execution> {
        let execution = self.store.transition(id, next, fields).await?;
        debug!(execution_id = %id, status = %execution.status, "Execution transitioned");
        if let Some(notice) = ExecutionNotice::for_execution(&execution) {
            notify::dispatch(self.notifier.clone(), notice);
        }
        Ok(execution)
    }
}
