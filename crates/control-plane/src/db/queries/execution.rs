//! Execution database queries.

use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::models::ExecutionRow;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::execution::{Execution, ExecutionStatus, Owner};

/// Insert a new execution row.
pub async fn insert_execution(pool: &DbPool, execution: &Execution) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO nbforge.execution (
            id, notebook_path, parameters, status, created_at,
            python_version, cpu_milli, memory_mib, requirements,
            notebook_hash, parameters_hash, execution_hash,
            callback_token, user_id, service_principal_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(execution.id)
    .bind(&execution.notebook_path)
    .bind(Value::Object(execution.parameters.clone()))
    .bind(execution.status.as_str())
    .bind(execution.created_at)
    .bind(&execution.resources.python_version)
    .bind(execution.resources.cpu_milli)
    .bind(execution.resources.memory_mib)
    .bind(Value::from(execution.resources.requirements.clone()))
    .bind(&execution.hashes.notebook_hash)
    .bind(&execution.hashes.parameters_hash)
    .bind(&execution.hashes.execution_hash)
    .bind(&execution.callback_token)
    .bind(execution.owner.user_id())
    .bind(execution.owner.service_principal_id())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an execution row by id.
pub async fn get_execution(pool: &DbPool, id: Uuid) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, notebook_path, parameters, status, created_at, started_at, completed_at,
               error, output_notebook, output_html, outputs,
               python_version, cpu_milli, memory_mib, requirements,
               notebook_hash, parameters_hash, execution_hash,
               callback_token, user_id, service_principal_id
        FROM nbforge.execution
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Get an execution row by id and lock it until the transaction ends.
pub async fn lock_execution(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, notebook_path, parameters, status, created_at, started_at, completed_at,
               error, output_notebook, output_html, outputs,
               python_version, cpu_milli, memory_mib, requirements,
               notebook_hash, parameters_hash, execution_hash,
               callback_token, user_id, service_principal_id
        FROM nbforge.execution
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

/// Write the mutable lifecycle fields of an execution.
pub async fn update_lifecycle(conn: &mut PgConnection, execution: &Execution) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE nbforge.execution
        SET status = $2,
            started_at = $3,
            completed_at = $4,
            error = $5,
            output_notebook = $6,
            output_html = $7,
            outputs = $8
        WHERE id = $1
        "#,
    )
    .bind(execution.id)
    .bind(execution.status.as_str())
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(&execution.error)
    .bind(&execution.output_notebook)
    .bind(&execution.output_html)
    .bind(&execution.outputs)
    .execute(conn)
    .await?;

    Ok(())
}

/// List executions, newest first.
pub async fn list_executions(
    pool: &DbPool,
    notebook_path: Option<&str>,
    status: Option<ExecutionStatus>,
    owner: Option<&Owner>,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<ExecutionRow>> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, notebook_path, parameters, status, created_at, started_at, completed_at,
               error, output_notebook, output_html, outputs,
               python_version, cpu_milli, memory_mib, requirements,
               notebook_hash, parameters_hash, execution_hash,
               callback_token, user_id, service_principal_id
        FROM nbforge.execution
        WHERE ($1::TEXT IS NULL OR notebook_path = $1)
          AND ($2::TEXT IS NULL OR status = $2)
          AND ($3::TEXT IS NULL OR user_id = $3)
          AND ($4::TEXT IS NULL OR service_principal_id = $4)
        ORDER BY created_at DESC, id DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(notebook_path)
    .bind(status.map(|s| s.as_str()))
    .bind(owner.and_then(Owner::user_id))
    .bind(owner.and_then(Owner::service_principal_id))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most recently created completed, error-free execution with this hash.
pub async fn find_latest_completed(
    pool: &DbPool,
    execution_hash: &str,
    owner: Option<&Owner>,
) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, notebook_path, parameters, status, created_at, started_at, completed_at,
               error, output_notebook, output_html, outputs,
               python_version, cpu_milli, memory_mib, requirements,
               notebook_hash, parameters_hash, execution_hash,
               callback_token, user_id, service_principal_id
        FROM nbforge.execution
        WHERE execution_hash = $1
          AND status = 'completed'
          AND error IS NULL
          AND ($2::TEXT IS NULL OR user_id = $2)
          AND ($3::TEXT IS NULL OR service_principal_id = $3)
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(execution_hash)
    .bind(owner.and_then(Owner::user_id))
    .bind(owner.and_then(Owner::service_principal_id))
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
